mod event;
mod snapshot;
mod summary;
mod telemetry;

pub use event::{format_timestamp, EventType, TelemetryEvent};
pub use snapshot::MetricsSnapshot;
pub use summary::{event_counts, summary_table};
pub use telemetry::Telemetry;
