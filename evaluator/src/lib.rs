mod dials;
mod evaluate;
mod evaluator;
mod metrics;
mod replay;

pub use dials::{default_dials, Dial, DialKind, DialSet, DialStatus, DEFAULT_DIALS_VERSION};
pub use evaluate::{evaluate_replay_variant, ReplayEvaluation, ReplayVariantInput, Verdict};
pub use evaluator::{EvaluationError, Evaluator, RunLookup};
pub use metrics::{compute_metric_deltas, compute_metrics_from_events, percentile, Metrics};
pub use replay::{
    run_replay_variant, simulate_window, Intervention, ReplayVariantError, ReplayVariantRequest,
    ReplayVariantSummary,
};
