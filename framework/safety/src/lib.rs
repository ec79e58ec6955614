//! The single hard boundary between the simulation and the outside world.
//!
//! Every request issued on behalf of a simulated agent goes through [SyntheticClient::fetch],
//! which refuses targets outside the [TargetAllowlist] before any IO, stamps the synthetic marker
//! headers and bounds the call with a timeout and a linear-backoff retry loop.

mod allowlist;
mod client;
mod error;
mod headers;
mod transport;

pub use allowlist::{normalize_target, TargetAllowlist, SIMCITY_ALLOWED_TARGET_HOSTS_ENV};
pub use client::{
    RequestSpec, RetryPolicy, SyntheticClient, SyntheticResponse, DEFAULT_BACKOFF,
    DEFAULT_MAX_RETRIES, DEFAULT_TIMEOUT,
};
pub use error::SafetyError;
pub use headers::{
    sign_trace, SyntheticMarkers, HEADER_SYNTHETIC, HEADER_SYNTHETIC_SIGNATURE,
    HEADER_SYNTHETIC_TRACE, HEADER_SYNTHETIC_VERSION, SIMCITY_HMAC_SECRET_ENV,
    SIMCITY_REQUIRE_SIGNATURE_ENV, SYNTHETIC_SOURCE, SYNTHETIC_VERSION,
};
pub use transport::{
    Method, RecordingTransport, SyntheticRequest, Transport, TransportError, TransportErrorKind,
    TransportResponse, UreqTransport,
};
