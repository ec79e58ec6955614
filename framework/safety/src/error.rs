use simcity_core::prelude::EnvironmentError;

/// Failures raised by the safety layer.
///
/// Everything except [SafetyError::Transport] is a configuration or environment violation and is
/// raised before any request leaves the process.
#[derive(Debug, thiserror::Error)]
pub enum SafetyError {
    #[error("Target URL is not allowed for synthetic traffic: {0}")]
    TargetNotAllowed(String),
    #[error("Target URL is invalid: {url}: {reason}")]
    InvalidTarget { url: String, reason: String },
    #[error("Synthetic traffic is not allowed in this environment: {0}")]
    EnvironmentNotAllowed(#[from] EnvironmentError),
    #[error("SIMCITY_HMAC_SECRET is not configured but signed synthetic traffic is required")]
    MissingSecret,
    #[error("Request to {url} failed after {attempts} attempt(s): {message}")]
    Transport {
        url: String,
        attempts: u32,
        message: String,
    },
}

impl SafetyError {
    /// True for errors that are raised before any network IO and must never be retried.
    pub fn is_configuration(&self) -> bool {
        !matches!(self, Self::Transport { .. })
    }
}
