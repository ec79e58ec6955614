use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::{
    Method, SafetyError, SyntheticMarkers, SyntheticRequest, TargetAllowlist, Transport,
    TransportErrorKind, UreqTransport, SIMCITY_HMAC_SECRET_ENV, SIMCITY_REQUIRE_SIGNATURE_ENV,
};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_MAX_RETRIES: u32 = 2;
pub const DEFAULT_BACKOFF: Duration = Duration::from_millis(250);

/// Bounded retry behaviour for one request: at most `max_retries` retries after the first attempt,
/// sleeping `backoff * attempt` between them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub timeout: Duration,
    pub max_retries: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
            backoff: DEFAULT_BACKOFF,
        }
    }
}

/// What the caller wants sent.
#[derive(Debug, Clone)]
pub struct RequestSpec {
    pub method: Method,
    pub url: String,
    pub body: Option<serde_json::Value>,
    pub trace_id: Option<String>,
}

impl RequestSpec {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            url: url.into(),
            body: None,
            trace_id: None,
        }
    }

    pub fn post(url: impl Into<String>, body: serde_json::Value) -> Self {
        Self {
            method: Method::Post,
            url: url.into(),
            body: Some(body),
            trace_id: None,
        }
    }

    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self
    }
}

#[derive(Debug, Clone)]
pub struct SyntheticResponse {
    pub status: u16,
    pub body: String,
    pub trace_id: String,
    pub attempts: u32,
    pub latency: Duration,
}

impl SyntheticResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn json(&self) -> Option<serde_json::Value> {
        serde_json::from_str(&self.body).ok()
    }
}

/// The only way simulated agents talk to the system under test.
#[derive(Clone)]
pub struct SyntheticClient {
    allowlist: TargetAllowlist,
    secret: Option<String>,
    retry: RetryPolicy,
    transport: Arc<dyn Transport>,
}

impl SyntheticClient {
    pub fn new(
        allowlist: TargetAllowlist,
        secret: Option<String>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            allowlist,
            secret: secret.filter(|s| !s.is_empty()),
            retry: RetryPolicy::default(),
            transport,
        }
    }

    /// A client configured from the process environment, sending over HTTP.
    ///
    /// Fails with [SafetyError::MissingSecret] when [SIMCITY_REQUIRE_SIGNATURE_ENV] is set but no
    /// secret is.
    pub fn from_env() -> Result<Self, SafetyError> {
        let retry = RetryPolicy::default();
        let client = Self::new(
            TargetAllowlist::from_env(),
            std::env::var(SIMCITY_HMAC_SECRET_ENV).ok(),
            Arc::new(UreqTransport::new(retry.timeout)),
        );

        let required = std::env::var(SIMCITY_REQUIRE_SIGNATURE_ENV)
            .map(|v| matches!(v.trim().to_lowercase().as_str(), "1" | "true"))
            .unwrap_or(false);
        if required {
            return client.require_signature();
        }
        Ok(client)
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Fail unless a signing secret is configured.
    pub fn require_signature(self) -> Result<Self, SafetyError> {
        if self.secret.is_none() {
            return Err(SafetyError::MissingSecret);
        }
        Ok(self)
    }

    pub fn allowlist(&self) -> &TargetAllowlist {
        &self.allowlist
    }

    pub fn is_signing(&self) -> bool {
        self.secret.is_some()
    }

    /// Send one synthetic request.
    ///
    /// The target is checked against the allowlist before anything is handed to the transport.
    /// Transport errors, `5xx` and `429` are retried up to the retry policy. When retries are
    /// exhausted on an HTTP status the last response is returned, otherwise the last transport
    /// error is.
    pub fn fetch(&self, spec: RequestSpec) -> Result<SyntheticResponse, SafetyError> {
        let url = self.allowlist.check(&spec.url)?;
        let markers = SyntheticMarkers::new(spec.trace_id, self.secret.as_deref())?;

        let request = SyntheticRequest {
            method: spec.method,
            url: url.to_string(),
            headers: markers.headers(),
            body: spec.body.as_ref().map(|v| v.to_string()),
            timeout: self.retry.timeout,
        };

        let started = Instant::now();
        let mut attempt = 0;
        loop {
            attempt += 1;
            let retries_left = attempt <= self.retry.max_retries;

            match self.transport.send(&request) {
                Ok(response) if is_retryable_status(response.status) && retries_left => {
                    log::debug!(
                        "{} {} returned {}, retrying (attempt {attempt})",
                        request.method,
                        request.url,
                        response.status
                    );
                }
                Ok(response) => {
                    return Ok(SyntheticResponse {
                        status: response.status,
                        body: response.body,
                        trace_id: markers.trace_id,
                        attempts: attempt,
                        latency: started.elapsed(),
                    });
                }
                Err(e) if retries_left => {
                    log::debug!(
                        "{} {} failed with {e}, retrying (attempt {attempt})",
                        request.method,
                        request.url
                    );
                }
                Err(e) => {
                    let message = match e.kind {
                        TransportErrorKind::Timeout => {
                            format!("timed out after {:?}: {}", self.retry.timeout, e.message)
                        }
                        _ => e.message,
                    };
                    return Err(SafetyError::Transport {
                        url: request.url,
                        attempts: attempt,
                        message,
                    });
                }
            }

            std::thread::sleep(self.retry.backoff * attempt);
        }
    }
}

fn is_retryable_status(status: u16) -> bool {
    status >= 500 || status == 429
}
