use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

use parking_lot::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Method::Get => "GET",
            Method::Post => "POST",
        })
    }
}

/// A fully prepared request, marker headers included, as handed to a [Transport].
#[derive(Debug, Clone, PartialEq)]
pub struct SyntheticRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
    pub timeout: Duration,
}

impl SyntheticRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransportResponse {
    pub status: u16,
    pub body: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    Timeout,
    Connect,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind:?}: {message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// The network seam. Only the safety layer calls this, after every check has passed.
pub trait Transport: Send + Sync {
    fn send(&self, request: &SyntheticRequest) -> Result<TransportResponse, TransportError>;
}

/// Blocking HTTP transport.
///
/// Status codes are returned as responses rather than errors so that the caller decides what is
/// retryable.
pub struct UreqTransport {
    agent: ureq::Agent,
}

impl UreqTransport {
    pub fn new(timeout: Duration) -> Self {
        let agent = ureq::config::Config::builder()
            .timeout_global(Some(timeout))
            .http_status_as_error(false)
            .build()
            .new_agent();

        Self { agent }
    }
}

impl Transport for UreqTransport {
    fn send(&self, request: &SyntheticRequest) -> Result<TransportResponse, TransportError> {
        let body = request.body.clone().unwrap_or_default();

        let result = match request.method {
            Method::Get => {
                let mut builder = self.agent.get(&request.url);
                for (name, value) in &request.headers {
                    builder = builder.header(name.as_str(), value.as_str());
                }
                builder.call()
            }
            Method::Post => {
                let mut builder = self.agent.post(&request.url);
                for (name, value) in &request.headers {
                    builder = builder.header(name.as_str(), value.as_str());
                }
                builder
                    .header("Content-Type", "application/json")
                    .send(body.as_str())
            }
        };

        let mut response = result.map_err(map_ureq_error)?;
        let status = response.status().as_u16();
        let body = response
            .body_mut()
            .read_to_string()
            .map_err(map_ureq_error)?;

        Ok(TransportResponse { status, body })
    }
}

fn map_ureq_error(err: ureq::Error) -> TransportError {
    let kind = match &err {
        ureq::Error::Timeout(_) => TransportErrorKind::Timeout,
        ureq::Error::Io(_) => TransportErrorKind::Connect,
        _ => TransportErrorKind::Other,
    };
    TransportError::new(kind, err.to_string())
}

/// In-memory transport that records every request it is asked to send.
///
/// Responses are served from a queue, falling back to `200 {}` once it is empty.
#[derive(Default)]
pub struct RecordingTransport {
    requests: Mutex<Vec<SyntheticRequest>>,
    responses: Mutex<VecDeque<Result<TransportResponse, TransportError>>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_response(&self, status: u16, body: impl Into<String>) {
        self.responses.lock().push_back(Ok(TransportResponse {
            status,
            body: body.into(),
        }));
    }

    pub fn push_error(&self, kind: TransportErrorKind, message: impl Into<String>) {
        self.responses
            .lock()
            .push_back(Err(TransportError::new(kind, message)));
    }

    pub fn requests(&self) -> Vec<SyntheticRequest> {
        self.requests.lock().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }
}

impl Transport for RecordingTransport {
    fn send(&self, request: &SyntheticRequest) -> Result<TransportResponse, TransportError> {
        self.requests.lock().push(request.clone());
        self.responses.lock().pop_front().unwrap_or_else(|| {
            Ok(TransportResponse {
                status: 200,
                body: "{}".to_string(),
            })
        })
    }
}
