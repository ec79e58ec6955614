use serde_json::Value;
use simcity_safety::{normalize_target, RequestSpec, SafetyError, SyntheticClient};
use url::Url;

use crate::{ApiError, ApiOutcome, BookingApi, BookingCall, CallContext};

const ERROR_BODY_LIMIT: usize = 200;

/// The booking system reached over HTTP, every call going through the safety layer.
pub struct HttpBookingApi {
    client: SyntheticClient,
    base_url: String,
    base: Url,
}

impl HttpBookingApi {
    /// Fails if the target is not allowed, so a misconfigured run stops before its first call.
    pub fn new(client: SyntheticClient, target_url: &str) -> Result<Self, SafetyError> {
        let base_url = normalize_target(target_url)?;
        client.allowlist().check(&base_url)?;
        let base = Url::parse(&base_url)
            .ok()
            .filter(|url| !url.cannot_be_a_base())
            .ok_or_else(|| SafetyError::InvalidTarget {
                url: base_url.clone(),
                reason: "not a base URL".to_string(),
            })?;

        Ok(Self {
            client,
            base_url,
            base,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Booking ids come back from the system under test and are percent-encoded as a single
    /// path segment.
    fn url_for(&self, call: &BookingCall) -> String {
        let mut url = self.base.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty();
            match call {
                BookingCall::Create { .. } => segments.extend(["api", "bookings", "create"]),
                BookingCall::Reschedule { booking_id, .. } => {
                    segments.extend(["api", "bookings", booking_id.as_str(), "reschedule"])
                }
                BookingCall::Cancel { booking_id } => {
                    segments.extend(["api", "bookings", booking_id.as_str(), "cancel"])
                }
                BookingCall::Availability { .. } => {
                    segments.extend(["api", "vendor", "availability"])
                }
            };
        }
        url.into()
    }
}

/// Accepts both `{"id": ..}` and `{"booking": {"id": ..}}` response shapes.
fn extract_booking_id(body: &Value) -> Option<String> {
    let id = body
        .get("id")
        .or_else(|| body.get("booking").and_then(|b| b.get("id")))?;
    match id {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

impl BookingApi for HttpBookingApi {
    fn execute(&self, ctx: &CallContext, call: &BookingCall) -> Result<ApiOutcome, ApiError> {
        let spec = RequestSpec::post(self.url_for(call), call.body()).with_trace_id(&ctx.trace_id);

        match self.client.fetch(spec) {
            Ok(response) => {
                let latency_ms = response.latency.as_millis() as u64;
                if response.is_success() {
                    let booking_id = match call {
                        BookingCall::Reschedule { booking_id, .. }
                        | BookingCall::Cancel { booking_id } => response
                            .json()
                            .as_ref()
                            .and_then(extract_booking_id)
                            .or_else(|| Some(booking_id.clone())),
                        _ => response.json().as_ref().and_then(extract_booking_id),
                    };
                    Ok(ApiOutcome {
                        status: response.status,
                        booking_id,
                        latency_ms,
                    })
                } else {
                    let message: String = response.body.chars().take(ERROR_BODY_LIMIT).collect();
                    Err(ApiError::rejected(response.status, message, latency_ms))
                }
            }
            Err(e) => {
                let fatal = e.is_configuration();
                if fatal {
                    log::error!("Synthetic request refused for {}: {e}", ctx.agent_id);
                }
                Err(ApiError {
                    status: None,
                    message: e.to_string(),
                    latency_ms: 0,
                    fatal,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use simcity_core::prelude::DeployEnvironment;
    use simcity_safety::{
        RecordingTransport, RetryPolicy, TargetAllowlist, TransportErrorKind,
        HEADER_SYNTHETIC_TRACE,
    };
    use std::sync::Arc;
    use std::time::Duration;

    fn api(transport: Arc<RecordingTransport>) -> HttpBookingApi {
        let client = SyntheticClient::new(
            TargetAllowlist::new(DeployEnvironment::Test, vec![]),
            None,
            transport,
        )
        .with_retry_policy(RetryPolicy {
            timeout: Duration::from_secs(1),
            max_retries: 1,
            backoff: Duration::ZERO,
        });
        HttpBookingApi::new(client, "http://localhost:3000/").unwrap()
    }

    fn ctx() -> CallContext {
        CallContext {
            agent_id: "customer-1".to_string(),
            trace_id: "trace-abc".to_string(),
        }
    }

    #[test]
    fn create_posts_tagged_body_and_reads_nested_id() {
        let transport = Arc::new(RecordingTransport::new());
        transport.push_response(201, r#"{"booking":{"id":"bk-77"}}"#);

        let outcome = api(transport.clone())
            .execute(
                &ctx(),
                &BookingCall::Create {
                    customer_email: "a@synthetic.simcity.test".to_string(),
                    slot: 4,
                    fee: 1.0,
                },
            )
            .unwrap();
        assert_eq!(outcome.booking_id.as_deref(), Some("bk-77"));

        let request = &transport.requests()[0];
        assert_eq!(request.url, "http://localhost:3000/api/bookings/create");
        assert_eq!(request.header(HEADER_SYNTHETIC_TRACE), Some("trace-abc"));
        let body: Value = serde_json::from_str(request.body.as_deref().unwrap()).unwrap();
        assert_eq!(body["slotId"], 4);
        assert_eq!(body["syntheticSource"], "simcity");
    }

    #[test]
    fn rejections_and_transport_failures_are_not_fatal() {
        let transport = Arc::new(RecordingTransport::new());
        transport.push_response(409, "slot taken");
        transport.push_error(TransportErrorKind::Connect, "reset");
        transport.push_error(TransportErrorKind::Connect, "reset");

        let api = api(transport);
        let cancel = BookingCall::Cancel {
            booking_id: "bk-1".to_string(),
        };

        let rejected = api.execute(&ctx(), &cancel).unwrap_err();
        assert_eq!(rejected.status, Some(409));
        assert_eq!(rejected.message, "slot taken");
        assert!(!rejected.fatal);

        let failed = api.execute(&ctx(), &cancel).unwrap_err();
        assert_eq!(failed.status, None);
        assert!(!failed.fatal);
    }

    #[test]
    fn booking_ids_are_encoded_as_one_path_segment() {
        let transport = Arc::new(RecordingTransport::new());
        transport.push_response(200, r#"{"ok":true}"#);
        transport.push_response(200, r#"{"ok":true}"#);

        let api = api(transport.clone());
        api.execute(
            &ctx(),
            &BookingCall::Cancel {
                booking_id: "bk/../admin?x=1".to_string(),
            },
        )
        .unwrap();
        api.execute(
            &ctx(),
            &BookingCall::Cancel {
                booking_id: "bk 9".to_string(),
            },
        )
        .unwrap();

        let urls: Vec<_> = transport.requests().into_iter().map(|r| r.url).collect();
        assert_eq!(
            urls,
            vec![
                "http://localhost:3000/api/bookings/bk%2F..%2Fadmin%3Fx=1/cancel".to_string(),
                "http://localhost:3000/api/bookings/bk%209/cancel".to_string(),
            ]
        );
    }

    #[test]
    fn disallowed_target_is_refused_at_construction() {
        let client = SyntheticClient::new(
            TargetAllowlist::new(DeployEnvironment::Test, vec![]),
            None,
            Arc::new(RecordingTransport::new()),
        );
        assert!(HttpBookingApi::new(client, "https://bookings.example.com").is_err());
    }

    #[test]
    fn booking_id_shapes() {
        assert_eq!(
            extract_booking_id(&serde_json::json!({"id": 12})),
            Some("12".to_string())
        );
        assert_eq!(extract_booking_id(&serde_json::json!({"ok": true})), None);
    }
}
