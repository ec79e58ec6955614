use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Start,
    Stop,
    Tick,
    AgentSpawn,
    AgentRetire,
    AgentRestart,
    BookingCreated,
    Reschedule,
    Cancel,
    ActionFailed,
    ChatMessage,
    ChaosRetry,
    ChaosReorder,
    PolicyChange,
    InvariantViolation,
    VendorAvailability,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Start => "start",
            EventType::Stop => "stop",
            EventType::Tick => "tick",
            EventType::AgentSpawn => "agent_spawn",
            EventType::AgentRetire => "agent_retire",
            EventType::AgentRestart => "agent_restart",
            EventType::BookingCreated => "booking_created",
            EventType::Reschedule => "reschedule",
            EventType::Cancel => "cancel",
            EventType::ActionFailed => "action_failed",
            EventType::ChatMessage => "chat_message",
            EventType::ChaosRetry => "chaos_retry",
            EventType::ChaosReorder => "chaos_reorder",
            EventType::PolicyChange => "policy_change",
            EventType::InvariantViolation => "invariant_violation",
            EventType::VendorAvailability => "vendor_availability",
        }
    }

    /// Events produced by an agent acting on the system under test, as opposed to bookkeeping
    /// produced by the orchestrator itself.
    pub fn is_agent_event(&self) -> bool {
        !matches!(
            self,
            EventType::Start
                | EventType::Stop
                | EventType::Tick
                | EventType::PolicyChange
                | EventType::InvariantViolation
        )
    }

    /// Outcomes of an agent action against the booking API, successful or not.
    pub fn is_action(&self) -> bool {
        matches!(
            self,
            EventType::BookingCreated
                | EventType::Reschedule
                | EventType::Cancel
                | EventType::VendorAvailability
                | EventType::ActionFailed
        )
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One immutable entry of the event log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryEvent {
    /// Position in the log, starting at zero.
    pub index: u64,
    #[serde(rename = "type")]
    pub event_type: EventType,
    /// ISO-8601 timestamp, millisecond precision, UTC.
    pub timestamp: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl TelemetryEvent {
    pub fn data_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(|v| v.as_str())
    }

    pub fn data_f64(&self, key: &str) -> Option<f64> {
        self.data.get(key).and_then(|v| v.as_f64())
    }

    pub fn data_u64(&self, key: &str) -> Option<u64> {
        self.data.get(key).and_then(|v| v.as_u64())
    }
}

pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn serializes_with_wire_names() {
        let event = TelemetryEvent {
            index: 3,
            event_type: EventType::BookingCreated,
            timestamp: "2024-01-01T09:00:00.000Z".to_string(),
            data: serde_json::json!({"bookingId": "b-1"}),
        };

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "index": 3,
                "type": "booking_created",
                "timestamp": "2024-01-01T09:00:00.000Z",
                "data": {"bookingId": "b-1"},
            })
        );
        assert_eq!(EventType::BookingCreated.to_string(), "booking_created");
    }

    #[test]
    fn missing_data_defaults_to_null() {
        let event: TelemetryEvent = serde_json::from_str(
            r#"{"index":0,"type":"tick","timestamp":"2024-01-01T00:00:00.000Z"}"#,
        )
        .unwrap();
        assert_eq!(event.data, serde_json::Value::Null);
    }
}
