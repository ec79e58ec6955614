use serde::{Deserialize, Serialize};

use crate::{EventType, TelemetryEvent};

/// Running counters over the event log.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub bookings_created: u64,
    pub reschedules: u64,
    pub cancels: u64,
    pub total_agents_spawned: u64,
    pub active_agents: u64,
    pub failed_actions: u64,
    pub invariant_violations: u64,
    pub revenue: f64,
    /// Milliseconds since [crate::Telemetry::start], zero if never started.
    pub uptime: u64,
}

impl MetricsSnapshot {
    /// Fold one event into the counters.
    pub fn apply(&mut self, event: &TelemetryEvent) {
        match event.event_type {
            EventType::AgentSpawn => {
                self.total_agents_spawned += 1;
                self.active_agents += 1;
            }
            EventType::AgentRetire => {
                self.active_agents = self.active_agents.saturating_sub(1);
            }
            EventType::BookingCreated => {
                self.bookings_created += 1;
                self.revenue += event.data_f64("fee").unwrap_or_default();
            }
            EventType::Reschedule => self.reschedules += 1,
            EventType::Cancel => self.cancels += 1,
            EventType::ActionFailed => self.failed_actions += 1,
            EventType::InvariantViolation => self.invariant_violations += 1,
            _ => {}
        }
    }
}
