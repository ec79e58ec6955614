use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::json;
use simcity_telemetry::{EventType, Telemetry, TelemetryEvent};

/// A broken invariant, with enough context to find the offending events again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Violation {
    pub invariant: String,
    pub event_index: u64,
    pub message: String,
    pub forensic: serde_json::Value,
}

/// Watches the telemetry stream for one invariant of the system under test.
///
/// Events of different agents within one tick are not ordered, so an observer that relates
/// events across agents must not judge before the tick is over.
pub trait InvariantObserver: Send {
    fn name(&self) -> &'static str;

    fn observe(&mut self, event: &TelemetryEvent) -> Vec<Violation>;

    /// The stream has ended, report anything still pending.
    fn finish(&mut self) -> Vec<Violation> {
        Vec::new()
    }
}

pub fn default_observers() -> Vec<Box<dyn InvariantObserver>> {
    vec![
        Box::new(SlotDoubleBooked::default()),
        Box::new(CancelledBookingResurrected::default()),
        Box::new(AgentLifecycleOrder::default()),
    ]
}

/// Feeds new telemetry events to a set of observers, remembering how far it has read.
pub struct InvariantChecker {
    observers: Vec<Box<dyn InvariantObserver>>,
    cursor: u64,
}

impl Default for InvariantChecker {
    fn default() -> Self {
        Self::new(default_observers())
    }
}

impl InvariantChecker {
    pub fn new(observers: Vec<Box<dyn InvariantObserver>>) -> Self {
        Self {
            observers,
            cursor: 0,
        }
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.observers.iter().map(|o| o.name()).collect()
    }

    /// Observe every event appended since the previous call.
    pub fn check(&mut self, telemetry: &Telemetry) -> Vec<Violation> {
        let events = telemetry.events_since(self.cursor);
        self.observe_all(&events)
    }

    pub fn observe_all(&mut self, events: &[TelemetryEvent]) -> Vec<Violation> {
        let mut violations = Vec::new();
        for event in events {
            self.cursor = event.index + 1;
            for observer in self.observers.iter_mut() {
                violations.extend(observer.observe(event));
            }
        }
        log_violations(&violations);
        violations
    }

    pub fn finish(&mut self) -> Vec<Violation> {
        let violations: Vec<Violation> = self
            .observers
            .iter_mut()
            .flat_map(|observer| observer.finish())
            .collect();
        log_violations(&violations);
        violations
    }
}

fn log_violations(violations: &[Violation]) {
    for violation in violations {
        log::warn!(
            "Invariant {} violated at event {}: {}",
            violation.invariant,
            violation.event_index,
            violation.message
        );
    }
}

/// No slot is held by two live bookings at once.
///
/// A claim on a held slot is only a violation if the holder has not released it by the end of
/// the tick.
#[derive(Default)]
pub struct SlotDoubleBooked {
    holders: HashMap<u64, String>,
    suspects: Vec<SuspectClaim>,
}

struct SuspectClaim {
    slot: u64,
    booking_id: String,
    holder: String,
    event: TelemetryEvent,
}

impl SlotDoubleBooked {
    pub const NAME: &'static str = "slot_double_booked";

    fn claim(&mut self, event: &TelemetryEvent, slot: u64, booking_id: &str) {
        match self.holders.get(&slot) {
            Some(holder) if holder != booking_id => {
                let holder = holder.clone();
                self.suspects.push(SuspectClaim {
                    slot,
                    booking_id: booking_id.to_string(),
                    holder,
                    event: event.clone(),
                });
            }
            _ => {
                self.holders.insert(slot, booking_id.to_string());
            }
        }
    }

    fn release(&mut self, slot: u64, booking_id: &str) {
        if let Some(position) = self
            .suspects
            .iter()
            .position(|s| s.slot == slot && s.booking_id == booking_id)
        {
            self.suspects.remove(position);
            return;
        }

        if self.holders.get(&slot).is_some_and(|h| h == booking_id) {
            self.holders.remove(&slot);
            if let Some(position) = self.suspects.iter().position(|s| s.slot == slot) {
                let promoted = self.suspects.remove(position);
                self.holders.insert(slot, promoted.booking_id);
            }
        }
    }

    fn flush(&mut self) -> Vec<Violation> {
        self.suspects
            .drain(..)
            .map(|s| Violation {
                invariant: Self::NAME.to_string(),
                event_index: s.event.index,
                message: format!(
                    "slot {} booked by {} while held by {}",
                    s.slot, s.booking_id, s.holder
                ),
                forensic: json!({
                    "slotId": s.slot,
                    "heldBy": s.holder,
                    "bookingId": s.booking_id,
                    "event": s.event,
                }),
            })
            .collect()
    }
}

impl InvariantObserver for SlotDoubleBooked {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn observe(&mut self, event: &TelemetryEvent) -> Vec<Violation> {
        if matches!(event.event_type, EventType::Tick | EventType::Stop) {
            return self.flush();
        }

        let Some(booking_id) = event.data_str("bookingId") else {
            return Vec::new();
        };
        match event.event_type {
            EventType::BookingCreated => {
                if let Some(slot) = event.data_u64("slotId") {
                    self.claim(event, slot, booking_id);
                }
            }
            EventType::Reschedule => {
                if let (Some(from), Some(to)) =
                    (event.data_u64("fromSlot"), event.data_u64("toSlot"))
                {
                    self.release(from, booking_id);
                    self.claim(event, to, booking_id);
                }
            }
            EventType::Cancel => {
                if let Some(slot) = event.data_u64("slotId") {
                    self.release(slot, booking_id);
                }
            }
            _ => {}
        }
        Vec::new()
    }

    fn finish(&mut self) -> Vec<Violation> {
        self.flush()
    }
}

/// Once a cancel has succeeded the booking system never acts on that booking again.
#[derive(Default)]
pub struct CancelledBookingResurrected {
    cancelled: HashMap<String, u64>,
}

impl CancelledBookingResurrected {
    pub const NAME: &'static str = "cancelled_booking_resurrected";
}

impl InvariantObserver for CancelledBookingResurrected {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn observe(&mut self, event: &TelemetryEvent) -> Vec<Violation> {
        if !matches!(
            event.event_type,
            EventType::BookingCreated | EventType::Reschedule | EventType::Cancel
        ) {
            return Vec::new();
        }
        let Some(booking_id) = event.data_str("bookingId") else {
            return Vec::new();
        };

        if let Some(cancelled_at) = self.cancelled.get(booking_id) {
            return vec![Violation {
                invariant: Self::NAME.to_string(),
                event_index: event.index,
                message: format!(
                    "booking {booking_id} accepted {} after being cancelled at event {cancelled_at}",
                    event.event_type
                ),
                forensic: json!({
                    "bookingId": booking_id,
                    "cancelledAt": cancelled_at,
                    "event": event,
                }),
            }];
        }

        if event.event_type == EventType::Cancel {
            self.cancelled.insert(booking_id.to_string(), event.index);
        }
        Vec::new()
    }
}

/// Each agent is spawned once, acts only while live and emits nothing after retiring.
#[derive(Default)]
pub struct AgentLifecycleOrder {
    live: HashSet<String>,
    retired: HashSet<String>,
}

impl AgentLifecycleOrder {
    pub const NAME: &'static str = "agent_lifecycle_order";
}

impl InvariantObserver for AgentLifecycleOrder {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn observe(&mut self, event: &TelemetryEvent) -> Vec<Violation> {
        if !event.event_type.is_agent_event() {
            return Vec::new();
        }
        let Some(agent_id) = event.data_str("agentId") else {
            return Vec::new();
        };
        let known = self.live.contains(agent_id) || self.retired.contains(agent_id);

        let problem = match event.event_type {
            EventType::AgentSpawn if known => Some("spawned twice"),
            EventType::AgentSpawn => {
                self.live.insert(agent_id.to_string());
                None
            }
            _ if self.retired.contains(agent_id) => Some("acted after retiring"),
            _ if !known => Some("acted before spawning"),
            EventType::AgentRetire => {
                self.live.remove(agent_id);
                self.retired.insert(agent_id.to_string());
                None
            }
            _ => None,
        };

        problem
            .map(|problem| Violation {
                invariant: Self::NAME.to_string(),
                event_index: event.index,
                message: format!("agent {agent_id} {problem} ({})", event.event_type),
                forensic: json!({"agentId": agent_id, "event": event}),
            })
            .into_iter()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn event(index: u64, event_type: EventType, data: serde_json::Value) -> TelemetryEvent {
        TelemetryEvent {
            index,
            event_type,
            timestamp: "2024-01-01T08:00:00.000Z".to_string(),
            data,
        }
    }

    fn slots() -> InvariantChecker {
        InvariantChecker::new(vec![Box::new(SlotDoubleBooked::default())])
    }

    #[test]
    fn double_booking_is_caught_at_the_tick_boundary() {
        let mut checker = slots();
        let violations = checker.observe_all(&[
            event(0, EventType::BookingCreated, json!({"bookingId": "a", "slotId": 1})),
            event(1, EventType::BookingCreated, json!({"bookingId": "b", "slotId": 2})),
            event(
                2,
                EventType::Reschedule,
                json!({"bookingId": "b", "fromSlot": 2, "toSlot": 3}),
            ),
            event(3, EventType::BookingCreated, json!({"bookingId": "c", "slotId": 2})),
            event(4, EventType::BookingCreated, json!({"bookingId": "d", "slotId": 1})),
        ]);
        assert_eq!(violations, vec![]);

        let violations = checker.observe_all(&[event(5, EventType::Tick, json!({"tick": 2}))]);
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].invariant, "slot_double_booked");
        assert_eq!(violations[0].event_index, 4);
        assert_eq!(violations[0].forensic["heldBy"], "a");
    }

    #[test]
    fn release_later_in_the_same_tick_is_not_a_violation() {
        let mut checker = slots();
        let violations = checker.observe_all(&[
            event(0, EventType::BookingCreated, json!({"bookingId": "a", "slotId": 1})),
            event(1, EventType::Tick, json!({})),
            // Logged before the cancel that freed the slot, from another agent.
            event(2, EventType::BookingCreated, json!({"bookingId": "b", "slotId": 1})),
            event(3, EventType::Cancel, json!({"bookingId": "a", "slotId": 1})),
            event(4, EventType::Tick, json!({})),
            event(5, EventType::BookingCreated, json!({"bookingId": "c", "slotId": 1})),
        ]);
        assert_eq!(violations, vec![]);

        // b now holds the slot, so c is pending until the stream ends.
        let pending = checker.finish();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].forensic["heldBy"], "b");
    }

    #[test]
    fn resurrection_is_caught() {
        let mut checker =
            InvariantChecker::new(vec![Box::new(CancelledBookingResurrected::default())]);
        let violations = checker.observe_all(&[
            event(0, EventType::BookingCreated, json!({"bookingId": "a", "slotId": 1})),
            event(1, EventType::Cancel, json!({"bookingId": "a", "slotId": 1})),
            event(
                2,
                EventType::Reschedule,
                json!({"bookingId": "a", "fromSlot": 1, "toSlot": 5}),
            ),
        ]);
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].forensic["cancelledAt"], 1);
    }

    #[test]
    fn lifecycle_order() {
        let mut checker = InvariantChecker::new(vec![Box::new(AgentLifecycleOrder::default())]);
        let violations = checker.observe_all(&[
            event(0, EventType::ChatMessage, json!({"agentId": "customer-9"})),
            event(1, EventType::AgentSpawn, json!({"agentId": "customer-0"})),
            event(2, EventType::BookingCreated, json!({"agentId": "customer-0"})),
            event(3, EventType::AgentRetire, json!({"agentId": "customer-0"})),
            event(4, EventType::Cancel, json!({"agentId": "customer-0"})),
            event(5, EventType::Tick, json!({})),
        ]);
        let indices: Vec<u64> = violations.iter().map(|v| v.event_index).collect();
        assert_eq!(indices, vec![0, 4]);
    }

    #[test]
    fn checker_resumes_from_cursor() {
        let telemetry = Telemetry::new();
        let mut checker = InvariantChecker::default();
        assert_eq!(
            checker.names(),
            vec![
                "slot_double_booked",
                "cancelled_booking_resurrected",
                "agent_lifecycle_order"
            ]
        );

        let at = chrono::Utc::now();
        telemetry.log(EventType::AgentSpawn, at, json!({"agentId": "customer-0"}));
        assert!(checker.check(&telemetry).is_empty());

        telemetry.log(
            EventType::BookingCreated,
            at,
            json!({"agentId": "customer-0", "bookingId": "a", "slotId": 1}),
        );
        telemetry.log(
            EventType::BookingCreated,
            at,
            json!({"agentId": "customer-0", "bookingId": "b", "slotId": 1}),
        );
        telemetry.log(EventType::Tick, at, json!({"tick": 1}));
        let violations = checker.check(&telemetry);
        assert_eq!(violations.len(), 1);
        assert!(checker.check(&telemetry).is_empty());
        assert!(checker.finish().is_empty());
    }
}
