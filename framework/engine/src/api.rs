use std::collections::HashMap;

use parking_lot::Mutex;
use serde_json::{json, Value};
use simcity_core::prelude::Seed;

/// One call an agent makes against the booking system.
#[derive(Debug, Clone, PartialEq)]
pub enum BookingCall {
    Create {
        customer_email: String,
        slot: u32,
        fee: f64,
    },
    Reschedule {
        booking_id: String,
        slot: u32,
    },
    Cancel {
        booking_id: String,
    },
    Availability {
        vendor_email: String,
        slots: Vec<u32>,
    },
}

impl BookingCall {
    /// Capability id of the call, used as the `action` field of telemetry.
    pub fn action(&self) -> &'static str {
        match self {
            BookingCall::Create { .. } => "booking.create",
            BookingCall::Reschedule { .. } => "booking.reschedule",
            BookingCall::Cancel { .. } => "booking.cancel",
            BookingCall::Availability { .. } => "vendor.availability",
        }
    }

    /// JSON request body, tagged with the synthetic source so rows written from it can be purged.
    pub fn body(&self) -> Value {
        match self {
            BookingCall::Create {
                customer_email,
                slot,
                fee,
            } => json!({
                "customerEmail": customer_email,
                "slotId": slot,
                "fee": fee,
                "syntheticSource": simcity_safety::SYNTHETIC_SOURCE,
            }),
            BookingCall::Reschedule { slot, .. } => json!({
                "slotId": slot,
                "syntheticSource": simcity_safety::SYNTHETIC_SOURCE,
            }),
            BookingCall::Cancel { .. } => json!({
                "syntheticSource": simcity_safety::SYNTHETIC_SOURCE,
            }),
            BookingCall::Availability {
                vendor_email,
                slots,
            } => json!({
                "vendorEmail": vendor_email,
                "slots": slots,
                "syntheticSource": simcity_safety::SYNTHETIC_SOURCE,
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallContext {
    pub agent_id: String,
    pub trace_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiOutcome {
    pub status: u16,
    pub booking_id: Option<String>,
    pub latency_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ApiError {
    pub status: Option<u16>,
    pub message: String,
    pub latency_ms: u64,
    /// Set for configuration and safety violations, which halt the simulation rather than being
    /// absorbed as a failed action.
    pub fatal: bool,
}

impl ApiError {
    pub fn rejected(status: u16, message: impl Into<String>, latency_ms: u64) -> Self {
        Self {
            status: Some(status),
            message: message.into(),
            latency_ms,
            fatal: false,
        }
    }
}

/// The public surface of the booking system, as seen by agents.
pub trait BookingApi: Send + Sync {
    fn execute(&self, ctx: &CallContext, call: &BookingCall) -> Result<ApiOutcome, ApiError>;
}

#[derive(Debug, Clone)]
struct StoredBooking {
    slot: u32,
    cancelled: bool,
}

#[derive(Default)]
struct InMemoryState {
    bookings: HashMap<String, StoredBooking>,
    slot_holders: HashMap<u32, String>,
    availability_updates: u64,
}

/// A booking system double that keeps its state in memory.
///
/// Booking ids are derived from the request trace id and latencies from a hash of it, so the same
/// sequence of calls always produces the same answers.
pub struct InMemoryBookingApi {
    state: Mutex<InMemoryState>,
    conflict_checks: bool,
}

impl Default for InMemoryBookingApi {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBookingApi {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(InMemoryState::default()),
            conflict_checks: true,
        }
    }

    /// A double that accepts any booking for any slot, the defect slot invariants exist to catch.
    pub fn without_conflict_checks() -> Self {
        Self {
            state: Mutex::new(InMemoryState::default()),
            conflict_checks: false,
        }
    }

    pub fn active_bookings(&self) -> usize {
        self.state
            .lock()
            .bookings
            .values()
            .filter(|b| !b.cancelled)
            .count()
    }

    pub fn availability_updates(&self) -> u64 {
        self.state.lock().availability_updates
    }
}

fn simulated_latency(trace_id: &str) -> u64 {
    10 + Seed::new(trace_id).to_u64() % 40
}

impl BookingApi for InMemoryBookingApi {
    fn execute(&self, ctx: &CallContext, call: &BookingCall) -> Result<ApiOutcome, ApiError> {
        let latency_ms = simulated_latency(&ctx.trace_id);
        let mut state = self.state.lock();

        let booking_id = match call {
            BookingCall::Create { slot, .. } => {
                if self.conflict_checks && state.slot_holders.contains_key(slot) {
                    return Err(ApiError::rejected(409, "slot already booked", latency_ms));
                }
                let mut id = format!("bk-{}", ctx.trace_id);
                if state.bookings.contains_key(&id) {
                    id = format!("{id}-{}", state.bookings.len());
                }
                state.bookings.insert(
                    id.clone(),
                    StoredBooking {
                        slot: *slot,
                        cancelled: false,
                    },
                );
                state.slot_holders.insert(*slot, id.clone());
                Some(id)
            }
            BookingCall::Reschedule { booking_id, slot } => {
                let Some(current) = state.bookings.get(booking_id).cloned() else {
                    return Err(ApiError::rejected(404, "booking not found", latency_ms));
                };
                if current.cancelled {
                    return Err(ApiError::rejected(409, "booking is cancelled", latency_ms));
                }
                if self.conflict_checks
                    && state
                        .slot_holders
                        .get(slot)
                        .is_some_and(|holder| holder != booking_id)
                {
                    return Err(ApiError::rejected(409, "slot already booked", latency_ms));
                }
                if state.slot_holders.get(&current.slot) == Some(booking_id) {
                    state.slot_holders.remove(&current.slot);
                }
                state.slot_holders.insert(*slot, booking_id.clone());
                if let Some(stored) = state.bookings.get_mut(booking_id) {
                    stored.slot = *slot;
                }
                Some(booking_id.clone())
            }
            BookingCall::Cancel { booking_id } => {
                let Some(current) = state.bookings.get(booking_id).cloned() else {
                    return Err(ApiError::rejected(404, "booking not found", latency_ms));
                };
                if current.cancelled {
                    return Err(ApiError::rejected(
                        409,
                        "booking already cancelled",
                        latency_ms,
                    ));
                }
                if state.slot_holders.get(&current.slot) == Some(booking_id) {
                    state.slot_holders.remove(&current.slot);
                }
                if let Some(stored) = state.bookings.get_mut(booking_id) {
                    stored.cancelled = true;
                }
                Some(booking_id.clone())
            }
            BookingCall::Availability { .. } => {
                state.availability_updates += 1;
                None
            }
        };

        Ok(ApiOutcome {
            status: 200,
            booking_id,
            latency_ms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn ctx(trace: &str) -> CallContext {
        CallContext {
            agent_id: "customer-0".to_string(),
            trace_id: trace.to_string(),
        }
    }

    fn create(slot: u32) -> BookingCall {
        BookingCall::Create {
            customer_email: "c@synthetic.simcity.test".to_string(),
            slot,
            fee: 1.0,
        }
    }

    #[test]
    fn conflicting_slot_is_rejected() {
        let api = InMemoryBookingApi::new();
        let first = api.execute(&ctx("t1"), &create(3)).unwrap();
        assert_eq!(first.booking_id.as_deref(), Some("bk-t1"));

        let err = api.execute(&ctx("t2"), &create(3)).unwrap_err();
        assert_eq!(err.status, Some(409));
        assert!(!err.fatal);
    }

    #[test]
    fn cancelled_bookings_stay_cancelled() {
        let api = InMemoryBookingApi::new();
        let id = api
            .execute(&ctx("t1"), &create(1))
            .unwrap()
            .booking_id
            .unwrap();
        api.execute(
            &ctx("t2"),
            &BookingCall::Cancel {
                booking_id: id.clone(),
            },
        )
        .unwrap();

        let err = api
            .execute(
                &ctx("t3"),
                &BookingCall::Reschedule {
                    booking_id: id,
                    slot: 2,
                },
            )
            .unwrap_err();
        assert_eq!(err.status, Some(409));
        assert_eq!(api.active_bookings(), 0);

        // The slot was released by the cancel.
        assert!(api.execute(&ctx("t4"), &create(1)).is_ok());
    }

    #[test]
    fn permissive_double_accepts_double_booking() {
        let api = InMemoryBookingApi::without_conflict_checks();
        assert!(api.execute(&ctx("t1"), &create(3)).is_ok());
        assert!(api.execute(&ctx("t2"), &create(3)).is_ok());
        assert_eq!(api.active_bookings(), 2);
    }

    #[test]
    fn latency_is_a_function_of_the_trace() {
        let api = InMemoryBookingApi::new();
        let a = api.execute(&ctx("same"), &create(1)).unwrap().latency_ms;
        let b = InMemoryBookingApi::new()
            .execute(&ctx("same"), &create(9))
            .unwrap()
            .latency_ms;
        assert_eq!(a, b);
        assert!((10..50).contains(&a));
    }
}
