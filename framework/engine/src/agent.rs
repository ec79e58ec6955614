use serde::Serialize;
use serde_json::{json, Value};
use simcity_core::prelude::{Seed, SimRng};
use simcity_telemetry::EventType;

use crate::{
    generate_persona, AgentKind, ApiError, ApiOutcome, BookingApi, BookingCall, CallContext,
    Capability, CapabilitySet, Persona, Policy,
};

const CHAT_CHANCE: f64 = 0.5;
const VENDOR_MIN_LIFETIME: u32 = 3;
const SLOTS_PER_AVAILABILITY_UPDATE: usize = 3;
const TRACE_TOKEN_LEN: usize = 16;

const CHAT_LINES: &[&str] = &[
    "is this slot still free?",
    "can I bring a friend?",
    "running five minutes late",
    "do you take walk-ins?",
    "thanks, see you then",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentPhase {
    Spawned,
    Acting,
    Retired,
}

/// An event produced by an agent turn, stamped and appended by the orchestrator.
#[derive(Debug, Clone)]
pub(crate) struct PendingEvent {
    pub event_type: EventType,
    pub data: Value,
    pub fatal: Option<String>,
}

/// What an agent can see during its turn.
pub(crate) struct TurnContext<'a> {
    pub policy: &'a Policy,
    pub capabilities: &'a CapabilitySet,
    pub api: &'a dyn BookingApi,
    pub tick: u64,
    pub hour: u32,
}

#[derive(Debug, Clone)]
struct HeldBooking {
    id: String,
    slot: u32,
}

/// One synthetic customer or vendor.
///
/// An agent owns its PRNG stream, so its decisions only depend on the seed, its index and the
/// answers it gets from the booking system.
pub struct Agent {
    persona: Persona,
    phase: AgentPhase,
    rng: SimRng,
    turns: u32,
    lifetime: u32,
    failures: u32,
    booking: Option<HeldBooking>,
}

impl Agent {
    pub fn spawn(seed: &Seed, kind: AgentKind, index: u64, policy: &Policy) -> Self {
        let persona = generate_persona(seed, kind, index);
        let mut rng = SimRng::for_stream(seed, &format!("actions/{kind}"), index);
        let lifetime = match kind {
            AgentKind::Customer => policy.max_agent_ticks,
            AgentKind::Vendor => rng.between(
                VENDOR_MIN_LIFETIME.min(policy.max_agent_ticks),
                policy.max_agent_ticks,
            ),
        };

        Self {
            persona,
            phase: AgentPhase::Spawned,
            rng,
            turns: 0,
            lifetime,
            failures: 0,
            booking: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.persona.agent_id
    }

    pub fn persona(&self) -> &Persona {
        &self.persona
    }

    pub fn phase(&self) -> AgentPhase {
        self.phase
    }

    pub fn is_retired(&self) -> bool {
        self.phase == AgentPhase::Retired
    }

    pub(crate) fn spawn_data(&self) -> Value {
        json!({
            "agentId": self.persona.agent_id,
            "kind": self.persona.kind,
            "email": self.persona.email,
            "chatty": self.persona.chatty,
            "patient": self.persona.patient,
            "strict": self.persona.strict,
        })
    }

    /// Retire outside of a turn, used when the simulation stops.
    pub(crate) fn retire_now(&mut self, reason: &str) -> Option<PendingEvent> {
        if self.is_retired() {
            return None;
        }
        let mut out = Vec::new();
        self.retire(reason, &mut out);
        out.pop()
    }

    pub(crate) fn take_turn(&mut self, ctx: &TurnContext<'_>) -> Vec<PendingEvent> {
        let mut out = Vec::new();
        if self.is_retired() {
            return out;
        }

        self.phase = AgentPhase::Acting;
        self.turns += 1;

        if ctx.policy.restart_rate > 0.0 && self.rng.chance(ctx.policy.restart_rate) {
            self.booking = None;
            self.failures = 0;
            self.push(&mut out, EventType::AgentRestart, json!({"turn": self.turns}));
        }

        match self.persona.kind {
            AgentKind::Customer => self.customer_turn(ctx, &mut out),
            AgentKind::Vendor => self.vendor_turn(ctx, &mut out),
        }

        if !self.is_retired() && self.persona.chatty && self.rng.chance(CHAT_CHANCE) {
            let line = CHAT_LINES[self.rng.below(CHAT_LINES.len())];
            self.push(&mut out, EventType::ChatMessage, json!({"message": line}));
        }

        if !self.is_retired() && self.turns >= self.lifetime {
            self.retire("lifetime", &mut out);
        }

        out
    }

    fn customer_turn(&mut self, ctx: &TurnContext<'_>, out: &mut Vec<PendingEvent>) {
        let Some(held) = self.booking.clone() else {
            if !ctx.capabilities.contains(Capability::BookingCreate) {
                return;
            }
            let slot = self.pick_slot(ctx.policy);
            let call = BookingCall::Create {
                customer_email: self.persona.email.clone(),
                slot,
                fee: ctx.policy.skin_fee,
            };
            match self.send(ctx, &call, out) {
                Ok((outcome, trace_id)) => {
                    let id = outcome
                        .booking_id
                        .clone()
                        .unwrap_or_else(|| format!("{}-{trace_id}", self.persona.agent_id));
                    self.failures = 0;
                    self.booking = Some(HeldBooking {
                        id: id.clone(),
                        slot,
                    });
                    self.push(
                        out,
                        EventType::BookingCreated,
                        json!({
                            "bookingId": id,
                            "slotId": slot,
                            "fee": ctx.policy.skin_fee,
                            "latencyMs": outcome.latency_ms,
                            "traceId": trace_id,
                        }),
                    );
                }
                Err(e) => self.record_failure(ctx, &call, e, out),
            }
            return;
        };

        let roll = self.rng.next_f64();
        if roll < ctx.policy.cancel_chance && ctx.capabilities.contains(Capability::BookingCancel)
        {
            self.cancel(ctx, &held, out);
        } else if roll < ctx.policy.cancel_chance + ctx.policy.reschedule_chance
            && ctx.capabilities.contains(Capability::BookingReschedule)
        {
            let slot = self.pick_slot(ctx.policy);
            let call = BookingCall::Reschedule {
                booking_id: held.id.clone(),
                slot,
            };
            match self.send(ctx, &call, out) {
                Ok((outcome, trace_id)) => {
                    self.booking = Some(HeldBooking {
                        id: held.id.clone(),
                        slot,
                    });
                    self.push(
                        out,
                        EventType::Reschedule,
                        json!({
                            "bookingId": held.id,
                            "fromSlot": held.slot,
                            "toSlot": slot,
                            "latencyMs": outcome.latency_ms,
                            "traceId": trace_id,
                        }),
                    );
                }
                Err(e) => {
                    self.record_failure(ctx, &call, e, out);
                    if self.persona.strict
                        && !self.is_retired()
                        && ctx.capabilities.contains(Capability::BookingCancel)
                    {
                        self.cancel(ctx, &held, out);
                    }
                }
            }
        }
    }

    fn cancel(&mut self, ctx: &TurnContext<'_>, held: &HeldBooking, out: &mut Vec<PendingEvent>) {
        let call = BookingCall::Cancel {
            booking_id: held.id.clone(),
        };
        match self.send(ctx, &call, out) {
            Ok((outcome, trace_id)) => {
                self.booking = None;
                self.push(
                    out,
                    EventType::Cancel,
                    json!({
                        "bookingId": held.id,
                        "slotId": held.slot,
                        "latencyMs": outcome.latency_ms,
                        "traceId": trace_id,
                    }),
                );
                self.retire("cancelled", out);
            }
            Err(e) => self.record_failure(ctx, &call, e, out),
        }
    }

    fn vendor_turn(&mut self, ctx: &TurnContext<'_>, out: &mut Vec<PendingEvent>) {
        if !ctx.policy.vendor_open_hours.contains(ctx.hour)
            || !ctx.capabilities.contains(Capability::VendorAvailability)
        {
            return;
        }

        let mut slots: Vec<u32> = (0..SLOTS_PER_AVAILABILITY_UPDATE)
            .map(|_| self.pick_slot(ctx.policy))
            .collect();
        slots.sort_unstable();
        slots.dedup();

        let call = BookingCall::Availability {
            vendor_email: self.persona.email.clone(),
            slots: slots.clone(),
        };
        match self.send(ctx, &call, out) {
            Ok((outcome, trace_id)) => self.push(
                out,
                EventType::VendorAvailability,
                json!({
                    "slots": slots,
                    "latencyMs": outcome.latency_ms,
                    "traceId": trace_id,
                }),
            ),
            Err(e) => self.record_failure(ctx, &call, e, out),
        }
    }

    /// Issue a call, applying the retry chaos policy: with `retry_rate` the same request is sent a
    /// second time with the same trace id, as a client retrying after a lost response would.
    fn send(
        &mut self,
        ctx: &TurnContext<'_>,
        call: &BookingCall,
        out: &mut Vec<PendingEvent>,
    ) -> Result<(ApiOutcome, String), ApiError> {
        let trace_id = format!(
            "{}-{}-{}",
            self.persona.agent_id,
            ctx.tick,
            self.rng.hex_token(TRACE_TOKEN_LEN)
        );
        let call_ctx = CallContext {
            agent_id: self.persona.agent_id.clone(),
            trace_id: trace_id.clone(),
        };

        let result = ctx.api.execute(&call_ctx, call);

        if result.as_ref().is_err_and(|e| e.fatal) {
            return result.map(|outcome| (outcome, trace_id));
        }

        if ctx.policy.retry_rate > 0.0 && self.rng.chance(ctx.policy.retry_rate) {
            let duplicate = ctx.api.execute(&call_ctx, call);
            let mut data = json!({
                "action": call.action(),
                "traceId": trace_id,
            });
            match &duplicate {
                Ok(outcome) => {
                    data["duplicateStatus"] = json!(outcome.status);
                    data["latencyMs"] = json!(outcome.latency_ms);
                }
                Err(e) => {
                    data["duplicateStatus"] = json!(e.status);
                    data["duplicateError"] = json!(e.message);
                }
            }
            self.push(out, EventType::ChaosRetry, data);

            // A duplicate create that the system accepted is a real second booking.
            if let (BookingCall::Create { slot, fee, .. }, Ok(outcome)) = (call, &duplicate) {
                let original = result.as_ref().ok().and_then(|o| o.booking_id.clone());
                let accepted = outcome.booking_id.clone();
                if let Some(id) = accepted.filter(|id| Some(id) != original.as_ref()) {
                    self.push(
                        out,
                        EventType::BookingCreated,
                        json!({
                            "bookingId": id,
                            "slotId": slot,
                            "fee": fee,
                            "latencyMs": outcome.latency_ms,
                            "traceId": trace_id,
                            "duplicate": true,
                        }),
                    );
                }
            }
        }

        result.map(|outcome| (outcome, trace_id))
    }

    fn record_failure(
        &mut self,
        ctx: &TurnContext<'_>,
        call: &BookingCall,
        error: ApiError,
        out: &mut Vec<PendingEvent>,
    ) {
        self.failures += 1;
        log::debug!(
            "{} failed {}: {}",
            self.persona.agent_id,
            call.action(),
            error.message
        );

        let data = json!({
            "agentId": self.persona.agent_id,
            "action": call.action(),
            "status": error.status,
            "error": error.message,
            "latencyMs": error.latency_ms,
        });
        out.push(PendingEvent {
            event_type: EventType::ActionFailed,
            data,
            fatal: error.fatal.then(|| error.message.clone()),
        });

        let tolerated = if self.persona.patient {
            ctx.policy.customer_patience_threshold.max(1)
        } else {
            1
        };
        if error.fatal || self.failures >= tolerated {
            self.retire("patience_exhausted", out);
        }
    }

    fn retire(&mut self, reason: &str, out: &mut Vec<PendingEvent>) {
        self.phase = AgentPhase::Retired;
        self.push(
            out,
            EventType::AgentRetire,
            json!({"reason": reason, "turns": self.turns}),
        );
    }

    fn pick_slot(&mut self, policy: &Policy) -> u32 {
        self.rng.below(policy.slot_pool_size as usize) as u32
    }

    fn push(&self, out: &mut Vec<PendingEvent>, event_type: EventType, mut data: Value) {
        data["agentId"] = json!(self.persona.agent_id);
        out.push(PendingEvent {
            event_type,
            data,
            fatal: None,
        });
    }
}
