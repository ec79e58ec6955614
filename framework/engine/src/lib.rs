mod agent;
mod api;
mod capability;
mod http_api;
mod observer;
mod orchestrator;
mod persona;
mod policy;

pub use agent::{Agent, AgentPhase};
pub use api::{ApiError, ApiOutcome, BookingApi, BookingCall, CallContext, InMemoryBookingApi};
pub use capability::{Capability, CapabilitySet, UnknownCapability};
pub use http_api::HttpBookingApi;
pub use observer::{
    default_observers, AgentLifecycleOrder, CancelledBookingResurrected, InvariantChecker,
    InvariantObserver, SlotDoubleBooked, Violation,
};
pub use orchestrator::{
    default_sim_start, simulate, Orchestrator, OrchestratorConfig, SimulationState,
    StateSnapshot, TickReport,
};
pub use persona::{generate_persona, AgentKind, Persona};
pub use policy::*;
