mod request;
mod routes;
mod server;

pub use request::{ApiRequest, ApiResponse};
pub use routes::ControlApi;
pub use server::{serve, DEFAULT_ADDR, MAX_BODY_BYTES, SIMCITY_CONTROL_API_ADDR_ENV};
