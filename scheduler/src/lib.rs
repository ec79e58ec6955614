mod config;
mod run_store;
mod sandbox;
mod scheduler;

pub use config::{
    SandboxKind, SchedulerConfig, DEFAULT_POLL_INTERVAL, DEFAULT_SANDBOX_IMAGE,
    SIMCITY_HARNESS_PATH_ENV, SIMCITY_POLL_INTERVAL_MS_ENV, SIMCITY_SANDBOX_ENV,
    SIMCITY_SANDBOX_IMAGE_ENV, SIMCITY_TARGET_URL_ENV,
};
pub use run_store::RunStore;
pub use sandbox::{
    sandbox_name, DockerLauncher, ProcessLauncher, Sandbox, SandboxExit, SandboxLauncher,
    SandboxSpec, HARNESS_BIN, PASSTHROUGH_ENV,
};
pub use scheduler::{PollOutcome, Scheduler};
