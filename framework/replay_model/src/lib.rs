mod entry;
mod event_log;
mod store;

pub use entry::{stable_hash, ReplayEntry, BASE_VARIANT};
pub use event_log::{append_events, load_event_log, store_events, write_event_log};
pub use store::{
    validate_run_id, FileReplayStore, DEFAULT_RUNS_DIR, EVENT_LOG_FILE, REPLAY_ENTRY_FILE,
    SIMCITY_RUNS_DIR_ENV,
};
