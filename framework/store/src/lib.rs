mod error;
mod run_request;
mod shared;
mod sqlite;

pub use error::StoreError;
pub use run_request::{NewRunRequest, RunRequest, RunStatus};
pub use shared::{SHARED_TABLES, SYNTHETIC_SOURCE_COLUMN};
pub use sqlite::{SqliteStore, DEFAULT_DB_PATH, SIMCITY_DB_PATH_ENV};
