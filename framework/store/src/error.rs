use crate::run_request::RunStatus;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Failed to prepare database directory {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Run request {0} does not exist")]
    NotFound(i64),
    #[error("Run request {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: i64,
        from: RunStatus,
        to: RunStatus,
    },
    #[error("{field} = {value} does not fit in an SQLite integer")]
    OutOfRange { field: &'static str, value: u64 },
    #[error("Table '{0}' is not a shared table")]
    UnknownTable(String),
    #[error("Corrupt row in {table}: {message}")]
    Corrupt { table: &'static str, message: String },
}
