use simcity_store::{RunRequest, RunStatus, SqliteStore, StoreError};

/// The persisted run request queue, as seen by the scheduler.
pub trait RunStore: Send + Sync {
    fn running(&self) -> Result<Option<RunRequest>, StoreError>;

    fn next_pending(&self) -> Result<Option<RunRequest>, StoreError>;

    /// Atomically move a PENDING request to RUNNING if nothing else is RUNNING.
    fn try_claim(&self, id: i64) -> Result<bool, StoreError>;

    fn get(&self, id: i64) -> Result<Option<RunRequest>, StoreError>;

    /// Move a RUNNING request to COMPLETED or FAILED. Returns `false` if it was no longer RUNNING.
    fn finalize(
        &self,
        id: i64,
        status: RunStatus,
        outcome: Option<&str>,
        error: Option<&str>,
    ) -> Result<bool, StoreError>;

    fn mark_ended(&self, id: i64) -> Result<(), StoreError>;
}

impl RunStore for SqliteStore {
    fn running(&self) -> Result<Option<RunRequest>, StoreError> {
        SqliteStore::running(self)
    }

    fn next_pending(&self) -> Result<Option<RunRequest>, StoreError> {
        SqliteStore::next_pending(self)
    }

    fn try_claim(&self, id: i64) -> Result<bool, StoreError> {
        SqliteStore::try_claim(self, id)
    }

    fn get(&self, id: i64) -> Result<Option<RunRequest>, StoreError> {
        SqliteStore::get(self, id)
    }

    fn finalize(
        &self,
        id: i64,
        status: RunStatus,
        outcome: Option<&str>,
        error: Option<&str>,
    ) -> Result<bool, StoreError> {
        SqliteStore::finalize(self, id, status, outcome, error)
    }

    fn mark_ended(&self, id: i64) -> Result<(), StoreError> {
        SqliteStore::mark_ended(self, id)
    }
}
