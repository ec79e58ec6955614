use simcity_store::SqliteStore;

/// Tables holding rows that may have been written by synthetic traffic.
pub trait SyntheticRowStore: Send + Sync {
    fn count_synthetic(&self, table: &str, source: &str) -> anyhow::Result<u64>;

    /// Delete matching rows, returning how many were removed.
    fn delete_synthetic(&self, table: &str, source: &str) -> anyhow::Result<u64>;
}

impl SyntheticRowStore for SqliteStore {
    fn count_synthetic(&self, table: &str, source: &str) -> anyhow::Result<u64> {
        Ok(SqliteStore::count_synthetic(self, table, source)?)
    }

    fn delete_synthetic(&self, table: &str, source: &str) -> anyhow::Result<u64> {
        Ok(SqliteStore::delete_synthetic(self, table, source)?)
    }
}
