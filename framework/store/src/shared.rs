/// Tables shared with the product in which synthetic rows may land.
pub const SHARED_TABLES: [&str; 5] = [
    "bookings",
    "availability_slots",
    "notification_intents",
    "notification_deliveries",
    "ops_events",
];

/// Column carrying the synthetic-source marker on every shared table.
pub const SYNTHETIC_SOURCE_COLUMN: &str = "synthetic_source";

pub(crate) fn shared_table(name: &str) -> Option<&'static str> {
    SHARED_TABLES.iter().copied().find(|t| *t == name)
}

pub(crate) fn shared_schema() -> String {
    SHARED_TABLES
        .iter()
        .map(|table| {
            format!(
                "CREATE TABLE IF NOT EXISTS {table} (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    {SYNTHETIC_SOURCE_COLUMN} TEXT,
                    payload TEXT NOT NULL DEFAULT '{{}}',
                    created_at INTEGER NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_{table}_synthetic_source
                    ON {table}({SYNTHETIC_SOURCE_COLUMN});"
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}
