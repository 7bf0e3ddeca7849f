use rusqlite::{Connection, Result};

/// Initialise the chats table. Safe to call on every startup (idempotent).
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS chats (
            id          TEXT PRIMARY KEY,
            title       TEXT NOT NULL,
            created_at  TEXT NOT NULL,
            messages    TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_chats_created_at
            ON chats(created_at DESC);",
    )
}
