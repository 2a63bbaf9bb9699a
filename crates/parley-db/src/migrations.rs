use rusqlite::Connection;
use tracing::info;

use crate::Result;

/// Three tables model the key-value layout: plain values, unordered sets,
/// and append-only lists ordered by `seq`.
pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS kv (
            key     TEXT PRIMARY KEY,
            value   TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS kv_sets (
            key     TEXT NOT NULL,
            member  TEXT NOT NULL,
            PRIMARY KEY (key, member)
        );

        CREATE TABLE IF NOT EXISTS kv_lists (
            key     TEXT NOT NULL,
            seq     INTEGER NOT NULL,
            value   TEXT NOT NULL,
            PRIMARY KEY (key, seq)
        );
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
