use rusqlite::Connection;

use crate::error::Result;

/// Initialise the scheduler schema in `conn`.
///
/// Call once at process startup, before any store is built. Idempotent.
pub fn init_db(conn: &Connection) -> Result<()> {
    create_loops_table(conn)?;
    Ok(())
}

/// One row per post loop. The schedule configuration and the execution
/// history are JSON; timestamps are fixed-width RFC 3339 UTC strings so
/// that string comparison matches time order.
fn create_loops_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS loops (
            id                  TEXT    NOT NULL PRIMARY KEY,
            team_id             TEXT    NOT NULL,
            influencer_id       TEXT    NOT NULL,
            name                TEXT    NOT NULL,
            kind                TEXT    NOT NULL,   -- JSON-encoded ScheduleKind
            status              TEXT    NOT NULL DEFAULT 'active',
            last_executed_at    TEXT,
            next_execution_at   TEXT,
            execution_history   TEXT    NOT NULL DEFAULT '[]',
            failure_count       INTEGER NOT NULL DEFAULT 0,
            last_error          TEXT,
            max_failures        INTEGER NOT NULL DEFAULT 3,
            claimed_until       TEXT,               -- poller lease, NULL when free
            created_at          TEXT    NOT NULL,
            updated_at          TEXT    NOT NULL
        ) STRICT;

        -- Poller: WHERE status = 'active' AND next_execution_at <= ?
        CREATE INDEX IF NOT EXISTS idx_loops_status_next
            ON loops (status, next_execution_at);

        -- Dashboard: a team's loops filtered by status
        CREATE INDEX IF NOT EXISTS idx_loops_team_status
            ON loops (team_id, status);
        ",
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        init_db(&conn).unwrap();
        init_db(&conn).unwrap();

        let indexes: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type = 'index' AND tbl_name = 'loops' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<rusqlite::Result<_>>()
            .unwrap();
        assert!(indexes.contains(&"idx_loops_status_next".to_string()));
        assert!(indexes.contains(&"idx_loops_team_status".to_string()));
    }
}
