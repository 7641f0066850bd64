use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use loopcast_core::{LoopId, TeamId};
use rusqlite::{types::Type, Connection, Row};
use serde::de::DeserializeOwned;
use tracing::{info, warn};

use crate::{
    db::init_db,
    error::{Result, SchedulerError},
    types::{LoopStatus, ScheduleEntity},
};

const LOOP_COLUMNS: &str = "id, team_id, influencer_id, name, kind, status, last_executed_at,
     next_execution_at, execution_history, failure_count, last_error, max_failures,
     created_at, updated_at";

/// SQLite-backed persistence for loops.
///
/// Owns its own `Connection`; open one store per task that needs it, all
/// pointing at the same database file.
pub struct LoopStore {
    conn: Mutex<Connection>,
}

impl LoopStore {
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().expect("loop store connection poisoned")
    }

    pub fn insert(&self, entity: &ScheduleEntity) -> Result<()> {
        let kind = serde_json::to_string(&entity.kind)?;
        let history = serde_json::to_string(&entity.execution_history)?;
        self.conn().execute(
            "INSERT INTO loops
             (id, team_id, influencer_id, name, kind, status, last_executed_at,
              next_execution_at, execution_history, failure_count, last_error,
              max_failures, claimed_until, created_at, updated_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,NULL,?13,?14)",
            rusqlite::params![
                entity.id.as_str(),
                entity.team.as_str(),
                entity.influencer.as_str(),
                entity.name,
                kind,
                entity.status.to_string(),
                entity.last_executed_at.map(ts),
                entity.next_execution_at.map(ts),
                history,
                entity.failure_count,
                entity.last_error,
                entity.max_failures,
                ts(entity.created_at),
                ts(entity.updated_at),
            ],
        )?;
        info!(loop_id = %entity.id, team = %entity.team, kind = entity.kind.label(), "loop stored");
        Ok(())
    }

    pub fn load(&self, id: &LoopId) -> Result<ScheduleEntity> {
        let conn = self.conn();
        let sql = format!("SELECT {LOOP_COLUMNS} FROM loops WHERE id = ?1");
        match conn.query_row(&sql, [id.as_str()], row_to_entity) {
            Ok(entity) => Ok(entity),
            Err(rusqlite::Error::QueryReturnedNoRows) => Err(SchedulerError::LoopNotFound {
                id: id.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    /// Write back every mutable field in one statement and drop any claim
    /// held on the row.
    pub fn save(&self, entity: &ScheduleEntity) -> Result<()> {
        let kind = serde_json::to_string(&entity.kind)?;
        let history = serde_json::to_string(&entity.execution_history)?;
        let n = self.conn().execute(
            "UPDATE loops SET name=?1, kind=?2, status=?3, last_executed_at=?4,
              next_execution_at=?5, execution_history=?6, failure_count=?7,
              last_error=?8, max_failures=?9, claimed_until=NULL, updated_at=?10
             WHERE id=?11",
            rusqlite::params![
                entity.name,
                kind,
                entity.status.to_string(),
                entity.last_executed_at.map(ts),
                entity.next_execution_at.map(ts),
                history,
                entity.failure_count,
                entity.last_error,
                entity.max_failures,
                ts(entity.updated_at),
                entity.id.as_str(),
            ],
        )?;
        if n == 0 {
            return Err(SchedulerError::LoopNotFound {
                id: entity.id.to_string(),
            });
        }
        Ok(())
    }

    pub fn delete(&self, id: &LoopId) -> Result<()> {
        let n = self
            .conn()
            .execute("DELETE FROM loops WHERE id = ?1", [id.as_str()])?;
        if n == 0 {
            return Err(SchedulerError::LoopNotFound { id: id.to_string() });
        }
        info!(loop_id = %id, "loop deleted");
        Ok(())
    }

    /// All loops, optionally restricted to one status, oldest first.
    pub fn list(&self, status: Option<LoopStatus>) -> Result<Vec<ScheduleEntity>> {
        let conn = self.conn();
        let sql = format!(
            "SELECT {LOOP_COLUMNS} FROM loops
             WHERE (?1 IS NULL OR status = ?1) ORDER BY created_at"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([status.map(|s| s.to_string())], row_to_entity)?;
        Ok(collect_rows(rows))
    }

    /// A team's loops, optionally restricted to one status.
    pub fn list_by_team(&self, team: &TeamId, status: Option<LoopStatus>) -> Result<Vec<ScheduleEntity>> {
        let conn = self.conn();
        let sql = format!(
            "SELECT {LOOP_COLUMNS} FROM loops
             WHERE team_id = ?1 AND (?2 IS NULL OR status = ?2) ORDER BY created_at"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(
            rusqlite::params![team.as_str(), status.map(|s| s.to_string())],
            row_to_entity,
        )?;
        Ok(collect_rows(rows))
    }

    /// Active loops whose firing time has arrived, soonest first. Read-only:
    /// claims are ignored.
    pub fn list_due(&self, now: DateTime<Utc>, limit: u32) -> Result<Vec<ScheduleEntity>> {
        let conn = self.conn();
        let sql = format!(
            "SELECT {LOOP_COLUMNS} FROM loops
             WHERE status = 'active' AND next_execution_at IS NOT NULL
               AND next_execution_at <= ?1
             ORDER BY next_execution_at LIMIT ?2"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params![ts(now), limit], row_to_entity)?;
        Ok(collect_rows(rows))
    }

    /// Atomically lease up to `limit` due loops to the caller.
    ///
    /// A single `UPDATE … RETURNING` marks the rows with `claimed_until =
    /// now + lease`, so concurrent pollers on the same database never get the
    /// same loop for the same due time. `save` releases the claim; if the
    /// worker dies instead, the lease expires and the loop is due again.
    pub fn claim_due(&self, now: DateTime<Utc>, lease: Duration, limit: u32) -> Result<Vec<ScheduleEntity>> {
        let conn = self.conn();
        let now_str = ts(now);
        let sql = format!(
            "UPDATE loops SET claimed_until = ?2
             WHERE id IN (
                 SELECT id FROM loops
                 WHERE status = 'active' AND next_execution_at IS NOT NULL
                   AND next_execution_at <= ?1
                   AND (claimed_until IS NULL OR claimed_until <= ?1)
                 ORDER BY next_execution_at LIMIT ?3
             )
             RETURNING {LOOP_COLUMNS}"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(
            rusqlite::params![now_str, ts(now + lease), limit],
            row_to_entity,
        )?;
        let mut claimed = collect_rows(rows);
        // RETURNING order is unspecified.
        claimed.sort_by_key(|e| e.next_execution_at);
        Ok(claimed)
    }
}

/// Fixed-width UTC timestamp; lexical order equals time order.
fn ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn collect_rows<F>(rows: rusqlite::MappedRows<'_, F>) -> Vec<ScheduleEntity>
where
    F: FnMut(&Row<'_>) -> rusqlite::Result<ScheduleEntity>,
{
    rows.filter_map(|r| match r {
        Ok(entity) => Some(entity),
        Err(e) => {
            warn!("skipping unreadable loop row: {e}");
            None
        }
    })
    .collect()
}

/// Map a row selected with `LOOP_COLUMNS` to a loop.
fn row_to_entity(row: &Row<'_>) -> rusqlite::Result<ScheduleEntity> {
    let status: String = row.get(5)?;
    let status: LoopStatus = status
        .parse()
        .map_err(|e: String| rusqlite::Error::FromSqlConversionFailure(5, Type::Text, e.into()))?;
    Ok(ScheduleEntity {
        id: LoopId(row.get(0)?),
        team: TeamId(row.get(1)?),
        influencer: loopcast_core::InfluencerId(row.get(2)?),
        name: row.get(3)?,
        kind: json_col(row, 4)?,
        status,
        last_executed_at: opt_ts_col(row, 6)?,
        next_execution_at: opt_ts_col(row, 7)?,
        execution_history: json_col(row, 8)?,
        failure_count: row.get(9)?,
        last_error: row.get(10)?,
        max_failures: row.get(11)?,
        created_at: ts_col(row, 12)?,
        updated_at: ts_col(row, 13)?,
    })
}

fn json_col<T: DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn ts_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn opt_ts_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    match row.get::<_, Option<String>>(idx)? {
        None => Ok(None),
        Some(_) => ts_col(row, idx).map(Some),
    }
}
