use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::{
    error::{Result, SchedulerError},
    schedule::compute_next_execution,
    types::{ExecutionOutcome, HistoryEntry, LoopStatus, NextExecution, ScheduleEntity, ScheduleKind},
};

/// Number of history entries kept per loop, and the most allowed.
pub const DEFAULT_HISTORY_LIMIT: usize = 10;

/// Applies execution outcomes and manual status changes to loops.
///
/// Every method takes the current record by reference and returns the
/// updated copy; persisting it is the caller's job. `now` is always passed
/// in, never read from the system clock.
#[derive(Debug, Clone)]
pub struct RecurrenceEngine {
    history_limit: usize,
}

impl Default for RecurrenceEngine {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_LIMIT)
    }
}

impl RecurrenceEngine {
    /// `history_limit` is clamped to `1..=DEFAULT_HISTORY_LIMIT`.
    pub fn new(history_limit: usize) -> Self {
        Self {
            history_limit: history_limit.clamp(1, DEFAULT_HISTORY_LIMIT),
        }
    }

    /// See [`compute_next_execution`].
    pub fn compute_next_execution(
        &self,
        entity: &ScheduleEntity,
        now: DateTime<Utc>,
    ) -> Result<NextExecution> {
        compute_next_execution(entity, now)
    }

    /// Validate a freshly configured loop and give it its first firing time.
    pub fn prepare(&self, entity: &ScheduleEntity, now: DateTime<Utc>) -> Result<ScheduleEntity> {
        entity.validate()?;
        let mut next = entity.clone();
        next.apply(compute_next_execution(entity, now)?);
        next.updated_at = now;
        Ok(next)
    }

    /// Fold one execution attempt into the loop's state.
    ///
    /// Order matters: history, then last run, then the failure counter or
    /// queue cursor, and finally the next firing time, which reads all of
    /// them. A failure that reaches `max_failures` pauses the loop; a later
    /// success does not resume it.
    pub fn record_execution(
        &self,
        entity: &ScheduleEntity,
        outcome: ExecutionOutcome,
        now: DateTime<Utc>,
    ) -> Result<ScheduleEntity> {
        if entity.status.is_terminal() {
            return Err(SchedulerError::TerminalState {
                id: entity.id.to_string(),
                status: entity.status,
            });
        }

        let mut next = entity.clone();

        next.execution_history.insert(
            0,
            HistoryEntry {
                executed_at: now,
                item_ref: outcome.item_ref,
                targets: outcome.targets,
                success: outcome.success,
                error: outcome.error.clone(),
            },
        );
        next.execution_history.truncate(self.history_limit);

        next.last_executed_at = Some(now);

        if outcome.success {
            next.failure_count = 0;
            next.last_error = None;
            if let ScheduleKind::QueueLoop(cfg) = &mut next.kind {
                if cfg.enabled {
                    let len = cfg.content_queue.len();
                    if len == 0 {
                        return Err(SchedulerError::EmptyQueue {
                            id: entity.id.to_string(),
                        });
                    }
                    cfg.current_index = (cfg.current_index + 1) % len;
                    if cfg.current_index == 0 {
                        cfg.loop_count += 1;
                        debug!(loop_id = %entity.id, loop_count = cfg.loop_count, "content queue wrapped");
                    }
                }
            }
        } else {
            next.failure_count += 1;
            next.last_error = outcome.error;
            if next.failure_count >= next.max_failures && next.status == LoopStatus::Active {
                next.status = LoopStatus::Paused;
                warn!(
                    loop_id = %entity.id,
                    failures = next.failure_count,
                    error = next.last_error.as_deref().unwrap_or(""),
                    "loop paused after repeated failures"
                );
            }
        }

        next.apply(compute_next_execution(&next, now)?);
        next.updated_at = now;

        info!(
            loop_id = %next.id,
            success = outcome.success,
            status = %next.status,
            next_execution_at = ?next.next_execution_at,
            "execution recorded"
        );
        Ok(next)
    }

    /// Stop an active loop until it is resumed.
    pub fn pause(&self, entity: &ScheduleEntity, now: DateTime<Utc>) -> Result<ScheduleEntity> {
        if entity.status != LoopStatus::Active {
            return Err(invalid(entity, "pause"));
        }
        let mut next = entity.clone();
        next.status = LoopStatus::Paused;
        next.updated_at = now;
        info!(loop_id = %next.id, "loop paused");
        Ok(next)
    }

    /// Reactivate a paused loop and recompute its firing time from `now`.
    ///
    /// The failure counter is kept: it only resets on a successful run.
    pub fn resume(&self, entity: &ScheduleEntity, now: DateTime<Utc>) -> Result<ScheduleEntity> {
        if entity.status != LoopStatus::Paused {
            return Err(invalid(entity, "resume"));
        }
        let mut next = entity.clone();
        next.status = LoopStatus::Active;
        next.apply(compute_next_execution(&next, now)?);
        next.updated_at = now;
        info!(loop_id = %next.id, next_execution_at = ?next.next_execution_at, "loop resumed");
        Ok(next)
    }

    /// Stop a loop for good.
    pub fn cancel(&self, entity: &ScheduleEntity, now: DateTime<Utc>) -> Result<ScheduleEntity> {
        self.terminate(entity, LoopStatus::Cancelled, None, now)
    }

    /// Give up on a loop, keeping `reason` as its last error.
    pub fn mark_failed(
        &self,
        entity: &ScheduleEntity,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<ScheduleEntity> {
        self.terminate(entity, LoopStatus::Failed, Some(reason), now)
    }

    fn terminate(
        &self,
        entity: &ScheduleEntity,
        status: LoopStatus,
        reason: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<ScheduleEntity> {
        if entity.status.is_terminal() {
            return Err(SchedulerError::TerminalState {
                id: entity.id.to_string(),
                status: entity.status,
            });
        }
        let mut next = entity.clone();
        next.status = status;
        next.next_execution_at = None;
        if let Some(reason) = reason {
            next.last_error = Some(reason.to_string());
        }
        next.updated_at = now;
        info!(loop_id = %next.id, %status, "loop terminated");
        Ok(next)
    }
}

fn invalid(entity: &ScheduleEntity, action: &'static str) -> SchedulerError {
    SchedulerError::InvalidTransition {
        id: entity.id.to_string(),
        action,
        status: entity.status,
    }
}
