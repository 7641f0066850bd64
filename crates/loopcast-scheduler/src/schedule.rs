use chrono::{DateTime, Datelike, Days, Duration, NaiveDate, NaiveTime, TimeZone, Timelike, Utc};
use chrono_tz::Tz;
use tracing::debug;

use crate::error::{Result, SchedulerError};
use crate::types::{Frequency, NextExecution, RecurringConfig, ScheduleEntity, ScheduleKind};

/// Work out the status and next firing time of `entity` as of `now`.
///
/// Pure: the caller decides whether to `apply` the result. Terminal loops
/// come back unchanged, as do disabled queue loops (nothing to compute).
pub fn compute_next_execution(entity: &ScheduleEntity, now: DateTime<Utc>) -> Result<NextExecution> {
    let unchanged = NextExecution {
        status: entity.status,
        next_execution_at: entity.next_execution_at,
    };
    if entity.status.is_terminal() {
        return Ok(unchanged);
    }

    match &entity.kind {
        ScheduleKind::OneTime { scheduled_time } => {
            if entity.last_executed_at.is_some() {
                // Already fired; a one-time loop never fires again.
                Ok(completed())
            } else {
                // Past-due instants are kept as-is so the poller fires them
                // on its next pass.
                Ok(NextExecution {
                    status: entity.status,
                    next_execution_at: Some(*scheduled_time),
                })
            }
        }

        ScheduleKind::Recurring(cfg) => Ok(NextExecution {
            status: entity.status,
            next_execution_at: Some(next_recurring(cfg, now)?),
        }),

        ScheduleKind::QueueLoop(cfg) if cfg.enabled => {
            if cfg.is_exhausted() {
                return Ok(completed());
            }
            Ok(NextExecution {
                status: entity.status,
                next_execution_at: Some(now + Duration::hours(i64::from(cfg.interval))),
            })
        }

        ScheduleKind::QueueLoop(_) => {
            debug!(loop_id = %entity.id, "queue loop disabled; next execution left as is");
            Ok(unchanged)
        }
    }
}

fn completed() -> NextExecution {
    NextExecution {
        status: crate::types::LoopStatus::Completed,
        next_execution_at: None,
    }
}

/// Next firing instant for a recurring cadence, strictly after `now` for the
/// calendar frequencies.
pub fn next_recurring(cfg: &RecurringConfig, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
    match cfg.frequency {
        Frequency::Hourly => Ok(now + Duration::hours(1)),

        Frequency::Custom => Ok(now + Duration::hours(i64::from(cfg.interval_hours))),

        Frequency::Daily => {
            let at = parse_time_of_day(&cfg.time_of_day)?;
            let tz = cfg.tz()?;
            let today = now.with_timezone(&tz).date_naive();

            let candidate = resolve_local(&tz, today, at)?;
            if candidate > now {
                Ok(candidate)
            } else {
                // Today's slot has passed; same wall-clock time tomorrow.
                resolve_local(&tz, add_days(today, 1)?, at)
            }
        }

        Frequency::Weekly => {
            let at = parse_time_of_day(&cfg.time_of_day)?;
            let tz = cfg.tz()?;
            let local_now = now.with_timezone(&tz);
            let diff = days_until_next_slot(
                &cfg.days_of_week,
                local_now.weekday().num_days_from_sunday(),
                local_now.hour() * 60 + local_now.minute(),
                at.hour() * 60 + at.minute(),
            );
            resolve_local(&tz, add_days(local_now.date_naive(), diff)?, at)
        }
    }
}

/// Days from today to the soonest configured weekday whose slot is still
/// ahead. Today counts only while `current_minutes < target_minutes`;
/// otherwise today's weekday is a week away. An empty set means Monday.
pub fn days_until_next_slot(
    days: &std::collections::BTreeSet<u8>,
    today: u32,
    current_minutes: u32,
    target_minutes: u32,
) -> u64 {
    let fallback = [1u8];
    let days: Vec<u8> = if days.is_empty() {
        fallback.to_vec()
    } else {
        days.iter().copied().collect()
    };

    days.iter()
        .map(|day| {
            let diff = (i64::from(*day) - i64::from(today)).rem_euclid(7) as u64;
            if diff == 0 && current_minutes >= target_minutes {
                7
            } else {
                diff
            }
        })
        .min()
        .unwrap_or(7)
}

/// Parse a strict 24-hour `HH:mm` string.
pub fn parse_time_of_day(s: &str) -> Result<NaiveTime> {
    let invalid = || SchedulerError::InvalidTimeOfDay(s.to_string());
    let (h, m) = s.split_once(':').ok_or_else(invalid)?;
    let two_digits = |part: &str| part.len() == 2 && part.bytes().all(|b| b.is_ascii_digit());
    if !two_digits(h) || !two_digits(m) {
        return Err(invalid());
    }
    let hour: u32 = h.parse().map_err(|_| invalid())?;
    let minute: u32 = m.parse().map_err(|_| invalid())?;
    NaiveTime::from_hms_opt(hour, minute, 0).ok_or_else(invalid)
}

/// Map a wall-clock date/time in `tz` to UTC.
///
/// Ambiguous times (DST fall-back) take the earlier instant. Times inside a
/// spring-forward gap move one hour later, onto the first valid wall time.
fn resolve_local(tz: &Tz, date: NaiveDate, at: NaiveTime) -> Result<DateTime<Utc>> {
    let local = date.and_time(at);
    tz.from_local_datetime(&local)
        .earliest()
        .or_else(|| tz.from_local_datetime(&(local + Duration::hours(1))).earliest())
        .map(|dt| dt.with_timezone(&Utc))
        .ok_or_else(|| {
            SchedulerError::InvalidSchedule(format!("{local} does not exist in {}", tz.name()))
        })
}

fn add_days(date: NaiveDate, days: u64) -> Result<NaiveDate> {
    date.checked_add_days(Days::new(days))
        .ok_or_else(|| SchedulerError::InvalidSchedule(format!("date overflow adding {days} days")))
}
