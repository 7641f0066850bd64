//! `loopcast-scheduler`: recurrence engine and SQLite persistence for
//! influencer post loops.
//!
//! # Overview
//!
//! A loop is persisted to the SQLite `loops` table. The [`poller::LoopPoller`]
//! claims loops whose `next_execution_at` has arrived, hands them to a
//! [`poller::Publisher`], and feeds the outcome through
//! [`engine::RecurrenceEngine::record_execution`], which updates history,
//! failure tracking and the queue cursor, then computes the next firing time.
//!
//! # Schedule kinds
//!
//! | Kind                   | Next execution                                       |
//! |------------------------|------------------------------------------------------|
//! | `OneTime`              | `scheduled_time`, then completed after one run       |
//! | `Recurring` / hourly   | now + 1 h                                            |
//! | `Recurring` / daily    | next HH:mm in the loop's timezone                    |
//! | `Recurring` / weekly   | soonest configured weekday at HH:mm                  |
//! | `Recurring` / custom   | now + `interval_hours`                               |
//! | `QueueLoop`            | now + `interval` h, completed after `max_loops` wraps |

pub mod db;
pub mod engine;
pub mod error;
pub mod poller;
pub mod schedule;
pub mod store;
pub mod types;

pub use engine::RecurrenceEngine;
pub use error::{Result, SchedulerError};
pub use poller::{LoopPoller, PollerConfig, PublishReport, Publisher};
pub use schedule::compute_next_execution;
pub use store::LoopStore;
pub use types::{
    ExecutionOutcome, Frequency, HistoryEntry, LoopConfig, LoopStatus, NewLoop, NextExecution,
    QueueItem, RecurringConfig, ScheduleEntity, ScheduleKind,
};
