use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use loopcast_core::{InfluencerId, LoopId, TeamId};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SchedulerError};
use crate::schedule::parse_time_of_day;

/// Upper bound for every hour-based interval: one week.
pub const MAX_INTERVAL_HOURS: u32 = 168;
/// Consecutive failures tolerated before a loop pauses itself.
pub const DEFAULT_MAX_FAILURES: u32 = 3;

/// How often a recurring loop fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Frequency {
    /// One hour after the previous run.
    Hourly,
    /// Every day at `time_of_day`.
    Daily,
    /// On each of `days_of_week` at `time_of_day`.
    Weekly,
    /// Every `interval_hours` after the previous run.
    Custom,
}

/// Calendar-style cadence for `ScheduleKind::Recurring`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecurringConfig {
    pub frequency: Frequency,
    /// Weekday indices, 0 = Sunday … 6 = Saturday. Weekly only.
    #[serde(default = "default_days_of_week")]
    pub days_of_week: BTreeSet<u8>,
    /// 24-hour `HH:mm` wall-clock time. Daily and Weekly only.
    #[serde(default = "default_time_of_day")]
    pub time_of_day: String,
    /// IANA zone that `time_of_day` is expressed in.
    #[serde(default = "default_timezone")]
    pub timezone: String,
    /// Custom only.
    #[serde(default = "default_interval_hours")]
    pub interval_hours: u32,
}

impl RecurringConfig {
    pub fn new(frequency: Frequency) -> Self {
        Self {
            frequency,
            days_of_week: default_days_of_week(),
            time_of_day: default_time_of_day(),
            timezone: default_timezone(),
            interval_hours: default_interval_hours(),
        }
    }

    pub fn with_time(mut self, time_of_day: &str) -> Self {
        self.time_of_day = time_of_day.to_string();
        self
    }

    pub fn with_days(mut self, days: impl IntoIterator<Item = u8>) -> Self {
        self.days_of_week = days.into_iter().collect();
        self
    }

    pub fn with_timezone(mut self, timezone: &str) -> Self {
        self.timezone = timezone.to_string();
        self
    }

    pub fn with_interval_hours(mut self, hours: u32) -> Self {
        self.interval_hours = hours;
        self
    }

    /// Resolve the stored zone name.
    pub fn tz(&self) -> Result<Tz> {
        self.timezone
            .parse()
            .map_err(|_| SchedulerError::InvalidTimezone(self.timezone.clone()))
    }
}

/// One entry of a queue loop's content rotation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueItem {
    /// Opaque reference to the stored post (media + caption).
    pub item_ref: String,
    pub order: u32,
}

/// Configuration and cursor for `ScheduleKind::QueueLoop`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopConfig {
    #[serde(default = "bool_true")]
    pub enabled: bool,
    /// Hours between posts.
    #[serde(default = "default_interval_hours")]
    pub interval: u32,
    /// Rotation, kept sorted by `order`.
    #[serde(default)]
    pub content_queue: Vec<QueueItem>,
    /// Position of the next item to post.
    #[serde(default)]
    pub current_index: usize,
    /// Number of times the queue has wrapped back to its start.
    #[serde(default)]
    pub loop_count: u32,
    /// `None` cycles forever.
    #[serde(default)]
    pub max_loops: Option<u32>,
}

impl LoopConfig {
    /// Build an enabled loop over `items`, sorted by their `order`.
    pub fn new(mut items: Vec<QueueItem>, interval: u32) -> Self {
        items.sort_by_key(|item| item.order);
        Self {
            enabled: true,
            interval,
            content_queue: items,
            current_index: 0,
            loop_count: 0,
            max_loops: None,
        }
    }

    pub fn with_max_loops(mut self, max_loops: u32) -> Self {
        self.max_loops = Some(max_loops);
        self
    }

    /// True once `max_loops` full passes over the queue have happened.
    pub fn is_exhausted(&self) -> bool {
        self.max_loops.is_some_and(|max| self.loop_count >= max)
    }
}

/// What drives a loop's firing times. Exactly one configuration exists per
/// loop, so sibling settings of other kinds cannot leak into the math.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScheduleKind {
    /// Fire once at an absolute instant.
    OneTime { scheduled_time: DateTime<Utc> },
    /// Fire on a calendar or fixed-interval cadence.
    Recurring(RecurringConfig),
    /// Post the queue items in turn, cycling back to the start.
    QueueLoop(LoopConfig),
}

impl ScheduleKind {
    pub fn label(&self) -> &'static str {
        match self {
            ScheduleKind::OneTime { .. } => "one_time",
            ScheduleKind::Recurring(_) => "recurring",
            ScheduleKind::QueueLoop(_) => "queue_loop",
        }
    }
}

/// Lifecycle state of a loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopStatus {
    /// Eligible for polling.
    Active,
    /// Stopped by a user or by the failure circuit breaker; resumable.
    Paused,
    /// Nothing left to fire.
    Completed,
    /// Stopped by a user for good.
    Cancelled,
    /// Given up on by an operator.
    Failed,
}

impl LoopStatus {
    /// Terminal states never fire again and reject further executions.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            LoopStatus::Completed | LoopStatus::Cancelled | LoopStatus::Failed
        )
    }
}

impl std::fmt::Display for LoopStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LoopStatus::Active => "active",
            LoopStatus::Paused => "paused",
            LoopStatus::Completed => "completed",
            LoopStatus::Cancelled => "cancelled",
            LoopStatus::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for LoopStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "active" => Ok(LoopStatus::Active),
            "paused" => Ok(LoopStatus::Paused),
            "completed" => Ok(LoopStatus::Completed),
            "cancelled" => Ok(LoopStatus::Cancelled),
            "failed" => Ok(LoopStatus::Failed),
            other => Err(format!("unknown loop status: {other}")),
        }
    }
}

/// A single recorded run, newest first in `ScheduleEntity::execution_history`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub executed_at: DateTime<Utc>,
    pub item_ref: Option<String>,
    /// Platforms/accounts the post went to.
    #[serde(default)]
    pub targets: BTreeSet<String>,
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
}

/// Result of one publish attempt, as reported by the execution side.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExecutionOutcome {
    pub item_ref: Option<String>,
    pub targets: BTreeSet<String>,
    pub success: bool,
    pub error: Option<String>,
}

impl ExecutionOutcome {
    pub fn success(item_ref: Option<&str>) -> Self {
        Self {
            item_ref: item_ref.map(String::from),
            success: true,
            ..Default::default()
        }
    }

    pub fn failure(item_ref: Option<&str>, error: &str) -> Self {
        Self {
            item_ref: item_ref.map(String::from),
            success: false,
            error: Some(error.to_string()),
            ..Default::default()
        }
    }

    pub fn with_targets<I, S>(mut self, targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.targets = targets.into_iter().map(Into::into).collect();
        self
    }
}

/// Status and firing time produced by a recomputation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NextExecution {
    pub status: LoopStatus,
    pub next_execution_at: Option<DateTime<Utc>>,
}

/// Creation payload: everything the owner configures. Runtime state starts
/// empty.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewLoop {
    pub team: TeamId,
    pub influencer: InfluencerId,
    pub name: String,
    pub kind: ScheduleKind,
    #[serde(default = "default_max_failures")]
    pub max_failures: u32,
}

/// A persisted post loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleEntity {
    pub id: LoopId,
    pub team: TeamId,
    pub influencer: InfluencerId,
    pub name: String,
    pub kind: ScheduleKind,
    pub status: LoopStatus,
    pub last_executed_at: Option<DateTime<Utc>>,
    pub next_execution_at: Option<DateTime<Utc>>,
    pub execution_history: Vec<HistoryEntry>,
    pub failure_count: u32,
    pub last_error: Option<String>,
    pub max_failures: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ScheduleEntity {
    /// Fresh active loop with no runs. `next_execution_at` is unset until
    /// the engine computes it.
    pub fn new(new: NewLoop, now: DateTime<Utc>) -> Self {
        Self {
            id: LoopId::new(),
            team: new.team,
            influencer: new.influencer,
            name: new.name,
            kind: new.kind,
            status: LoopStatus::Active,
            last_executed_at: None,
            next_execution_at: None,
            execution_history: Vec::new(),
            failure_count: 0,
            last_error: None,
            max_failures: new.max_failures,
            created_at: now,
            updated_at: now,
        }
    }

    /// Write a recomputed status/firing time back onto the record.
    pub fn apply(&mut self, next: NextExecution) {
        self.status = next.status;
        self.next_execution_at = next.next_execution_at;
    }

    /// Queue item the next execution should post. `None` for non-queue loops.
    pub fn current_item(&self) -> Option<&QueueItem> {
        match &self.kind {
            ScheduleKind::QueueLoop(cfg) => cfg.content_queue.get(cfg.current_index),
            _ => None,
        }
    }

    /// Range and format checks for everything the owner configures.
    pub fn validate(&self) -> Result<()> {
        if self.max_failures == 0 {
            return Err(SchedulerError::InvalidSchedule(
                "max_failures must be at least 1".to_string(),
            ));
        }
        match &self.kind {
            ScheduleKind::OneTime { .. } => Ok(()),
            ScheduleKind::Recurring(cfg) => validate_recurring(cfg),
            ScheduleKind::QueueLoop(cfg) => validate_loop(self.id.as_str(), cfg),
        }
    }
}

fn validate_recurring(cfg: &RecurringConfig) -> Result<()> {
    parse_time_of_day(&cfg.time_of_day)?;
    cfg.tz()?;
    check_interval("interval_hours", cfg.interval_hours)?;
    if cfg.frequency == Frequency::Weekly && cfg.days_of_week.is_empty() {
        return Err(SchedulerError::InvalidSchedule(
            "weekly schedule needs at least one day".to_string(),
        ));
    }
    if let Some(day) = cfg.days_of_week.iter().find(|d| **d > 6) {
        return Err(SchedulerError::InvalidSchedule(format!(
            "day of week {day} is out of range 0..=6"
        )));
    }
    Ok(())
}

fn validate_loop(id: &str, cfg: &LoopConfig) -> Result<()> {
    check_interval("interval", cfg.interval)?;
    if cfg.content_queue.is_empty() {
        return Err(SchedulerError::EmptyQueue { id: id.to_string() });
    }
    if cfg.current_index >= cfg.content_queue.len() {
        return Err(SchedulerError::InvalidSchedule(format!(
            "current_index {} is past the end of a {}-item queue",
            cfg.current_index,
            cfg.content_queue.len()
        )));
    }
    if cfg.max_loops == Some(0) {
        return Err(SchedulerError::InvalidSchedule(
            "max_loops must be at least 1 when set".to_string(),
        ));
    }
    Ok(())
}

fn check_interval(field: &str, hours: u32) -> Result<()> {
    if !(1..=MAX_INTERVAL_HOURS).contains(&hours) {
        return Err(SchedulerError::InvalidSchedule(format!(
            "{field} must be between 1 and {MAX_INTERVAL_HOURS} hours, got {hours}"
        )));
    }
    Ok(())
}

fn default_days_of_week() -> BTreeSet<u8> {
    BTreeSet::from([1])
}
fn default_time_of_day() -> String {
    "12:00".to_string()
}
fn default_timezone() -> String {
    "UTC".to_string()
}
fn default_interval_hours() -> u32 {
    24
}
fn default_max_failures() -> u32 {
    DEFAULT_MAX_FAILURES
}
fn bool_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn entity(kind: ScheduleKind) -> ScheduleEntity {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        ScheduleEntity::new(
            NewLoop {
                team: TeamId::from("team-1"),
                influencer: InfluencerId::from("ava"),
                name: "morning post".to_string(),
                kind,
                max_failures: DEFAULT_MAX_FAILURES,
            },
            now,
        )
    }

    fn item(r: &str, order: u32) -> QueueItem {
        QueueItem {
            item_ref: r.to_string(),
            order,
        }
    }

    #[test]
    fn kind_json_is_tagged() {
        let kind = ScheduleKind::Recurring(
            RecurringConfig::new(Frequency::Weekly)
                .with_days([1, 3])
                .with_time("09:00"),
        );
        let json = serde_json::to_value(&kind).unwrap();
        assert_eq!(json["type"], "recurring");
        assert_eq!(json["frequency"], "weekly");
        assert_eq!(json["days_of_week"], serde_json::json!([1, 3]));
    }

    #[test]
    fn recurring_defaults_fill_in() {
        let json = r#"{"type":"recurring","frequency":"daily"}"#;
        let kind: ScheduleKind = serde_json::from_str(json).unwrap();
        let ScheduleKind::Recurring(cfg) = kind else {
            panic!("expected recurring");
        };
        assert_eq!(cfg.time_of_day, "12:00");
        assert_eq!(cfg.timezone, "UTC");
        assert_eq!(cfg.interval_hours, 24);
        assert_eq!(cfg.days_of_week, BTreeSet::from([1]));
    }

    #[test]
    fn loop_config_sorts_queue_by_order() {
        let cfg = LoopConfig::new(vec![item("c", 3), item("a", 1), item("b", 2)], 24);
        let refs: Vec<_> = cfg.content_queue.iter().map(|i| i.item_ref.as_str()).collect();
        assert_eq!(refs, ["a", "b", "c"]);
    }

    #[test]
    fn current_item_follows_index() {
        let mut cfg = LoopConfig::new(vec![item("a", 1), item("b", 2)], 24);
        cfg.current_index = 1;
        let e = entity(ScheduleKind::QueueLoop(cfg));
        assert_eq!(e.current_item().unwrap().item_ref, "b");

        let once = entity(ScheduleKind::OneTime {
            scheduled_time: Utc::now(),
        });
        assert!(once.current_item().is_none());
    }

    #[test]
    fn status_parse_roundtrip() {
        for s in ["active", "paused", "completed", "cancelled", "failed"] {
            let status: LoopStatus = s.parse().unwrap();
            assert_eq!(status.to_string(), s);
        }
        assert!("running".parse::<LoopStatus>().is_err());
    }

    #[test]
    fn validate_rejects_bad_time_of_day() {
        let e = entity(ScheduleKind::Recurring(
            RecurringConfig::new(Frequency::Daily).with_time("25:00"),
        ));
        assert!(matches!(e.validate(), Err(SchedulerError::InvalidTimeOfDay(_))));
    }

    #[test]
    fn validate_rejects_unknown_timezone() {
        let e = entity(ScheduleKind::Recurring(
            RecurringConfig::new(Frequency::Daily).with_timezone("Mars/Olympus"),
        ));
        assert!(matches!(e.validate(), Err(SchedulerError::InvalidTimezone(_))));
    }

    #[test]
    fn validate_rejects_out_of_range_interval() {
        let e = entity(ScheduleKind::Recurring(
            RecurringConfig::new(Frequency::Custom).with_interval_hours(169),
        ));
        assert!(matches!(e.validate(), Err(SchedulerError::InvalidSchedule(_))));

        let e = entity(ScheduleKind::QueueLoop(LoopConfig::new(vec![item("a", 1)], 0)));
        assert!(matches!(e.validate(), Err(SchedulerError::InvalidSchedule(_))));
    }

    #[test]
    fn validate_rejects_bad_weekday() {
        let e = entity(ScheduleKind::Recurring(
            RecurringConfig::new(Frequency::Weekly).with_days([7]),
        ));
        assert!(matches!(e.validate(), Err(SchedulerError::InvalidSchedule(_))));
    }

    #[test]
    fn validate_rejects_empty_queue() {
        let e = entity(ScheduleKind::QueueLoop(LoopConfig::new(vec![], 24)));
        assert!(matches!(e.validate(), Err(SchedulerError::EmptyQueue { .. })));
    }

    #[test]
    fn validate_accepts_well_formed_loops() {
        entity(ScheduleKind::QueueLoop(
            LoopConfig::new(vec![item("a", 1)], 6).with_max_loops(2),
        ))
        .validate()
        .unwrap();
        entity(ScheduleKind::Recurring(
            RecurringConfig::new(Frequency::Weekly)
                .with_days([0, 6])
                .with_time("23:59")
                .with_timezone("Europe/Berlin"),
        ))
        .validate()
        .unwrap();
    }
}
