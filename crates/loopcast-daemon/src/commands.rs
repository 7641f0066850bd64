//! One function per CLI subcommand. Each takes the store and engine it
//! needs, does its work and prints a human-readable result.

use std::path::Path;
use std::sync::Arc;

use chrono::{Duration, Utc};
use loopcast_core::{config::LoopcastConfig, LoopId, LoopcastError, TeamId};
use loopcast_scheduler::{
    LoopPoller, LoopStatus, LoopStore, NewLoop, PollerConfig, RecurrenceEngine, ScheduleEntity,
};
use tracing::info;

use crate::publisher;

/// Read a loop definition (`NewLoop` JSON) from disk.
pub fn load_new_loop(path: &Path) -> loopcast_core::Result<NewLoop> {
    let raw = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

pub fn engine(config: &LoopcastConfig) -> RecurrenceEngine {
    RecurrenceEngine::new(config.scheduler.history_limit)
}

pub fn add(store: &LoopStore, engine: &RecurrenceEngine, new: NewLoop) -> anyhow::Result<ScheduleEntity> {
    let now = Utc::now();
    let entity = engine.prepare(&ScheduleEntity::new(new, now), now)?;
    store.insert(&entity)?;
    Ok(entity)
}

pub fn list(store: &LoopStore, team: Option<&str>, status: Option<LoopStatus>) -> anyhow::Result<()> {
    let loops = match team {
        Some(team) => store.list_by_team(&TeamId::from(team), status)?,
        None => store.list(status)?,
    };
    if loops.is_empty() {
        println!("no loops");
    }
    for e in &loops {
        println!("{}", summary(e));
    }
    Ok(())
}

pub fn show(store: &LoopStore, id: &str) -> anyhow::Result<()> {
    let entity = store.load(&LoopId::from(id))?;
    println!("{}", serde_json::to_string_pretty(&entity)?);
    Ok(())
}

pub fn due(store: &LoopStore, limit: u32) -> anyhow::Result<()> {
    for e in store.list_due(Utc::now(), limit)? {
        println!("{}", summary(&e));
    }
    Ok(())
}

/// Manual status changes.
#[derive(Debug, Clone, Copy)]
pub enum Transition {
    Pause,
    Resume,
    Cancel,
}

pub fn transition(
    store: &LoopStore,
    engine: &RecurrenceEngine,
    id: &str,
    transition: Transition,
) -> anyhow::Result<ScheduleEntity> {
    let now = Utc::now();
    let current = store.load(&LoopId::from(id))?;
    let updated = match transition {
        Transition::Pause => engine.pause(&current, now)?,
        Transition::Resume => engine.resume(&current, now)?,
        Transition::Cancel => engine.cancel(&current, now)?,
    };
    store.save(&updated)?;
    Ok(updated)
}

pub fn delete(store: &LoopStore, id: &str) -> anyhow::Result<()> {
    store.delete(&LoopId::from(id))?;
    Ok(())
}

/// Run the poller until Ctrl-C.
pub async fn run(config: &LoopcastConfig, store: Arc<LoopStore>) -> anyhow::Result<()> {
    let publisher: Arc<dyn loopcast_scheduler::Publisher> =
        Arc::from(publisher::from_config(&config.publisher)?);
    let poller = LoopPoller::new(store, engine(config), publisher, poller_config(config)?);

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let handle = tokio::spawn(poller.run(shutdown_rx));

    tokio::signal::ctrl_c().await?;
    info!("interrupt received, stopping poller");
    let _ = shutdown_tx.send(true);
    handle.await?;
    Ok(())
}

/// Poll settings from config. A lease chrono cannot represent is a config
/// error rather than a panic.
pub fn poller_config(config: &LoopcastConfig) -> loopcast_core::Result<PollerConfig> {
    let lease_secs = config.scheduler.claim_lease_secs;
    let claim_lease = i64::try_from(lease_secs)
        .ok()
        .and_then(Duration::try_seconds)
        .filter(|lease| *lease > Duration::zero())
        .ok_or_else(|| {
            LoopcastError::Config(format!("scheduler.claim_lease_secs out of range: {lease_secs}"))
        })?;
    Ok(PollerConfig {
        poll_interval: std::time::Duration::from_secs(config.scheduler.poll_interval_secs.max(1)),
        claim_lease,
        claim_batch: config.scheduler.claim_batch,
    })
}

/// One line per loop for `list` and `due`.
pub fn summary(e: &ScheduleEntity) -> String {
    let next = e
        .next_execution_at
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| "-".to_string());
    let mut line = format!(
        "{}  {:<9}  {:<10}  {:<20}  next={}  failures={}/{}",
        e.id,
        e.status.to_string(),
        e.kind.label(),
        e.name,
        next,
        e.failure_count,
        e.max_failures
    );
    if let Some(ref err) = e.last_error {
        line.push_str(&format!("  last_error={err:?}"));
    }
    line
}
