use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::{
    engine::RecurrenceEngine,
    error::Result,
    store::LoopStore,
    types::{ExecutionOutcome, QueueItem, ScheduleEntity},
};

/// What the publishing side reports back after trying to post.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishReport {
    pub success: bool,
    pub error: Option<String>,
    /// Platforms/accounts the post actually reached.
    pub targets: BTreeSet<String>,
}

impl PublishReport {
    pub fn ok<I, S>(targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            success: true,
            error: None,
            targets: targets.into_iter().map(Into::into).collect(),
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            targets: BTreeSet::new(),
        }
    }
}

/// Posts content for a due loop. Implementations never fail the poller:
/// problems come back as an unsuccessful report.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// `item` is the queue entry to post for queue loops, `None` otherwise.
    async fn publish(&self, entity: &ScheduleEntity, item: Option<&QueueItem>) -> PublishReport;
}

/// Poll settings.
#[derive(Debug, Clone)]
pub struct PollerConfig {
    pub poll_interval: std::time::Duration,
    pub claim_lease: Duration,
    pub claim_batch: u32,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            poll_interval: std::time::Duration::from_secs(1),
            claim_lease: Duration::minutes(5),
            claim_batch: 32,
        }
    }
}

/// Drives due loops: claim, publish, record, save.
pub struct LoopPoller {
    store: Arc<LoopStore>,
    engine: RecurrenceEngine,
    publisher: Arc<dyn Publisher>,
    config: PollerConfig,
}

impl LoopPoller {
    pub fn new(
        store: Arc<LoopStore>,
        engine: RecurrenceEngine,
        publisher: Arc<dyn Publisher>,
        config: PollerConfig,
    ) -> Self {
        Self {
            store,
            engine,
            publisher,
            config,
        }
    }

    /// Main loop. Polls every `poll_interval` until `shutdown` broadcasts `true`.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_ms = self.config.poll_interval.as_millis() as u64,
            batch = self.config.claim_batch,
            "loop poller started"
        );

        let mut interval = tokio::time::interval(self.config.poll_interval);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.tick(Utc::now()).await {
                        error!("loop poller tick error: {e}");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("loop poller shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Run every loop due at `now` once. Returns how many were executed.
    ///
    /// A loop whose outcome cannot be recorded keeps its claim until the
    /// lease runs out, so it is not posted again on the next tick. A loop
    /// whose stored configuration is unusable is marked failed instead.
    /// Either way the rest of the batch still runs.
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<usize> {
        let due = self
            .store
            .claim_due(now, self.config.claim_lease, self.config.claim_batch)?;

        let mut executed = 0;
        for entity in due {
            let item = entity.current_item().cloned();
            info!(
                loop_id = %entity.id,
                influencer = %entity.influencer,
                item = item.as_ref().map(|i| i.item_ref.as_str()).unwrap_or("-"),
                "executing loop"
            );

            let report = self.publisher.publish(&entity, item.as_ref()).await;
            let outcome = ExecutionOutcome {
                item_ref: item.map(|i| i.item_ref),
                targets: report.targets,
                success: report.success,
                error: report.error,
            };

            let saved = self
                .engine
                .record_execution(&entity, outcome, now)
                .and_then(|updated| self.store.save(&updated));
            match saved {
                Ok(()) => executed += 1,
                Err(e) if e.is_misconfiguration() => {
                    error!(loop_id = %entity.id, "loop misconfigured, marking failed: {e}");
                    let failed = self
                        .engine
                        .mark_failed(&entity, &e.to_string(), now)
                        .and_then(|failed| self.store.save(&failed));
                    if let Err(e) = failed {
                        warn!(loop_id = %entity.id, "failed to mark loop failed: {e}");
                    }
                }
                Err(e) => {
                    error!(
                        loop_id = %entity.id,
                        lease_secs = self.config.claim_lease.num_seconds(),
                        "failed to record execution, retrying after lease: {e}"
                    );
                }
            }
        }
        Ok(executed)
    }
}
