//! Publishers the daemon can run the poller with.

use std::time::Duration;

use async_trait::async_trait;
use loopcast_core::{config::PublisherConfig, LoopcastError};
use loopcast_scheduler::{PublishReport, Publisher, QueueItem, ScheduleEntity};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Longest slice of an error response body kept in `last_error`.
const MAX_ERROR_BODY_CHARS: usize = 300;

/// JSON body POSTed for every due loop.
#[derive(Debug, Serialize)]
struct PublishRequest<'a> {
    loop_id: &'a str,
    team: &'a str,
    influencer: &'a str,
    name: &'a str,
    kind: &'static str,
    item_ref: Option<&'a str>,
}

/// Optional response body; anything unparseable counts as "no targets".
#[derive(Debug, Default, Deserialize)]
struct PublishResponse {
    #[serde(default)]
    targets: Vec<String>,
}

/// Hands due posts to an HTTP endpoint that does the actual generation and
/// social posting. Any 2xx response is a success.
pub struct WebhookPublisher {
    client: reqwest::Client,
    url: String,
    token: Option<String>,
}

impl WebhookPublisher {
    pub fn new(url: &str, token: Option<String>, timeout: Duration) -> loopcast_core::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LoopcastError::Publisher(e.to_string()))?;
        Ok(Self {
            client,
            url: url.to_string(),
            token,
        })
    }
}

#[async_trait]
impl Publisher for WebhookPublisher {
    async fn publish(&self, entity: &ScheduleEntity, item: Option<&QueueItem>) -> PublishReport {
        let body = PublishRequest {
            loop_id: entity.id.as_str(),
            team: entity.team.as_str(),
            influencer: entity.influencer.as_str(),
            name: &entity.name,
            kind: entity.kind.label(),
            item_ref: item.map(|i| i.item_ref.as_str()),
        };
        debug!(loop_id = %entity.id, url = %self.url, "posting to publish webhook");

        let mut req = self.client.post(&self.url).json(&body);
        if let Some(ref token) = self.token {
            req = req.bearer_auth(token);
        }

        let resp = match req.send().await {
            Ok(r) => r,
            Err(e) => {
                warn!(loop_id = %entity.id, "publish webhook unreachable: {e}");
                return PublishReport::failed(format!("webhook request failed: {e}"));
            }
        };

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            let text: String = text.chars().take(MAX_ERROR_BODY_CHARS).collect();
            warn!(loop_id = %entity.id, status = status.as_u16(), body = %text, "publish webhook error");
            return PublishReport::failed(format!("webhook returned {status}: {text}"));
        }

        let parsed: PublishResponse = resp.json().await.unwrap_or_default();
        PublishReport::ok(parsed.targets)
    }
}

/// Used when no webhook is configured: logs the post and reports success.
pub struct LogPublisher;

#[async_trait]
impl Publisher for LogPublisher {
    async fn publish(&self, entity: &ScheduleEntity, item: Option<&QueueItem>) -> PublishReport {
        info!(
            loop_id = %entity.id,
            influencer = %entity.influencer,
            item = item.map(|i| i.item_ref.as_str()).unwrap_or("-"),
            "no publisher configured; post logged only"
        );
        PublishReport::ok(Vec::<String>::new())
    }
}

/// Pick the publisher the config asks for.
pub fn from_config(cfg: &PublisherConfig) -> loopcast_core::Result<Box<dyn Publisher>> {
    match cfg.webhook_url {
        Some(ref url) => {
            info!(%url, "publishing through webhook");
            Ok(Box::new(WebhookPublisher::new(
                url,
                cfg.token.clone(),
                Duration::from_secs(cfg.timeout_secs),
            )?))
        }
        None => {
            warn!("publisher.webhook_url not set; due posts will only be logged");
            Ok(Box::new(LogPublisher))
        }
    }
}
