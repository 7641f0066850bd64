use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 1;
pub const DEFAULT_CLAIM_LEASE_SECS: u64 = 300; // a claimed loop is retried after 5 min if its worker died
pub const DEFAULT_CLAIM_BATCH: u32 = 32;
pub const DEFAULT_HISTORY_LIMIT: usize = 10;
pub const DEFAULT_PUBLISH_TIMEOUT_SECS: u64 = 30;

/// Top-level config (loopcast.toml + LOOPCAST_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoopcastConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub publisher: PublisherConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Poller cadence and engine limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Seconds between due-loop polls.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// How long a claimed loop stays invisible to other pollers.
    #[serde(default = "default_claim_lease_secs")]
    pub claim_lease_secs: u64,
    /// Maximum loops claimed per tick.
    #[serde(default = "default_claim_batch")]
    pub claim_batch: u32,
    /// Execution history entries kept per loop.
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            claim_lease_secs: DEFAULT_CLAIM_LEASE_SECS,
            claim_batch: DEFAULT_CLAIM_BATCH,
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }
}

/// Where due posts are handed off. With no webhook URL the daemon only logs
/// what it would have posted and records the run as successful.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublisherConfig {
    pub webhook_url: Option<String>,
    /// Optional bearer token sent with every webhook call.
    pub token: Option<String>,
    #[serde(default = "default_publish_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            token: None,
            timeout_secs: DEFAULT_PUBLISH_TIMEOUT_SECS,
        }
    }
}

fn default_poll_interval_secs() -> u64 {
    DEFAULT_POLL_INTERVAL_SECS
}
fn default_claim_lease_secs() -> u64 {
    DEFAULT_CLAIM_LEASE_SECS
}
fn default_claim_batch() -> u32 {
    DEFAULT_CLAIM_BATCH
}
fn default_history_limit() -> usize {
    DEFAULT_HISTORY_LIMIT
}
fn default_publish_timeout_secs() -> u64 {
    DEFAULT_PUBLISH_TIMEOUT_SECS
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.loopcast/loopcast.db", home)
}

impl LoopcastConfig {
    /// Load config from a TOML file with LOOPCAST_* env var overrides.
    ///
    /// Nested keys use a double underscore so field names keep their own
    /// underscores: `LOOPCAST_SCHEDULER__POLL_INTERVAL_SECS=5`.
    /// A missing file is fine; every section has defaults.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: LoopcastConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("LOOPCAST_").split("__"))
            .extract()
            .map_err(|e| crate::error::LoopcastError::Config(e.to_string()))?;

        if !(1..=DEFAULT_HISTORY_LIMIT).contains(&config.scheduler.history_limit) {
            return Err(crate::error::LoopcastError::Config(format!(
                "scheduler.history_limit must be between 1 and {DEFAULT_HISTORY_LIMIT}"
            )));
        }

        Ok(config)
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.loopcast/loopcast.toml", home)
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn defaults_when_file_missing() {
        Jail::expect_with(|_jail| {
            let config = LoopcastConfig::load(Some("does-not-exist.toml")).unwrap();
            assert_eq!(config.scheduler.history_limit, 10);
            assert_eq!(config.scheduler.poll_interval_secs, 1);
            assert!(config.publisher.webhook_url.is_none());
            Ok(())
        });
    }

    #[test]
    fn toml_then_env_override() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "loopcast.toml",
                r#"
                [database]
                path = "/tmp/loops.db"

                [scheduler]
                claim_batch = 8
                poll_interval_secs = 2

                [publisher]
                webhook_url = "http://localhost:9000/post"
                "#,
            )?;
            jail.set_env("LOOPCAST_SCHEDULER__POLL_INTERVAL_SECS", "5");

            let config = LoopcastConfig::load(Some("loopcast.toml")).unwrap();
            assert_eq!(config.database.path, "/tmp/loops.db");
            assert_eq!(config.scheduler.claim_batch, 8);
            assert_eq!(config.scheduler.poll_interval_secs, 5);
            assert_eq!(
                config.publisher.webhook_url.as_deref(),
                Some("http://localhost:9000/post")
            );
            assert_eq!(config.publisher.timeout_secs, 30);
            Ok(())
        });
    }

    #[test]
    fn out_of_range_history_limit_rejected() {
        Jail::expect_with(|jail| {
            jail.create_file("loopcast.toml", "[scheduler]\nhistory_limit = 0\n")?;
            let err = LoopcastConfig::load(Some("loopcast.toml")).unwrap_err();
            assert_eq!(err.code(), "CONFIG_ERROR");

            jail.create_file("loopcast.toml", "[scheduler]\nhistory_limit = 50\n")?;
            let err = LoopcastConfig::load(Some("loopcast.toml")).unwrap_err();
            assert!(err.to_string().contains("between 1 and 10"), "{err}");
            Ok(())
        });
    }
}
