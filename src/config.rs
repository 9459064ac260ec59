//! Runtime configuration.
//!
//! One `CoreConfig` drives a gateway process: the domains it serves, the
//! database it persists to, the cadence of its scheduled passes and the
//! shape of its log output. Settings come from an optional `as4-core.toml`
//! next to the process, overridden by `AS4_CORE_*` environment variables
//! (`__` separates nesting, e.g. `AS4_CORE_RETRY__RETRY_DELAY_MINUTES=2`).

use std::path::PathBuf;
use std::time::Duration;

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

/// Base name of the configuration file, relative to the working directory.
pub const DEFAULT_CONFIG_BASE: &str = "as4-core";

#[derive(Debug, thiserror::Error)]
pub enum CoreConfigError {
    #[error(transparent)]
    Load(#[from] config::ConfigError),
    #[error("invalid core configuration: {}", .issues.join("; "))]
    Invalid { issues: Vec<String> },
    #[error("failed to open the database pool: {0}")]
    Database(#[from] sqlx::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// Domains this process serves; each needs an exchange configuration.
    pub domains: Vec<String>,
    pub database: DatabaseSettings,
    pub pmode: PModeSettings,
    pub retry: RetrySettings,
    pub pull: PullSettings,
    pub submission: SubmissionSettings,
    pub logging: LoggingSettings,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            domains: vec!["default".to_string()],
            database: DatabaseSettings::default(),
            pmode: PModeSettings::default(),
            retry: RetrySettings::default(),
            pull: PullSettings::default(),
            submission: SubmissionSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            url: "postgresql://localhost/as4_core".to_string(),
            max_connections: 10,
        }
    }
}

impl DatabaseSettings {
    pub async fn connect(&self) -> Result<PgPool, CoreConfigError> {
        let pool = PgPoolOptions::new()
            .max_connections(self.max_connections)
            .connect(&self.url)
            .await?;
        Ok(pool)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PModeSettings {
    /// Directory holding one `<domain>.json` exchange configuration each.
    pub directory: PathBuf,
}

impl Default for PModeSettings {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("conf/pmodes"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    /// Grace added on top of each leg's retry timeout when windowing.
    pub retry_delay_minutes: i64,
    pub discovery_interval_secs: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            retry_delay_minutes: 1,
            discovery_interval_secs: 60,
        }
    }
}

impl RetrySettings {
    pub fn discovery_period(&self) -> Duration {
        Duration::from_secs(self.discovery_interval_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PullSettings {
    /// How long a claimed lock may wait for its receipt before the claim
    /// is returned to the queue.
    pub receipt_timeout_minutes: i64,
    pub claim_reset_interval_secs: u64,
    pub expiry_interval_secs: u64,
    pub purge_interval_secs: u64,
}

impl Default for PullSettings {
    fn default() -> Self {
        Self {
            receipt_timeout_minutes: 10,
            claim_reset_interval_secs: 60,
            expiry_interval_secs: 60,
            purge_interval_secs: 300,
        }
    }
}

impl PullSettings {
    pub fn claim_reset_period(&self) -> Duration {
        Duration::from_secs(self.claim_reset_interval_secs)
    }

    pub fn expiry_period(&self) -> Duration {
        Duration::from_secs(self.expiry_interval_secs)
    }

    pub fn purge_period(&self) -> Duration {
        Duration::from_secs(self.purge_interval_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubmissionSettings {
    /// Suffix appended to generated ebMS message ids.
    pub message_id_suffix: String,
}

impl Default for SubmissionSettings {
    fn default() -> Self {
        Self {
            message_id_suffix: "gateway.local".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Default filter when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json_format: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}

impl CoreConfig {
    /// Loads `as4-core.toml` (when present) and the environment overrides.
    pub fn load() -> Result<Self, CoreConfigError> {
        Self::load_from(DEFAULT_CONFIG_BASE)
    }

    /// Loads from `<base>.toml` plus environment overrides; the file is
    /// optional, the defaults stand in for everything absent.
    pub fn load_from(base: &str) -> Result<Self, CoreConfigError> {
        let settings: Self = Config::builder()
            .add_source(File::with_name(base).required(false))
            .add_source(
                Environment::with_prefix("AS4_CORE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), CoreConfigError> {
        let mut issues = Vec::new();
        if self.domains.is_empty() {
            issues.push("at least one domain must be configured".to_string());
        }
        if self.domains.iter().any(|domain| domain.trim().is_empty()) {
            issues.push("domain names must not be blank".to_string());
        }
        if self.database.url.trim().is_empty() {
            issues.push("database.url must not be empty".to_string());
        }
        if self.database.max_connections == 0 {
            issues.push("database.max_connections must be positive".to_string());
        }
        if self.retry.retry_delay_minutes < 0 {
            issues.push("retry.retry_delay_minutes must not be negative".to_string());
        }
        if self.retry.discovery_interval_secs == 0 {
            issues.push("retry.discovery_interval_secs must be positive".to_string());
        }
        if self.pull.receipt_timeout_minutes <= 0 {
            issues.push("pull.receipt_timeout_minutes must be positive".to_string());
        }
        for (name, value) in [
            ("pull.claim_reset_interval_secs", self.pull.claim_reset_interval_secs),
            ("pull.expiry_interval_secs", self.pull.expiry_interval_secs),
            ("pull.purge_interval_secs", self.pull.purge_interval_secs),
        ] {
            if value == 0 {
                issues.push(format!("{name} must be positive"));
            }
        }
        if self.submission.message_id_suffix.trim().is_empty() {
            issues.push("submission.message_id_suffix must not be empty".to_string());
        }
        if issues.is_empty() {
            Ok(())
        } else {
            Err(CoreConfigError::Invalid { issues })
        }
    }
}
