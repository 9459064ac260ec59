//! Sources of exchange configuration snapshots.
//!
//! A [`PModeStore`] hands out one [`ConfigurationSnapshot`] per domain.
//! Production deployments read JSON documents from a configuration
//! directory; tests register snapshots in memory.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use super::model::ConfigurationSnapshot;

/// Failure to produce a snapshot for a domain.
#[derive(Debug, thiserror::Error)]
pub enum PModeStoreError {
    #[error("no exchange configuration found for domain [{domain}]")]
    NotFound { domain: String },
    #[error("failed to read exchange configuration: {0}")]
    Io(#[from] std::io::Error),
    #[error("exchange configuration for domain [{domain}] is malformed: {source}")]
    Malformed {
        domain: String,
        #[source]
        source: serde_json::Error,
    },
}

#[async_trait]
pub trait PModeStore: Send + Sync {
    /// Loads the raw snapshot for `domain`. Validation happens in the
    /// caching layer, not here.
    async fn load(&self, domain: &str) -> Result<ConfigurationSnapshot, PModeStoreError>;
}

/// Reads `<root>/<domain>.json` on demand.
#[derive(Debug, Clone)]
pub struct FilePModeStore {
    root: PathBuf,
}

impl FilePModeStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    fn path_for(&self, domain: &str) -> PathBuf {
        self.root.join(format!("{domain}.json"))
    }
}

#[async_trait]
impl PModeStore for FilePModeStore {
    async fn load(&self, domain: &str) -> Result<ConfigurationSnapshot, PModeStoreError> {
        let path = self.path_for(domain);
        debug!(domain = %domain, path = %path.display(), "Loading exchange configuration");
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                return Err(PModeStoreError::NotFound {
                    domain: domain.to_string(),
                });
            }
            Err(error) => return Err(PModeStoreError::Io(error)),
        };
        serde_json::from_slice(&bytes).map_err(|source| PModeStoreError::Malformed {
            domain: domain.to_string(),
            source,
        })
    }
}

/// In-memory store, primarily for tests and embedded setups.
#[derive(Debug, Clone, Default)]
pub struct StaticPModeStore {
    snapshots: HashMap<String, ConfigurationSnapshot>,
}

impl StaticPModeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_domain(
        mut self,
        domain: impl Into<String>,
        snapshot: ConfigurationSnapshot,
    ) -> Self {
        self.snapshots.insert(domain.into(), snapshot);
        self
    }
}

#[async_trait]
impl PModeStore for StaticPModeStore {
    async fn load(&self, domain: &str) -> Result<ConfigurationSnapshot, PModeStoreError> {
        self.snapshots
            .get(domain)
            .cloned()
            .ok_or_else(|| PModeStoreError::NotFound {
                domain: domain.to_string(),
            })
    }
}
