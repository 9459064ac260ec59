//! Per-domain provider cache.
//!
//! Loading and validating a configuration snapshot is expensive, so each
//! domain gets a single shared [`PModeProvider`] built on first use.
//! Concurrent first requests for the same domain coalesce into one load;
//! a failed load leaves the slot empty so the next request retries.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::OnceCell;
use tracing::{info, instrument};

use super::model::SnapshotValidationError;
use super::provider::PModeProvider;
use super::store::{PModeStore, PModeStoreError};

#[derive(Debug, thiserror::Error)]
pub enum PModeError {
    #[error(transparent)]
    Store(#[from] PModeStoreError),
    #[error(transparent)]
    Invalid(#[from] SnapshotValidationError),
}

type ProviderSlot = Arc<OnceCell<Arc<PModeProvider>>>;

pub struct DomainProviderCache {
    store: Arc<dyn PModeStore>,
    slots: DashMap<String, ProviderSlot>,
}

impl DomainProviderCache {
    pub fn new(store: Arc<dyn PModeStore>) -> Self {
        Self {
            store,
            slots: DashMap::new(),
        }
    }

    /// Returns the provider for `domain`, loading and validating its
    /// snapshot on first use.
    #[instrument(skip(self))]
    pub async fn for_domain(&self, domain: &str) -> Result<Arc<PModeProvider>, PModeError> {
        // Clone the slot out of the map before awaiting; holding a dashmap
        // guard across an await point can deadlock the shard.
        let slot: ProviderSlot = {
            let entry = self.slots.entry(domain.to_string()).or_default();
            entry.value().clone()
        };
        let provider = slot.get_or_try_init(|| self.build(domain)).await?;
        Ok(provider.clone())
    }

    /// Drops the cached provider for `domain`. In-flight users keep their
    /// `Arc` until they finish; the next `for_domain` call rebuilds.
    pub fn invalidate(&self, domain: &str) -> bool {
        let removed = self.slots.remove(domain).is_some();
        if removed {
            info!(domain = %domain, "Invalidated cached exchange configuration");
        }
        removed
    }

    /// Invalidates and immediately rebuilds the provider for `domain`.
    pub async fn refresh(&self, domain: &str) -> Result<Arc<PModeProvider>, PModeError> {
        self.invalidate(domain);
        self.for_domain(domain).await
    }

    async fn build(&self, domain: &str) -> Result<Arc<PModeProvider>, PModeError> {
        let snapshot = self.store.load(domain).await?;
        snapshot.validate()?;
        info!(
            domain = %domain,
            parties = snapshot.parties.len(),
            processes = snapshot.processes.len(),
            legs = snapshot.legs.len(),
            "Loaded exchange configuration"
        );
        Ok(Arc::new(PModeProvider::new(domain, Arc::new(snapshot))))
    }
}
