//! Full service stack over the in-memory stores.

#![allow(dead_code)] // Not every test binary uses every helper.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use as4_core::clock::ManualClock;
use as4_core::message::{
    InMemoryAttemptStore, InMemoryDictionary, InMemoryMessageStore, SubmitterDictionaries,
    UserMessageRef,
};
use as4_core::pmode::{ConfigurationSnapshot, StaticPModeStore};
use as4_core::pull::InMemoryPullLockStore;
use as4_core::retry::{SendError, SendPipeline};
use as4_core::{
    DomainProviderCache, EntityIdGenerator, MessageSubmitter, PullMessageService, RetryService,
};

use super::fixtures::{base_time, sample_snapshot, DOMAIN, MESSAGE_ID_SUFFIX};

/// Send pipeline double that records what it was handed and can be told to
/// refuse everything.
pub struct RecordingSendPipeline {
    submitted: Mutex<Vec<i64>>,
    refusing: AtomicBool,
}

impl RecordingSendPipeline {
    pub fn new() -> Self {
        Self {
            submitted: Mutex::new(Vec::new()),
            refusing: AtomicBool::new(false),
        }
    }

    pub fn submitted(&self) -> Vec<i64> {
        self.submitted.lock().clone()
    }

    pub fn set_refusing(&self, refusing: bool) {
        self.refusing.store(refusing, Ordering::SeqCst);
    }
}

impl Default for RecordingSendPipeline {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SendPipeline for RecordingSendPipeline {
    async fn submit(&self, message: &UserMessageRef) -> Result<(), SendError> {
        if self.refusing.load(Ordering::SeqCst) {
            return Err(SendError {
                message_id: message.message_id.clone(),
                reason: "connection refused".into(),
            });
        }
        self.submitted.lock().push(message.entity_id);
        Ok(())
    }
}

/// The complete submission, retry and pull stack wired over in-memory
/// stores, a static configuration and a manual clock starting at
/// [`base_time`]. Retry delay is 1 minute, pull receipt timeout 10 minutes.
pub struct TestStack {
    pub clock: Arc<ManualClock>,
    pub pmodes: Arc<DomainProviderCache>,
    pub messages: Arc<InMemoryMessageStore>,
    pub locks: Arc<InMemoryPullLockStore>,
    pub attempts: Arc<InMemoryAttemptStore>,
    pub pipeline: Arc<RecordingSendPipeline>,
    pub parties: Arc<InMemoryDictionary>,
    pub services: Arc<InMemoryDictionary>,
    pub actions: Arc<InMemoryDictionary>,
    pub agreements: Arc<InMemoryDictionary>,
    pub pull: Arc<PullMessageService>,
    pub submitter: Arc<MessageSubmitter>,
    pub retry: Arc<RetryService>,
}

impl TestStack {
    pub fn new() -> Self {
        Self::with_snapshot(sample_snapshot())
    }

    pub fn with_snapshot(snapshot: ConfigurationSnapshot) -> Self {
        let clock = Arc::new(ManualClock::new(base_time()));
        let store = StaticPModeStore::new().with_domain(DOMAIN, snapshot);
        let pmodes = Arc::new(DomainProviderCache::new(Arc::new(store)));
        let messages = Arc::new(InMemoryMessageStore::new());
        let locks = Arc::new(InMemoryPullLockStore::new());
        let attempts = Arc::new(InMemoryAttemptStore::new());
        let pipeline = Arc::new(RecordingSendPipeline::new());
        let parties = Arc::new(InMemoryDictionary::new());
        let services = Arc::new(InMemoryDictionary::new());
        let actions = Arc::new(InMemoryDictionary::new());
        let agreements = Arc::new(InMemoryDictionary::new());

        let pull = Arc::new(PullMessageService::new(
            pmodes.clone(),
            locks.clone(),
            messages.clone(),
            clock.clone(),
            10,
        ));
        let ids = Arc::new(EntityIdGenerator::new(clock.clone()));
        let submitter = Arc::new(MessageSubmitter::new(
            pmodes.clone(),
            ids,
            messages.clone(),
            SubmitterDictionaries {
                parties: parties.clone(),
                services: services.clone(),
                actions: actions.clone(),
                agreements: agreements.clone(),
            },
            pull.clone(),
            clock.clone(),
            MESSAGE_ID_SUFFIX,
        ));
        let retry = Arc::new(RetryService::new(
            DOMAIN,
            pmodes.clone(),
            messages.clone(),
            pipeline.clone(),
            attempts.clone(),
            clock.clone(),
            1,
        ));

        Self {
            clock,
            pmodes,
            messages,
            locks,
            attempts,
            pipeline,
            parties,
            services,
            actions,
            agreements,
            pull,
            submitter,
            retry,
        }
    }
}

impl Default for TestStack {
    fn default() -> Self {
        Self::new()
    }
}
