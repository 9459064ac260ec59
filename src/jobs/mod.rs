//! # Scheduled Maintenance
//!
//! Background loops for the gateway's periodic work: the push retry
//! discovery pass and the three pull lock upkeep passes. Each job runs
//! on its own fixed interval inside a spawned task; a slow cycle skips
//! missed ticks instead of bunching them up, and shutdown interrupts the
//! wait without cutting a running cycle short.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio::time::interval;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::pull::PullMessageService;
use crate::retry::RetryService;

/// One unit of scheduled work. Implementations report how many items a
/// cycle acted on so the runner can keep quiet cycles at debug level.
#[async_trait]
pub trait ScheduledJob: Send + Sync {
    fn name(&self) -> &str;

    async fn run_once(&self) -> crate::Result<usize>;
}

/// Periodic push retry discovery for one domain.
pub struct RetryDiscoveryJob {
    name: String,
    service: Arc<RetryService>,
}

impl RetryDiscoveryJob {
    pub fn new(service: Arc<RetryService>) -> Self {
        Self {
            name: format!("retry-discovery[{}]", service.domain()),
            service,
        }
    }
}

#[async_trait]
impl ScheduledJob for RetryDiscoveryJob {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run_once(&self) -> crate::Result<usize> {
        Ok(self.service.run_retry_discovery_pass().await?)
    }
}

/// Returns overdue pull claims to the ready queue.
pub struct PullClaimResetJob {
    service: Arc<PullMessageService>,
}

impl PullClaimResetJob {
    pub fn new(service: Arc<PullMessageService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl ScheduledJob for PullClaimResetJob {
    fn name(&self) -> &str {
        "pull-claim-reset"
    }

    async fn run_once(&self) -> crate::Result<usize> {
        Ok(self.service.reset_stale_pull_claims().await?)
    }
}

/// Expires pull locks past their staleness deadline.
pub struct PullLockExpiryJob {
    service: Arc<PullMessageService>,
}

impl PullLockExpiryJob {
    pub fn new(service: Arc<PullMessageService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl ScheduledJob for PullLockExpiryJob {
    fn name(&self) -> &str {
        "pull-lock-expiry"
    }

    async fn run_once(&self) -> crate::Result<usize> {
        Ok(self.service.expire_stale_pull_locks().await?)
    }
}

/// Deletes expired pull locks.
pub struct PullLockPurgeJob {
    service: Arc<PullMessageService>,
}

impl PullLockPurgeJob {
    pub fn new(service: Arc<PullMessageService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl ScheduledJob for PullLockPurgeJob {
    fn name(&self) -> &str {
        "pull-lock-purge"
    }

    async fn run_once(&self) -> crate::Result<usize> {
        Ok(self.service.purge_deleted_pull_locks().await?)
    }
}

/// Drives one job on a fixed interval.
pub struct JobRunner {
    job: Arc<dyn ScheduledJob>,
    period: Duration,
    runner_id: Uuid,
    shutdown_tx: broadcast::Sender<()>,
    handle: Option<tokio::task::JoinHandle<()>>,
}

impl std::fmt::Debug for JobRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobRunner")
            .field("job", &self.job.name())
            .field("period", &self.period)
            .field("runner_id", &self.runner_id)
            .field("running", &self.handle.is_some())
            .finish()
    }
}

impl JobRunner {
    pub fn new(job: Arc<dyn ScheduledJob>, period: Duration) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            job,
            period,
            runner_id: Uuid::new_v4(),
            shutdown_tx,
            handle: None,
        }
    }

    pub fn start(&mut self) {
        if self.handle.is_some() {
            warn!(job = %self.job.name(), "Job runner already running");
            return;
        }
        info!(
            job = %self.job.name(),
            runner_id = %self.runner_id,
            period_secs = self.period.as_secs(),
            "Starting job runner"
        );

        let job = Arc::clone(&self.job);
        let period = self.period;
        let runner_id = self.runner_id;
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        let handle = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match job.run_once().await {
                            Ok(0) => {
                                debug!(job = %job.name(), "Job cycle found nothing to do");
                            }
                            Ok(acted_on) => {
                                info!(job = %job.name(), acted_on, "Job cycle finished");
                            }
                            Err(e) => {
                                error!(job = %job.name(), error = %e, "Job cycle failed");
                            }
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        info!(job = %job.name(), runner_id = %runner_id, "Job runner stopping");
                        break;
                    }
                }
            }
        });
        self.handle = Some(handle);
    }

    /// Signals the loop and waits for it to wind down. A cycle already in
    /// flight completes first.
    pub async fn stop(&mut self) {
        let _ = self.shutdown_tx.send(());
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    pub fn job_name(&self) -> &str {
        self.job.name()
    }
}

/// Owns the full set of maintenance runners.
#[derive(Debug, Default)]
pub struct JobScheduler {
    runners: Vec<JobRunner>,
}

impl JobScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, job: Arc<dyn ScheduledJob>, period: Duration) {
        self.runners.push(JobRunner::new(job, period));
    }

    pub fn start_all(&mut self) {
        for runner in &mut self.runners {
            runner.start();
        }
    }

    pub async fn shutdown(&mut self) {
        info!(jobs = self.runners.len(), "Stopping scheduled jobs");
        futures::future::join_all(self.runners.iter_mut().map(JobRunner::stop)).await;
    }

    pub fn job_names(&self) -> Vec<&str> {
        self.runners.iter().map(JobRunner::job_name).collect()
    }
}
