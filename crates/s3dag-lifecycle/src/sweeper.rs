//! The lifecycle sweeper service.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use s3dag_gateway::ObjectLayer;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::collab::{Collaborators, Event, LifecyclePolicySource, LifecycleStatus};
use crate::config::LifecycleConfig;
use crate::error::{LifecycleError, LifecycleResult};
use crate::rules::{Action, Lifecycle};
use crate::timeout::DynamicTimeout;

/// Cluster lock held for the duration of a sweep.
pub const LIFECYCLE_LOCK: &str = "system/daily-lifecycle-ops";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SweepState {
    #[default]
    Idle,
    LockAcquired,
    Sweeping,
}

/// Tally of one sweep round.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Buckets that had a lifecycle policy.
    pub buckets: usize,
    pub scanned: u64,
    pub deleted: u64,
    pub failed: u64,
}

/// Periodically expires objects according to per-bucket lifecycle policies.
///
/// At most one sweeper in the cluster sweeps at a time: each round runs
/// under [`LIFECYCLE_LOCK`]. A round is due once `interval` has passed since
/// the most recent round finished on any node.
pub struct LifecycleSweeper {
    node_id: String,
    config: LifecycleConfig,
    layer: Arc<dyn ObjectLayer>,
    policies: Arc<dyn LifecyclePolicySource>,
    collab: Collaborators,
    lock_timeout: DynamicTimeout,
    last_activity: RwLock<Option<DateTime<Utc>>>,
    state: RwLock<SweepState>,
    shutdown: watch::Sender<bool>,
}

impl LifecycleSweeper {
    pub fn new(
        node_id: impl Into<String>,
        config: LifecycleConfig,
        layer: Arc<dyn ObjectLayer>,
        policies: Arc<dyn LifecyclePolicySource>,
        collab: Collaborators,
    ) -> Self {
        let lock_timeout = DynamicTimeout::new(config.lock_timeout(), config.lock_timeout_min());
        let (shutdown, _) = watch::channel(false);
        Self {
            node_id: node_id.into(),
            config,
            layer,
            policies,
            collab,
            lock_timeout,
            last_activity: RwLock::new(None),
            state: RwLock::new(SweepState::Idle),
            shutdown,
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    /// What this node reports to its peers.
    pub fn status(&self) -> LifecycleStatus {
        LifecycleStatus {
            last_activity: *self.last_activity.read(),
        }
    }

    pub fn state(&self) -> SweepState {
        *self.state.read()
    }

    /// Current wait for the cluster lock.
    pub fn lock_timeout(&self) -> std::time::Duration {
        self.lock_timeout.timeout()
    }

    /// Run the background loop until the returned handle is stopped.
    pub fn start(self: Arc<Self>) -> SweeperHandle {
        self.shutdown.send_replace(false);
        let rx = self.shutdown.subscribe();
        let task = tokio::spawn(Arc::clone(&self).run(rx));
        tracing::info!(node = %self.node_id, "lifecycle sweeper started");
        SweeperHandle {
            sweeper: self,
            task,
        }
    }

    async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                return;
            }
            let pause = match self.iteration().await {
                Ok(Some(report)) => {
                    tracing::debug!(node = %self.node_id, ?report, "sweep round done");
                    self.config.tick()
                }
                Ok(None) => self.config.tick(),
                Err(LifecycleError::Cancelled) => return,
                Err(LifecycleError::LockTimeout { resource }) => {
                    tracing::debug!(node = %self.node_id, lock = %resource, "lock held elsewhere");
                    self.config.tick()
                }
                Err(e) => {
                    tracing::error!(node = %self.node_id, error = %e, "lifecycle round failed");
                    self.config.retry_backoff()
                }
            };
            tokio::select! {
                _ = tokio::time::sleep(pause) => {}
                _ = shutdown.changed() => return,
            }
        }
    }

    /// One pass of the loop: sweep if due, otherwise `None`.
    async fn iteration(&self) -> LifecycleResult<Option<SweepReport>> {
        if !self.due().await? {
            return Ok(None);
        }
        self.run_once().await.map(Some)
    }

    /// Whether `interval` has elapsed since the latest round on any node.
    async fn due(&self) -> LifecycleResult<bool> {
        let peers = self.collab.peers.peer_status().await?;
        let latest = peers
            .iter()
            .filter_map(|s| s.last_activity)
            .chain(*self.last_activity.read())
            .max();
        Ok(match latest {
            None => true,
            Some(t) => Utc::now()
                .signed_duration_since(t)
                .to_std()
                .is_ok_and(|elapsed| elapsed >= self.config.interval()),
        })
    }

    /// Take the lock and sweep every bucket once, regardless of cadence.
    pub async fn run_once(&self) -> LifecycleResult<SweepReport> {
        self.run_once_at(Utc::now()).await
    }

    /// [`run_once`](Self::run_once), evaluating expiry as of `now`.
    pub async fn run_once_at(&self, now: DateTime<Utc>) -> LifecycleResult<SweepReport> {
        self.check_cancelled()?;
        let wait = self.lock_timeout.timeout();
        let started = Instant::now();
        match self.collab.lock.acquire(LIFECYCLE_LOCK, &self.node_id, wait).await {
            Ok(()) => self.lock_timeout.log_success(started.elapsed()),
            Err(e) => {
                if matches!(e, LifecycleError::LockTimeout { .. }) {
                    self.lock_timeout.log_failure();
                }
                return Err(e);
            }
        }
        let round = HeldRound::new(self);
        tracing::info!(node = %self.node_id, "lifecycle sweep started");

        let result = self.sweep(now).await;
        round.finish().await;

        let report = result?;
        *self.last_activity.write() = Some(Utc::now());
        tracing::info!(
            node = %self.node_id,
            buckets = report.buckets,
            scanned = report.scanned,
            deleted = report.deleted,
            failed = report.failed,
            "lifecycle sweep finished"
        );
        Ok(report)
    }

    async fn sweep(&self, now: DateTime<Utc>) -> LifecycleResult<SweepReport> {
        let mut report = SweepReport::default();
        for bucket in self.layer.list_buckets().await? {
            let Some(lifecycle) = self.policies.get(&bucket.name) else {
                continue;
            };
            report.buckets += 1;
            match self.sweep_bucket(&bucket.name, &lifecycle, now, &mut report).await {
                Ok(()) => {}
                Err(LifecycleError::Cancelled) => return Err(LifecycleError::Cancelled),
                Err(e) => {
                    tracing::warn!(bucket = %bucket.name, error = %e, "bucket sweep failed");
                }
            }
        }
        Ok(report)
    }

    async fn sweep_bucket(
        &self,
        bucket: &str,
        lifecycle: &Lifecycle,
        now: DateTime<Utc>,
        report: &mut SweepReport,
    ) -> LifecycleResult<()> {
        self.set_state(SweepState::Sweeping);
        let prefix = lifecycle.common_prefix();
        tracing::debug!(bucket = %bucket, prefix = %prefix, "sweeping bucket");

        let batch_size = self.config.batch_size();
        let mut objects = self.layer.walk(bucket, &prefix).await?;
        let mut batch = Vec::with_capacity(batch_size);
        while let Some(info) = objects.recv().await {
            report.scanned += 1;
            let action = lifecycle.compute_action(&info.name, &info.user_tags, info.mod_time, now);
            if action != Action::Delete {
                continue;
            }
            batch.push(info.name);
            if batch.len() >= batch_size {
                self.delete_batch(bucket, std::mem::take(&mut batch), report)
                    .await?;
            }
        }
        if !batch.is_empty() {
            self.delete_batch(bucket, batch, report).await?;
        }
        Ok(())
    }

    async fn delete_batch(
        &self,
        bucket: &str,
        batch: Vec<String>,
        report: &mut SweepReport,
    ) -> LifecycleResult<()> {
        self.check_cancelled()?;
        self.wait_for_low_load().await;
        for deletion in self.layer.delete_objects(bucket, &batch).await? {
            match deletion.result {
                Ok(()) => {
                    report.deleted += 1;
                    self.collab.events.emit(Event::expired(bucket, &deletion.object));
                }
                Err(e) => {
                    report.failed += 1;
                    tracing::warn!(
                        bucket = %bucket,
                        object = %deletion.object,
                        error = %e,
                        "expired object not deleted"
                    );
                }
            }
        }
        Ok(())
    }

    /// Hold off while client traffic is above the tolerance, up to the
    /// configured limit.
    async fn wait_for_low_load(&self) {
        let deadline = Instant::now() + self.config.low_load_max_wait();
        loop {
            let in_flight = self.collab.load.in_flight();
            if in_flight < self.config.request_tolerance {
                return;
            }
            if Instant::now() >= deadline {
                tracing::debug!(in_flight, "deleting under load");
                return;
            }
            tokio::time::sleep(self.config.low_load_poll()).await;
        }
    }

    fn check_cancelled(&self) -> LifecycleResult<()> {
        if *self.shutdown.borrow() {
            return Err(LifecycleError::Cancelled);
        }
        Ok(())
    }

    fn set_state(&self, state: SweepState) {
        *self.state.write() = state;
    }
}

impl std::fmt::Debug for LifecycleSweeper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleSweeper")
            .field("node_id", &self.node_id)
            .field("state", &self.state())
            .field("last_activity", &*self.last_activity.read())
            .finish()
    }
}

/// A round holding [`LIFECYCLE_LOCK`]. Dropped without [`finish`](Self::finish)
/// (the round panicked or its future was abandoned), it still resets the
/// sweeper to idle and releases the lock from a background task.
struct HeldRound<'a> {
    sweeper: &'a LifecycleSweeper,
    held: bool,
}

impl<'a> HeldRound<'a> {
    fn new(sweeper: &'a LifecycleSweeper) -> Self {
        sweeper.set_state(SweepState::LockAcquired);
        Self {
            sweeper,
            held: true,
        }
    }

    async fn finish(mut self) {
        let s = self.sweeper;
        s.set_state(SweepState::Idle);
        if let Err(e) = s.collab.lock.release(LIFECYCLE_LOCK, &s.node_id).await {
            tracing::warn!(node = %s.node_id, error = %e, "lifecycle lock release failed");
        }
        self.held = false;
    }
}

impl Drop for HeldRound<'_> {
    fn drop(&mut self) {
        if !self.held {
            return;
        }
        let s = self.sweeper;
        s.set_state(SweepState::Idle);
        tracing::warn!(node = %s.node_id, "lifecycle sweep abandoned, releasing lock");

        let lock = Arc::clone(&s.collab.lock);
        let node_id = s.node_id.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(rt) => {
                rt.spawn(async move {
                    if let Err(e) = lock.release(LIFECYCLE_LOCK, &node_id).await {
                        tracing::warn!(node = %node_id, error = %e, "lifecycle lock release failed");
                    }
                });
            }
            Err(_) => {
                tracing::error!(node = %s.node_id, "no runtime to release the lifecycle lock");
            }
        }
    }
}

/// Running sweeper loop.
pub struct SweeperHandle {
    sweeper: Arc<LifecycleSweeper>,
    task: JoinHandle<()>,
}

impl SweeperHandle {
    pub fn sweeper(&self) -> &Arc<LifecycleSweeper> {
        &self.sweeper
    }

    /// Signal the loop and wait for it to exit. A round in progress stops at
    /// its next batch boundary and still releases the lock.
    pub async fn stop(self) {
        self.sweeper.shutdown.send_replace(true);
        if let Err(e) = self.task.await {
            tracing::warn!(node = %self.sweeper.node_id, error = %e, "sweeper task failed");
        }
        tracing::info!(node = %self.sweeper.node_id, "lifecycle sweeper stopped");
    }
}
