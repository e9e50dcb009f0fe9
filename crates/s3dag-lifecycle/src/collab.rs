//! Collaborators the sweeper depends on, with in-process implementations.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::error::{LifecycleError, LifecycleResult};
use crate::rules::Lifecycle;

/// Source recorded on events raised by lifecycle expiry.
pub const ILM_EXPIRY_SOURCE: &str = "Internal: [ILM-EXPIRY]";

// ---------------------------------------------------------------------------
// Distributed lock
// ---------------------------------------------------------------------------

/// Cluster-scoped advisory lock.
#[async_trait]
pub trait DistributedLock: Send + Sync {
    /// Take `resource` for `owner`, waiting at most `timeout`. Fails with
    /// [`LifecycleError::LockTimeout`] if it stays held.
    async fn acquire(&self, resource: &str, owner: &str, timeout: Duration) -> LifecycleResult<()>;

    async fn release(&self, resource: &str, owner: &str) -> LifecycleResult<()>;
}

/// Lock service for nodes sharing one process.
#[derive(Default)]
pub struct InMemoryLockService {
    held: Mutex<HashMap<String, String>>,
    released: Notify,
}

impl InMemoryLockService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current holder of `resource`.
    pub fn holder(&self, resource: &str) -> Option<String> {
        self.held.lock().get(resource).cloned()
    }
}

#[async_trait]
impl DistributedLock for InMemoryLockService {
    async fn acquire(&self, resource: &str, owner: &str, timeout: Duration) -> LifecycleResult<()> {
        let deadline = Instant::now() + timeout;
        loop {
            let released = self.released.notified();
            tokio::pin!(released);
            released.as_mut().enable();
            {
                let mut held = self.held.lock();
                if !held.contains_key(resource) {
                    held.insert(resource.to_string(), owner.to_string());
                    return Ok(());
                }
            }
            if tokio::time::timeout_at(deadline, released).await.is_err() {
                return Err(LifecycleError::LockTimeout {
                    resource: resource.to_string(),
                });
            }
        }
    }

    async fn release(&self, resource: &str, owner: &str) -> LifecycleResult<()> {
        {
            let mut held = self.held.lock();
            if held.get(resource).map(String::as_str) != Some(owner) {
                return Err(LifecycleError::LockNotHeld {
                    resource: resource.to_string(),
                    owner: owner.to_string(),
                });
            }
            held.remove(resource);
        }
        self.released.notify_waiters();
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Peer status
// ---------------------------------------------------------------------------

/// What a node reports about its lifecycle activity.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleStatus {
    /// When the node last finished a sweep.
    pub last_activity: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait PeerStatusSource: Send + Sync {
    /// Status of every other node in the cluster.
    async fn peer_status(&self) -> LifecycleResult<Vec<LifecycleStatus>>;
}

/// A single-node deployment.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoPeers;

#[async_trait]
impl PeerStatusSource for NoPeers {
    async fn peer_status(&self) -> LifecycleResult<Vec<LifecycleStatus>> {
        Ok(Vec::new())
    }
}

/// Fixed peer statuses, replaceable at runtime.
#[derive(Debug, Default)]
pub struct StaticPeers {
    statuses: RwLock<Vec<LifecycleStatus>>,
}

impl StaticPeers {
    pub fn new(statuses: Vec<LifecycleStatus>) -> Self {
        Self {
            statuses: RwLock::new(statuses),
        }
    }

    pub fn set(&self, statuses: Vec<LifecycleStatus>) {
        *self.statuses.write() = statuses;
    }
}

#[async_trait]
impl PeerStatusSource for StaticPeers {
    async fn peer_status(&self) -> LifecycleResult<Vec<LifecycleStatus>> {
        Ok(self.statuses.read().clone())
    }
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    ObjectRemovedDelete,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ObjectRemovedDelete => write!(f, "s3:ObjectRemoved:Delete"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub kind: EventKind,
    pub bucket: String,
    pub object: String,
    pub source: String,
}

impl Event {
    pub fn expired(bucket: &str, object: &str) -> Self {
        Self {
            kind: EventKind::ObjectRemovedDelete,
            bucket: bucket.to_string(),
            object: object.to_string(),
            source: ILM_EXPIRY_SOURCE.to_string(),
        }
    }
}

/// Fire-and-forget notification sink.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: Event);
}

/// Logs each event.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: Event) {
        tracing::info!(
            event = %event.kind,
            bucket = %event.bucket,
            object = %event.object,
            source = %event.source,
            "event"
        );
    }
}

/// Keeps every event for inspection.
#[derive(Debug, Default)]
pub struct RecordingEventSink {
    events: Mutex<Vec<Event>>,
}

impl RecordingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }
}

impl EventSink for RecordingEventSink {
    fn emit(&self, event: Event) {
        self.events.lock().push(event);
    }
}

// ---------------------------------------------------------------------------
// Request load
// ---------------------------------------------------------------------------

/// How busy the node is serving client requests.
pub trait RequestLoad: Send + Sync {
    fn in_flight(&self) -> usize;
}

/// A node with no request front end.
#[derive(Clone, Copy, Debug, Default)]
pub struct IdleLoad;

impl RequestLoad for IdleLoad {
    fn in_flight(&self) -> usize {
        0
    }
}

// ---------------------------------------------------------------------------
// Policies
// ---------------------------------------------------------------------------

pub trait LifecyclePolicySource: Send + Sync {
    /// The bucket's lifecycle, if it has one.
    fn get(&self, bucket: &str) -> Option<Lifecycle>;
}

/// Per-bucket lifecycle policies held in memory.
#[derive(Debug, Default)]
pub struct LifecycleRegistry {
    policies: RwLock<HashMap<String, Lifecycle>>,
}

impl LifecycleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and install `lifecycle` for `bucket`, replacing any previous one.
    pub fn set(&self, bucket: &str, lifecycle: Lifecycle) -> LifecycleResult<()> {
        lifecycle.validate()?;
        self.policies.write().insert(bucket.to_string(), lifecycle);
        tracing::info!(bucket = %bucket, "lifecycle policy set");
        Ok(())
    }

    pub fn remove(&self, bucket: &str) -> bool {
        self.policies.write().remove(bucket).is_some()
    }

    pub fn len(&self) -> usize {
        self.policies.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.read().is_empty()
    }
}

impl LifecyclePolicySource for LifecycleRegistry {
    fn get(&self, bucket: &str) -> Option<Lifecycle> {
        self.policies.read().get(bucket).cloned()
    }
}

/// Everything a sweeper needs besides the storage layer and its policies.
#[derive(Clone)]
pub struct Collaborators {
    pub lock: Arc<dyn DistributedLock>,
    pub peers: Arc<dyn PeerStatusSource>,
    pub events: Arc<dyn EventSink>,
    pub load: Arc<dyn RequestLoad>,
}

impl Collaborators {
    /// A single node: private lock, no peers, logged events, no load.
    pub fn local() -> Self {
        Self {
            lock: Arc::new(InMemoryLockService::new()),
            peers: Arc::new(NoPeers),
            events: Arc::new(TracingEventSink),
            load: Arc::new(IdleLoad),
        }
    }
}
