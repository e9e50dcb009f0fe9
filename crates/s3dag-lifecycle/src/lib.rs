//! Lifecycle sweeper for s3dag.
//!
//! Once per interval, one node in the cluster takes a named advisory lock,
//! walks every bucket that has a [`Lifecycle`] policy, and deletes the
//! objects whose rules say they have expired. Deletions go out in bounded
//! batches through the [`ObjectLayer`](s3dag_gateway::ObjectLayer), and each
//! one raises an `ObjectRemovedDelete` event.
//!
//! The sweeper is an explicitly constructed service: the lock, peer status,
//! event sink, request-load gauge and policy source are injected as
//! [`collab`] traits, and [`LifecycleSweeper::start`] returns a handle that
//! stops it.

pub mod collab;
pub mod config;
pub mod error;
pub mod rules;
pub mod sweeper;
pub mod timeout;

pub use collab::{
    Collaborators, DistributedLock, Event, EventKind, EventSink, IdleLoad, InMemoryLockService,
    LifecyclePolicySource, LifecycleRegistry, LifecycleStatus, NoPeers, PeerStatusSource,
    RecordingEventSink, RequestLoad, StaticPeers, TracingEventSink, ILM_EXPIRY_SOURCE,
};
pub use config::LifecycleConfig;
pub use error::{LifecycleError, LifecycleResult};
pub use rules::{longest_common_prefix, Action, Expiration, Lifecycle, Rule, RuleStatus};
pub use sweeper::{LifecycleSweeper, SweepReport, SweepState, SweeperHandle, LIFECYCLE_LOCK};
pub use timeout::DynamicTimeout;
