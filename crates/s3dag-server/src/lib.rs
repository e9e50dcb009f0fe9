//! Node assembly for s3dag.
//!
//! Loads a [`ServerConfig`], wires the content store, ledger, object cache,
//! gateway and lifecycle sweeper into a [`Node`], and runs its background
//! work until shutdown.

pub mod config;
pub mod error;
pub mod node;

pub use config::{BackendKind, ServerConfig};
pub use error::{ServerError, ServerResult};
pub use node::{Node, RunningNode};
