use std::sync::Arc;

use s3dag_cache::{CacheBacking, ExpiryHandle, ObjectCache};
use s3dag_gateway::{DagBackend, Gateway, ObjectLayer};
use s3dag_ledger::Ledger;
use s3dag_lifecycle::{
    Collaborators, LifecyclePolicySource, LifecycleRegistry, LifecycleSweeper, SweeperHandle,
};
use s3dag_store::{ContentStore, Datastore, InMemoryContentStore, InMemoryDatastore};

use crate::config::{BackendKind, ServerConfig};
use crate::error::{ServerError, ServerResult};

/// A fully wired s3dag node that has not started its background work.
pub struct Node {
    config: ServerConfig,
    store: Arc<dyn ContentStore>,
    ledger: Arc<Ledger>,
    cache: Arc<ObjectCache>,
    gateway: Arc<Gateway>,
    policies: Arc<LifecycleRegistry>,
    sweeper: Arc<LifecycleSweeper>,
}

impl Node {
    /// Build a single-node deployment.
    pub fn build(config: ServerConfig) -> ServerResult<Self> {
        Self::with_collaborators(config, Collaborators::local())
    }

    /// Build a node whose sweeper coordinates through `collab`.
    pub fn with_collaborators(config: ServerConfig, collab: Collaborators) -> ServerResult<Self> {
        let store: Arc<dyn ContentStore> = Arc::new(InMemoryContentStore::new());
        let datastore: Arc<dyn Datastore> = Arc::new(InMemoryDatastore::new());
        let ledger = Arc::new(Ledger::new(Arc::clone(&store), datastore));

        let backing = match config.backend {
            BackendKind::Memory => CacheBacking::MemoryOnly,
            BackendKind::Dag => CacheBacking::Persistent(Arc::new(DagBackend::new(
                Arc::clone(&ledger),
                Arc::clone(&store),
            ))),
        };
        let cache = Arc::new(ObjectCache::new(config.cache.clone(), backing));
        let gateway = Arc::new(Gateway::new(
            Arc::clone(&cache),
            Arc::clone(&ledger),
            Arc::clone(&store),
        ));

        let policies = Arc::new(LifecycleRegistry::new());
        for (bucket, lifecycle) in &config.lifecycle_policies {
            policies.set(bucket, lifecycle.clone())?;
        }

        let layer = Arc::clone(&gateway) as Arc<dyn ObjectLayer>;
        let sweeper = Arc::new(LifecycleSweeper::new(
            config.node_id.clone(),
            config.lifecycle.clone(),
            layer,
            Arc::clone(&policies) as Arc<dyn LifecyclePolicySource>,
            collab,
        ));

        tracing::info!(
            node = %config.node_id,
            backend = ?config.backend,
            policies = policies.len(),
            "node assembled"
        );
        Ok(Self {
            config,
            store,
            ledger,
            cache,
            gateway,
            policies,
            sweeper,
        })
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn ContentStore> {
        &self.store
    }

    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    pub fn cache(&self) -> &Arc<ObjectCache> {
        &self.cache
    }

    pub fn gateway(&self) -> &Arc<Gateway> {
        &self.gateway
    }

    pub fn policies(&self) -> &Arc<LifecycleRegistry> {
        &self.policies
    }

    pub fn sweeper(&self) -> &Arc<LifecycleSweeper> {
        &self.sweeper
    }

    /// Start cache expiry and the lifecycle sweeper. Must be called from
    /// within a Tokio runtime.
    pub fn start(self) -> ServerResult<RunningNode> {
        let expiry = self.cache.start_expiry().map_err(ServerError::Expiry)?;
        let sweeper = Arc::clone(&self.sweeper).start();
        tracing::info!(node = %self.config.node_id, "node started");
        Ok(RunningNode {
            node: self,
            expiry,
            sweeper,
        })
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("node_id", &self.config.node_id)
            .field("backend", &self.config.backend)
            .finish_non_exhaustive()
    }
}

/// A node with its background work running.
pub struct RunningNode {
    node: Node,
    expiry: ExpiryHandle,
    sweeper: SweeperHandle,
}

impl RunningNode {
    pub fn node(&self) -> &Node {
        &self.node
    }

    /// Stop the sweeper and cache expiry, then close the ledger.
    pub async fn shutdown(self) -> ServerResult<()> {
        let Self {
            node,
            expiry,
            sweeper,
        } = self;
        sweeper.stop().await;
        expiry.stop();
        node.ledger.close()?;
        tracing::info!(node = %node.config.node_id, "node stopped");
        Ok(())
    }
}
