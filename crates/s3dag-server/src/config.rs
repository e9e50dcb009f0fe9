use std::collections::BTreeMap;
use std::path::Path;

use s3dag_cache::CacheConfig;
use s3dag_lifecycle::{Lifecycle, LifecycleConfig};
use serde::{Deserialize, Serialize};

use crate::error::{ServerError, ServerResult};

/// Where object data lives beyond the cache.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// The cache is the only copy.
    Memory,
    /// Objects are written through to the content-addressed DAG.
    #[default]
    Dag,
}

/// Node configuration, usually read from a TOML file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Identity used as the lifecycle lock owner.
    pub node_id: String,
    pub backend: BackendKind,
    pub cache: CacheConfig,
    pub lifecycle: LifecycleConfig,
    /// Lifecycle policy per bucket name.
    pub lifecycle_policies: BTreeMap<String, Lifecycle>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            node_id: format!("node-{}", uuid::Uuid::now_v7()),
            backend: BackendKind::default(),
            cache: CacheConfig::default(),
            lifecycle: LifecycleConfig::default(),
            lifecycle_policies: BTreeMap::new(),
        }
    }
}

impl ServerConfig {
    /// Read `path`, or use defaults when no path is given.
    pub fn load(path: Option<&Path>) -> ServerResult<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = std::fs::read_to_string(path).map_err(|source| ServerError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::parse(&text, path)?;
        tracing::info!(path = %path.display(), node = %config.node_id, "configuration loaded");
        Ok(config)
    }

    pub fn from_toml(text: &str) -> ServerResult<Self> {
        Self::parse(text, Path::new("<inline>"))
    }

    fn parse(text: &str, path: &Path) -> ServerResult<Self> {
        let config: Self = toml::from_str(text).map_err(|source| ServerError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> ServerResult<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    fn validate(&self) -> ServerResult<()> {
        if self.node_id.trim().is_empty() {
            return Err(ServerError::Invalid("node_id must not be blank".into()));
        }
        for (bucket, lifecycle) in &self.lifecycle_policies {
            if !s3dag_types::is_valid_bucket_name(bucket) {
                return Err(ServerError::Invalid(format!(
                    "lifecycle policy for invalid bucket name {bucket:?}"
                )));
            }
            lifecycle.validate()?;
        }
        Ok(())
    }
}
