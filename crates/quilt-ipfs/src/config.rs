use serde::Deserialize;

use quilt_fs::{FsError, FsResult};

/// Configuration for the content-addressed network filesystem.
///
/// At least one of `path` / `url` must be set. When both are set and the
/// on-disk repo is locked by another process, construction falls back to the
/// HTTP-API variant pointed at `url`.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IpfsConfig {
    /// Path to the on-disk repo.
    #[serde(default)]
    pub path: String,

    /// HTTP API address, used as a fallback when the repo cannot be locked.
    #[serde(default)]
    pub url: String,

    /// Whether to serve the local HTTP API. Does not apply when operating
    /// over HTTP via `url`.
    #[serde(default, rename = "enableAPI")]
    pub enable_api: bool,

    /// Enable the experimental pubsub service. Does not apply when operating
    /// over HTTP via `url`.
    #[serde(default)]
    pub enable_pub_sub: bool,

    /// Remove the default bootstrap addresses from the node.
    #[serde(default)]
    pub disable_bootstrap: bool,

    /// Extra addresses for the underlying swarm to listen on.
    #[serde(default)]
    pub additional_swarm_listening_addrs: Vec<String>,
}

impl IpfsConfig {
    /// Decode from an untyped config map, as the mux does.
    pub fn from_map(config: &serde_json::Value) -> FsResult<Self> {
        if config.is_null() {
            return Ok(Self::default());
        }
        serde_json::from_value(config.clone()).map_err(|e| FsError::Serialization(e.to_string()))
    }

    /// Returns an error when the configuration fields conflict.
    pub fn validate(&self) -> FsResult<()> {
        if self.path.is_empty() && self.url.is_empty() {
            return Err(FsError::Other(
                "must provide a repo path or api url to initialize an ipfs filesystem".into(),
            ));
        }
        Ok(())
    }
}
