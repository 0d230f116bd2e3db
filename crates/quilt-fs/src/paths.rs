use serde::{Deserialize, Serialize};

use crate::error::{FsError, FsResult};

/// The kind of backend a path string refers to.
///
/// Path kinds form a closed set; routing in the mux dispatches on them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PathKind {
    /// The empty path. Resolves to nothing.
    None,
    /// `http://` or `https://` URLs.
    Http,
    /// `/ipfs/...` or `/ipld/...` content-addressed network paths.
    Ipfs,
    /// `/mem/...` in-memory content-addressed paths.
    Mem,
    /// `/map/...` alternative in-memory paths.
    Map,
    /// Anything else: a path on the local disk.
    Local,
}

impl PathKind {
    /// Estimate what type of backend a path string is referring to.
    pub fn of(path: &str) -> PathKind {
        if path.is_empty() {
            PathKind::None
        } else if path.starts_with("http://") || path.starts_with("https://") {
            PathKind::Http
        } else if path.starts_with("/ipfs") || path.starts_with("/ipld") {
            PathKind::Ipfs
        } else if path.starts_with("/mem") {
            PathKind::Mem
        } else if path.starts_with("/map") {
            PathKind::Map
        } else {
            PathKind::Local
        }
    }

    /// The routing tag for this kind, matching backend names.
    pub fn tag(&self) -> &'static str {
        match self {
            PathKind::None => "none",
            PathKind::Http => "http",
            PathKind::Ipfs => "ipfs",
            PathKind::Mem => "mem",
            PathKind::Map => "map",
            PathKind::Local => "local",
        }
    }
}

/// Binds a filesystem type tag to an untyped configuration map.
///
/// A list of these records drives mux construction; each backend decodes the
/// `config` value into its own typed configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FsConfig {
    #[serde(rename = "type")]
    pub fs_type: String,
    #[serde(default)]
    pub config: serde_json::Value,
}

impl FsConfig {
    /// A config record with an empty configuration map.
    pub fn of_type(fs_type: impl Into<String>) -> Self {
        Self {
            fs_type: fs_type.into(),
            config: serde_json::Value::Null,
        }
    }
}

/// The `/<storeName>/` prefix for a store's paths.
pub fn name_prefix(store_name: &str) -> String {
    format!("/{store_name}/")
}

/// Split a store path into its digest head and trailing child segments.
///
/// `/mem/<digest>/foo/bar` becomes `("<digest>", ["foo", "bar"])`. Fails with
/// `NotFound` when the path does not carry the store's prefix or has no head.
pub fn split_store_path<'a>(store_name: &str, path: &'a str) -> FsResult<(&'a str, Vec<&'a str>)> {
    let prefix = name_prefix(store_name);
    let rest = path.strip_prefix(&prefix).ok_or(FsError::NotFound)?;
    let mut segments = rest.split('/').filter(|s| !s.is_empty());
    let head = segments.next().ok_or(FsError::NotFound)?;
    Ok((head, segments.collect()))
}

/// The last segment of a slash-separated path.
pub fn base_name(path: &str) -> &str {
    path.rsplit('/').find(|s| !s.is_empty()).unwrap_or(path)
}

/// Join a parent path and a base name with a single slash.
pub fn join(parent: &str, base: &str) -> String {
    let parent = parent.trim_end_matches('/');
    if parent.is_empty() {
        format!("/{base}")
    } else {
        format!("{parent}/{base}")
    }
}
