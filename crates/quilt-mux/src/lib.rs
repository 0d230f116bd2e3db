//! Path-prefix router over quilt backends.
//!
//! A [`Mux`] multiplexes several filesystems behind one [`Filesystem`]: each
//! operation is dispatched to the backend whose tag matches the path's kind.
//! The mux also aggregates backend lifecycles -- it tracks every backend
//! that can release resources and fires its own released token only after
//! all of them have confirmed release, which is what makes it safe to hand
//! an on-disk repo to a new mux after cancelling the old one.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use quilt_fs::{
    File, Filesystem, FsConfig, FsError, FsResult, PathKind, ReleasingFilesystem,
};
use quilt_http::HttpFilesystem;
use quilt_local::LocalFilesystem;
use quilt_mem::MemFilesystem;

/// Lifecycle state of a [`Mux`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MuxState {
    /// Handlers serve operations.
    Active,
    /// The bound scope was cancelled; backend release acks are still
    /// being collected.
    Draining,
    /// Every tracked backend has confirmed release.
    Released,
}

/// Multiplexes together multiple filesystems using path multiplexing.
pub struct Mux {
    handlers: HashMap<String, Arc<dyn Filesystem>>,
    // first configured backend with the adding capability
    default_write_destination: Option<String>,
    ctx: CancellationToken,
    released: CancellationToken,
    release_err: Arc<RwLock<Option<String>>>,
}

impl fmt::Debug for Mux {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mux")
            .field("handlers", &self.handlers.keys().collect::<Vec<_>>())
            .field("default_write_destination", &self.default_write_destination)
            .finish_non_exhaustive()
    }
}

impl Mux {
    /// Create a mux from a list of filesystem config records.
    ///
    /// Unknown types and duplicate tags fail construction. Backends holding
    /// releasable resources are bound to `ctx`: cancelling it drains them,
    /// and the mux's own released token fires once all have confirmed.
    pub async fn new(ctx: &CancellationToken, cfgs: Vec<FsConfig>) -> FsResult<Self> {
        let mut mux = Self {
            handlers: HashMap::new(),
            default_write_destination: None,
            ctx: ctx.clone(),
            released: CancellationToken::new(),
            release_err: Arc::new(RwLock::new(None)),
        };

        let mut releasing: Vec<Arc<dyn Filesystem>> = Vec::new();
        for cfg in &cfgs {
            let fs = construct(ctx, cfg).await.map_err(|e| {
                warn!(fs_type = %cfg.fs_type, error = %e, "constructing filesystem failed");
                e
            })?;
            if fs.as_releasing().is_some() {
                releasing.push(Arc::clone(&fs));
            }
            mux.set_filesystem(fs)?;
        }

        // one watcher per releasing backend; the mux's released token fires
        // only after the bound scope is cancelled and every watcher has
        // collected its backend's ack
        let scope = ctx.clone();
        let released = mux.released.clone();
        let release_err = Arc::clone(&mux.release_err);
        tokio::spawn(async move {
            scope.cancelled().await;
            let acks = releasing.iter().filter_map(|fs| fs.as_releasing()).map(|r| {
                let token = r.released();
                async move {
                    token.cancelled().await;
                    r.release_error()
                }
            });
            for err in futures::future::join_all(acks).await.into_iter().flatten() {
                warn!(error = %err, "backend reported a release error");
                *release_err.write().expect("lock poisoned") = Some(err);
            }
            released.cancel();
        });

        Ok(mux)
    }

    fn set_filesystem(&mut self, fs: Arc<dyn Filesystem>) -> FsResult<()> {
        let tag = fs.name().to_string();
        if self.handlers.contains_key(&tag) {
            return Err(FsError::Other(format!("mux already has a {tag:?} filesystem")));
        }
        if self.default_write_destination.is_none() && fs.as_adding().is_some() {
            self.default_write_destination = Some(tag.clone());
        }
        debug!(%tag, "filesystem registered");
        self.handlers.insert(tag, fs);
        Ok(())
    }

    /// The filesystem registered for a tag, if any.
    pub fn filesystem(&self, fs_type: &str) -> Option<Arc<dyn Filesystem>> {
        self.handlers.get(fs_type).cloned()
    }

    /// The mux's configured write destination: the first registered backend
    /// that supports batched adding.
    pub fn default_write_fs(&self) -> Option<Arc<dyn Filesystem>> {
        self.default_write_destination
            .as_deref()
            .and_then(|tag| self.filesystem(tag))
    }

    /// Current lifecycle state.
    pub fn state(&self) -> MuxState {
        if self.released.is_cancelled() {
            MuxState::Released
        } else if self.ctx.is_cancelled() {
            MuxState::Draining
        } else {
            MuxState::Active
        }
    }

    fn route(&self, path: &str) -> FsResult<&Arc<dyn Filesystem>> {
        if path.is_empty() {
            return Err(FsError::NotFound);
        }
        let kind = PathKind::of(path);
        self.handlers
            .get(kind.tag())
            .ok_or_else(|| FsError::UnknownPathKind {
                kind: kind.tag().to_string(),
                path: path.to_string(),
            })
    }
}

/// Construct a single backend from its config record.
async fn construct(ctx: &CancellationToken, cfg: &FsConfig) -> FsResult<Arc<dyn Filesystem>> {
    match cfg.fs_type.as_str() {
        "ipfs" => quilt_ipfs::new_filesystem(ctx, &cfg.config).await,
        "local" => Ok(Arc::new(LocalFilesystem::from_config(&cfg.config)?)),
        "http" => Ok(Arc::new(HttpFilesystem::from_config(&cfg.config)?)),
        "mem" => Ok(Arc::new(MemFilesystem::new())),
        "map" => Ok(Arc::new(MemFilesystem::named("map"))),
        other => Err(FsError::Other(format!(
            "unrecognized filesystem type: {other:?}"
        ))),
    }
}

#[async_trait]
impl Filesystem for Mux {
    fn name(&self) -> &str {
        "mux"
    }

    async fn has(&self, ctx: &CancellationToken, path: &str) -> FsResult<bool> {
        match self.route(path) {
            Ok(fs) => fs.has(ctx, path).await,
            Err(_) => Ok(false),
        }
    }

    async fn get(&self, ctx: &CancellationToken, path: &str) -> FsResult<File> {
        self.route(path)?.get(ctx, path).await
    }

    async fn put(&self, ctx: &CancellationToken, file: File) -> FsResult<String> {
        if self.state() == MuxState::Released {
            return Err(FsError::Released);
        }
        let path = file.full_path().to_string();
        self.route(&path)?.put(ctx, file).await
    }

    async fn delete(&self, ctx: &CancellationToken, path: &str) -> FsResult<()> {
        if self.state() == MuxState::Released {
            return Err(FsError::Released);
        }
        self.route(path)?.delete(ctx, path).await
    }
}

impl ReleasingFilesystem for Mux {
    fn released(&self) -> CancellationToken {
        self.released.clone()
    }

    fn release_error(&self) -> Option<String> {
        self.release_err.read().expect("lock poisoned").clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> CancellationToken {
        CancellationToken::new()
    }

    async fn default_mux(scope: &CancellationToken) -> Mux {
        Mux::new(
            scope,
            vec![
                FsConfig::of_type("http"),
                FsConfig::of_type("local"),
                FsConfig::of_type("mem"),
                FsConfig::of_type("map"),
            ],
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn registers_every_configured_backend() {
        let scope = ctx();
        let mux = default_mux(&scope).await;
        for tag in ["http", "local", "mem", "map"] {
            assert!(mux.filesystem(tag).is_some(), "missing {tag}");
        }
        assert!(mux.filesystem("ipfs").is_none());
    }

    #[tokio::test]
    async fn routes_by_path_prefix() {
        let scope = ctx();
        let mux = default_mux(&scope).await;

        let mem_path = mux
            .put(&ctx(), File::from_bytes("/mem/ignored.txt", b"routed".to_vec()))
            .await
            .unwrap();
        assert!(mem_path.starts_with("/mem/"));

        let mut file = mux.get(&ctx(), &mem_path).await.unwrap();
        assert_eq!(file.read_to_end().await.unwrap(), b"routed");

        let map_path = mux
            .put(&ctx(), File::from_bytes("/map/other.txt", b"mapped".to_vec()))
            .await
            .unwrap();
        assert!(map_path.starts_with("/map/"));
    }

    #[tokio::test]
    async fn empty_path_is_not_found() {
        let scope = ctx();
        let mux = default_mux(&scope).await;
        assert!(matches!(mux.get(&ctx(), "").await, Err(FsError::NotFound)));
        assert!(!mux.has(&ctx(), "").await.unwrap());
    }

    #[tokio::test]
    async fn unhandled_kind_is_a_descriptive_error() {
        let scope = ctx();
        let mux = Mux::new(&scope, vec![FsConfig::of_type("mem")]).await.unwrap();
        let err = mux.get(&ctx(), "/ipfs/Qmfoo").await.unwrap_err();
        match err {
            FsError::UnknownPathKind { kind, path } => {
                assert_eq!(kind, "ipfs");
                assert_eq!(path, "/ipfs/Qmfoo");
            }
            other => panic!("expected unknown-path-kind error, got: {other}"),
        }
    }

    #[tokio::test]
    async fn unrecognized_type_fails_construction() {
        let scope = ctx();
        let err = Mux::new(&scope, vec![FsConfig::of_type("tape")])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("unrecognized filesystem type"));
    }

    #[tokio::test]
    async fn duplicate_type_fails_construction() {
        let scope = ctx();
        let err = Mux::new(
            &scope,
            vec![FsConfig::of_type("mem"), FsConfig::of_type("mem")],
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("already has"));
    }

    #[tokio::test]
    async fn default_write_fs_is_first_adding_backend() {
        let scope = ctx();
        // http and local precede mem in the config, but neither can add
        let mux = default_mux(&scope).await;
        let write_fs = mux.default_write_fs().expect("a write destination");
        assert_eq!(write_fs.name(), "mem");
    }

    #[tokio::test]
    async fn mux_without_adding_backend_has_no_write_destination() {
        let scope = ctx();
        let mux = Mux::new(&scope, vec![FsConfig::of_type("http")]).await.unwrap();
        assert!(mux.default_write_fs().is_none());
    }

    #[tokio::test]
    async fn state_reflects_the_bound_scope() {
        let scope = ctx();
        let mux = default_mux(&scope).await;
        assert_eq!(mux.state(), MuxState::Active);

        scope.cancel();
        mux.released().cancelled().await;
        assert_eq!(mux.state(), MuxState::Released);
        assert!(mux.release_error().is_none());
    }
}
