use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use quilt_fs::{
    split_store_path, AddedFile, Adder, AddingFilesystem, DirSink, File, Filesystem, FsError,
    FsResult, PathTree, ReleasingFilesystem,
};

use crate::config::IpfsConfig;
use crate::http_api::IpfsApiFilesystem;
use crate::repo::{Block, Repo};

/// The path-prefix tag for the network content-addressed backend.
pub const STORE_NAME: &str = "ipfs";

/// Initialize the on-disk repo layout at `path`.
pub fn init_repo(path: impl AsRef<std::path::Path>) -> FsResult<()> {
    Repo::init(path)
}

/// Construct the network filesystem from an untyped config map.
///
/// Holds the repo's exclusive lock for the life of `ctx`. When the lock is
/// held by another process and `url` is configured, silently falls back to
/// the HTTP-API variant; with no `path` at all, the API variant is used
/// directly.
pub async fn new_filesystem(
    ctx: &CancellationToken,
    config: &serde_json::Value,
) -> FsResult<Arc<dyn Filesystem>> {
    let cfg = IpfsConfig::from_map(config)?;
    cfg.validate()?;

    if cfg.path.is_empty() {
        return Ok(Arc::new(IpfsApiFilesystem::new(&cfg.url)));
    }

    match IpfsFilesystem::open(ctx, cfg.clone()) {
        Ok(fs) => Ok(Arc::new(fs)),
        Err(FsError::RepoLocked) if !cfg.url.is_empty() => {
            info!(url = %cfg.url, "repo locked by another process, using http api fallback");
            Ok(Arc::new(IpfsApiFilesystem::new(&cfg.url)))
        }
        Err(err) => Err(err),
    }
}

/// Split a `/ipfs/` or `/ipld/` path into digest head and child segments.
fn split_network_path(path: &str) -> FsResult<(&str, Vec<&str>)> {
    split_store_path(STORE_NAME, path).or_else(|_| split_store_path("ipld", path))
}

/// Content-addressed filesystem over an exclusive on-disk block repo.
///
/// The repo lock is taken at construction and released when the construction
/// scope is cancelled; the released token fires only after the lock is gone,
/// and writes fail once release has begun.
#[derive(Debug)]
pub struct IpfsFilesystem {
    repo: Arc<Repo>,
    closed: Arc<AtomicBool>,
    released: CancellationToken,
    release_err: Arc<RwLock<Option<String>>>,
}

impl IpfsFilesystem {
    /// Open the repo at `cfg.path`, taking its exclusive lock.
    pub fn open(ctx: &CancellationToken, cfg: IpfsConfig) -> FsResult<Self> {
        cfg.validate()?;
        let repo = Arc::new(Repo::open(&cfg.path)?);
        repo.lock()?;

        let closed = Arc::new(AtomicBool::new(false));
        let released = CancellationToken::new();
        let release_err: Arc<RwLock<Option<String>>> = Arc::new(RwLock::new(None));

        {
            let scope = ctx.clone();
            let repo = Arc::clone(&repo);
            let closed = Arc::clone(&closed);
            let released = released.clone();
            let release_err = Arc::clone(&release_err);
            tokio::spawn(async move {
                scope.cancelled().await;
                closed.store(true, Ordering::SeqCst);
                debug!("releasing ipfs repo lock");
                if let Err(err) = repo.unlock() {
                    warn!(error = %err, "failed to release repo lock");
                    *release_err.write().expect("lock poisoned") = Some(err.to_string());
                }
                released.cancel();
            });
        }

        Ok(Self {
            repo,
            closed,
            released,
            release_err,
        })
    }

    fn check_open(&self) -> FsResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(FsError::Released);
        }
        Ok(())
    }

    async fn resolve(&self, path: &str) -> FsResult<String> {
        let (head, tail) = split_network_path(path)?;
        let mut digest = head.to_string();
        for segment in tail {
            match self.repo.read_block(&digest).await? {
                Some(Block::Dir { children, .. }) => {
                    digest = children.get(segment).ok_or(FsError::NotFound)?.clone();
                }
                Some(Block::Bytes { .. }) => return Err(FsError::NotADirectory),
                None => return Err(FsError::NotFound),
            }
        }
        if self.repo.read_block(&digest).await?.is_none() {
            return Err(FsError::NotFound);
        }
        Ok(digest)
    }

    fn materialize<'a>(&'a self, digest: &'a str) -> BoxFuture<'a, FsResult<File>> {
        async move {
            match self.repo.read_block(digest).await?.ok_or(FsError::NotFound)? {
                Block::Bytes {
                    original_path,
                    data,
                    ..
                } => Ok(File::from_bytes(original_path, data)),
                Block::Dir {
                    original_path,
                    children,
                } => {
                    let mut files = Vec::with_capacity(children.len());
                    for child_digest in children.values() {
                        files.push(self.materialize(child_digest).await?);
                    }
                    Ok(File::dir(original_path, files))
                }
            }
        }
        .boxed()
    }
}

fn put_file<'a>(repo: &'a Repo, file: File) -> BoxFuture<'a, FsResult<String>> {
    async move {
        match file {
            File::Dir(mut dir) => {
                let path = dir.full_path().to_string();
                let mut ordered: Vec<(String, String)> = Vec::new();
                while let Some(child) = dir.next_child() {
                    let name = child.file_name().to_string();
                    let digest = put_file(repo, child).await?;
                    ordered.push((name, digest));
                }
                let mut manifest = Vec::new();
                for (_, digest) in &ordered {
                    manifest.extend_from_slice(digest.as_bytes());
                    manifest.push(b'\n');
                }
                let digest = quilt_hash::hash_bytes(&manifest);
                let children: BTreeMap<String, String> = ordered.into_iter().collect();
                repo.write_block(
                    &digest,
                    &Block::Dir {
                        original_path: path,
                        children,
                    },
                )
                .await?;
                Ok(digest)
            }
            File::Hooked(hook) => {
                let mut inner = hook.into_inner();
                let data = inner.read_to_end().await?;
                let digest = quilt_hash::hash_bytes(&data);
                repo.write_block(
                    &digest,
                    &Block::Bytes {
                        name: inner.file_name().to_string(),
                        original_path: inner.full_path().to_string(),
                        data,
                    },
                )
                .await?;
                Ok(digest)
            }
            File::Bytes(mut f) => {
                let data = f.read_to_end().await?;
                let digest = quilt_hash::hash_bytes(&data);
                repo.write_block(
                    &digest,
                    &Block::Bytes {
                        name: f.file_name().to_string(),
                        original_path: f.full_path().to_string(),
                        data,
                    },
                )
                .await?;
                Ok(digest)
            }
        }
    }
    .boxed()
}

#[async_trait]
impl Filesystem for IpfsFilesystem {
    fn name(&self) -> &str {
        STORE_NAME
    }

    async fn has(&self, _ctx: &CancellationToken, path: &str) -> FsResult<bool> {
        match self.resolve(path).await {
            Ok(_) => Ok(true),
            Err(FsError::NotFound) | Err(FsError::NotADirectory) => Ok(false),
            Err(err) => Err(err),
        }
    }

    async fn get(&self, ctx: &CancellationToken, path: &str) -> FsResult<File> {
        if ctx.is_cancelled() {
            return Err(FsError::Cancelled);
        }
        let digest = self.resolve(path).await?;
        self.materialize(&digest).await
    }

    async fn put(&self, ctx: &CancellationToken, file: File) -> FsResult<String> {
        self.check_open()?;
        if ctx.is_cancelled() {
            return Err(FsError::Cancelled);
        }
        let digest = put_file(&self.repo, file).await?;
        Ok(format!("/{STORE_NAME}/{digest}"))
    }

    async fn delete(&self, _ctx: &CancellationToken, path: &str) -> FsResult<()> {
        self.check_open()?;
        let (head, tail) = split_network_path(path)?;
        if !tail.is_empty() {
            return Err(FsError::Other(format!(
                "deleting a path inside a stored directory is not supported: {path}"
            )));
        }
        self.repo.remove_block(head).await
    }

    fn as_adding(&self) -> Option<&dyn AddingFilesystem> {
        Some(self)
    }

    fn as_releasing(&self) -> Option<&dyn ReleasingFilesystem> {
        Some(self)
    }
}

#[async_trait]
impl AddingFilesystem for IpfsFilesystem {
    async fn new_adder(
        &self,
        _ctx: &CancellationToken,
        _pin: bool,
        wrap: bool,
    ) -> FsResult<(Box<dyn Adder>, mpsc::Receiver<AddedFile>)> {
        self.check_open()?;
        let (tx, rx) = mpsc::channel(1);
        let adder = IpfsAdder {
            repo: Arc::clone(&self.repo),
            closed: Arc::clone(&self.closed),
            tx: Some(tx),
            tree: PathTree::new(),
            wrap,
        };
        Ok((Box::new(adder), rx))
    }
}

impl ReleasingFilesystem for IpfsFilesystem {
    fn released(&self) -> CancellationToken {
        self.released.clone()
    }

    fn release_error(&self) -> Option<String> {
        self.release_err.read().expect("lock poisoned").clone()
    }
}

/// Streaming adder over the block repo.
struct IpfsAdder {
    repo: Arc<Repo>,
    closed: Arc<AtomicBool>,
    tx: Option<mpsc::Sender<AddedFile>>,
    tree: PathTree,
    wrap: bool,
}

impl IpfsAdder {
    async fn emit(tx: &Option<mpsc::Sender<AddedFile>>, event: AddedFile) {
        if let Some(tx) = tx {
            let _ = tx.send(event).await;
        }
    }

    fn add_inner<'a>(
        &'a mut self,
        ctx: &'a CancellationToken,
        file: File,
    ) -> BoxFuture<'a, FsResult<()>> {
        async move {
            if ctx.is_cancelled() {
                return Err(FsError::Cancelled);
            }
            if self.closed.load(Ordering::SeqCst) {
                return Err(FsError::Released);
            }
            match file {
                File::Dir(mut dir) => {
                    while let Some(child) = dir.next_child() {
                        self.add_inner(ctx, child).await?;
                    }
                    Ok(())
                }
                mut leaf => {
                    let input_path = leaf.full_path().to_string();
                    let data = leaf.read_to_end().await?;
                    let bytes = data.len() as u64;
                    let digest = quilt_hash::hash_bytes(&data);
                    self.repo
                        .write_block(
                            &digest,
                            &Block::Bytes {
                                name: leaf.file_name().to_string(),
                                original_path: input_path.clone(),
                                data,
                            },
                        )
                        .await?;
                    self.tree.insert_leaf(&input_path, digest.clone());
                    Self::emit(
                        &self.tx,
                        AddedFile {
                            input_path,
                            store_name: STORE_NAME.to_string(),
                            store_hash: format!("/{STORE_NAME}/{digest}"),
                            bytes,
                        },
                    )
                    .await;
                    Ok(())
                }
            }
        }
        .boxed()
    }
}

#[async_trait]
impl Adder for IpfsAdder {
    async fn add_file(&mut self, ctx: &CancellationToken, file: File) -> FsResult<()> {
        self.add_inner(ctx, file).await
    }

    async fn finalize(&mut self, ctx: &CancellationToken) -> FsResult<String> {
        if ctx.is_cancelled() {
            return Err(FsError::Cancelled);
        }
        let mut sink = RepoSink {
            repo: Arc::clone(&self.repo),
            tx: self.tx.clone(),
        };
        let root_digest = self.tree.merkelize(&mut sink, self.wrap).await?;
        self.tx = None;
        Ok(format!("/{STORE_NAME}/{root_digest}"))
    }
}

struct RepoSink {
    repo: Arc<Repo>,
    tx: Option<mpsc::Sender<AddedFile>>,
}

#[async_trait]
impl DirSink for RepoSink {
    async fn store_dir(
        &mut self,
        original_path: &str,
        digest: &str,
        children: &BTreeMap<String, String>,
        manifest: &[u8],
    ) -> FsResult<()> {
        self.repo
            .write_block(
                digest,
                &Block::Dir {
                    original_path: original_path.to_string(),
                    children: children.clone(),
                },
            )
            .await?;
        IpfsAdder::emit(
            &self.tx,
            AddedFile {
                input_path: original_path.to_string(),
                store_name: STORE_NAME.to_string(),
                store_hash: format!("/{STORE_NAME}/{digest}"),
                bytes: manifest.len() as u64,
            },
        )
        .await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> CancellationToken {
        CancellationToken::new()
    }

    fn temp_repo() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        Repo::init(dir.path()).unwrap();
        dir
    }

    fn open_fs(dir: &tempfile::TempDir, scope: &CancellationToken) -> IpfsFilesystem {
        IpfsFilesystem::open(
            scope,
            IpfsConfig {
                path: dir.path().to_string_lossy().into_owned(),
                ..Default::default()
            },
        )
        .unwrap()
    }

    #[tokio::test]
    async fn put_get_delete_roundtrip() {
        let dir = temp_repo();
        let scope = CancellationToken::new();
        let fs = open_fs(&dir, &scope);

        let path = fs
            .put(&ctx(), File::from_bytes("hello.json", b"{}".to_vec()))
            .await
            .unwrap();
        assert!(path.starts_with("/ipfs/"));
        assert!(fs.has(&ctx(), &path).await.unwrap());

        let mut file = fs.get(&ctx(), &path).await.unwrap();
        assert_eq!(file.read_to_end().await.unwrap(), b"{}");

        fs.delete(&ctx(), &path).await.unwrap();
        assert!(!fs.has(&ctx(), &path).await.unwrap());
    }

    #[tokio::test]
    async fn directory_tree_roundtrip() {
        let dir = temp_repo();
        let scope = CancellationToken::new();
        let fs = open_fs(&dir, &scope);

        let tree = File::dir(
            "/data",
            vec![
                File::from_bytes("a.txt", b"a".to_vec()),
                File::dir("sub", vec![File::from_bytes("b.txt", b"b".to_vec())]),
            ],
        );
        let root = fs.put(&ctx(), tree).await.unwrap();

        let mut nested = fs.get(&ctx(), &format!("{root}/sub/b.txt")).await.unwrap();
        assert_eq!(nested.read_to_end().await.unwrap(), b"b");
    }

    #[tokio::test]
    async fn ipld_paths_resolve_through_the_same_store() {
        let dir = temp_repo();
        let scope = CancellationToken::new();
        let fs = open_fs(&dir, &scope);

        let path = fs
            .put(&ctx(), File::from_bytes("x.bin", b"linked data".to_vec()))
            .await
            .unwrap();
        let ipld = path.replacen("/ipfs/", "/ipld/", 1);
        let mut file = fs.get(&ctx(), &ipld).await.unwrap();
        assert_eq!(file.read_to_end().await.unwrap(), b"linked data");
    }

    #[tokio::test]
    async fn adder_builds_a_fetchable_tree() {
        let dir = temp_repo();
        let scope = CancellationToken::new();
        let fs = open_fs(&dir, &scope);

        let (mut adder, mut rx) = fs.new_adder(&ctx(), true, true).await.unwrap();
        let drain = tokio::spawn(async move {
            let mut n = 0;
            while rx.recv().await.is_some() {
                n += 1;
            }
            n
        });

        adder
            .add_file(&ctx(), File::from_bytes("/w/a.txt", b"a".to_vec()))
            .await
            .unwrap();
        adder
            .add_file(&ctx(), File::from_bytes("/w/b.txt", b"b".to_vec()))
            .await
            .unwrap();
        let root = adder.finalize(&ctx()).await.unwrap();
        assert_eq!(drain.await.unwrap(), 3);

        let mut a = fs.get(&ctx(), &format!("{root}/a.txt")).await.unwrap();
        assert_eq!(a.read_to_end().await.unwrap(), b"a");
    }

    #[tokio::test]
    async fn cancelling_the_scope_releases_the_lock_and_fails_writes() {
        let dir = temp_repo();
        let scope = CancellationToken::new();
        let fs = open_fs(&dir, &scope);

        let path = fs
            .put(&ctx(), File::from_bytes("hello.txt", b"oh hai there".to_vec()))
            .await
            .unwrap();

        scope.cancel();
        fs.released().cancelled().await;
        assert!(fs.release_error().is_none());

        // writes against the released filesystem fail
        let err = fs
            .put(&ctx(), File::from_bytes("later.txt", b"?".to_vec()))
            .await
            .unwrap_err();
        assert!(matches!(err, FsError::Released));

        // a second filesystem over the same repo can now take the lock and
        // read what the first one wrote
        let scope_b = CancellationToken::new();
        let fs_b = open_fs(&dir, &scope_b);
        let mut file = fs_b.get(&ctx(), &path).await.unwrap();
        assert_eq!(file.read_to_end().await.unwrap(), b"oh hai there");
    }

    #[tokio::test]
    async fn second_open_while_locked_reports_repo_locked() {
        let dir = temp_repo();
        let scope = CancellationToken::new();
        let _fs = open_fs(&dir, &scope);

        let err = IpfsFilesystem::open(
            &CancellationToken::new(),
            IpfsConfig {
                path: dir.path().to_string_lossy().into_owned(),
                ..Default::default()
            },
        )
        .unwrap_err();
        assert!(matches!(err, FsError::RepoLocked));
    }

    #[tokio::test]
    async fn locked_repo_with_url_falls_back_to_api_variant() {
        let dir = temp_repo();
        let scope = CancellationToken::new();
        let _holder = open_fs(&dir, &scope);

        let fs = new_filesystem(
            &CancellationToken::new(),
            &serde_json::json!({
                "path": dir.path().to_string_lossy(),
                "url": "http://127.0.0.1:5001",
            }),
        )
        .await
        .unwrap();

        assert_eq!(fs.name(), "ipfs");
        // the api variant holds no local resources, so it has no release
        // capability; that is how we can tell the fallback happened
        assert!(fs.as_releasing().is_none());
    }

    #[tokio::test]
    async fn locked_repo_without_url_surfaces_the_lock_error() {
        let dir = temp_repo();
        let scope = CancellationToken::new();
        let _holder = open_fs(&dir, &scope);

        let err = new_filesystem(
            &CancellationToken::new(),
            &serde_json::json!({ "path": dir.path().to_string_lossy() }),
        )
        .await
        .err()
        .unwrap();
        assert!(matches!(err, FsError::RepoLocked));
    }
}
