use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use quilt_fs::{
    split_store_path, AddedFile, Adder, AddingFilesystem, File, Filesystem, FsError, FsResult,
};

use crate::adder::MemAdder;
use crate::store::{Entry, HashStore};

/// In-memory content-addressed filesystem.
///
/// Files are hashed into a flat digest-keyed map; directories are stored as
/// manifests of child digests, so a whole tree is identified by its root
/// digest. Safe for concurrent readers and serialized writers.
pub struct MemFilesystem {
    store: Arc<HashStore>,
}

impl MemFilesystem {
    /// A fresh store under the `mem` path prefix.
    pub fn new() -> Self {
        Self::named("mem")
    }

    /// A fresh store under an alternative path prefix (e.g. `map`).
    pub fn named(name: &'static str) -> Self {
        Self {
            store: Arc::new(HashStore::new(name)),
        }
    }

    /// Number of objects currently stored.
    pub fn object_count(&self) -> usize {
        self.store.len()
    }

    /// Link another store as a read-fallback peer: on a local miss, peers are
    /// probed in order and the first hit is returned.
    pub fn add_peer(&self, peer: &MemFilesystem) {
        self.store.add_peer(Arc::clone(&peer.store));
    }

    /// Resolve a store path to the digest of the entry it names.
    fn resolve(&self, path: &str) -> FsResult<String> {
        let (head, tail) = split_store_path(self.store.name(), path)?;
        let mut digest = head.to_string();
        for segment in tail {
            match self.store.lookup(&digest) {
                Some(Entry::Dir { children, .. }) => {
                    digest = children.get(segment).ok_or(FsError::NotFound)?.clone();
                }
                Some(Entry::Bytes { .. }) => return Err(FsError::NotADirectory),
                None => return Err(FsError::NotFound),
            }
        }
        if self.store.lookup(&digest).is_none() {
            return Err(FsError::NotFound);
        }
        Ok(digest)
    }

    /// Rebuild a file tree from a stored entry.
    fn materialize(&self, digest: &str) -> FsResult<File> {
        match self.store.lookup(digest).ok_or(FsError::NotFound)? {
            Entry::Bytes {
                original_path,
                data,
                ..
            } => Ok(File::from_bytes(original_path, data)),
            Entry::Dir {
                original_path,
                children,
            } => {
                let mut files = Vec::with_capacity(children.len());
                for child_digest in children.values() {
                    files.push(self.materialize(child_digest)?);
                }
                Ok(File::dir(original_path, files))
            }
        }
    }
}

impl Default for MemFilesystem {
    fn default() -> Self {
        Self::new()
    }
}

/// Store a file or directory tree, returning the root digest.
fn put_file<'a>(store: &'a Arc<HashStore>, file: File) -> BoxFuture<'a, FsResult<String>> {
    async move {
        match file {
            File::Dir(mut dir) => {
                let path = dir.full_path().to_string();
                // traversal order decides the manifest order here
                let mut ordered: Vec<(String, String)> = Vec::new();
                while let Some(child) = dir.next_child() {
                    let name = child.file_name().to_string();
                    let digest = put_file(store, child).await?;
                    ordered.push((name, digest));
                }
                let mut manifest = Vec::new();
                for (_, digest) in &ordered {
                    manifest.extend_from_slice(digest.as_bytes());
                    manifest.push(b'\n');
                }
                let digest = quilt_hash::hash_bytes(&manifest);
                let children: BTreeMap<String, String> = ordered.into_iter().collect();
                store.insert_dir(path, children, digest.clone());
                Ok(digest)
            }
            File::Hooked(hook) => {
                let mut inner = hook.into_inner();
                let data = inner.read_to_end().await?;
                Ok(store.insert_bytes(
                    inner.file_name().to_string(),
                    inner.full_path().to_string(),
                    data,
                ))
            }
            File::Bytes(mut f) => {
                let data = f.read_to_end().await?;
                Ok(store.insert_bytes(
                    f.file_name().to_string(),
                    f.full_path().to_string(),
                    data,
                ))
            }
        }
    }
    .boxed()
}

#[async_trait]
impl Filesystem for MemFilesystem {
    fn name(&self) -> &str {
        self.store.name()
    }

    async fn has(&self, _ctx: &CancellationToken, path: &str) -> FsResult<bool> {
        Ok(self.resolve(path).is_ok())
    }

    async fn get(&self, ctx: &CancellationToken, path: &str) -> FsResult<File> {
        if ctx.is_cancelled() {
            return Err(FsError::Cancelled);
        }
        let digest = self.resolve(path)?;
        self.materialize(&digest)
    }

    async fn put(&self, ctx: &CancellationToken, file: File) -> FsResult<String> {
        if ctx.is_cancelled() {
            return Err(FsError::Cancelled);
        }
        let digest = put_file(&self.store, file).await?;
        debug!(store = self.store.name(), %digest, "stored");
        Ok(self.store.store_path(&digest))
    }

    async fn delete(&self, _ctx: &CancellationToken, path: &str) -> FsResult<()> {
        let (head, tail) = split_store_path(self.store.name(), path)?;
        if !tail.is_empty() {
            return Err(FsError::Other(format!(
                "deleting a path inside a stored directory is not supported: {path}"
            )));
        }
        // deleting an absent key is a no-op
        self.store.remove(head);
        Ok(())
    }

    fn as_adding(&self) -> Option<&dyn AddingFilesystem> {
        Some(self)
    }
}

#[async_trait]
impl AddingFilesystem for MemFilesystem {
    async fn new_adder(
        &self,
        _ctx: &CancellationToken,
        _pin: bool,
        wrap: bool,
    ) -> FsResult<(Box<dyn Adder>, mpsc::Receiver<AddedFile>)> {
        let (tx, rx) = mpsc::channel(1);
        let adder = MemAdder::new(Arc::clone(&self.store), tx, wrap);
        Ok((Box::new(adder), rx))
    }
}
