use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use quilt_fs::{FsError, FsResult};

/// On-disk repo format version this build reads and writes.
pub const REPO_VERSION: u32 = 1;

const VERSION_FILE: &str = "version";
const LOCK_FILE: &str = "repo.lock";
const BLOCKS_DIR: &str = "blocks";

/// One stored block, serialized as JSON under `blocks/<digest>`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub(crate) enum Block {
    Bytes {
        name: String,
        original_path: String,
        data: Vec<u8>,
    },
    Dir {
        original_path: String,
        children: BTreeMap<String, String>,
    },
}

/// An exclusive on-disk block repo.
///
/// Layout: a `version` file, a `repo.lock` held for the life of the owning
/// process, and a `blocks/` directory of digest-named entries. The lock is
/// what guarantees a repo belongs to at most one filesystem at a time; it is
/// removed on release so a later construction over the same directory
/// succeeds.
#[derive(Debug)]
pub(crate) struct Repo {
    root: PathBuf,
}

impl Repo {
    /// Create the repo layout at `path`. Re-initializing an existing repo is
    /// a no-op.
    pub(crate) fn init(path: impl AsRef<Path>) -> FsResult<()> {
        let root = path.as_ref();
        std::fs::create_dir_all(root.join(BLOCKS_DIR))?;
        let version_file = root.join(VERSION_FILE);
        if !version_file.exists() {
            let mut f = std::fs::File::create(&version_file)?;
            write!(f, "{REPO_VERSION}")?;
        }
        debug!(path = %root.display(), "repo initialized");
        Ok(())
    }

    /// Open an initialized repo, verifying its format version.
    pub(crate) fn open(path: impl AsRef<Path>) -> FsResult<Self> {
        let root = path.as_ref().to_path_buf();
        let version_file = root.join(VERSION_FILE);
        let raw = std::fs::read_to_string(&version_file).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                FsError::Other(format!("no repo found at {}", root.display()))
            } else {
                e.into()
            }
        })?;
        let version: u32 = raw
            .trim()
            .parse()
            .map_err(|_| FsError::Serialization(format!("malformed repo version: {raw:?}")))?;
        if version != REPO_VERSION {
            return Err(FsError::NeedsMigration);
        }
        Ok(Self { root })
    }

    /// Take the exclusive repo lock.
    pub(crate) fn lock(&self) -> FsResult<()> {
        let result = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(self.root.join(LOCK_FILE));
        match result {
            Ok(mut f) => {
                let _ = write!(f, "{}", std::process::id());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Err(FsError::RepoLocked),
            Err(e) => Err(e.into()),
        }
    }

    /// Release the exclusive repo lock.
    pub(crate) fn unlock(&self) -> FsResult<()> {
        match std::fs::remove_file(self.root.join(LOCK_FILE)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn block_path(&self, digest: &str) -> PathBuf {
        self.root.join(BLOCKS_DIR).join(digest)
    }

    pub(crate) async fn read_block(&self, digest: &str) -> FsResult<Option<Block>> {
        match tokio::fs::read(self.block_path(digest)).await {
            Ok(raw) => {
                let block = serde_json::from_slice(&raw)
                    .map_err(|e| FsError::Serialization(e.to_string()))?;
                Ok(Some(block))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub(crate) async fn write_block(&self, digest: &str, block: &Block) -> FsResult<()> {
        let raw = serde_json::to_vec(block).map_err(|e| FsError::Serialization(e.to_string()))?;
        tokio::fs::write(self.block_path(digest), raw).await?;
        Ok(())
    }

    pub(crate) async fn remove_block(&self, digest: &str) -> FsResult<()> {
        match tokio::fs::remove_file(self.block_path(digest)).await {
            Ok(()) => Ok(()),
            // removing an absent block is a no-op
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub(crate) async fn has_block(&self, digest: &str) -> FsResult<bool> {
        match tokio::fs::metadata(self.block_path(digest)).await {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_then_open() {
        let dir = tempfile::tempdir().unwrap();
        Repo::init(dir.path()).unwrap();
        Repo::open(dir.path()).unwrap();
    }

    #[test]
    fn open_uninitialized_repo_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = Repo::open(dir.path()).unwrap_err();
        assert!(err.to_string().contains("no repo found"));
    }

    #[test]
    fn version_mismatch_needs_migration() {
        let dir = tempfile::tempdir().unwrap();
        Repo::init(dir.path()).unwrap();
        std::fs::write(dir.path().join(VERSION_FILE), "0").unwrap();
        assert!(matches!(
            Repo::open(dir.path()),
            Err(FsError::NeedsMigration)
        ));
    }

    #[test]
    fn lock_is_exclusive_until_unlocked() {
        let dir = tempfile::tempdir().unwrap();
        Repo::init(dir.path()).unwrap();
        let repo = Repo::open(dir.path()).unwrap();

        repo.lock().unwrap();
        let second = Repo::open(dir.path()).unwrap();
        assert!(matches!(second.lock(), Err(FsError::RepoLocked)));

        repo.unlock().unwrap();
        second.lock().unwrap();
        second.unlock().unwrap();
    }

    #[tokio::test]
    async fn block_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        Repo::init(dir.path()).unwrap();
        let repo = Repo::open(dir.path()).unwrap();

        let block = Block::Bytes {
            name: "a.txt".into(),
            original_path: "/a.txt".into(),
            data: b"block data".to_vec(),
        };
        repo.write_block("digest-1", &block).await.unwrap();
        assert!(repo.has_block("digest-1").await.unwrap());
        assert_eq!(repo.read_block("digest-1").await.unwrap(), Some(block));

        repo.remove_block("digest-1").await.unwrap();
        assert!(!repo.has_block("digest-1").await.unwrap());
        assert_eq!(repo.read_block("digest-1").await.unwrap(), None);

        // removing twice stays a no-op
        repo.remove_block("digest-1").await.unwrap();
    }
}
