//! Local-disk backend for quilt.
//!
//! A thin wrapper around OS file I/O. Paths are used verbatim (relative paths
//! resolve under the configured working directory), so this backend does not
//! content-address anything: the path you put is the path you get.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use quilt_fs::{File, Filesystem, FsError, FsResult};

/// Configuration for the local filesystem.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct LocalConfig {
    /// Working directory; relative paths resolve under it. Defaults to the
    /// system root behavior of using paths as given.
    #[serde(default)]
    pub pwd: String,
}

/// Filesystem over the local disk.
pub struct LocalFilesystem {
    cfg: LocalConfig,
}

impl LocalFilesystem {
    pub fn new(cfg: LocalConfig) -> Self {
        Self { cfg }
    }

    /// Construct from an untyped config map, as the mux does.
    pub fn from_config(config: &serde_json::Value) -> FsResult<Self> {
        let cfg = if config.is_null() {
            LocalConfig::default()
        } else {
            serde_json::from_value(config.clone())
                .map_err(|e| FsError::Serialization(e.to_string()))?
        };
        Ok(Self::new(cfg))
    }

    fn resolve(&self, path: &str) -> PathBuf {
        let p = Path::new(path);
        if p.is_absolute() || self.cfg.pwd.is_empty() {
            p.to_path_buf()
        } else {
            Path::new(&self.cfg.pwd).join(p)
        }
    }
}

fn put_path<'a>(
    fs: &'a LocalFilesystem,
    ctx: &'a CancellationToken,
    mut file: File,
) -> BoxFuture<'a, FsResult<String>> {
    async move {
        if ctx.is_cancelled() {
            return Err(FsError::Cancelled);
        }
        let path = file.full_path().to_string();
        let disk_path = fs.resolve(&path);

        if file.is_directory() {
            tokio::fs::create_dir_all(&disk_path).await?;
            while let Some(child) = file.next_child()? {
                put_path(fs, ctx, child).await?;
            }
            return Ok(path);
        }

        if let Some(parent) = disk_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let data = file.read_to_end().await?;
        tokio::fs::write(&disk_path, data).await?;
        debug!(path = %disk_path.display(), "wrote local file");
        Ok(path)
    }
    .boxed()
}

#[async_trait]
impl Filesystem for LocalFilesystem {
    fn name(&self) -> &str {
        "local"
    }

    async fn has(&self, _ctx: &CancellationToken, path: &str) -> FsResult<bool> {
        match tokio::fs::metadata(self.resolve(path)).await {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn get(&self, ctx: &CancellationToken, path: &str) -> FsResult<File> {
        if ctx.is_cancelled() {
            return Err(FsError::Cancelled);
        }
        let disk_path = self.resolve(path);
        let meta = match tokio::fs::metadata(&disk_path).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(FsError::NotFound),
            Err(e) => return Err(e.into()),
        };
        if meta.is_dir() {
            return Err(FsError::Other("local directory is not supported".into()));
        }

        let handle = tokio::fs::File::open(&disk_path).await?;
        let mut file = quilt_fs::BytesFile::from_reader(path, Box::new(handle))
            .with_size(meta.len());
        if let Ok(modified) = meta.modified() {
            file = file.with_mod_time(DateTime::<Utc>::from(modified));
        }
        Ok(File::Bytes(file))
    }

    async fn put(&self, ctx: &CancellationToken, file: File) -> FsResult<String> {
        put_path(self, ctx, file).await
    }

    async fn delete(&self, _ctx: &CancellationToken, path: &str) -> FsResult<()> {
        match tokio::fs::remove_file(self.resolve(path)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(FsError::NotFound),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> CancellationToken {
        CancellationToken::new()
    }

    fn temp_fs() -> (tempfile::TempDir, LocalFilesystem) {
        let dir = tempfile::tempdir().unwrap();
        let fs = LocalFilesystem::new(LocalConfig {
            pwd: dir.path().to_string_lossy().into_owned(),
        });
        (dir, fs)
    }

    #[tokio::test]
    async fn put_get_delete_roundtrip() {
        let (_dir, fs) = temp_fs();

        let path = fs
            .put(&ctx(), File::from_bytes("notes/hello.txt", b"hi there".to_vec()))
            .await
            .unwrap();
        assert_eq!(path, "notes/hello.txt");
        assert!(fs.has(&ctx(), &path).await.unwrap());

        let mut file = fs.get(&ctx(), &path).await.unwrap();
        assert_eq!(file.size(), Some(8));
        assert_eq!(file.read_to_end().await.unwrap(), b"hi there");

        fs.delete(&ctx(), &path).await.unwrap();
        assert!(!fs.has(&ctx(), &path).await.unwrap());
    }

    #[tokio::test]
    async fn get_missing_file_is_not_found() {
        let (_dir, fs) = temp_fs();
        assert!(matches!(
            fs.get(&ctx(), "does/not/exist.txt").await,
            Err(FsError::NotFound)
        ));
    }

    #[tokio::test]
    async fn get_directory_is_unsupported() {
        let (dir, fs) = temp_fs();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        let err = fs.get(&ctx(), "sub").await.unwrap_err();
        assert!(err.to_string().contains("not supported"));
    }

    #[tokio::test]
    async fn put_directory_writes_all_children() {
        let (dir, fs) = temp_fs();
        let tree = File::dir(
            "out",
            vec![
                File::from_bytes("a.txt", b"a".to_vec()),
                File::dir("sub", vec![File::from_bytes("b.txt", b"b".to_vec())]),
            ],
        );
        fs.put(&ctx(), tree).await.unwrap();

        assert_eq!(std::fs::read(dir.path().join("out/a.txt")).unwrap(), b"a");
        assert_eq!(
            std::fs::read(dir.path().join("out/sub/b.txt")).unwrap(),
            b"b"
        );
    }

    #[tokio::test]
    async fn delete_missing_file_is_not_found() {
        let (_dir, fs) = temp_fs();
        assert!(matches!(
            fs.delete(&ctx(), "ghost.txt").await,
            Err(FsError::NotFound)
        ));
    }

    #[tokio::test]
    async fn config_decodes_from_map() {
        let fs =
            LocalFilesystem::from_config(&serde_json::json!({ "pwd": "/tmp/somewhere" })).unwrap();
        assert_eq!(fs.cfg.pwd, "/tmp/somewhere");

        let default = LocalFilesystem::from_config(&serde_json::Value::Null).unwrap();
        assert!(default.cfg.pwd.is_empty());
    }
}
