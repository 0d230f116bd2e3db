use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use quilt_fs::{File, Filesystem, FsError, FsResult};

use crate::filestore::STORE_NAME;

/// Thin client for a repo served by another process's HTTP API.
///
/// Used as the fallback when the on-disk repo is locked: reads and leaf
/// writes go over the wire, and no local resources are held, so this variant
/// has no release capability.
pub struct IpfsApiFilesystem {
    base: String,
    client: reqwest::Client,
}

impl IpfsApiFilesystem {
    pub fn new(url: &str) -> Self {
        Self {
            base: url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    fn endpoint(&self, op: &str, arg: &str) -> String {
        format!("{}/api/v0/{op}?arg={arg}", self.base)
    }

    async fn send(
        &self,
        ctx: &CancellationToken,
        request: reqwest::RequestBuilder,
    ) -> FsResult<reqwest::Response> {
        tokio::select! {
            res = request.send() => res.map_err(|e| FsError::Http(e.to_string())),
            _ = ctx.cancelled() => Err(FsError::Cancelled),
        }
    }
}

#[async_trait]
impl Filesystem for IpfsApiFilesystem {
    fn name(&self) -> &str {
        STORE_NAME
    }

    async fn has(&self, ctx: &CancellationToken, path: &str) -> FsResult<bool> {
        let res = self
            .send(ctx, self.client.get(self.endpoint("stat", path)))
            .await?;
        Ok(res.status().is_success())
    }

    async fn get(&self, ctx: &CancellationToken, path: &str) -> FsResult<File> {
        let res = self
            .send(ctx, self.client.get(self.endpoint("cat", path)))
            .await?;
        if res.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(FsError::NotFound);
        }
        if !res.status().is_success() {
            return Err(FsError::Http(format!(
                "api returned status {}",
                res.status()
            )));
        }
        let data = res
            .bytes()
            .await
            .map_err(|e| FsError::Http(e.to_string()))?;
        debug!(%path, bytes = data.len(), "fetched over api");
        Ok(File::from_bytes(path, data.to_vec()))
    }

    async fn put(&self, ctx: &CancellationToken, mut file: File) -> FsResult<String> {
        if file.is_directory() {
            return Err(FsError::Other(
                "directory writes over the http api are not supported".into(),
            ));
        }
        let path = file.full_path().to_string();
        let data = file.read_to_end().await?;
        let res = self
            .send(ctx, self.client.post(self.endpoint("add", &path)).body(data))
            .await?;
        if !res.status().is_success() {
            return Err(FsError::Http(format!(
                "api returned status {}",
                res.status()
            )));
        }
        res.text()
            .await
            .map_err(|e| FsError::Http(e.to_string()))
    }

    async fn delete(&self, ctx: &CancellationToken, path: &str) -> FsResult<()> {
        let res = self
            .send(ctx, self.client.post(self.endpoint("rm", path)))
            .await?;
        if res.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(FsError::NotFound);
        }
        if !res.status().is_success() {
            return Err(FsError::Http(format!(
                "api returned status {}",
                res.status()
            )));
        }
        Ok(())
    }
}
