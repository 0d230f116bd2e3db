//! Read-only HTTP backend for quilt.
//!
//! A thin wrapper around a URL client: `get` fetches a URL and exposes the
//! response body as a streamed byte file. There is no caching strategy, so
//! `has` always reports false, and writes fail with the read-only error.

use async_trait::async_trait;
use futures::TryStreamExt;
use tokio::io::AsyncRead;
use tokio_util::io::StreamReader;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use quilt_fs::{BytesFile, File, Filesystem, FsError, FsResult};

/// Filesystem that resolves `http://` and `https://` URLs.
pub struct HttpFilesystem {
    client: reqwest::Client,
}

impl HttpFilesystem {
    /// Use the given client, or build a default one.
    pub fn new(client: Option<reqwest::Client>) -> Self {
        Self {
            client: client.unwrap_or_default(),
        }
    }

    /// Construct from an untyped config map, as the mux does. The map has no
    /// recognized options; an injected client comes through [`Self::new`].
    pub fn from_config(_config: &serde_json::Value) -> FsResult<Self> {
        Ok(Self::new(None))
    }
}

impl Default for HttpFilesystem {
    fn default() -> Self {
        Self::new(None)
    }
}

#[async_trait]
impl Filesystem for HttpFilesystem {
    fn name(&self) -> &str {
        "http"
    }

    /// No caching strategy, so the store never claims to hold a URL.
    async fn has(&self, _ctx: &CancellationToken, _path: &str) -> FsResult<bool> {
        Ok(false)
    }

    async fn get(&self, ctx: &CancellationToken, path: &str) -> FsResult<File> {
        let request = self.client.get(path).send();
        let response = tokio::select! {
            res = request => res.map_err(|e| FsError::Http(e.to_string()))?,
            _ = ctx.cancelled() => return Err(FsError::Cancelled),
        };

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(FsError::NotFound);
        }
        debug!(url = path, status = %response.status(), "fetched");

        let media_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(';').next().unwrap_or("").trim().to_string());
        let size = response.content_length();

        let stream: futures::stream::BoxStream<'static, std::io::Result<bytes::Bytes>> =
            Box::pin(
                response
                    .bytes_stream()
                    .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e)),
            );
        let reader: Box<dyn AsyncRead + Send + Unpin> = Box::new(StreamReader::new(stream));

        let mut file = BytesFile::from_reader(path, reader);
        if let Some(mt) = media_type {
            file = file.with_media_type(mt);
        }
        if let Some(len) = size {
            file = file.with_size(len);
        }
        Ok(File::Bytes(file))
    }

    async fn put(&self, _ctx: &CancellationToken, _file: File) -> FsResult<String> {
        Err(FsError::ReadOnly)
    }

    async fn delete(&self, _ctx: &CancellationToken, _path: &str) -> FsResult<()> {
        Err(FsError::ReadOnly)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::get;
    use axum::Router;

    fn ctx() -> CancellationToken {
        CancellationToken::new()
    }

    /// Serve a fixture router on an ephemeral local port.
    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn get_streams_the_response_body() {
        let base = serve(Router::new().route("/hello.txt", get(|| async { "hello http" }))).await;
        let fs = HttpFilesystem::default();

        let mut file = fs.get(&ctx(), &format!("{base}/hello.txt")).await.unwrap();
        assert!(!file.is_directory());
        assert_eq!(file.read_to_end().await.unwrap(), b"hello http");
    }

    #[tokio::test]
    async fn media_type_comes_from_content_type_header() {
        let base = serve(Router::new().route(
            "/data.json",
            get(|| async { axum::Json(serde_json::json!({"ok": true})) }),
        ))
        .await;
        let fs = HttpFilesystem::default();

        let file = fs.get(&ctx(), &format!("{base}/data.json")).await.unwrap();
        assert_eq!(file.media_type(), "application/json");
    }

    #[tokio::test]
    async fn missing_url_is_not_found() {
        let base = serve(Router::new()).await;
        let fs = HttpFilesystem::default();
        assert!(matches!(
            fs.get(&ctx(), &format!("{base}/absent")).await,
            Err(FsError::NotFound)
        ));
    }

    #[tokio::test]
    async fn has_is_always_false() {
        let fs = HttpFilesystem::default();
        assert!(!fs.has(&ctx(), "http://example.com/x").await.unwrap());
    }

    #[tokio::test]
    async fn writes_are_read_only() {
        let fs = HttpFilesystem::default();
        assert!(matches!(
            fs.put(&ctx(), File::from_bytes("x", vec![])).await,
            Err(FsError::ReadOnly)
        ));
        assert!(matches!(
            fs.delete(&ctx(), "http://example.com/x").await,
            Err(FsError::ReadOnly)
        ));
    }

    #[tokio::test]
    async fn cancelled_scope_aborts_the_request() {
        let fs = HttpFilesystem::default();
        let cancelled = CancellationToken::new();
        cancelled.cancel();
        // no server needed; cancellation wins the race
        let err = fs.get(&cancelled, "http://127.0.0.1:9/never").await;
        assert!(matches!(err, Err(FsError::Cancelled) | Err(FsError::Http(_))));
    }
}
