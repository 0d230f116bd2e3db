use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::FsResult;
use crate::file::{BytesFile, File};

/// Callback fired when a hook-wrapped file's dependencies have all been
/// written to the content-addressed store.
///
/// `added` maps input full paths to their store-assigned hashes. The returned
/// bytes become the file's final content.
#[async_trait]
pub trait WriteHook: Send + Sync {
    async fn call(
        &self,
        ctx: &CancellationToken,
        file: &mut BytesFile,
        added: &BTreeMap<String, String>,
    ) -> FsResult<Vec<u8>>;
}

/// A byte file wrapped with a callback and the input paths that must be
/// stored before the callback can produce the file's final content.
///
/// Directories may never be hook-wrapped.
pub struct HookFile {
    inner: BytesFile,
    required_paths: Vec<String>,
    callback: Arc<dyn WriteHook>,
    // once-latch: a hook can sit in the waiting queue and also be visited by
    // the walk; it must fire at most once either way
    fired: AtomicBool,
}

impl HookFile {
    /// Wrap a byte file with a hook and its dependency paths.
    ///
    /// # Panics
    ///
    /// Panics if `file` is a directory.
    pub fn wrap(file: File, callback: Arc<dyn WriteHook>, required_paths: Vec<String>) -> File {
        let inner = match file {
            File::Bytes(f) => f,
            File::Hooked(h) => h.inner,
            File::Dir(_) => panic!("cannot wrap a directory with a write hook"),
        };
        File::Hooked(HookFile {
            inner,
            required_paths,
            callback,
            fired: AtomicBool::new(false),
        })
    }

    pub fn inner(&self) -> &BytesFile {
        &self.inner
    }

    pub fn inner_mut(&mut self) -> &mut BytesFile {
        &mut self.inner
    }

    /// Consume the wrapper, discarding the hook.
    pub fn into_inner(self) -> BytesFile {
        self.inner
    }

    pub fn required_paths(&self) -> &[String] {
        &self.required_paths
    }

    /// Returns `true` when every required path has a recorded store hash.
    pub fn has_required_paths(&self, merkelized: &BTreeMap<String, String>) -> bool {
        for path in &self.required_paths {
            if !merkelized.contains_key(path) {
                debug!(
                    hook = self.inner.full_path(),
                    waiting_for = path.as_str(),
                    "hook can't fire yet"
                );
                return false;
            }
        }
        true
    }

    /// Fire the callback, returning the produced bytes.
    ///
    /// Guarded by the once-latch: a second call returns `Ok(None)` without
    /// invoking the callback.
    pub async fn call(
        &mut self,
        ctx: &CancellationToken,
        merkelized: &BTreeMap<String, String>,
    ) -> FsResult<Option<Vec<u8>>> {
        if self.fired.swap(true, Ordering::SeqCst) {
            return Ok(None);
        }
        debug!(hook = self.inner.full_path(), "calling write hook");
        let bytes = self.callback.call(ctx, &mut self.inner, merkelized).await?;
        Ok(Some(bytes))
    }
}

impl fmt::Debug for HookFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookFile")
            .field("path", &self.inner.full_path())
            .field("required_paths", &self.required_paths)
            .field("fired", &self.fired.load(Ordering::SeqCst))
            .finish()
    }
}
