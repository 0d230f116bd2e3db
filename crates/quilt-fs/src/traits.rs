use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::FsResult;
use crate::file::File;

/// Event reporting one successful write to a backing store.
///
/// Emitted exactly once per file or directory actually written.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AddedFile {
    /// The file's original full path, pre-hashing.
    pub input_path: String,
    /// Name of the store that performed the write.
    pub store_name: String,
    /// The resulting content-addressed store path.
    pub store_hash: String,
    /// Number of bytes written.
    pub bytes: u64,
}

/// Abstracts and unifies filesystem-like behaviour across backends.
///
/// All implementations must satisfy these invariants:
/// - `name()` is a stable identifier used as a path prefix on written files.
/// - `has` never errors for absent paths.
/// - Every operation observes the passed cancellation scope; a cancelled
///   scope aborts in-flight work with [`crate::FsError::Cancelled`].
#[async_trait]
pub trait Filesystem: Send + Sync {
    /// A string identifier distinguishing this filesystem from all other
    /// implementations, e.g. `"local"`, `"ipfs"`, `"http"`, `"mem"`.
    fn name(&self) -> &str;

    /// Whether the store holds a file at the given path.
    async fn has(&self, ctx: &CancellationToken, path: &str) -> FsResult<bool>;

    /// Fetch a file or directory from a path string.
    async fn get(&self, ctx: &CancellationToken, path: &str) -> FsResult<File>;

    /// Place a file or directory on the filesystem, returning the root path.
    /// The returned path may or may not honor the path of the given file.
    async fn put(&self, ctx: &CancellationToken, file: File) -> FsResult<String>;

    /// Remove a file or directory from the filesystem.
    async fn delete(&self, ctx: &CancellationToken, path: &str) -> FsResult<()>;

    /// Capability query: the batched-adding extension, if supported.
    fn as_adding(&self) -> Option<&dyn AddingFilesystem> {
        None
    }

    /// Capability query: the resource-release extension, if supported.
    fn as_releasing(&self) -> Option<&dyn ReleasingFilesystem> {
        None
    }
}

/// Streaming interface for building a content-addressed tree incrementally.
///
/// Implementers must make all required `add_file` calls, then call `finalize`
/// to assemble the tree and obtain the root path. Progress is reported on the
/// bounded event channel returned by
/// [`AddingFilesystem::new_adder`]; callers **must** drain it concurrently or
/// the adder will block.
#[async_trait]
pub trait Adder: Send {
    /// Add a file or a directory of files to the store. May be called
    /// repeatedly in any order; files under a common parent merge into a
    /// single directory at finalize.
    async fn add_file(&mut self, ctx: &CancellationToken, file: File) -> FsResult<()>;

    /// Assemble remaining directories, close the event channel, and return
    /// the final root store path.
    async fn finalize(&mut self, ctx: &CancellationToken) -> FsResult<String>;
}

/// Extension interface for filesystems that support batched adding.
#[async_trait]
pub trait AddingFilesystem: Filesystem {
    /// Allocate an adder and its event stream.
    ///
    /// `pin` requests recursive pinning of the root (a no-op for backends
    /// without pinning); `wrap` wraps the top level in a synthesized
    /// directory. The receiver is bounded at capacity 1, enforcing
    /// one-in-flight-write back-pressure.
    async fn new_adder(
        &self,
        ctx: &CancellationToken,
        pin: bool,
        wrap: bool,
    ) -> FsResult<(Box<dyn Adder>, mpsc::Receiver<AddedFile>)>;
}

/// Extension interface for filesystems that hold releasable process-level
/// resources (repo locks, sockets).
///
/// The released token fires only after the backend has confirmed release of
/// all its resources; the mux aggregates these tokens to provide its own
/// release guarantee.
pub trait ReleasingFilesystem: Filesystem {
    /// Token cancelled once the filesystem has released its resources.
    fn released(&self) -> CancellationToken;

    /// Any error observed during release, readable after `released` fires.
    fn release_error(&self) -> Option<String>;
}
