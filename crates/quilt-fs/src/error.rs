/// Errors from filesystem operations.
///
/// The identity variants (`NotFound`, `NotADirectory`, `NotAFile`, `ReadOnly`,
/// `AddingUnsupported`, `RepoLocked`, `NeedsMigration`) are part of the public
/// contract: consumers pattern-match on them and backends must raise exactly
/// these for the corresponding conditions.
#[derive(Debug, thiserror::Error)]
pub enum FsError {
    /// The requested path does not resolve to a file.
    #[error("file not found")]
    NotFound,

    /// A directory-only operation was called on a plain file.
    #[error("this file is not a directory")]
    NotADirectory,

    /// A file-only operation was called on a directory.
    #[error("this is a directory")]
    NotAFile,

    /// Write or delete against a read-only filesystem.
    #[error("readonly filesystem")]
    ReadOnly,

    /// The filesystem does not support batched adding.
    #[error("this filesystem doesn't support batched adding")]
    AddingUnsupported,

    /// Another process holds the backend's exclusive repo lock.
    #[error("repo is locked by another process")]
    RepoLocked,

    /// The on-disk repo format is older than this build supports.
    #[error("repo needs migration")]
    NeedsMigration,

    /// The filesystem has released its resources and no longer accepts writes.
    #[error("filesystem released: resources have been closed")]
    Released,

    /// A write hook's required paths were never stored during the walk.
    #[error("requirements for hook {path:?} were never met. missing required paths: {}", .missing.join(", "))]
    HookDependenciesMissing { path: String, missing: Vec<String> },

    /// The surrounding cancellation scope was cancelled.
    #[error("operation cancelled")]
    Cancelled,

    /// No backend is registered for the path's kind.
    #[error("cannot resolve paths of kind {kind:?}. path: {path}")]
    UnknownPathKind { kind: String, path: String },

    /// I/O failure from an underlying backend.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Encoding or decoding of stored entries failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// HTTP transport failure.
    #[error("http error: {0}")]
    Http(String),

    /// Anything a backend needs to surface that has no dedicated variant.
    #[error("{0}")]
    Other(String),
}

/// Result alias for filesystem operations.
pub type FsResult<T> = Result<T, FsError>;
