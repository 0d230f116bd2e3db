//! Core abstractions for quilt, a virtual filesystem that unifies
//! heterogeneous backends behind one interface keyed by path prefix.
//!
//! This crate defines the pieces every backend shares:
//!
//! - [`File`] -- the tagged file model: byte files, directories, and
//!   hook-wrapped files whose final content is produced during merkelization
//! - [`Filesystem`], [`AddingFilesystem`], [`ReleasingFilesystem`],
//!   [`Adder`] -- the backend contracts
//! - [`PathKind`] -- the path grammar that routes operations to backends
//! - [`write_with_hooks`] -- the batched, dependency-ordered write
//!   orchestrator with rollback
//! - [`PathTree`] -- the shared incremental-merkelization tree used by
//!   content-addressed adders
//!
//! # Design rules
//!
//! 1. Files are polymorphic values, not class hierarchies: one enum, one
//!    capability set.
//! 2. Every backend operation accepts a cancellation scope and honors it.
//! 3. Store events are emitted exactly once per object written; the bounded
//!    event channel is the only synchronization between a write and the
//!    dependency checks that follow it.
//! 4. Failed batched writes roll back everything they stored; rollback never
//!    masks the originating error.

pub mod error;
pub mod file;
pub mod hook;
pub mod paths;
pub mod pathtree;
pub mod traits;
pub mod write_hooks;

pub use error::{FsError, FsResult};
pub use file::{walk, BytesFile, Directory, File, FileContent, WalkVisitor, DIRECTORY_MEDIA_TYPE};
pub use hook::{HookFile, WriteHook};
pub use paths::{base_name, join, name_prefix, split_store_path, FsConfig, PathKind};
pub use pathtree::{manifest_bytes, DirSink, PathTree};
pub use traits::{AddedFile, Adder, AddingFilesystem, Filesystem, ReleasingFilesystem};
pub use write_hooks::write_with_hooks;
