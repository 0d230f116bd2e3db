//! Content-addressed network backend for quilt.
//!
//! Serves `/ipfs/` and `/ipld/` paths from an exclusive on-disk block repo:
//! a `version` file, an exclusive `repo.lock`, and digest-named block
//! entries using the same digest scheme as the in-memory store.
//!
//! The repo lock is the backend's defining resource. It is taken at
//! construction, held for the life of the construction scope, and released
//! when that scope is cancelled -- only then does the released token fire.
//! This is what lets a process hand a repo over to a newly constructed
//! filesystem after cancelling the old one.
//!
//! When the lock is already held and a fallback `url` is configured,
//! construction silently degrades to [`IpfsApiFilesystem`], a thin client
//! for the HTTP API served by whichever process owns the repo.

mod config;
mod filestore;
mod http_api;
mod repo;

pub use config::IpfsConfig;
pub use filestore::{init_repo, new_filesystem, IpfsFilesystem, STORE_NAME};
pub use http_api::IpfsApiFilesystem;
pub use repo::REPO_VERSION;
