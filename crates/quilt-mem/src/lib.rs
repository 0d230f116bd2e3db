//! In-memory content-addressed filesystem for quilt.
//!
//! Every byte file is hashed into a flat digest-keyed map; directories are
//! stored as manifests of child digests, one line per child in deterministic
//! order, so the digest of a root identifies the whole tree. Retrieval walks
//! the manifest tree segment by segment.
//!
//! Two routes build trees:
//!
//! - [`MemFilesystem::put`] walks an input tree directly, hashing children in
//!   traversal order
//! - the streaming [`MemAdder`] accepts files one at a time and synthesizes
//!   merged directories at finalize, in lexicographic child order
//!
//! Stores can be linked as read-fallback peers to simulate multi-node
//! lookup in tests.

mod adder;
mod fs;
mod store;

pub use adder::MemAdder;
pub use fs::MemFilesystem;
