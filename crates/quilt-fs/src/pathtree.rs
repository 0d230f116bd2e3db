use std::collections::BTreeMap;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;

use crate::error::{FsError, FsResult};
use crate::paths;

/// Sink receiving directories synthesized during [`PathTree::merkelize`].
///
/// Content-addressed adders implement this to store each directory manifest
/// and emit its added-file event.
#[async_trait]
pub trait DirSink: Send {
    /// Store one synthesized directory.
    ///
    /// `children` maps child name to child digest; `manifest` is the byte
    /// encoding whose hash became `digest`.
    async fn store_dir(
        &mut self,
        original_path: &str,
        digest: &str,
        children: &BTreeMap<String, String>,
        manifest: &[u8],
    ) -> FsResult<()>;
}

#[derive(Default)]
struct Node {
    path: String,
    children: BTreeMap<String, Node>,
    digest: Option<String>,
}

impl Node {
    fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }
}

/// A tree of input path segments, merged across `add_file` calls.
///
/// Multiple files added under a common parent collapse into a single
/// directory when the tree is merkelized. Children are kept keyed by name so
/// every synthesized manifest lists digests in lexicographic child-name
/// order, making the root hash independent of the order files arrived.
#[derive(Default)]
pub struct PathTree {
    root: Node,
}

impl PathTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.root.children.is_empty()
    }

    /// Record a stored leaf at its input path.
    pub fn insert_leaf(&mut self, input_path: &str, digest: String) {
        let rooted = input_path.starts_with('/');
        let mut node = &mut self.root;
        let mut prefix = String::new();
        for segment in input_path.split('/').filter(|s| !s.is_empty()) {
            if prefix.is_empty() && !rooted {
                prefix = segment.to_string();
            } else {
                prefix = paths::join(&prefix, segment);
            }
            let path = prefix.clone();
            node = node
                .children
                .entry(segment.to_string())
                .or_insert_with(|| Node {
                    path,
                    ..Node::default()
                });
        }
        node.digest = Some(digest);
    }

    /// Synthesize every internal directory bottom-up and return the digest of
    /// the final root.
    ///
    /// With `wrap`, a lone top-level directory is returned as-is and anything
    /// else is wrapped in a synthesized root; without `wrap`, a lone
    /// top-level entry of any shape is returned directly.
    pub async fn merkelize<S>(&mut self, sink: &mut S, wrap: bool) -> FsResult<String>
    where
        S: DirSink + ?Sized,
    {
        if self.is_empty() {
            return Err(FsError::Other(
                "cannot finalize: no files were added".into(),
            ));
        }

        let mut top: BTreeMap<String, (String, bool)> = BTreeMap::new();
        for (name, child) in self.root.children.iter_mut() {
            let is_dir = !child.is_leaf();
            let digest = merkelize_node(child, sink).await?;
            top.insert(name.clone(), (digest, is_dir));
        }

        if top.len() == 1 {
            if let Some((digest, is_dir)) = top.values().next().cloned() {
                if !wrap || is_dir {
                    return Ok(digest);
                }
            }
        }

        // Synthesize an unnamed root over the top-level entries.
        let children: BTreeMap<String, String> = top
            .into_iter()
            .map(|(name, (digest, _))| (name, digest))
            .collect();
        let manifest = manifest_bytes(&children);
        let digest = quilt_hash::hash_bytes(&manifest);
        sink.store_dir("/", &digest, &children, &manifest).await?;
        Ok(digest)
    }
}

/// The manifest encoding for a directory: one line per child, each line the
/// child digest followed by a newline, in the map's (lexicographic) order.
pub fn manifest_bytes(children: &BTreeMap<String, String>) -> Vec<u8> {
    let mut out = Vec::new();
    for digest in children.values() {
        out.extend_from_slice(digest.as_bytes());
        out.push(b'\n');
    }
    out
}

fn merkelize_node<'a, S>(node: &'a mut Node, sink: &'a mut S) -> BoxFuture<'a, FsResult<String>>
where
    S: DirSink + ?Sized,
{
    async move {
        if node.is_leaf() {
            return node
                .digest
                .clone()
                .ok_or_else(|| FsError::Other(format!("path {:?} was never stored", node.path)));
        }

        let path = node.path.clone();
        let mut children: BTreeMap<String, String> = BTreeMap::new();
        for (name, child) in node.children.iter_mut() {
            let digest = merkelize_node(child, sink).await?;
            children.insert(name.clone(), digest);
        }

        let manifest = manifest_bytes(&children);
        let digest = quilt_hash::hash_bytes(&manifest);
        sink.store_dir(&path, &digest, &children, &manifest).await?;
        node.digest = Some(digest.clone());
        Ok(digest)
    }
    .boxed()
}
