use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use quilt_fs::{AddedFile, Adder, DirSink, File, FsError, FsResult, PathTree};

use crate::store::HashStore;

/// Streaming adder over a [`HashStore`].
///
/// Leaves are hashed and stored as they arrive; directories are synthesized
/// at finalize from the accumulated path tree, with children in lexicographic
/// name order so the same logical tree always yields the same root digest
/// regardless of the order files were added.
pub struct MemAdder {
    store: Arc<HashStore>,
    tx: Option<mpsc::Sender<AddedFile>>,
    tree: PathTree,
    wrap: bool,
}

impl MemAdder {
    pub(crate) fn new(store: Arc<HashStore>, tx: mpsc::Sender<AddedFile>, wrap: bool) -> Self {
        Self {
            store,
            tx: Some(tx),
            tree: PathTree::new(),
            wrap,
        }
    }

    async fn emit(tx: &Option<mpsc::Sender<AddedFile>>, event: AddedFile) {
        if let Some(tx) = tx {
            // a dropped receiver only means nobody is watching progress
            let _ = tx.send(event).await;
        }
    }

    fn add_inner<'a>(&'a mut self, ctx: &'a CancellationToken, file: File) -> BoxFuture<'a, FsResult<()>> {
        async move {
            if ctx.is_cancelled() {
                return Err(FsError::Cancelled);
            }
            match file {
                File::Dir(mut dir) => {
                    while let Some(child) = dir.next_child() {
                        self.add_inner(ctx, child).await?;
                    }
                    Ok(())
                }
                mut leaf => {
                    let input_path = leaf.full_path().to_string();
                    let data = leaf.read_to_end().await?;
                    let bytes = data.len() as u64;
                    let digest = self.store.insert_bytes(
                        leaf.file_name().to_string(),
                        input_path.clone(),
                        data,
                    );
                    self.tree.insert_leaf(&input_path, digest.clone());
                    debug!(path = %input_path, %digest, "leaf added");
                    Self::emit(
                        &self.tx,
                        AddedFile {
                            input_path,
                            store_name: self.store.name().to_string(),
                            store_hash: self.store.store_path(&digest),
                            bytes,
                        },
                    )
                    .await;
                    Ok(())
                }
            }
        }
        .boxed()
    }
}

#[async_trait]
impl Adder for MemAdder {
    async fn add_file(&mut self, ctx: &CancellationToken, file: File) -> FsResult<()> {
        self.add_inner(ctx, file).await
    }

    async fn finalize(&mut self, ctx: &CancellationToken) -> FsResult<String> {
        if ctx.is_cancelled() {
            return Err(FsError::Cancelled);
        }
        let mut sink = StoreSink {
            store: Arc::clone(&self.store),
            tx: self.tx.clone(),
        };
        let root_digest = self.tree.merkelize(&mut sink, self.wrap).await?;
        // closing the event stream tells consumers the addition is complete
        self.tx = None;
        Ok(self.store.store_path(&root_digest))
    }
}

struct StoreSink {
    store: Arc<HashStore>,
    tx: Option<mpsc::Sender<AddedFile>>,
}

#[async_trait]
impl DirSink for StoreSink {
    async fn store_dir(
        &mut self,
        original_path: &str,
        digest: &str,
        children: &BTreeMap<String, String>,
        manifest: &[u8],
    ) -> FsResult<()> {
        self.store
            .insert_dir(original_path.to_string(), children.clone(), digest.to_string());
        debug!(path = original_path, %digest, "directory synthesized");
        MemAdder::emit(
            &self.tx,
            AddedFile {
                input_path: original_path.to_string(),
                store_name: self.store.name().to_string(),
                store_hash: self.store.store_path(digest),
                bytes: manifest.len() as u64,
            },
        )
        .await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::MemFilesystem;
    use quilt_fs::{AddingFilesystem, Filesystem};

    fn ctx() -> CancellationToken {
        CancellationToken::new()
    }

    /// Drain an adder's event stream into a vec on a background task.
    fn drain(
        mut rx: mpsc::Receiver<AddedFile>,
    ) -> tokio::task::JoinHandle<Vec<AddedFile>> {
        tokio::spawn(async move {
            let mut events = Vec::new();
            while let Some(ev) = rx.recv().await {
                events.push(ev);
            }
            events
        })
    }

    #[tokio::test]
    async fn added_files_emit_one_event_each() {
        let fs = MemFilesystem::new();
        let (mut adder, rx) = fs.new_adder(&ctx(), true, true).await.unwrap();
        let events = drain(rx);

        adder
            .add_file(&ctx(), File::from_bytes("/a/b.txt", b"b".to_vec()))
            .await
            .unwrap();
        adder
            .add_file(&ctx(), File::from_bytes("/a/c.txt", b"c".to_vec()))
            .await
            .unwrap();
        let root = adder.finalize(&ctx()).await.unwrap();
        assert!(root.starts_with("/mem/"));

        let events = events.await.unwrap();
        // two leaves plus the /a directory synthesized at finalize
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].input_path, "/a/b.txt");
        assert_eq!(events[1].input_path, "/a/c.txt");
        assert_eq!(events[2].input_path, "/a");
        assert!(events.iter().all(|e| e.store_name == "mem"));
        assert!(events.iter().all(|e| e.store_hash.starts_with("/mem/")));
    }

    #[tokio::test]
    async fn finalize_root_is_fetchable() {
        let fs = MemFilesystem::new();
        let (mut adder, rx) = fs.new_adder(&ctx(), true, true).await.unwrap();
        let events = drain(rx);

        adder
            .add_file(&ctx(), File::from_bytes("/a/b.txt", b"hello".to_vec()))
            .await
            .unwrap();
        let root = adder.finalize(&ctx()).await.unwrap();
        events.await.unwrap();

        let mut out = fs.get(&ctx(), &format!("{root}/b.txt")).await.unwrap();
        assert_eq!(out.read_to_end().await.unwrap(), b"hello");
    }

    #[tokio::test]
    async fn add_order_does_not_change_root_hash() {
        let fs1 = MemFilesystem::new();
        let (mut a1, rx1) = fs1.new_adder(&ctx(), true, true).await.unwrap();
        let e1 = drain(rx1);
        a1.add_file(&ctx(), File::from_bytes("/t/x.txt", b"x".to_vec()))
            .await
            .unwrap();
        a1.add_file(&ctx(), File::from_bytes("/t/y.txt", b"y".to_vec()))
            .await
            .unwrap();
        a1.add_file(&ctx(), File::from_bytes("/t/sub/z.txt", b"z".to_vec()))
            .await
            .unwrap();
        let r1 = a1.finalize(&ctx()).await.unwrap();
        e1.await.unwrap();

        let fs2 = MemFilesystem::new();
        let (mut a2, rx2) = fs2.new_adder(&ctx(), true, true).await.unwrap();
        let e2 = drain(rx2);
        a2.add_file(&ctx(), File::from_bytes("/t/sub/z.txt", b"z".to_vec()))
            .await
            .unwrap();
        a2.add_file(&ctx(), File::from_bytes("/t/y.txt", b"y".to_vec()))
            .await
            .unwrap();
        a2.add_file(&ctx(), File::from_bytes("/t/x.txt", b"x".to_vec()))
            .await
            .unwrap();
        let r2 = a2.finalize(&ctx()).await.unwrap();
        e2.await.unwrap();

        assert_eq!(r1, r2);
    }

    #[tokio::test]
    async fn adding_a_directory_walks_its_leaves() {
        let fs = MemFilesystem::new();
        let (mut adder, rx) = fs.new_adder(&ctx(), true, true).await.unwrap();
        let events = drain(rx);

        let tree = File::dir(
            "/root",
            vec![
                File::from_bytes("a.txt", b"a".to_vec()),
                File::dir("nested", vec![File::from_bytes("b.txt", b"b".to_vec())]),
            ],
        );
        adder.add_file(&ctx(), tree).await.unwrap();
        let root = adder.finalize(&ctx()).await.unwrap();

        let events = events.await.unwrap();
        let leaf_paths: Vec<&str> = events
            .iter()
            .map(|e| e.input_path.as_str())
            .take(2)
            .collect();
        assert_eq!(leaf_paths, vec!["/root/a.txt", "/root/nested/b.txt"]);

        let mut out = fs
            .get(&ctx(), &format!("{root}/nested/b.txt"))
            .await
            .unwrap();
        assert_eq!(out.read_to_end().await.unwrap(), b"b");
    }

    #[tokio::test]
    async fn finalize_on_empty_adder_fails() {
        let fs = MemFilesystem::new();
        let (mut adder, _rx) = fs.new_adder(&ctx(), true, true).await.unwrap();
        assert!(adder.finalize(&ctx()).await.is_err());
    }
}
