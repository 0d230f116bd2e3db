use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{FsError, FsResult};
use crate::file::{walk, File, WalkVisitor};
use crate::hook::HookFile;
use crate::traits::{AddedFile, Adder, Filesystem};

type MerkelizedPaths = Arc<Mutex<BTreeMap<String, String>>>;

/// Write a file tree to a filesystem using merkelization hooks.
///
/// Every leaf of `root` is written through an adder obtained from `fs`.
/// Hook-wrapped files fire their callback exactly once, after all their
/// required paths have been stored; files whose dependencies are not yet
/// satisfied wait until they are. Returns the root store path on success.
///
/// Failed writes are rolled back with delete requests for all added files
/// before the error propagates. Rollback is best-effort: individual delete
/// failures are logged and never mask the originating error.
pub async fn write_with_hooks(
    ctx: &CancellationToken,
    fs: &dyn Filesystem,
    root: File,
) -> FsResult<String> {
    let adding = fs.as_adding().ok_or(FsError::AddingUnsupported)?;
    let (adder, added_rx) = adding.new_adder(ctx, true, true).await?;

    let merkelized: MerkelizedPaths = Arc::new(Mutex::new(BTreeMap::new()));

    // Consumer: records every store event, then forwards it for the
    // producer's one-event waits.
    let (event_tx, event_rx) = mpsc::channel::<AddedFile>(1);
    let consumer = tokio::spawn(consume_added(added_rx, event_tx, Arc::clone(&merkelized)));

    // Producer: walks the input tree, sequencing hooks after their
    // dependencies, then finalizes the adder.
    let (done_tx, done_rx) = oneshot::channel::<FsResult<String>>();
    let producer = tokio::spawn(produce_writes(
        ctx.clone(),
        adder,
        root,
        event_rx,
        Arc::clone(&merkelized),
        done_tx,
    ));

    let result = match done_rx.await {
        Ok(res) => res,
        Err(_) => Err(FsError::Other(
            "write task exited without reporting a result".into(),
        )),
    };
    let _ = producer.await;
    let _ = consumer.await;

    match result {
        Ok(final_path) => {
            debug!(path = %final_path, "tree written to filesystem");
            Ok(final_path)
        }
        Err(err) => {
            rollback(fs, &merkelized).await;
            Err(err)
        }
    }
}

/// Delete every path recorded during a failed write.
///
/// Runs under a fresh cancellation scope so that a cancelled write still
/// cleans up after itself.
async fn rollback(fs: &dyn Filesystem, merkelized: &MerkelizedPaths) {
    warn!("rolling back failed write operation");
    let ctx = CancellationToken::new();
    let paths: Vec<String> = merkelized
        .lock()
        .expect("lock poisoned")
        .values()
        .cloned()
        .collect();
    for path in paths {
        if let Err(err) = fs.delete(&ctx, &path).await {
            warn!(%path, error = %err, "error removing path during rollback");
        }
    }
}

async fn consume_added(
    mut added_rx: mpsc::Receiver<AddedFile>,
    event_tx: mpsc::Sender<AddedFile>,
    merkelized: MerkelizedPaths,
) {
    while let Some(event) = added_rx.recv().await {
        debug!(name = %event.input_path, hash = %event.store_hash, "added");
        merkelized
            .lock()
            .expect("lock poisoned")
            .insert(event.input_path.clone(), event.store_hash.clone());
        // Recording happens before the forward, so the producer observes the
        // entry as soon as it receives the event. Once the producer stops
        // listening (finalize), sends fail fast and draining continues.
        let _ = event_tx.send(event).await;
    }
}

async fn produce_writes(
    ctx: CancellationToken,
    adder: Box<dyn Adder>,
    root: File,
    event_rx: mpsc::Receiver<AddedFile>,
    merkelized: MerkelizedPaths,
    done_tx: oneshot::Sender<FsResult<String>>,
) {
    let mut visitor = WriteVisitor {
        ctx,
        adder,
        event_rx,
        merkelized,
        waiting: Vec::new(),
    };
    let result = run_writes(&mut visitor, root).await;
    let _ = done_tx.send(result);
}

async fn run_writes(v: &mut WriteVisitor, root: File) -> FsResult<String> {
    walk(root, v).await?;

    // End of walk: every still-waiting hook must have its requirements met.
    while !v.waiting.is_empty() {
        let hook = v.waiting.remove(0);
        let missing: Vec<String> = {
            let map = v.merkelized.lock().expect("lock poisoned");
            hook.required_paths()
                .iter()
                .filter(|p| !map.contains_key(p.as_str()))
                .cloned()
                .collect()
        };
        if !missing.is_empty() {
            return Err(FsError::HookDependenciesMissing {
                path: hook.inner().full_path().to_string(),
                missing,
            });
        }
        debug!(hook = hook.inner().full_path(), "calling delayed hook");
        v.call_and_add(hook).await?;
    }

    // Stop listening for forwards; the consumer keeps draining the directory
    // events that finalize emits.
    v.event_rx.close();
    v.adder.finalize(&v.ctx).await
}

struct WriteVisitor {
    ctx: CancellationToken,
    adder: Box<dyn Adder>,
    event_rx: mpsc::Receiver<AddedFile>,
    merkelized: MerkelizedPaths,
    waiting: Vec<HookFile>,
}

impl WriteVisitor {
    /// Wait for exactly one store event. The capacity-1 channel enforces
    /// one-in-flight-write back-pressure: the walk may not proceed to the
    /// next file until the previous file's hash has been recorded.
    async fn recv_added(&mut self) -> FsResult<AddedFile> {
        tokio::select! {
            event = self.event_rx.recv() => {
                event.ok_or_else(|| FsError::Other("added event stream closed early".into()))
            }
            _ = self.ctx.cancelled() => Err(FsError::Cancelled),
        }
    }

    async fn call_and_add(&mut self, mut hook: HookFile) -> FsResult<()> {
        let snapshot = self.merkelized.lock().expect("lock poisoned").clone();
        let produced = hook.call(&self.ctx, &snapshot).await?;
        if let Some(bytes) = produced {
            let path = hook.inner().full_path().to_string();
            self.adder
                .add_file(&self.ctx, File::from_bytes(path, bytes))
                .await?;
            self.recv_added().await?;
        }
        Ok(())
    }

    /// Fire every waiting hook whose required paths are now all stored.
    async fn fire_ready_waiting(&mut self) -> FsResult<()> {
        let mut i = 0;
        while i < self.waiting.len() {
            let ready = {
                let map = self.merkelized.lock().expect("lock poisoned");
                self.waiting[i].has_required_paths(&map)
            };
            if ready {
                let hook = self.waiting.remove(i);
                debug!(hook = hook.inner().full_path(), "calling delayed hook");
                self.call_and_add(hook).await?;
            } else {
                i += 1;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl WalkVisitor for WriteVisitor {
    async fn visit(&mut self, file: File) -> FsResult<()> {
        if self.ctx.is_cancelled() {
            return Err(FsError::Cancelled);
        }
        // Directories are synthesized by the adder at finalize.
        if file.is_directory() {
            return Ok(());
        }

        debug!(
            path = file.full_path(),
            waiting = self.waiting.len(),
            "visiting"
        );
        self.fire_ready_waiting().await?;

        match file {
            File::Hooked(hook) => {
                let ready = {
                    let map = self.merkelized.lock().expect("lock poisoned");
                    hook.has_required_paths(&map)
                };
                if ready {
                    self.call_and_add(hook).await
                } else {
                    debug!(
                        hook = hook.inner().full_path(),
                        "adding hook to waitlist"
                    );
                    self.waiting.push(hook);
                    Ok(())
                }
            }
            other => {
                self.adder.add_file(&self.ctx, other).await?;
                self.recv_added().await?;
                Ok(())
            }
        }
    }
}
