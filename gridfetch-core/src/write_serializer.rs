use std::sync::Arc;

use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::warn;

/// Shared handle to an open file. A `TransferWorker` holds one clone for the
/// lifetime of its download and hands a clone to the serializer with every
/// chunk; the file closes once every clone (worker's and serializer's) has
/// been dropped, which happens naturally once the worker drops its clone
/// after enqueueing the final chunk.
pub type SharedFile = Arc<Mutex<File>>;

/// One unit of work for the write serializer: a chunk of bytes destined for
/// an already-open file, plus whether this is the file's final chunk.
struct WriteQueueEntry {
    file: SharedFile,
    bytes: Vec<u8>,
    last: bool,
}

/// Single-consumer disk writer shared by every active `TransferWorker`, so
/// that only one file ever receives bytes at any instant (§4.1). Replaces
/// the source implementation's hand-rolled two-semaphore queue with a
/// bounded `tokio::mpsc` channel per REDESIGN FLAGS ("Global writer thread");
/// the channel's own backpressure blocks producers once the queue is full.
#[derive(Debug)]
pub struct WriteSerializer {
    tx: mpsc::Sender<WriteQueueEntry>,
    consumer: Option<JoinHandle<()>>,
}

impl WriteSerializer {
    /// Spawns the single consumer task. All producer calls go through
    /// `&self`, so callers typically share one `WriteSerializer` behind an
    /// `Arc`.
    pub fn start(max_queue_len: usize) -> Self {
        let (tx, mut rx) = mpsc::channel::<WriteQueueEntry>(max_queue_len.max(1));

        let consumer = tokio::spawn(async move {
            while let Some(entry) = rx.recv().await {
                let WriteQueueEntry { file, bytes, last } = entry;
                let mut file = file.lock().await;
                // Write errors are fatal to the owning transfer but never to
                // this loop: the serializer keeps draining subsequent
                // entries regardless (§4.1, "Failure semantics").
                if let Err(e) = file.write_all(&bytes).await {
                    warn!(error = %e, "write serializer: write failed, continuing");
                    continue;
                }
                if last {
                    if let Err(e) = file.sync_all().await {
                        warn!(error = %e, "write serializer: fsync failed on close");
                    }
                }
            }
        });

        Self {
            tx,
            consumer: Some(consumer),
        }
    }

    /// Enqueues a chunk for `file`. Blocks the caller once the queue has
    /// reached its capacity (backpressure propagates from a slow disk into
    /// the network stage, per the concurrency model). When `last` is true
    /// the caller should drop its own clone of `file` immediately after this
    /// call returns, so the handle closes once the write completes.
    pub async fn enqueue(&self, file: SharedFile, bytes: Vec<u8>, last: bool) {
        // The channel is only closed once `write_and_quit` has already run,
        // which is a programming error for any caller still holding a
        // reference to the serializer.
        let _ = self.tx.send(WriteQueueEntry { file, bytes, last }).await;
    }

    /// Drains the queue, signals the consumer to exit, then joins it. No
    /// further `enqueue` call is legal after this returns.
    pub async fn write_and_quit(mut self) {
        drop(self.tx);
        if let Some(consumer) = self.consumer.take() {
            let _ = consumer.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn writes_are_applied_in_enqueue_order() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.bin");
        let file: SharedFile = Arc::new(Mutex::new(File::create(&path).await.unwrap()));

        let serializer = WriteSerializer::start(8);
        serializer.enqueue(file.clone(), b"hello ".to_vec(), false).await;
        serializer.enqueue(file.clone(), b"world".to_vec(), true).await;
        drop(file);
        serializer.write_and_quit().await;

        let contents = tokio::fs::read(&path).await.unwrap();
        assert_eq!(contents, b"hello world");
    }

    #[tokio::test]
    async fn enqueue_blocks_once_queue_is_full() {
        let dir = tempdir().unwrap();
        let serializer = Arc::new(WriteSerializer::start(1));

        // Fill the single slot, then assert a second enqueue doesn't need to
        // be awaited eagerly — it should still complete once drained.
        let path = dir.path().join("a.bin");
        let file: SharedFile = Arc::new(Mutex::new(File::create(&path).await.unwrap()));
        serializer.enqueue(file.clone(), vec![1, 2, 3], true).await;
        drop(file);

        let path2 = dir.path().join("b.bin");
        let file2: SharedFile = Arc::new(Mutex::new(File::create(&path2).await.unwrap()));
        serializer.enqueue(file2.clone(), vec![4, 5], true).await;
        drop(file2);

        let serializer = Arc::try_unwrap(serializer).expect("no other refs");
        serializer.write_and_quit().await;

        assert_eq!(tokio::fs::read(&path).await.unwrap(), vec![1, 2, 3]);
        assert_eq!(tokio::fs::read(&path2).await.unwrap(), vec![4, 5]);
    }
}
