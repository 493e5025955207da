//! Purpose: Buffered writer that coalesces queued messages into locked batch appends.
//! Exports: `FifoWriter`.
//! Role: Streaming ingest path; callers enqueue while a background task flushes.
//! Invariants: Messages reach the file in the order `write` accepted them.
//! Invariants: `write` waits once `write_queue_depth` messages are buffered.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::codec::ValueCodec;
use super::fifo::Shared;
use crate::core::error::{Error, ErrorKind};

pub struct FifoWriter<C: ValueCodec> {
    shared: Arc<Shared>,
    codec: Arc<C>,
    tx: mpsc::Sender<Bytes>,
    task: JoinHandle<Result<u64, Error>>,
}

impl<C: ValueCodec> FifoWriter<C> {
    pub(crate) fn spawn(shared: Arc<Shared>, codec: Arc<C>) -> Self {
        let depth = shared.options().write_queue_depth;
        let (tx, rx) = mpsc::channel(depth);
        let task = tokio::spawn(flush_loop(Arc::clone(&shared), rx, depth));
        Self {
            shared,
            codec,
            tx,
            task,
        }
    }

    pub async fn write(&self, value: impl Into<C::Value>) -> Result<(), Error> {
        let payload = self.codec.encode(&value.into())?;
        self.shared.check_size(payload.len())?;
        self.tx.send(payload).await.map_err(|_| {
            Error::new(ErrorKind::Closed).with_message("writer stopped after a failed flush")
        })
    }

    /// Flush everything buffered and stop. Returns the number of messages appended.
    pub async fn finish(self) -> Result<u64, Error> {
        drop(self.tx);
        self.task.await.map_err(|err| {
            Error::new(ErrorKind::Internal)
                .with_message("writer task failed")
                .with_source(err)
        })?
    }
}

async fn flush_loop(
    shared: Arc<Shared>,
    mut rx: mpsc::Receiver<Bytes>,
    max_batch: usize,
) -> Result<u64, Error> {
    let mut written = 0u64;
    let mut batch = Vec::with_capacity(max_batch);
    while let Some(first) = rx.recv().await {
        batch.push(first);
        while batch.len() < max_batch {
            match rx.try_recv() {
                Ok(payload) => batch.push(payload),
                Err(_) => break,
            }
        }
        let count = batch.len() as u64;
        shared.append_encoded(std::mem::take(&mut batch)).await?;
        written += count;
    }
    tracing::trace!(written, "writer finished");
    Ok(written)
}

#[cfg(test)]
mod tests {
    use crate::api::codec::Utf8Codec;
    use crate::api::fifo::FifoFile;
    use crate::api::options::FifoOptions;
    use crate::core::error::ErrorKind;

    #[tokio::test]
    async fn writer_flushes_in_order() {
        let dir = tempfile::tempdir().expect("tempdir");
        let queue = FifoFile::open_with(
            dir.path().join("writer.fifo"),
            FifoOptions::new()
                .with_exit_cleanup(false)
                .with_write_queue_depth(4),
            Utf8Codec,
        )
        .expect("open");

        let writer = queue.writer();
        for i in 0..100 {
            writer.write(format!("m{i}")).await.expect("write");
        }
        assert_eq!(writer.finish().await.expect("finish"), 100);

        let mut received = Vec::new();
        while let Some(message) = queue.try_recv().await.expect("recv") {
            received.push(message);
        }
        let expected: Vec<String> = (0..100).map(|i| format!("m{i}")).collect();
        assert_eq!(received, expected);
    }

    #[tokio::test]
    async fn writer_surfaces_flush_failures() {
        let dir = tempfile::tempdir().expect("tempdir");
        let queue = FifoFile::open_with(
            dir.path().join("closed.fifo"),
            FifoOptions::new().with_exit_cleanup(false),
            Utf8Codec,
        )
        .expect("open");
        let writer = queue.writer();
        queue.close();
        let _ = writer.write("after close").await;
        let err = writer.finish().await.expect_err("closed");
        assert_eq!(err.kind(), ErrorKind::Destroyed);
    }

    #[tokio::test]
    async fn oversize_message_is_rejected_at_write() {
        let dir = tempfile::tempdir().expect("tempdir");
        let queue = FifoFile::open_with(
            dir.path().join("limit.fifo"),
            FifoOptions::new()
                .with_exit_cleanup(false)
                .with_max_message_size(3),
            Utf8Codec,
        )
        .expect("open");
        let writer = queue.writer();
        let err = writer.write("four").await.expect_err("oversize");
        assert_eq!(err.kind(), ErrorKind::Usage);
        assert_eq!(writer.finish().await.expect("finish"), 0);
    }
}
