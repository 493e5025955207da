//! Purpose: The queue handle: one descriptor, one read cursor, one lock queue, one codec.
//! Exports: `FifoFile`.
//! Role: Public entry point composing framing, locking, append, tailing and exit cleanup.
//! Invariants: Every file access goes through the handle's lock coordinator.
//! Invariants: The cursor resets to 0 whenever a read pass truncates the file.
//! Invariants: Corruption is recovered by truncation and never surfaces as an error.
//! Invariants: A batch cut from the file lands in the cursor even if the caller is dropped.

use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use bytes::Bytes;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard, mpsc, watch};
use tokio_stream::wrappers::ReceiverStream;

use super::codec::{RawCodec, ValueCodec};
use super::options::FifoOptions;
use super::writer::FifoWriter;
use crate::core::error::{Error, ErrorKind};
use crate::core::exit::{self, ExitRegistration};
use crate::core::fileio;
use crate::core::inspect::{self, InspectReport};
use crate::core::lock::LockCoordinator;
use crate::core::reader::{self, ReadBatch, TruncateReason};
use crate::core::watch::FileWatch;
use crate::core::writer::{self, Append};

/// A durable FIFO queue backed by a single regular file.
///
/// Any number of handles, in any number of processes, may append. One handle per
/// file should consume: reading removes data, and a fully drained file is truncated
/// back to empty for everyone.
///
/// ```no_run
/// # async fn demo() -> Result<(), fifofile::api::Error> {
/// use fifofile::api::FifoFile;
///
/// let queue = FifoFile::open("/tmp/jobs.fifo")?;
/// queue.write("hello").await?;
/// while let Some(message) = queue.recv().await? {
///     println!("{}", String::from_utf8_lossy(&message));
/// }
/// # Ok(())
/// # }
/// ```
pub struct FifoFile<C: ValueCodec = RawCodec> {
    shared: Arc<Shared>,
    codec: Arc<C>,
    cursor: Arc<AsyncMutex<ReadCursor>>,
}

#[derive(Default)]
struct ReadCursor {
    pos: u64,
    pending: VecDeque<Bytes>,
}

type CursorGuard = OwnedMutexGuard<ReadCursor>;

// Field order matters on drop: the exit registration goes before the descriptor.
pub(crate) struct Shared {
    path: PathBuf,
    options: FifoOptions,
    exit: Mutex<Option<ExitRegistration>>,
    file: Mutex<Option<Arc<File>>>,
    lock: Arc<LockCoordinator>,
    closed: watch::Sender<bool>,
    position: AtomicU64,
    watch_fallback_logged: AtomicBool,
}

impl FifoFile<RawCodec> {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        Self::open_with(path, FifoOptions::default(), RawCodec)
    }
}

impl<C: ValueCodec> FifoFile<C> {
    pub fn open_with(path: impl AsRef<Path>, options: FifoOptions, codec: C) -> Result<Self, Error> {
        options.validate()?;
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|err| {
                Error::new(ErrorKind::Open)
                    .with_message("failed to open queue file")
                    .with_path(&path)
                    .with_source(err)
            })?;

        let registration = exit::register(&file, options.exit_cleanup);
        tracing::debug!(
            path = %path.display(),
            registered = exit::registered(),
            "opened queue file"
        );

        let (closed, _) = watch::channel(false);
        let shared = Shared {
            lock: LockCoordinator::new(&path),
            path,
            options,
            exit: Mutex::new(Some(registration)),
            file: Mutex::new(Some(Arc::new(file))),
            closed,
            position: AtomicU64::new(0),
            watch_fallback_logged: AtomicBool::new(false),
        };

        Ok(Self {
            shared: Arc::new(shared),
            codec: Arc::new(codec),
            cursor: Arc::new(AsyncMutex::new(ReadCursor::default())),
        })
    }

    pub fn path(&self) -> &Path {
        &self.shared.path
    }

    pub fn options(&self) -> &FifoOptions {
        &self.shared.options
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// File offset of the next unread frame as of the last read pass.
    pub fn position(&self) -> u64 {
        self.shared.position.load(Ordering::SeqCst)
    }

    pub async fn write(&self, value: impl Into<C::Value>) -> Result<(), Error> {
        self.append([value]).await.map(|_| ())
    }

    /// Encode every value and append them as one locked write. Returns the count.
    pub async fn append<I>(&self, values: I) -> Result<usize, Error>
    where
        I: IntoIterator,
        I::Item: Into<C::Value>,
    {
        let payloads = values
            .into_iter()
            .map(|value| self.codec.encode(&value.into()))
            .collect::<Result<Vec<_>, _>>()?;
        let count = payloads.len();
        if count > 0 {
            self.shared.append_encoded(payloads).await?;
        }
        Ok(count)
    }

    /// Start a batching writer; must be called inside a tokio runtime.
    pub fn writer(&self) -> FifoWriter<C> {
        FifoWriter::spawn(Arc::clone(&self.shared), Arc::clone(&self.codec))
    }

    /// Next message in arrival order, waiting for writers while the queue is empty.
    ///
    /// Returns `Ok(None)` once the handle is closed. Cancel-safe: a read pass that
    /// already removed frames from the file keeps them for the next call.
    pub async fn recv(&self) -> Result<Option<C::Value>, Error> {
        self.recv_bounded(usize::MAX).await
    }

    /// Like [`FifoFile::recv`], but a read pass takes at most `read_ahead` frames off
    /// the file. Callers that stop after a known count use this so nothing is left
    /// buffered in a handle that is about to close.
    pub async fn recv_bounded(&self, read_ahead: usize) -> Result<Option<C::Value>, Error> {
        let mut cursor = Arc::clone(&self.cursor).lock_owned().await;
        loop {
            if self.shared.is_closed() {
                return Ok(None);
            }
            if let Some(payload) = cursor.pending.pop_front() {
                return self.codec.decode(payload).map(Some);
            }
            let received = match fill(Arc::clone(&self.shared), cursor, read_ahead).await {
                Ok((guard, received)) => {
                    cursor = guard;
                    received
                }
                Err(err) if is_teardown(&err) => return Ok(None),
                Err(err) => return Err(err),
            };
            if received {
                continue;
            }
            if !self.shared.wait_for_change(cursor.pos).await {
                return Ok(None);
            }
        }
    }

    /// One read pass without waiting; `Ok(None)` when nothing is available.
    pub async fn try_recv(&self) -> Result<Option<C::Value>, Error> {
        self.try_recv_bounded(usize::MAX).await
    }

    /// Like [`FifoFile::try_recv`], taking at most `read_ahead` frames off the file.
    pub async fn try_recv_bounded(&self, read_ahead: usize) -> Result<Option<C::Value>, Error> {
        let mut cursor = Arc::clone(&self.cursor).lock_owned().await;
        if self.shared.is_closed() {
            return Ok(None);
        }
        if cursor.pending.is_empty() {
            cursor = match fill(Arc::clone(&self.shared), cursor, read_ahead).await {
                Ok((guard, _)) => guard,
                Err(err) if is_teardown(&err) => return Ok(None),
                Err(err) => return Err(err),
            };
        }
        match cursor.pending.pop_front() {
            Some(payload) => self.codec.decode(payload).map(Some),
            None => Ok(None),
        }
    }

    /// Scan the whole file under the lock without consuming anything.
    pub async fn inspect(&self) -> Result<InspectReport, Error> {
        self.shared.inspect().await
    }

    /// Close the handle. Queued operations fail, a waiting `recv` returns `None`, and
    /// the descriptor is released once any in-flight operation finishes. Idempotent.
    ///
    /// Messages already read off the file but not yet returned by `recv` are dropped
    /// with the handle; the file no longer holds them. Use the `*_bounded` receivers
    /// to avoid reading ahead of what will be consumed.
    pub fn close(&self) {
        self.shared.destroy();
    }
}

/// Run one locked read pass on its own task and store the batch in the cursor there.
/// A dropped caller cannot lose frames that the pass already cut from the file.
async fn fill(
    shared: Arc<Shared>,
    mut cursor: CursorGuard,
    read_ahead: usize,
) -> Result<(CursorGuard, bool), Error> {
    let task = tokio::spawn(async move {
        let batch = shared.read_batch(cursor.pos, read_ahead).await?;
        cursor.pos = batch.next_pos;
        shared.position.store(cursor.pos, Ordering::SeqCst);
        let received = !batch.messages.is_empty();
        cursor.pending.extend(batch.messages);
        Ok::<_, Error>((cursor, received))
    });
    task.await.map_err(|err| {
        Error::new(ErrorKind::Internal)
            .with_message("read pass did not complete")
            .with_source(err)
    })?
}

impl<C> FifoFile<C>
where
    C: ValueCodec,
{
    /// Consume the handle into a stream of decoded messages.
    ///
    /// The stream ends when the handle is closed or after the first error. Dropping
    /// the stream closes the handle.
    pub fn messages(self) -> ReceiverStream<Result<C::Value, Error>> {
        let (tx, rx) = mpsc::channel(1);
        tokio::spawn(async move {
            loop {
                let item = tokio::select! {
                    _ = tx.closed() => break,
                    item = self.recv() => item,
                };
                match item {
                    Ok(Some(value)) => {
                        if tx.send(Ok(value)).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(err) => {
                        let _ = tx.send(Err(err)).await;
                        break;
                    }
                }
            }
            self.close();
        });
        ReceiverStream::new(rx)
    }
}

fn is_teardown(err: &Error) -> bool {
    matches!(err.kind(), ErrorKind::Destroyed | ErrorKind::Destroying)
}

impl Shared {
    pub(crate) fn options(&self) -> &FifoOptions {
        &self.options
    }

    pub(crate) fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    pub(crate) fn check_size(&self, len: usize) -> Result<(), Error> {
        if len > self.options.max_message_size {
            return Err(Error::new(ErrorKind::Usage)
                .with_message(format!(
                    "message of {len} bytes exceeds max_message_size {}",
                    self.options.max_message_size
                ))
                .with_path(&self.path));
        }
        Ok(())
    }

    pub(crate) async fn append_encoded(&self, payloads: Vec<Bytes>) -> Result<Append, Error> {
        for payload in &payloads {
            self.check_size(payload.len())?;
        }
        let file = self.file()?;
        let path = self.path.clone();
        let count = payloads.len();
        let result = self
            .lock
            .with_lock(file, move |file| {
                writer::append_frames(file, &payloads)
                    .map_err(|err| Error::io(&path, "append failed", err))
            })
            .await;
        let append = self.destroy_on_io_error(result)?;
        tracing::trace!(
            path = %self.path.display(),
            count,
            offset = append.offset,
            bytes = append.written,
            "appended batch"
        );
        Ok(append)
    }

    async fn read_batch(&self, pos: u64, max_messages: usize) -> Result<ReadBatch, Error> {
        let file = self.file()?;
        let path = self.path.clone();
        let max_size = self.options.max_message_size;
        let capacity = self.options.read_buffer_size;
        let result = self
            .lock
            .with_lock(file, move |file| {
                reader::read_batch(file, pos, max_size, capacity, max_messages)
                    .map_err(|err| Error::io(&path, "read failed", err).with_offset(pos))
            })
            .await;
        let batch = self.destroy_on_io_error(result)?;

        match batch.truncated {
            Some(TruncateReason::Drained) => {
                tracing::debug!(
                    path = %self.path.display(),
                    messages = batch.messages.len(),
                    "queue drained"
                );
            }
            Some(TruncateReason::Oversize { offset, declared }) => {
                tracing::warn!(
                    path = %self.path.display(),
                    offset,
                    declared,
                    max_message_size = max_size,
                    "frame exceeds size limit; discarded remaining queue contents"
                );
            }
            Some(TruncateReason::ChecksumMismatch { offset }) => {
                tracing::warn!(
                    path = %self.path.display(),
                    offset,
                    "checksum mismatch; discarded remaining queue contents"
                );
            }
            None => {}
        }
        Ok(batch)
    }

    async fn inspect(&self) -> Result<InspectReport, Error> {
        let file = self.file()?;
        let path = self.path.clone();
        let max_size = self.options.max_message_size;
        let chunk = self.options.read_buffer_size;
        let result = self
            .lock
            .with_lock(file, move |file| {
                inspect::inspect_file(file, max_size, chunk)
                    .map_err(|err| Error::io(&path, "inspect failed", err))
            })
            .await;
        self.destroy_on_io_error(result)
    }

    /// Wait until the file may hold unread data. Returns false if the handle closed.
    async fn wait_for_change(&self, pos: u64) -> bool {
        let mut closed = self.closed.subscribe();
        let watch = match FileWatch::new(&self.path) {
            Ok(watch) => Some(watch),
            Err(err) => {
                if self.watch_fallback_logged.swap(true, Ordering::SeqCst) {
                    tracing::debug!(error = %err, "file watch unavailable; polling");
                } else {
                    tracing::warn!(
                        path = %self.path.display(),
                        error = %err,
                        interval_ms = self.options.poll_interval.as_millis() as u64,
                        "file watch unavailable; polling"
                    );
                }
                None
            }
        };

        // A writer may have appended between the empty read and the watch registration.
        if self.has_unread(pos) {
            return true;
        }

        let signal = watch.as_ref().map(FileWatch::signal);
        let poll_interval = self.options.poll_interval;
        let changed = async move {
            match signal {
                Some(signal) => signal.notified().await,
                None => tokio::time::sleep(poll_interval).await,
            }
        };

        tokio::select! {
            _ = changed => true,
            _ = closed.wait_for(|closed| *closed) => false,
        }
    }

    fn has_unread(&self, pos: u64) -> bool {
        match self.file().and_then(|file| {
            fileio::len(&file).map_err(|err| Error::io(&self.path, "stat failed", err))
        }) {
            Ok(len) => len != pos,
            Err(_) => true,
        }
    }

    fn file(&self) -> Result<Arc<File>, Error> {
        self.file
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(Error::destroyed)
    }

    fn destroy_on_io_error<T>(&self, result: Result<T, Error>) -> Result<T, Error> {
        if let Err(err) = &result {
            if err.kind() == ErrorKind::Io {
                tracing::warn!(path = %self.path.display(), error = %err, "closing queue after i/o failure");
                self.destroy();
            }
        }
        result
    }

    pub(crate) fn destroy(&self) -> bool {
        if self.closed.send_replace(true) {
            return false;
        }
        let failed = self.lock.destroy();
        let registration = self
            .exit
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        drop(registration);
        let file = self
            .file
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        drop(file);
        tracing::debug!(path = %self.path.display(), failed, "closed queue file");
        true
    }
}
