// Per-handle FIFO of file operations layered over the cross-process advisory lock.
// In-process order is call order. Cross-process order is whatever flock grants; it is
// not guaranteed to be fair.
use std::collections::VecDeque;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use fs2::FileExt;
use libc::{EACCES, EPERM};
use tokio::sync::oneshot;

use crate::core::error::{Error, ErrorKind};

type TurnResult = Result<(), Error>;

#[derive(Default)]
struct LockState {
    active: bool,
    waiters: VecDeque<oneshot::Sender<TurnResult>>,
}

/// Serializes the read/write/truncate sequences of one queue handle.
///
/// Each call to [`LockCoordinator::with_lock`] first waits for its local turn (FIFO
/// among callers on this handle), then takes the exclusive advisory lock on the file
/// from a blocking thread, runs the operation, unlocks, and hands the turn on.
pub(crate) struct LockCoordinator {
    path: PathBuf,
    state: Mutex<LockState>,
    destroying: AtomicBool,
}

impl LockCoordinator {
    pub(crate) fn new(path: impl Into<PathBuf>) -> Arc<Self> {
        Arc::new(Self {
            path: path.into(),
            state: Mutex::new(LockState::default()),
            destroying: AtomicBool::new(false),
        })
    }

    pub(crate) async fn with_lock<T, F>(
        self: &Arc<Self>,
        file: Arc<File>,
        operation: F,
    ) -> Result<T, Error>
    where
        F: FnOnce(&File) -> Result<T, Error> + Send + 'static,
        T: Send + 'static,
    {
        let turn = self.take_turn().await?;
        // The guard lives on the blocking thread with the operation, so a caller that
        // stops awaiting cannot unlock the file underneath a running write.
        let task = tokio::task::spawn_blocking(move || {
            let lock = FileLock::acquire(file, turn)?;
            operation(&lock.file)
        });
        task.await.map_err(|err| {
            Error::new(ErrorKind::Internal)
                .with_message("locked file operation did not complete")
                .with_path(&self.path)
                .with_source(err)
        })?
    }

    /// Fail every queued operation with `Destroying`, newest first.
    ///
    /// An operation already holding the turn runs to completion; any later attempt to
    /// take the lock fails with `Destroyed`.
    pub(crate) fn destroy(&self) -> usize {
        self.destroying.store(true, Ordering::SeqCst);
        let mut state = self.state();
        let mut failed = 0;
        while let Some(waiter) = state.waiters.pop_back() {
            let _ = waiter.send(Err(Error::destroying()));
            failed += 1;
        }
        if failed > 0 {
            tracing::debug!(path = %self.path.display(), failed, "failed queued lock waiters");
        }
        failed
    }

    pub(crate) fn is_destroying(&self) -> bool {
        self.destroying.load(Ordering::SeqCst)
    }

    #[cfg(test)]
    pub(crate) fn queued(&self) -> usize {
        self.state().waiters.len()
    }

    async fn take_turn(self: &Arc<Self>) -> Result<LocalTurn, Error> {
        let rx = {
            let mut state = self.state();
            if self.is_destroying() {
                return Err(Error::destroyed());
            }
            if state.active {
                let (tx, rx) = oneshot::channel();
                state.waiters.push_back(tx);
                Some(rx)
            } else {
                state.active = true;
                None
            }
        };

        if let Some(rx) = rx {
            let mut waiting = Waiting {
                rx,
                armed: true,
                coordinator: Arc::clone(self),
            };
            let outcome = (&mut waiting.rx).await;
            waiting.armed = false;
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(err)) => return Err(err),
                Err(_) => return Err(Error::destroying()),
            }
        }

        Ok(LocalTurn {
            coordinator: Arc::clone(self),
        })
    }

    fn pass_turn(&self) {
        let mut state = self.state();
        while let Some(waiter) = state.waiters.pop_front() {
            if waiter.send(Ok(())).is_ok() {
                tracing::trace!(path = %self.path.display(), "lock turn handed to next waiter");
                return;
            }
        }
        state.active = false;
    }

    fn state(&self) -> MutexGuard<'_, LockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// The right to run next on this handle; handed on when dropped.
struct LocalTurn {
    coordinator: Arc<LockCoordinator>,
}

impl Drop for LocalTurn {
    fn drop(&mut self) {
        self.coordinator.pass_turn();
    }
}

/// A queued waiter. If it is dropped after being handed the turn but before
/// observing it, the turn moves on instead of being lost.
struct Waiting {
    rx: oneshot::Receiver<TurnResult>,
    armed: bool,
    coordinator: Arc<LockCoordinator>,
}

impl Drop for Waiting {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        self.rx.close();
        if let Ok(Ok(())) = self.rx.try_recv() {
            self.coordinator.pass_turn();
        }
    }
}

struct FileLock {
    file: Arc<File>,
    turn: LocalTurn,
}

impl FileLock {
    fn acquire(file: Arc<File>, turn: LocalTurn) -> Result<Self, Error> {
        let coordinator = Arc::clone(&turn.coordinator);
        if coordinator.is_destroying() {
            return Err(Error::destroyed());
        }
        FileExt::lock_exclusive(&*file).map_err(|err| lock_error(&coordinator.path, err))?;
        let lock = Self { file, turn };
        if coordinator.is_destroying() {
            return Err(Error::destroyed());
        }
        Ok(lock)
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        if let Err(err) = FileExt::unlock(&*self.file) {
            tracing::warn!(
                path = %self.turn.coordinator.path.display(),
                error = %err,
                "failed to release advisory lock"
            );
        }
    }
}

fn lock_error(path: &Path, err: io::Error) -> Error {
    let errno = err.raw_os_error().unwrap_or_default();
    let message = if errno == EACCES || errno == EPERM {
        "permission denied acquiring advisory lock"
    } else {
        "failed to acquire advisory lock"
    };
    Error::new(ErrorKind::Lock)
        .with_message(message)
        .with_path(path)
        .with_source(err)
}
