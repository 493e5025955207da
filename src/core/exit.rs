//! Purpose: Close open queue descriptors when the process is killed by a signal.
//! Exports: `ExitRegistration`, `register`.
//! Role: Best-effort cleanup so an abnormal exit never leaves a descriptor or lock behind.
//! Invariants: Each descriptor is closed at most once (atomic guard shared with the handle).
//! Invariants: After cleanup the signal's default action runs, so termination is unchanged.

use std::collections::HashMap;
use std::fs::File;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

#[cfg(unix)]
use std::os::unix::io::{AsRawFd, RawFd};

#[derive(Default)]
struct Registry {
    entries: HashMap<u64, Arc<ExitEntry>>,
    next_id: u64,
    handlers_installed: bool,
}

struct ExitEntry {
    #[cfg(unix)]
    fd: RawFd,
    closed: AtomicBool,
}

impl ExitEntry {
    fn close_once(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        #[cfg(unix)]
        close_fd(self.fd);
    }
}

#[cfg(unix)]
fn close_fd(fd: RawFd) {
    // The process terminates right after, so the owning `File` never closes it again.
    unsafe {
        libc::close(fd);
    }
}

/// Keeps one descriptor in the exit registry; removes it on drop.
pub(crate) struct ExitRegistration {
    id: u64,
    entry: Arc<ExitEntry>,
}

impl ExitRegistration {
    #[cfg(test)]
    fn was_closed(&self) -> bool {
        self.entry.closed.load(Ordering::SeqCst)
    }
}

impl Drop for ExitRegistration {
    fn drop(&mut self) {
        // The owning file closes next; a concurrent exit pass must not close a reused fd.
        self.entry.closed.store(true, Ordering::SeqCst);
        let mut registry = registry();
        registry.entries.remove(&self.id);
    }
}

/// Add `file` to the registry. With `install_handlers`, the first registration also
/// starts the signal thread.
pub(crate) fn register(file: &File, install_handlers: bool) -> ExitRegistration {
    let entry = Arc::new(ExitEntry {
        #[cfg(unix)]
        fd: file.as_raw_fd(),
        closed: AtomicBool::new(false),
    });
    #[cfg(not(unix))]
    let _ = file;

    let mut registry = registry();
    let id = registry.next_id;
    registry.next_id += 1;
    registry.entries.insert(id, Arc::clone(&entry));
    if install_handlers && !registry.handlers_installed {
        registry.handlers_installed = install_signal_thread();
    }
    ExitRegistration { id, entry }
}

pub(crate) fn registered() -> usize {
    registry().entries.len()
}

fn registry() -> MutexGuard<'static, Registry> {
    static REGISTRY: OnceLock<Mutex<Registry>> = OnceLock::new();
    REGISTRY
        .get_or_init(|| Mutex::new(Registry::default()))
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
}

fn close_all() {
    let entries: Vec<Arc<ExitEntry>> = registry().entries.values().cloned().collect();
    for entry in entries {
        entry.close_once();
    }
}

#[cfg(unix)]
fn install_signal_thread() -> bool {
    use signal_hook::consts::{SIGHUP, SIGINT, SIGQUIT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals = match Signals::new([SIGINT, SIGTERM, SIGHUP, SIGQUIT]) {
        Ok(signals) => signals,
        Err(err) => {
            tracing::warn!(error = %err, "exit cleanup unavailable: cannot register signals");
            return false;
        }
    };
    let spawned = std::thread::Builder::new()
        .name("fifofile-exit".to_string())
        .spawn(move || {
            if let Some(signal) = signals.forever().next() {
                close_all();
                let _ = signal_hook::low_level::emulate_default_handler(signal);
            }
        });
    match spawned {
        Ok(_) => true,
        Err(err) => {
            tracing::warn!(error = %err, "exit cleanup unavailable: cannot spawn signal thread");
            false
        }
    }
}

#[cfg(not(unix))]
fn install_signal_thread() -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::{register, registered};
    use std::fs::OpenOptions;

    #[test]
    fn registration_is_removed_on_drop() {
        let dir = tempfile::tempdir().expect("tempdir");
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(dir.path().join("exit.fifo"))
            .expect("open");

        let registration = register(&file, false);
        let id = registration.id;
        assert!(registered() >= 1);
        assert!(!registration.was_closed());
        drop(registration);
        assert!(!super::registry().entries.contains_key(&id));
    }

    #[test]
    fn close_once_is_guarded() {
        let dir = tempfile::tempdir().expect("tempdir");
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(dir.path().join("guard.fifo"))
            .expect("open");
        let registration = register(&file, false);
        registration.entry.closed.store(true, std::sync::atomic::Ordering::SeqCst);
        registration.entry.close_once();
        assert!(registration.was_closed());
        // The descriptor is still usable because the guard prevented the close.
        assert!(file.metadata().is_ok());
    }
}
