//! Purpose: Wake an idle reader when the queue file changes.
//! Exports: `FileWatch`.
//! Role: Tailing support; the watch lives only while a reader waits on an empty queue.
//! Invariants: A change that lands between registration and the wait is not lost.
//! Invariants: Dropping the watch cancels the OS registration.

use std::path::Path;
use std::sync::Arc;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::Notify;

use crate::core::error::{Error, ErrorKind};

pub(crate) struct FileWatch {
    _watcher: RecommendedWatcher,
    changed: Arc<Notify>,
}

impl FileWatch {
    pub(crate) fn new(path: &Path) -> Result<Self, Error> {
        let changed = Arc::new(Notify::new());
        let signal = Arc::clone(&changed);
        let mut watcher = notify::recommended_watcher(move |event: notify::Result<Event>| {
            match event {
                Ok(event) if is_relevant(&event.kind) => signal.notify_one(),
                Ok(_) => {}
                Err(err) => {
                    tracing::debug!(error = %err, "file watch reported an error");
                    signal.notify_one();
                }
            }
        })
        .map_err(|err| watch_error(path, err))?;
        watcher
            .watch(path, RecursiveMode::NonRecursive)
            .map_err(|err| watch_error(path, err))?;

        Ok(Self {
            _watcher: watcher,
            changed,
        })
    }

    /// Handle that resolves `notified()` at the next change, or immediately if one
    /// arrived since the last wake-up.
    pub(crate) fn signal(&self) -> Arc<Notify> {
        Arc::clone(&self.changed)
    }
}

fn is_relevant(kind: &EventKind) -> bool {
    !matches!(kind, EventKind::Access(_))
}

fn watch_error(path: &Path, err: notify::Error) -> Error {
    Error::new(ErrorKind::Io)
        .with_message("failed to watch queue file")
        .with_path(path)
        .with_source(err)
}

#[cfg(test)]
mod tests {
    use super::{FileWatch, is_relevant};
    use notify::EventKind;
    use notify::event::{AccessKind, ModifyKind};
    use std::fs::OpenOptions;
    use std::io::Write;
    use std::time::Duration;

    #[test]
    fn access_events_are_ignored() {
        assert!(!is_relevant(&EventKind::Access(AccessKind::Any)));
        assert!(is_relevant(&EventKind::Modify(ModifyKind::Any)));
        assert!(is_relevant(&EventKind::Any));
    }

    #[tokio::test]
    async fn append_wakes_the_watch() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("watched.fifo");
        let mut file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .append(true)
            .open(&path)
            .expect("open");

        let watch = FileWatch::new(&path).expect("watch");
        file.write_all(b"data").expect("write");
        file.flush().expect("flush");

        let signal = watch.signal();
        tokio::time::timeout(Duration::from_secs(5), signal.notified())
            .await
            .expect("change notification");
    }

    #[test]
    fn missing_file_cannot_be_watched() {
        let dir = tempfile::tempdir().expect("tempdir");
        let result = FileWatch::new(&dir.path().join("absent.fifo"));
        assert!(result.is_err());
    }
}
