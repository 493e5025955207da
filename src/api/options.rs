//! Purpose: Constructor-level configuration for a queue handle.
//! Exports: `FifoOptions`.
//! Role: Limits, buffer sizing, writer backpressure, tailing fallback, exit cleanup.
//! Invariants: Options are validated once at open; a handle never sees invalid values.

use std::time::Duration;

use crate::core::error::{Error, ErrorKind};
use crate::core::frame::{DEFAULT_MAX_MESSAGE_SIZE, FRAME_HEADER_LEN};
use crate::core::reader::DEFAULT_READ_BUFFER;

#[derive(Clone, Debug)]
pub struct FifoOptions {
    /// Largest payload accepted. Readers discard the file from any frame that
    /// declares more; writers refuse to append more.
    pub max_message_size: usize,
    /// Initial buffer for one read pass; doubled as needed for large frames.
    pub read_buffer_size: usize,
    /// Messages a `FifoWriter` buffers before `write` waits for a flush.
    pub write_queue_depth: usize,
    /// Re-check interval used only when a filesystem watch cannot be established.
    pub poll_interval: Duration,
    /// Close the descriptor on SIGINT/SIGTERM/SIGHUP/SIGQUIT before the default action.
    pub exit_cleanup: bool,
}

impl FifoOptions {
    pub fn new() -> Self {
        Self {
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            read_buffer_size: DEFAULT_READ_BUFFER,
            write_queue_depth: 16,
            poll_interval: Duration::from_millis(250),
            exit_cleanup: true,
        }
    }

    pub fn with_max_message_size(mut self, max_message_size: usize) -> Self {
        self.max_message_size = max_message_size;
        self
    }

    pub fn with_read_buffer_size(mut self, read_buffer_size: usize) -> Self {
        self.read_buffer_size = read_buffer_size;
        self
    }

    pub fn with_write_queue_depth(mut self, write_queue_depth: usize) -> Self {
        self.write_queue_depth = write_queue_depth;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_exit_cleanup(mut self, exit_cleanup: bool) -> Self {
        self.exit_cleanup = exit_cleanup;
        self
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.max_message_size == 0 || self.max_message_size as u64 > u32::MAX as u64 {
            return Err(Error::new(ErrorKind::Usage)
                .with_message("max_message_size must be between 1 and u32::MAX"));
        }
        if self.read_buffer_size < FRAME_HEADER_LEN {
            return Err(Error::new(ErrorKind::Usage)
                .with_message("read_buffer_size must hold at least one frame header"));
        }
        if self.write_queue_depth == 0 {
            return Err(
                Error::new(ErrorKind::Usage).with_message("write_queue_depth must be at least 1")
            );
        }
        if self.poll_interval.is_zero() {
            return Err(Error::new(ErrorKind::Usage).with_message("poll_interval must be non-zero"));
        }
        Ok(())
    }
}

impl Default for FifoOptions {
    fn default() -> Self {
        Self::new()
    }
}
