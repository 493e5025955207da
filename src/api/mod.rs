//! Purpose: Define the public Rust API boundary for fifofile.
//! Exports: The queue handle, its options and codecs, errors, and inspection types.
//! Role: Surface used by the CLI, integration tests and embedding applications.
//! Invariants: Locking, watching and exit cleanup stay internal to the handle.

mod codec;
mod fifo;
mod options;
mod writer;

#[doc(hidden)]
pub use crate::core::error::to_exit_code;
pub use crate::core::error::{Error, ErrorKind};
pub use crate::core::frame::{DEFAULT_MAX_MESSAGE_SIZE, FRAME_HEADER_LEN, encode_batch};
pub use crate::core::inspect::{InspectIssue, InspectReport, InspectStatus};
pub use codec::{JsonCodec, RawCodec, Utf8Codec, ValueCodec};
pub use fifo::FifoFile;
pub use options::FifoOptions;
pub use writer::FifoWriter;
