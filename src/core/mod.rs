// Queue engine: framing, locking, append, tailing reads, watches, exit cleanup, errors.
pub mod error;
pub mod frame;
pub mod inspect;
pub mod reader;
pub mod writer;

pub(crate) mod exit;
pub(crate) mod fileio;
pub(crate) mod lock;
pub(crate) mod watch;
