//! Purpose: Durable single-file FIFO queue shared by cooperating processes.
//! Exports: `api` (queue handle, options, codecs, errors), `core` (framing and file engine).
//! Role: Library backing the `fifofile` CLI and embedding applications.
//! Invariants: The on-disk format is length + CRC-32 + payload frames with no header.
//! Invariants: All access to a queue file is serialized by an OS advisory lock.
pub mod api;
pub mod core;
