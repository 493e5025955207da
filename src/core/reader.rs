// One read pass over the queue file, run under the advisory lock.
// A zero-byte read at the cursor means the queue is drained and the file is truncated.
// Oversize or checksum failures discard the whole remaining file the same way.
// A pass that reaches `max_messages` stops at that frame boundary and moves the unread
// remainder to offset 0, so any handle opened later starts at the first unread frame.
use std::fs::File;
use std::io;

use bytes::Bytes;

use crate::core::fileio;
use crate::core::frame::{self, FRAME_HEADER_LEN, ScanStatus};

pub const DEFAULT_READ_BUFFER: usize = 64 * 1024;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TruncateReason {
    Drained,
    Oversize { offset: u64, declared: u32 },
    ChecksumMismatch { offset: u64 },
}

#[derive(Debug)]
pub struct ReadBatch {
    pub messages: Vec<Bytes>,
    /// Cursor for the next pass; zero after any truncation.
    pub next_pos: u64,
    pub truncated: Option<TruncateReason>,
}

pub(crate) fn read_batch(
    file: &File,
    pos: u64,
    max_size: usize,
    initial_capacity: usize,
    max_messages: usize,
) -> io::Result<ReadBatch> {
    let max_messages = max_messages.max(1);
    let mut buf = vec![0u8; initial_capacity.max(FRAME_HEADER_LEN)];
    let mut start = 0usize;
    let mut end = 0usize;
    let mut messages = Vec::new();

    loop {
        if end == buf.len() {
            grow(&mut buf, end + 1);
        }

        let read = fileio::read_at(file, &mut buf[end..], pos + end as u64)?;
        if read == 0 {
            fileio::truncate(file)?;
            return Ok(ReadBatch {
                messages,
                next_pos: 0,
                truncated: Some(TruncateReason::Drained),
            });
        }
        end += read;

        let (consumed, status) = {
            let scan = frame::decode_frames(&buf, start, end, max_size);
            let room = max_messages - messages.len();
            if scan.frames.len() >= room {
                let taken = &scan.frames[..room];
                let consumed: usize = taken
                    .iter()
                    .map(|payload| frame::frame_len(payload.len()))
                    .sum();
                messages.extend(taken.iter().map(|payload| Bytes::copy_from_slice(payload)));
                drop(scan);
                shift_to_front(file, pos + (start + consumed) as u64, &mut buf)?;
                return Ok(ReadBatch {
                    messages,
                    next_pos: 0,
                    truncated: None,
                });
            }
            messages.extend(scan.frames.iter().map(|payload| Bytes::copy_from_slice(payload)));
            (scan.consumed, scan.status)
        };
        let frame_offset = pos + (start + consumed) as u64;
        start += consumed;

        match status {
            ScanStatus::Oversize { declared } => {
                fileio::truncate(file)?;
                return Ok(ReadBatch {
                    messages,
                    next_pos: 0,
                    truncated: Some(TruncateReason::Oversize {
                        offset: frame_offset,
                        declared,
                    }),
                });
            }
            ScanStatus::ChecksumMismatch { .. } => {
                fileio::truncate(file)?;
                return Ok(ReadBatch {
                    messages,
                    next_pos: 0,
                    truncated: Some(TruncateReason::ChecksumMismatch {
                        offset: frame_offset,
                    }),
                });
            }
            ScanStatus::Incomplete { needed } => grow(&mut buf, start + needed),
            ScanStatus::Ok => {}
        }

        if end >= buf.len() / 2 && !messages.is_empty() {
            return Ok(ReadBatch {
                messages,
                next_pos: pos + start as u64,
                truncated: None,
            });
        }
    }
}

/// Copy `[from, len)` to offset 0 and cut the file to the copied length.
fn shift_to_front(file: &File, from: u64, scratch: &mut [u8]) -> io::Result<()> {
    let mut src = from;
    let mut dst = 0u64;
    loop {
        let read = fileio::read_at(file, scratch, src)?;
        if read == 0 {
            break;
        }
        let mut written = 0;
        while written < read {
            let wrote = fileio::write_at(file, &scratch[written..read], dst + written as u64)?;
            if wrote == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "failed to move unread frames",
                ));
            }
            written += wrote;
        }
        src += read as u64;
        dst += read as u64;
    }
    file.set_len(dst)
}

fn grow(buf: &mut Vec<u8>, required: usize) {
    let mut capacity = buf.len();
    while capacity < required {
        capacity *= 2;
    }
    if capacity > buf.len() {
        buf.resize(capacity, 0);
    }
}
