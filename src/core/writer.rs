// Append one encoded batch at the current end of file. Runs under the advisory lock.
use std::fs::File;
use std::io;

use crate::core::fileio;
use crate::core::frame;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Append {
    /// File offset the batch started at.
    pub offset: u64,
    pub written: usize,
}

/// Frame `payloads` and write them as one contiguous region at end of file.
///
/// The file size is read fresh on every call since other processes may have
/// appended or truncated since this handle last touched the file. Partial writes
/// are continued; a zero-byte transfer ends the loop without error.
pub(crate) fn append_frames<B: AsRef<[u8]>>(file: &File, payloads: &[B]) -> io::Result<Append> {
    let buf = frame::encode_batch(payloads);
    let offset = fileio::len(file)?;

    let mut written = 0;
    while written < buf.len() {
        let wrote = fileio::write_at(file, &buf[written..], offset + written as u64)?;
        if wrote == 0 {
            break;
        }
        written += wrote;
    }

    Ok(Append { offset, written })
}
