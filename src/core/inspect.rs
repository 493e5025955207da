// Read-only scan of a queue file: frame count, pending tail bytes, first corruption.
// Never truncates; recovery belongs to the reader.
use std::fs::File;
use std::io;

use serde::Serialize;

use crate::core::fileio;
use crate::core::frame::{self, FRAME_HEADER_LEN, ScanStatus};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InspectStatus {
    Ok,
    /// Trailing bytes form an unfinished frame (a write in progress or a crashed writer).
    Pending,
    Corrupt,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct InspectIssue {
    pub code: String,
    pub message: String,
    pub offset: u64,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct InspectReport {
    pub size: u64,
    pub frames: u64,
    pub payload_bytes: u64,
    pub pending_bytes: u64,
    pub status: InspectStatus,
    pub issue: Option<InspectIssue>,
}

pub(crate) fn inspect_file(
    file: &File,
    max_size: usize,
    chunk_size: usize,
) -> io::Result<InspectReport> {
    let mut report = InspectReport {
        size: fileio::len(file)?,
        frames: 0,
        payload_bytes: 0,
        pending_bytes: 0,
        status: InspectStatus::Ok,
        issue: None,
    };

    let mut chunk = vec![0u8; chunk_size.max(FRAME_HEADER_LEN)];
    let mut pending: Vec<u8> = Vec::new();
    let mut pending_offset = 0u64;
    let mut read_pos = 0u64;

    loop {
        let read = fileio::read_at(file, &mut chunk, read_pos)?;
        if read == 0 {
            break;
        }
        read_pos += read as u64;
        pending.extend_from_slice(&chunk[..read]);

        let scan = frame::decode_frames(&pending, 0, pending.len(), max_size);
        report.frames += scan.frames.len() as u64;
        report.payload_bytes += scan
            .frames
            .iter()
            .map(|payload| payload.len() as u64)
            .sum::<u64>();
        let (consumed, status) = (scan.consumed, scan.status);

        if status.is_corrupt() {
            let offset = pending_offset + consumed as u64;
            report.status = InspectStatus::Corrupt;
            report.issue = Some(issue_for(status, offset, max_size));
            report.pending_bytes = report.size.saturating_sub(offset);
            return Ok(report);
        }

        pending.drain(..consumed);
        pending_offset += consumed as u64;
    }

    report.pending_bytes = pending.len() as u64;
    if !pending.is_empty() {
        report.status = InspectStatus::Pending;
    }
    Ok(report)
}

fn issue_for(status: ScanStatus, offset: u64, max_size: usize) -> InspectIssue {
    match status {
        ScanStatus::Oversize { declared } => InspectIssue {
            code: "oversize".to_string(),
            message: format!("declared length {declared} exceeds limit {max_size}"),
            offset,
        },
        ScanStatus::ChecksumMismatch { stored, computed } => InspectIssue {
            code: "checksum".to_string(),
            message: format!("stored crc {stored:#010x} != computed {computed:#010x}"),
            offset,
        },
        ScanStatus::Ok | ScanStatus::Incomplete { .. } => InspectIssue {
            code: "unknown".to_string(),
            message: "unexpected scan status".to_string(),
            offset,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::{InspectStatus, inspect_file};
    use crate::core::frame::{self, DEFAULT_MAX_MESSAGE_SIZE};
    use crate::core::writer::append_frames;
    use std::fs::{self, File, OpenOptions};
    use std::path::Path;

    fn open(path: &Path) -> File {
        OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(path)
            .expect("open")
    }

    #[test]
    fn counts_frames_across_small_chunks() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("ok.fifo");
        let file = open(&path);
        let payloads: Vec<Vec<u8>> = (0..50).map(|i| vec![i as u8; i]).collect();
        append_frames(&file, &payloads).expect("append");

        let report = inspect_file(&file, DEFAULT_MAX_MESSAGE_SIZE, 16).expect("inspect");
        assert_eq!(report.status, InspectStatus::Ok);
        assert_eq!(report.frames, 50);
        assert_eq!(report.payload_bytes, (0..50u64).sum::<u64>());
        assert_eq!(report.pending_bytes, 0);
        assert_eq!(report.size, fs::metadata(&path).expect("meta").len());
    }

    #[test]
    fn unfinished_frame_is_pending() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("pending.fifo");
        let file = open(&path);
        append_frames(&file, &[b"done"]).expect("append");
        let partial = frame::encode_batch(&[b"in-progress"]);
        let mut bytes = fs::read(&path).expect("read");
        bytes.extend_from_slice(&partial[..10]);
        fs::write(&path, &bytes).expect("write");

        let report = inspect_file(&file, DEFAULT_MAX_MESSAGE_SIZE, 4096).expect("inspect");
        assert_eq!(report.status, InspectStatus::Pending);
        assert_eq!(report.frames, 1);
        assert_eq!(report.pending_bytes, 10);
        assert!(report.issue.is_none());
    }

    #[test]
    fn corruption_is_reported_without_truncating() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("bad.fifo");
        let file = open(&path);
        append_frames(&file, &[b"a".as_slice(), b"b".as_slice()]).expect("append");
        let mut bytes = fs::read(&path).expect("read");
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        fs::write(&path, &bytes).expect("write");

        let report = inspect_file(&file, DEFAULT_MAX_MESSAGE_SIZE, 4096).expect("inspect");
        assert_eq!(report.status, InspectStatus::Corrupt);
        assert_eq!(report.frames, 1);
        let issue = report.issue.expect("issue");
        assert_eq!(issue.code, "checksum");
        assert_eq!(issue.offset, frame::frame_len(1) as u64);
        assert_eq!(fs::metadata(&path).expect("meta").len(), bytes.len() as u64);
    }
}
