// Frame layout (u32 length, u32 CRC-32, payload) plus batch encoding and scanning.
// Scanning never trusts the length field: it is bounded by max_size before any slicing.
use std::ops::Range;

pub const FRAME_HEADER_LEN: usize = 8;
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ScanStatus {
    /// Every byte in the scanned range belonged to a complete frame.
    Ok,
    /// The frame at the scan position needs `needed` bytes and fewer are present.
    Incomplete { needed: usize },
    Oversize { declared: u32 },
    ChecksumMismatch { stored: u32, computed: u32 },
}

impl ScanStatus {
    pub fn is_corrupt(self) -> bool {
        matches!(
            self,
            ScanStatus::Oversize { .. } | ScanStatus::ChecksumMismatch { .. }
        )
    }
}

#[derive(Debug, Eq, PartialEq)]
pub struct Scan<'a> {
    pub frames: Vec<&'a [u8]>,
    pub consumed: usize,
    pub status: ScanStatus,
}

pub fn frame_len(payload_len: usize) -> usize {
    FRAME_HEADER_LEN + payload_len
}

pub fn checksum(payload: &[u8]) -> u32 {
    crc32fast::hash(payload)
}

pub fn encode_frame_into(out: &mut Vec<u8>, payload: &[u8]) {
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    out.extend_from_slice(&checksum(payload).to_le_bytes());
    out.extend_from_slice(payload);
}

/// Concatenate one frame per payload, in order. Callers guarantee every payload
/// length fits in a `u32`.
pub fn encode_batch<B: AsRef<[u8]>>(payloads: &[B]) -> Vec<u8> {
    let total = payloads
        .iter()
        .map(|payload| frame_len(payload.as_ref().len()))
        .sum();
    let mut out = Vec::with_capacity(total);
    for payload in payloads {
        encode_frame_into(&mut out, payload.as_ref());
    }
    out
}

/// Scan complete frames in `buf[start..end]`.
///
/// Stops at the first frame that is not fully present (`Incomplete`) or that is
/// malformed (`Oversize`, `ChecksumMismatch`). Frames accepted before a malformed
/// one are still returned; `consumed` covers exactly those frames.
pub fn decode_frames(buf: &[u8], start: usize, end: usize, max_size: usize) -> Scan<'_> {
    let mut frames = Vec::new();
    let mut cursor = start;

    let status = loop {
        let available = end - cursor;
        if available == 0 {
            break ScanStatus::Ok;
        }
        if available < FRAME_HEADER_LEN {
            break ScanStatus::Incomplete {
                needed: FRAME_HEADER_LEN,
            };
        }

        let declared = read_u32(buf, cursor);
        if declared as usize > max_size {
            break ScanStatus::Oversize { declared };
        }

        let needed = frame_len(declared as usize);
        if available < needed {
            break ScanStatus::Incomplete { needed };
        }

        let stored = read_u32(buf, cursor + 4);
        let payload = &buf[payload_range(cursor, declared)];
        let computed = checksum(payload);
        if computed != stored {
            break ScanStatus::ChecksumMismatch { stored, computed };
        }

        frames.push(payload);
        cursor += needed;
    };

    Scan {
        frames,
        consumed: cursor - start,
        status,
    }
}

fn payload_range(frame_start: usize, declared: u32) -> Range<usize> {
    let payload_start = frame_start + FRAME_HEADER_LEN;
    payload_start..payload_start + declared as usize
}

fn read_u32(buf: &[u8], offset: usize) -> u32 {
    let mut out = [0u8; 4];
    out.copy_from_slice(&buf[offset..offset + 4]);
    u32::from_le_bytes(out)
}

#[cfg(test)]
mod tests {
    use super::{
        DEFAULT_MAX_MESSAGE_SIZE, FRAME_HEADER_LEN, ScanStatus, checksum, decode_frames,
        encode_batch, frame_len,
    };

    #[test]
    fn header_layout_is_little_endian() {
        let buf = encode_batch(&[b"hi"]);
        assert_eq!(buf.len(), frame_len(2));
        assert_eq!(&buf[0..4], &[2, 0, 0, 0]);
        assert_eq!(&buf[4..8], &checksum(b"hi").to_le_bytes());
        assert_eq!(&buf[8..], b"hi");
    }

    #[test]
    fn batch_decodes_in_order() {
        let payloads: Vec<Vec<u8>> = vec![b"one".to_vec(), Vec::new(), vec![7u8; 300]];
        let buf = encode_batch(&payloads);
        let scan = decode_frames(&buf, 0, buf.len(), DEFAULT_MAX_MESSAGE_SIZE);
        assert_eq!(scan.status, ScanStatus::Ok);
        assert_eq!(scan.consumed, buf.len());
        let frames: Vec<Vec<u8>> = scan.frames.iter().map(|frame| frame.to_vec()).collect();
        assert_eq!(frames, payloads);
    }

    #[test]
    fn short_header_is_incomplete_not_corrupt() {
        let buf = encode_batch(&[b"abc"]);
        let scan = decode_frames(&buf, 0, 5, DEFAULT_MAX_MESSAGE_SIZE);
        assert!(scan.frames.is_empty());
        assert_eq!(scan.consumed, 0);
        assert_eq!(
            scan.status,
            ScanStatus::Incomplete {
                needed: FRAME_HEADER_LEN
            }
        );
    }

    #[test]
    fn partial_payload_reports_full_frame_need() {
        let buf = encode_batch(&[b"first".as_slice(), b"second".as_slice()]);
        let cut = buf.len() - 2;
        let scan = decode_frames(&buf, 0, cut, DEFAULT_MAX_MESSAGE_SIZE);
        assert_eq!(scan.frames, vec![b"first".as_slice()]);
        assert_eq!(scan.consumed, frame_len(5));
        assert_eq!(scan.status, ScanStatus::Incomplete { needed: frame_len(6) });
    }

    #[test]
    fn oversize_length_stops_before_payload() {
        let mut buf = encode_batch(&[b"ok".as_slice()]);
        buf.extend_from_slice(&u32::MAX.to_le_bytes());
        buf.extend_from_slice(&[0u8; 4]);
        let scan = decode_frames(&buf, 0, buf.len(), 1024);
        assert_eq!(scan.frames, vec![b"ok".as_slice()]);
        assert_eq!(scan.status, ScanStatus::Oversize { declared: u32::MAX });
        assert!(scan.status.is_corrupt());
    }

    #[test]
    fn limit_is_inclusive() {
        let buf = encode_batch(&[[1u8; 4]]);
        let scan = decode_frames(&buf, 0, buf.len(), 4);
        assert_eq!(scan.status, ScanStatus::Ok);
        assert_eq!(scan.frames.len(), 1);

        let scan = decode_frames(&buf, 0, buf.len(), 3);
        assert_eq!(scan.status, ScanStatus::Oversize { declared: 4 });
    }

    #[test]
    fn flipped_payload_bit_is_checksum_mismatch() {
        let mut buf = encode_batch(&[b"a".as_slice(), b"b".as_slice()]);
        let last = buf.len() - 1;
        buf[last] ^= 0x01;
        let scan = decode_frames(&buf, 0, buf.len(), DEFAULT_MAX_MESSAGE_SIZE);
        assert_eq!(scan.frames, vec![b"a".as_slice()]);
        assert_eq!(scan.consumed, frame_len(1));
        assert!(matches!(scan.status, ScanStatus::ChecksumMismatch { .. }));
    }

    #[test]
    fn scan_honours_start_offset() {
        let buf = encode_batch(&[b"skip".as_slice(), b"take".as_slice()]);
        let start = frame_len(4);
        let scan = decode_frames(&buf, start, buf.len(), DEFAULT_MAX_MESSAGE_SIZE);
        assert_eq!(scan.frames, vec![b"take".as_slice()]);
        assert_eq!(scan.consumed, frame_len(4));
    }
}
