//! Journal frame format.
//!
//! ```text
//! +-------+---------+------+--------+---------+-------+
//! | magic | version | kind | length | payload | crc32 |
//! | 4     | 2       | 1    | 4      | length  | 4     |
//! +-------+---------+------+--------+---------+-------+
//! ```
//!
//! Integers are little-endian. The CRC covers header and payload.

use crate::error::{CoreError, CoreResult};

/// Frame magic.
pub const MAGIC: [u8; 4] = *b"VJNL";

/// Current frame format version.
pub const VERSION: u16 = 1;

/// Bytes before the payload.
pub const HEADER_SIZE: usize = 11;

/// Bytes after the payload.
pub const TRAILER_SIZE: usize = 4;

/// Kind of a journal frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// One committed transaction.
    Transaction,
    /// Full state written by compaction.
    Snapshot,
}

impl FrameKind {
    /// Returns the byte representation.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        match self {
            Self::Transaction => 1,
            Self::Snapshot => 2,
        }
    }

    /// Parses from the byte representation.
    pub fn from_byte(b: u8) -> CoreResult<Self> {
        match b {
            1 => Ok(Self::Transaction),
            2 => Ok(Self::Snapshot),
            _ => Err(CoreError::invalid_format(format!("unknown frame kind: {b}"))),
        }
    }
}

/// Encodes one frame.
pub fn encode(kind: FrameKind, payload: &[u8]) -> CoreResult<Vec<u8>> {
    let len = u32::try_from(payload.len())
        .map_err(|_| CoreError::invalid_format("frame payload exceeds 4 GiB"))?;

    let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len() + TRAILER_SIZE);
    buf.extend_from_slice(&MAGIC);
    buf.extend_from_slice(&VERSION.to_le_bytes());
    buf.push(kind.as_byte());
    buf.extend_from_slice(&len.to_le_bytes());
    buf.extend_from_slice(payload);

    let crc = compute_crc32(&buf);
    buf.extend_from_slice(&crc.to_le_bytes());
    Ok(buf)
}

/// Result of decoding the bytes at one offset.
#[derive(Debug, PartialEq, Eq)]
pub enum Decoded<'a> {
    /// A complete, checksum-valid frame.
    Frame {
        /// Frame kind.
        kind: FrameKind,
        /// Payload bytes.
        payload: &'a [u8],
        /// Total frame size.
        size: usize,
    },
    /// Fewer bytes remain than the frame needs.
    Incomplete,
    /// The bytes are not a valid frame.
    Damaged(String),
}

/// Decodes the frame at the start of `data`.
#[must_use]
pub fn decode(data: &[u8]) -> Decoded<'_> {
    if data.len() < HEADER_SIZE {
        return Decoded::Incomplete;
    }
    if data[0..4] != MAGIC {
        return Decoded::Damaged("bad magic".into());
    }

    let version = u16::from_le_bytes([data[4], data[5]]);
    if version != VERSION {
        return Decoded::Damaged(format!("unsupported frame version {version}"));
    }

    let kind = match FrameKind::from_byte(data[6]) {
        Ok(kind) => kind,
        Err(e) => return Decoded::Damaged(e.to_string()),
    };

    let len = u32::from_le_bytes([data[7], data[8], data[9], data[10]]) as usize;
    let size = HEADER_SIZE + len + TRAILER_SIZE;
    if data.len() < size {
        return Decoded::Incomplete;
    }

    let body_end = HEADER_SIZE + len;
    let stored = u32::from_le_bytes([
        data[body_end],
        data[body_end + 1],
        data[body_end + 2],
        data[body_end + 3],
    ]);
    let computed = compute_crc32(&data[..body_end]);
    if stored != computed {
        return Decoded::Damaged(format!(
            "checksum mismatch: expected {stored:08x}, got {computed:08x}"
        ));
    }

    Decoded::Frame {
        kind,
        payload: &data[HEADER_SIZE..body_end],
        size,
    }
}

/// Computes the CRC32 (IEEE) checksum of `data`.
#[must_use]
pub fn compute_crc32(data: &[u8]) -> u32 {
    const TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = i as u32;
            let mut j = 0;
            while j < 8 {
                crc = if crc & 1 != 0 {
                    (crc >> 1) ^ 0xEDB8_8320
                } else {
                    crc >> 1
                };
                j += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    };

    let mut crc = 0xFFFF_FFFF_u32;
    for &byte in data {
        crc = (crc >> 8) ^ TABLE[((crc ^ u32::from(byte)) & 0xFF) as usize];
    }
    !crc
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crc32_known_value() {
        assert_eq!(compute_crc32(b"123456789"), 0xCBF4_3926);
        assert_eq!(compute_crc32(b""), 0);
    }

    #[test]
    fn encode_decode() {
        let bytes = encode(FrameKind::Transaction, b"payload").unwrap();
        assert_eq!(bytes.len(), HEADER_SIZE + 7 + TRAILER_SIZE);

        match decode(&bytes) {
            Decoded::Frame {
                kind,
                payload,
                size,
            } => {
                assert_eq!(kind, FrameKind::Transaction);
                assert_eq!(payload, b"payload");
                assert_eq!(size, bytes.len());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn short_input_is_incomplete() {
        let bytes = encode(FrameKind::Snapshot, b"abc").unwrap();
        assert_eq!(decode(&bytes[..5]), Decoded::Incomplete);
        assert_eq!(decode(&bytes[..bytes.len() - 1]), Decoded::Incomplete);
    }

    #[test]
    fn flipped_bit_is_damaged() {
        let mut bytes = encode(FrameKind::Transaction, b"abc").unwrap();
        bytes[HEADER_SIZE] ^= 0x01;
        assert!(matches!(decode(&bytes), Decoded::Damaged(_)));

        let mut bytes = encode(FrameKind::Transaction, b"abc").unwrap();
        bytes[0] = b'X';
        assert!(matches!(decode(&bytes), Decoded::Damaged(_)));
    }
}
