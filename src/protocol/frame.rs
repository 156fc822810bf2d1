//! Video frame codec
//!
//! Raw TCP only guarantees ordered bytes, so each frame carries its own boundary:
//!
//! ```text
//! ┌────────────┬────────────┬─────────────┬───────────┬─────────────┬──────────────┐
//! │ magic (4)  │ width u32  │ height u32  │ depth u8  │ length u32  │ pixels       │
//! │ "AUVF"     │ big-endian │ big-endian  │ channels  │ big-endian  │ length bytes │
//! └────────────┴────────────┴─────────────┴───────────┴─────────────┴──────────────┘
//! ```
//!
//! Pixels are row-major, `depth` bytes per pixel. The codec is pure: no I/O.

use crate::error::FramingError;

pub const MAGIC: [u8; 4] = *b"AUVF";
pub const HEADER_LEN: usize = 17;
/// Upper bound on a single frame payload (64 MiB)
pub const MAX_PAYLOAD_LEN: usize = 64 * 1024 * 1024;

/// One camera image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    /// Bytes per pixel (3 for BGR)
    pub depth: u8,
    pub pixels: Vec<u8>,
}

impl Frame {
    pub fn new(width: u32, height: u32, depth: u8, pixels: Vec<u8>) -> Result<Self, FramingError> {
        let expected = expected_len(width, height, depth)?;
        if pixels.len() != expected {
            return Err(FramingError::Malformed(format!(
                "{}x{}x{} needs {} pixel bytes, got {}",
                width,
                height,
                depth,
                expected,
                pixels.len()
            )));
        }
        Ok(Self { width, height, depth, pixels })
    }

    /// Frame filled with one pixel value repeated
    pub fn solid(width: u32, height: u32, pixel: &[u8]) -> Result<Self, FramingError> {
        let depth = u8::try_from(pixel.len())
            .map_err(|_| FramingError::Malformed("pixel wider than 255 bytes".into()))?;
        let count = width as usize * height as usize;
        let mut pixels = Vec::with_capacity(count * pixel.len());
        for _ in 0..count {
            pixels.extend_from_slice(pixel);
        }
        Self::new(width, height, depth, pixels)
    }

    pub fn encoded_len(&self) -> usize {
        HEADER_LEN + self.pixels.len()
    }
}

/// Decoded frame header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub width: u32,
    pub height: u32,
    pub depth: u8,
    pub payload_len: usize,
}

impl FrameHeader {
    /// Parse and validate a header. `bytes` must hold at least [`HEADER_LEN`] bytes.
    pub fn parse(bytes: &[u8]) -> Result<Self, FramingError> {
        if bytes.len() < HEADER_LEN {
            return Err(FramingError::Truncated {
                expected: HEADER_LEN,
                actual: bytes.len(),
            });
        }
        if bytes[..4] != MAGIC {
            return Err(FramingError::Malformed("bad magic marker".into()));
        }

        let width = read_u32(&bytes[4..8]);
        let height = read_u32(&bytes[8..12]);
        let depth = bytes[12];
        let payload_len = read_u32(&bytes[13..17]) as usize;

        let expected = expected_len(width, height, depth)?;
        if payload_len != expected {
            return Err(FramingError::Malformed(format!(
                "declared length {} but {}x{}x{} is {}",
                payload_len, width, height, depth, expected
            )));
        }

        Ok(Self {
            width,
            height,
            depth,
            payload_len,
        })
    }

    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[..4].copy_from_slice(&MAGIC);
        out[4..8].copy_from_slice(&self.width.to_be_bytes());
        out[8..12].copy_from_slice(&self.height.to_be_bytes());
        out[12] = self.depth;
        out[13..17].copy_from_slice(&(self.payload_len as u32).to_be_bytes());
        out
    }
}

fn read_u32(bytes: &[u8]) -> u32 {
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

fn expected_len(width: u32, height: u32, depth: u8) -> Result<usize, FramingError> {
    if depth == 0 {
        return Err(FramingError::Malformed("zero channel depth".into()));
    }
    (width as usize)
        .checked_mul(height as usize)
        .and_then(|n| n.checked_mul(depth as usize))
        .filter(|&n| n <= MAX_PAYLOAD_LEN)
        .ok_or_else(|| {
            FramingError::Malformed(format!("{}x{}x{} exceeds frame size limit", width, height, depth))
        })
}

/// Header followed by the raw pixel bytes
pub fn encode(frame: &Frame) -> Vec<u8> {
    let header = FrameHeader {
        width: frame.width,
        height: frame.height,
        depth: frame.depth,
        payload_len: frame.pixels.len(),
    };
    let mut out = Vec::with_capacity(frame.encoded_len());
    out.extend_from_slice(&header.encode());
    out.extend_from_slice(&frame.pixels);
    out
}

/// Decode exactly one frame; never returns a partial image.
pub fn decode(bytes: &[u8]) -> Result<Frame, FramingError> {
    let prefix = bytes.len().min(MAGIC.len());
    if bytes[..prefix] != MAGIC[..prefix] {
        return Err(FramingError::Malformed("bad magic marker".into()));
    }

    let header = FrameHeader::parse(bytes)?;
    let total = HEADER_LEN + header.payload_len;
    if bytes.len() < total {
        return Err(FramingError::Truncated {
            expected: total,
            actual: bytes.len(),
        });
    }
    if bytes.len() > total {
        return Err(FramingError::Malformed(format!(
            "{} trailing bytes after frame",
            bytes.len() - total
        )));
    }

    Ok(Frame {
        width: header.width,
        height: header.height,
        depth: header.depth,
        pixels: bytes[HEADER_LEN..total].to_vec(),
    })
}

/// Offset of the next position in `buf` (after index 0) where a frame could begin.
///
/// A position qualifies if the magic marker starts there, or if the tail of the buffer
/// from there is a prefix of the marker (more bytes needed). Returns `buf.len()` when
/// nothing in the buffer can start a frame.
pub fn resync_offset(buf: &[u8]) -> usize {
    (1..buf.len())
        .find(|&i| {
            let tail = &buf[i..];
            let n = tail.len().min(MAGIC.len());
            tail[..n] == MAGIC[..n]
        })
        .unwrap_or(buf.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_header_layout() {
        let frame = Frame::solid(2, 1, &[1, 2, 3]).unwrap();
        let bytes = encode(&frame);
        assert_eq!(&bytes[..4], b"AUVF");
        assert_eq!(&bytes[4..8], &[0, 0, 0, 2]);
        assert_eq!(&bytes[8..12], &[0, 0, 0, 1]);
        assert_eq!(bytes[12], 3);
        assert_eq!(&bytes[13..17], &[0, 0, 0, 6]);
        assert_eq!(&bytes[17..], &[1, 2, 3, 1, 2, 3]);
    }

    #[test]
    fn test_bad_magic_is_malformed() {
        let mut bytes = encode(&Frame::solid(1, 1, &[9]).unwrap());
        bytes[0] = b'X';
        assert!(matches!(decode(&bytes), Err(FramingError::Malformed(_))));
    }

    #[test]
    fn test_length_mismatch_is_malformed() {
        let mut bytes = encode(&Frame::solid(2, 2, &[0]).unwrap());
        bytes[16] = 5;
        assert!(matches!(decode(&bytes), Err(FramingError::Malformed(_))));
    }

    #[test]
    fn test_trailing_bytes_are_malformed() {
        let mut bytes = encode(&Frame::solid(1, 1, &[7]).unwrap());
        bytes.push(0);
        assert!(matches!(decode(&bytes), Err(FramingError::Malformed(_))));
    }

    #[test]
    fn test_new_rejects_wrong_pixel_count() {
        assert!(Frame::new(2, 2, 3, vec![0; 11]).is_err());
        assert!(Frame::new(2, 2, 0, vec![]).is_err());
    }

    #[test]
    fn test_resync_offset() {
        assert_eq!(resync_offset(b"xxAUVFrest"), 2);
        assert_eq!(resync_offset(b"xxxAU"), 3);
        assert_eq!(resync_offset(b"AUVxyz"), 6);
        assert_eq!(resync_offset(b"AAUVF"), 1);
    }

    fn arb_frame() -> impl Strategy<Value = Frame> {
        (0u32..16, 0u32..16, 1u8..5).prop_flat_map(|(w, h, d)| {
            let len = w as usize * h as usize * d as usize;
            proptest::collection::vec(any::<u8>(), len)
                .prop_map(move |pixels| Frame { width: w, height: h, depth: d, pixels })
        })
    }

    proptest! {
        #[test]
        fn roundtrip(frame in arb_frame()) {
            let decoded = decode(&encode(&frame)).unwrap();
            prop_assert_eq!(decoded, frame);
        }

        #[test]
        fn truncation_never_yields_image(frame in arb_frame(), cut in any::<prop::sample::Index>()) {
            let bytes = encode(&frame);
            let keep = cut.index(bytes.len());
            let result = decode(&bytes[..keep]);
            let is_truncated = matches!(result, Err(FramingError::Truncated { .. }));
            prop_assert!(is_truncated);
        }
    }
}
