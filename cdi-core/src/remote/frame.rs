//! Fixed 7-byte frame codec and byte-stream assembler.
//!
//! Layout: `[0xAA][command][v0 v1 v2 v3][checksum]`, where the checksum is
//! the wrapping sum of the six preceding bytes.

use core::fmt;

use heapless::Vec;
use winnow::binary::{le_u32, u8 as byte};
use winnow::error::{ContextError, ErrMode};
use winnow::prelude::*;

pub const FRAME_LEN: usize = 7;
pub const FRAME_HEADER: u8 = 0xAA;

/// One request or reply frame.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Frame {
    pub command: u8,
    pub value: [u8; 4],
}

/// Frame decoding failures. All of them are dropped without a reply.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum FrameError {
    Truncated,
    BadHeader(u8),
    ChecksumMismatch { expected: u8, found: u8 },
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameError::Truncated => write!(f, "frame shorter than {FRAME_LEN} bytes"),
            FrameError::BadHeader(found) => write!(f, "header 0x{found:02X}"),
            FrameError::ChecksumMismatch { expected, found } => {
                write!(f, "checksum 0x{found:02X}, expected 0x{expected:02X}")
            }
        }
    }
}

/// Wrapping byte sum.
#[must_use]
pub fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |sum, &b| sum.wrapping_add(b))
}

impl Frame {
    #[must_use]
    pub const fn new(command: u8, value: [u8; 4]) -> Self {
        Self { command, value }
    }

    /// Frame whose value is `value` in little-endian order.
    #[must_use]
    pub const fn with_u32(command: u8, value: u32) -> Self {
        Self::new(command, value.to_le_bytes())
    }

    #[must_use]
    pub const fn value_u32(&self) -> u32 {
        u32::from_le_bytes(self.value)
    }

    /// Little-endian `u16` in value bytes 0 and 1.
    #[must_use]
    pub const fn low_u16(&self) -> u16 {
        u16::from_le_bytes([self.value[0], self.value[1]])
    }

    /// Little-endian `u16` in value bytes 2 and 3.
    #[must_use]
    pub const fn high_u16(&self) -> u16 {
        u16::from_le_bytes([self.value[2], self.value[3]])
    }

    #[must_use]
    pub fn encode(&self) -> [u8; FRAME_LEN] {
        let [v0, v1, v2, v3] = self.value;
        let mut bytes = [FRAME_HEADER, self.command, v0, v1, v2, v3, 0];
        bytes[FRAME_LEN - 1] = checksum(&bytes[..FRAME_LEN - 1]);
        bytes
    }

    /// Parses one frame from the start of `bytes`.
    ///
    /// # Errors
    ///
    /// [`FrameError`] for short input, a wrong header, or a checksum that
    /// does not match the received bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self, FrameError> {
        let mut input = bytes;
        let (header, command, value, found) = (byte, byte, le_u32, byte)
            .parse_next(&mut input)
            .map_err(|_: ErrMode<ContextError>| FrameError::Truncated)?;

        if header != FRAME_HEADER {
            return Err(FrameError::BadHeader(header));
        }
        let expected = checksum(&bytes[..FRAME_LEN - 1]);
        if expected != found {
            return Err(FrameError::ChecksumMismatch { expected, found });
        }

        Ok(Self::with_u32(command, value))
    }
}

/// Collects received bytes into frames, hunting for the header between them.
#[derive(Debug, Default)]
pub struct FrameAssembler {
    buffer: Vec<u8, FRAME_LEN>,
}

impl FrameAssembler {
    #[must_use]
    pub const fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    /// Feeds one byte; yields a decode result every time seven bytes arrive.
    pub fn push(&mut self, byte: u8) -> Option<Result<Frame, FrameError>> {
        if self.buffer.is_empty() && byte != FRAME_HEADER {
            return None;
        }
        if self.buffer.push(byte).is_err() {
            self.buffer.clear();
            return None;
        }
        if self.buffer.len() < FRAME_LEN {
            return None;
        }

        let decoded = Frame::decode(&self.buffer);
        self.buffer.clear();
        Some(decoded)
    }

    /// Number of bytes of a partial frame held.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_appends_checksum() {
        let bytes = Frame::new(0x21, [3, 0, 0, 0]).encode();
        assert_eq!(bytes, [0xAA, 0x21, 3, 0, 0, 0, 0xCE]);
        assert_eq!(Frame::decode(&bytes), Ok(Frame::new(0x21, [3, 0, 0, 0])));
    }

    #[test]
    fn any_single_corrupted_byte_is_rejected() {
        let bytes = Frame::new(0xA1, [2, 12, 0x54, 0x06]).encode();
        for index in 0..FRAME_LEN {
            for flip in [0x01u8, 0x80, 0xFF] {
                let mut corrupted = bytes;
                corrupted[index] ^= flip;
                assert!(
                    Frame::decode(&corrupted).is_err(),
                    "byte {index} ^ {flip:#04x} accepted"
                );
            }
        }
    }

    #[test]
    fn value_halves_read_little_endian() {
        let frame = Frame::new(0xA1, [2, 12, 0x54, 0x06]);
        assert_eq!(frame.low_u16(), 0x0C02);
        assert_eq!(frame.high_u16(), 1_620);
    }

    #[test]
    fn short_input_is_truncated() {
        assert_eq!(
            Frame::decode(&[0xAA, 0x01, 0, 0]),
            Err(FrameError::Truncated)
        );
    }

    #[test]
    fn assembler_skips_noise_before_header() {
        let mut assembler = FrameAssembler::new();
        let frame = Frame::new(0x22, [0; 4]);
        let mut results = 0;
        for byte in [0x00, 0x13, 0x37].into_iter().chain(frame.encode()) {
            if let Some(result) = assembler.push(byte) {
                assert_eq!(result, Ok(frame));
                results += 1;
            }
        }
        assert_eq!(results, 1);
        assert_eq!(assembler.pending(), 0);
    }

    #[test]
    fn assembler_reports_checksum_mismatch() {
        let mut assembler = FrameAssembler::new();
        let mut bytes = Frame::new(0x01, [0; 4]).encode();
        bytes[6] = bytes[6].wrapping_add(1);
        let result = bytes.iter().find_map(|&b| assembler.push(b));
        assert!(matches!(
            result,
            Some(Err(FrameError::ChecksumMismatch { .. }))
        ));
    }
}
