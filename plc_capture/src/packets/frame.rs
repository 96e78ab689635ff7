use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Every frame ends with this two-byte sequence, in both directions.
pub const TERMINATOR: [u8; 2] = *b"\r\n";

/// A full three-word frame: `[command][layer][section]`, little-endian u16s.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame {
    pub command: u16,
    pub layer: u16,
    pub section: u16,
}

impl Frame {
    pub fn new(command: u16, layer: u16, section: u16) -> Self {
        Self {
            command,
            layer,
            section,
        }
    }

    /// Serializes the frame for the wire: three LE words plus terminator.
    pub fn encode(&self) -> [u8; 8] {
        let mut out = [0u8; 8];
        out[0..2].copy_from_slice(&self.command.to_le_bytes());
        out[2..4].copy_from_slice(&self.layer.to_le_bytes());
        out[4..6].copy_from_slice(&self.section.to_le_bytes());
        out[6..8].copy_from_slice(&TERMINATOR);
        out
    }
}

/// Encodes a frame from values that have not been range-checked yet.
/// Each word must fit `[0, 65535]`.
pub fn encode_checked(command: u32, layer: u32, section: u32) -> Result<[u8; 8], EncodeError> {
    let narrow = |value: u32| u16::try_from(value).map_err(|_| EncodeError::OutOfRange(value));
    Ok(Frame::new(narrow(command)?, narrow(layer)?, narrow(section)?).encode())
}

/// Result of decoding one raw chunk read from the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decoded {
    /// Read timed out with nothing buffered. Not an error; lets the caller
    /// poll without busy-looping.
    NoData,
    /// Two-byte ack-only frame carrying just the command word.
    Terminal(u16),
    /// Full three-word frame.
    Frame(Frame),
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    #[error("incomplete frame payload of {len} bytes")]
    Incomplete { len: usize },
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodeError {
    #[error("value {0} does not fit a 16-bit frame word")]
    OutOfRange(u32),
}

/// Decodes one chunk as read from the wire.
///
/// A trailing terminator is stripped if present; the remaining payload must
/// be empty (timeout), exactly 2 bytes (terminal ack) or at least 6 bytes of
/// whole words. Words beyond the third are ignored so newer PLC firmware can
/// append fields without breaking this controller.
pub fn decode(raw: &[u8]) -> Result<Decoded, DecodeError> {
    let payload = raw.strip_suffix(&TERMINATOR).unwrap_or(raw);

    if payload.is_empty() {
        return Ok(Decoded::NoData);
    }
    if payload.len() == 2 {
        return Ok(Decoded::Terminal(u16::from_le_bytes([
            payload[0], payload[1],
        ])));
    }
    if payload.len() % 2 != 0 || payload.len() < 6 {
        return Err(DecodeError::Incomplete { len: payload.len() });
    }

    let word = |i: usize| u16::from_le_bytes([payload[2 * i], payload[2 * i + 1]]);
    Ok(Decoded::Frame(Frame::new(word(0), word(1), word(2))))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        for (c, l, s) in [
            (0u16, 0u16, 0u16),
            (400, 3, 17),
            (700, 10, 60),
            (u16::MAX, u16::MAX, u16::MAX),
        ] {
            let frame = Frame::new(c, l, s);
            assert_eq!(decode(&frame.encode()), Ok(Decoded::Frame(frame)));
        }
    }

    #[test]
    fn decode_accepts_missing_terminator() {
        // Callers that already stripped CRLF get the same answer.
        let bytes = Frame::new(400, 1, 2).encode();
        assert_eq!(decode(&bytes[..6]), decode(&bytes));
    }

    #[test]
    fn terminal_frame_carries_only_the_command() {
        let mut raw = 700u16.to_le_bytes().to_vec();
        raw.extend_from_slice(&TERMINATOR);
        assert_eq!(decode(&raw), Ok(Decoded::Terminal(700)));
    }

    #[test]
    fn empty_read_is_no_data_not_an_error() {
        assert_eq!(decode(b""), Ok(Decoded::NoData));
        assert_eq!(decode(b"\r\n"), Ok(Decoded::NoData));
    }

    #[test]
    fn malformed_lengths_are_rejected() {
        // Odd payloads and even payloads shorter than three words.
        for payload in [&b"\x01"[..], b"\x01\x02\x03", b"\x01\x02\x03\x04"] {
            let mut raw = payload.to_vec();
            raw.extend_from_slice(&TERMINATOR);
            assert_eq!(
                decode(&raw),
                Err(DecodeError::Incomplete { len: payload.len() })
            );
        }
    }

    #[test]
    fn extra_words_are_ignored() {
        let mut raw = Vec::new();
        for word in [400u16, 2, 5, 9999] {
            raw.extend_from_slice(&word.to_le_bytes());
        }
        raw.extend_from_slice(&TERMINATOR);
        assert_eq!(decode(&raw), Ok(Decoded::Frame(Frame::new(400, 2, 5))));
    }

    #[test]
    fn encode_checked_range_checks_each_word() {
        assert!(encode_checked(300, 0, 0).is_ok());
        assert_eq!(
            encode_checked(70000, 0, 0),
            Err(EncodeError::OutOfRange(70000))
        );
        assert_eq!(
            encode_checked(300, 0, 65536),
            Err(EncodeError::OutOfRange(65536))
        );
    }
}
