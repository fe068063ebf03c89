//! Wire format for the multipart message envelope.
//!
//! Envelope layout: `[length:4][checksum:4][count:1]` followed by `count`
//! frames, each `[len:4][bytes]`. All integers are little-endian.
//!
//! - **length**: total envelope size including the header
//! - **checksum**: CRC32C of everything after the checksum field
//! - **count**: number of frames (1..=MAX_FRAME_COUNT)
//!
//! The unicast path carries `[senderId][payload]`; some sender-side socket
//! configurations insert an empty delimiter frame, so receivers must also
//! accept `[senderId][empty][payload]`. Broadcasts and replies carry a
//! single `[payload]` frame.

use crate::config::PartyId;

/// Fixed header size: 4 (length) + 4 (checksum) + 1 (frame count).
pub const ENVELOPE_HEADER_SIZE: usize = 9;

/// Maximum size of a single frame (16 MiB).
///
/// Larger frames are rejected to bound memory use on the receive path.
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Maximum number of frames in one envelope.
pub const MAX_FRAME_COUNT: usize = 8;

/// Wire format error types.
#[derive(Debug, Clone, thiserror::Error)]
pub enum WireError {
    /// A frame exceeds the maximum allowed size.
    #[error("frame too large: {size} bytes (max {MAX_FRAME_SIZE})")]
    FrameTooLarge {
        /// Actual frame size in bytes.
        size: usize,
    },

    /// The envelope has no frames or more than `MAX_FRAME_COUNT`.
    #[error("invalid frame count: {count} (max {MAX_FRAME_COUNT})")]
    InvalidFrameCount {
        /// The offending frame count.
        count: usize,
    },

    /// Checksum verification failed - data was corrupted.
    #[error("checksum mismatch: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch {
        /// Expected checksum from the header.
        expected: u32,
        /// Checksum computed from the data.
        actual: u32,
    },

    /// The length field is inconsistent with the header or frame sizes.
    #[error("invalid envelope length: {length}")]
    InvalidLength {
        /// The invalid length value from the header.
        length: u32,
    },

    /// The envelope decoded but its frames do not form a valid message.
    #[error("malformed envelope: {message}")]
    Malformed {
        /// Details about the malformed content.
        message: String,
    },
}

/// Encode an envelope from its frames.
///
/// # Errors
///
/// Returns `InvalidFrameCount` for zero or too many frames and
/// `FrameTooLarge` for an oversized frame.
pub fn encode_envelope(frames: &[&[u8]]) -> Result<Vec<u8>, WireError> {
    if frames.is_empty() || frames.len() > MAX_FRAME_COUNT {
        return Err(WireError::InvalidFrameCount {
            count: frames.len(),
        });
    }
    for frame in frames {
        if frame.len() > MAX_FRAME_SIZE {
            return Err(WireError::FrameTooLarge { size: frame.len() });
        }
    }

    let body_len = 1 + frames.iter().map(|f| 4 + f.len()).sum::<usize>();
    let mut out = Vec::with_capacity(8 + body_len);
    out.extend_from_slice(&((8 + body_len) as u32).to_le_bytes());
    out.extend_from_slice(&[0u8; 4]); // checksum backfilled below
    out.push(frames.len() as u8);
    for frame in frames {
        out.extend_from_slice(&(frame.len() as u32).to_le_bytes());
        out.extend_from_slice(frame);
    }

    let checksum = crc32c::crc32c(&out[8..]);
    out[4..8].copy_from_slice(&checksum.to_le_bytes());
    Ok(out)
}

/// Try to decode one envelope from a buffer that may hold partial data.
///
/// # Returns
///
/// - `Ok(Some((frames, consumed)))` if a complete envelope was parsed
/// - `Ok(None)` if more data is needed (not an error condition)
/// - `Err` if the data is malformed or corrupted
pub fn try_decode_envelope(data: &[u8]) -> Result<Option<(Vec<Vec<u8>>, usize)>, WireError> {
    if data.len() < ENVELOPE_HEADER_SIZE {
        return Ok(None);
    }

    let length = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
    let total = length as usize;
    if total < ENVELOPE_HEADER_SIZE || total > 8 + 1 + MAX_FRAME_COUNT * (4 + MAX_FRAME_SIZE) {
        return Err(WireError::InvalidLength { length });
    }
    if data.len() < total {
        return Ok(None);
    }

    let expected = u32::from_le_bytes([data[4], data[5], data[6], data[7]]);
    let actual = crc32c::crc32c(&data[8..total]);
    if expected != actual {
        return Err(WireError::ChecksumMismatch { expected, actual });
    }

    let count = data[8] as usize;
    if count == 0 || count > MAX_FRAME_COUNT {
        return Err(WireError::InvalidFrameCount { count });
    }

    let mut frames = Vec::with_capacity(count);
    let mut offset = ENVELOPE_HEADER_SIZE;
    for _ in 0..count {
        if offset + 4 > total {
            return Err(WireError::InvalidLength { length });
        }
        let frame_len = u32::from_le_bytes([
            data[offset],
            data[offset + 1],
            data[offset + 2],
            data[offset + 3],
        ]) as usize;
        offset += 4;
        if frame_len > MAX_FRAME_SIZE || offset + frame_len > total {
            return Err(WireError::InvalidLength { length });
        }
        frames.push(data[offset..offset + frame_len].to_vec());
        offset += frame_len;
    }
    if offset != total {
        return Err(WireError::InvalidLength { length });
    }

    Ok(Some((frames, total)))
}

/// Encode the addressed unicast envelope `[senderId][payload]`.
///
/// The identity frame is the sender's id in ASCII decimal.
///
/// # Errors
///
/// Returns `FrameTooLarge` if the payload exceeds `MAX_FRAME_SIZE`.
pub fn encode_addressed(sender: PartyId, payload: &[u8]) -> Result<Vec<u8>, WireError> {
    let identity = sender.to_string();
    encode_envelope(&[identity.as_bytes(), payload])
}

/// Encode a bare single-frame envelope `[payload]` (broadcasts, replies).
///
/// # Errors
///
/// Returns `FrameTooLarge` if the payload exceeds `MAX_FRAME_SIZE`.
pub fn encode_bare(payload: &[u8]) -> Result<Vec<u8>, WireError> {
    encode_envelope(&[payload])
}

/// Interpret decoded frames as an addressed message.
///
/// Accepts both wire shapes: `[id][payload]` and `[id][empty][payload]`.
/// The empty delimiter frame, if present, is discarded.
///
/// # Errors
///
/// Returns `Malformed` if there are fewer than two frames or the identity
/// frame is not an ASCII-decimal party id.
pub fn split_addressed(mut frames: Vec<Vec<u8>>) -> Result<(PartyId, Vec<u8>), WireError> {
    if frames.len() < 2 {
        return Err(WireError::Malformed {
            message: format!("addressed message needs 2+ frames, got {}", frames.len()),
        });
    }
    let sender: PartyId = std::str::from_utf8(&frames[0])
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| WireError::Malformed {
            message: "identity frame is not a party id".to_string(),
        })?;
    let payload = if frames.len() >= 3 && frames[1].is_empty() {
        frames.remove(2)
    } else {
        frames.remove(1)
    };
    Ok((sender, payload))
}

/// Extract a reply payload: skip empty delimiter frames and take the last
/// non-empty frame, or an empty payload if every frame is empty.
pub fn last_payload(frames: Vec<Vec<u8>>) -> Vec<u8> {
    frames
        .into_iter()
        .rev()
        .find(|f| !f.is_empty())
        .unwrap_or_default()
}
