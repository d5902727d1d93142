//! # Frame Codec
//!
//! Wire format per frame: a 4-byte magic whose last byte is the format
//! version, a `u32` little-endian payload length, then the bincode-encoded
//! [`TransportEnvelope`]. Decoding is a fixed point with encoding: decoding
//! an encoded frame and re-encoding yields identical bytes.

use crate::errors::TransportError;
use shared_types::TransportEnvelope;

/// Magic + format version prefix of every frame.
pub const FRAME_MAGIC: &[u8; 4] = b"VWF\x01";

/// Frames larger than this are rejected before allocation.
pub const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

/// Encode one envelope into a self-delimiting frame.
pub fn encode_frame(envelope: &TransportEnvelope) -> Result<Vec<u8>, TransportError> {
    let body = bincode::serialize(envelope).map_err(|e| TransportError::MalformedFrame {
        reason: format!("encode failed: {e}"),
    })?;
    let mut frame = Vec::with_capacity(FRAME_MAGIC.len() + 4 + body.len());
    frame.extend_from_slice(FRAME_MAGIC);
    frame.extend_from_slice(&(body.len() as u32).to_le_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Decode the frame at the head of `bytes`.
///
/// Returns the envelope and the number of bytes consumed, so callers can
/// walk a buffer of back-to-back frames.
pub fn decode_frame(bytes: &[u8]) -> Result<(TransportEnvelope, usize), TransportError> {
    if bytes.len() < FRAME_MAGIC.len() + 4 {
        return Err(TransportError::MalformedFrame {
            reason: "short frame header".into(),
        });
    }
    if &bytes[..FRAME_MAGIC.len()] != FRAME_MAGIC {
        return Err(TransportError::MalformedFrame {
            reason: "bad magic".into(),
        });
    }
    let len_start = FRAME_MAGIC.len();
    let len = u32::from_le_bytes([
        bytes[len_start],
        bytes[len_start + 1],
        bytes[len_start + 2],
        bytes[len_start + 3],
    ]) as usize;
    if len > MAX_FRAME_BYTES {
        return Err(TransportError::MalformedFrame {
            reason: format!("frame length {len} exceeds cap"),
        });
    }
    let body_start = len_start + 4;
    if bytes.len() < body_start + len {
        return Err(TransportError::MalformedFrame {
            reason: "truncated frame body".into(),
        });
    }
    let envelope: TransportEnvelope = bincode::deserialize(&bytes[body_start..body_start + len])
        .map_err(|e| TransportError::MalformedFrame {
            reason: format!("envelope decode failed: {e}"),
        })?;
    Ok((envelope, body_start + len))
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_types::NodeName;

    fn envelope(message_type: &str) -> TransportEnvelope {
        TransportEnvelope::new(
            "contract-1",
            NodeName::new("node1"),
            NodeName::new("node2"),
            message_type,
            vec![1, 2, 3],
        )
    }

    #[test]
    fn test_encode_decode_fixed_point() {
        let env = envelope("TransactionAssembled");
        let frame = encode_frame(&env).unwrap();
        let (decoded, consumed) = decode_frame(&frame).unwrap();

        assert_eq!(consumed, frame.len());
        assert_eq!(decoded, env);
        assert_eq!(encode_frame(&decoded).unwrap(), frame);
    }

    #[test]
    fn test_back_to_back_frames() {
        let first = envelope("TransactionAssembled");
        let second = envelope("TransactionEndorsed");
        let mut buffer = encode_frame(&first).unwrap();
        buffer.extend(encode_frame(&second).unwrap());

        let (a, consumed) = decode_frame(&buffer).unwrap();
        let (b, rest) = decode_frame(&buffer[consumed..]).unwrap();
        assert_eq!(a, first);
        assert_eq!(b, second);
        assert_eq!(consumed + rest, buffer.len());
    }

    #[test]
    fn test_bad_magic_rejected() {
        let mut frame = encode_frame(&envelope("X")).unwrap();
        frame[0] = b'?';
        assert!(matches!(
            decode_frame(&frame),
            Err(TransportError::MalformedFrame { .. })
        ));
    }

    #[test]
    fn test_truncated_body_rejected() {
        let frame = encode_frame(&envelope("X")).unwrap();
        assert!(matches!(
            decode_frame(&frame[..frame.len() - 1]),
            Err(TransportError::MalformedFrame { .. })
        ));
    }

    #[test]
    fn test_oversized_length_rejected() {
        let mut frame = encode_frame(&envelope("X")).unwrap();
        let huge = (MAX_FRAME_BYTES as u32 + 1).to_le_bytes();
        frame[4..8].copy_from_slice(&huge);
        assert!(matches!(
            decode_frame(&frame),
            Err(TransportError::MalformedFrame { .. })
        ));
    }
}
