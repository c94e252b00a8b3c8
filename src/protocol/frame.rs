//! Frame header handling.

use super::{HEADER_SIZE, HUB_ID, MAX_PAYLOAD_LEN, MIN_FRAME_LEN};
use crate::error::ProtocolError;

/// Prepend the length/hub-id header to a payload.
///
/// `payload` starts with the message type byte. Payloads that do not fit the
/// single length byte are rejected; this is a configuration error and must
/// not be retried.
pub fn encode(payload: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    if payload.is_empty() {
        return Err(ProtocolError::EmptyPayload);
    }
    if payload.len() > MAX_PAYLOAD_LEN {
        return Err(ProtocolError::PayloadTooLarge {
            size: payload.len(),
            max: MAX_PAYLOAD_LEN,
        });
    }

    let mut frame = Vec::with_capacity(HEADER_SIZE + payload.len());
    frame.push((payload.len() + HEADER_SIZE) as u8);
    frame.push(HUB_ID);
    frame.extend_from_slice(payload);
    Ok(frame)
}

/// Strictly check an outbound frame: length byte must match and hub id must be zero.
pub fn validate(frame: &[u8]) -> Result<(), ProtocolError> {
    if frame.len() < MIN_FRAME_LEN {
        return Err(ProtocolError::InvalidLength {
            declared: frame.first().copied().unwrap_or(0) as usize,
            actual: frame.len(),
        });
    }
    let declared = frame[0] as usize;
    if declared != frame.len() || frame[1] != HUB_ID {
        return Err(ProtocolError::InvalidLength {
            declared,
            actual: frame.len(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_header() {
        let frame = encode(&[0x02, 0x01, 0x03]).unwrap();
        assert_eq!(frame, vec![0x05, 0x00, 0x02, 0x01, 0x03]);
        assert!(validate(&frame).is_ok());
    }

    #[test]
    fn test_encode_limits() {
        assert_eq!(encode(&[]), Err(ProtocolError::EmptyPayload));

        let max = vec![0xAA; MAX_PAYLOAD_LEN];
        let frame = encode(&max).unwrap();
        assert_eq!(frame[0], 255);

        let too_big = vec![0xAA; MAX_PAYLOAD_LEN + 1];
        assert!(matches!(
            encode(&too_big),
            Err(ProtocolError::PayloadTooLarge { size: 254, max: 253 })
        ));
    }

    #[test]
    fn test_validate_rejects_mismatch() {
        assert!(validate(&[0x06, 0x00, 0x04, 0x32, 0x01]).is_err());
        assert!(validate(&[0x03, 0x01, 0x04]).is_err());
        assert!(validate(&[0x02]).is_err());
        assert!(validate(&[0x03, 0x00, 0x04]).is_ok());
    }
}
