//! Stream framing for byte-oriented links.

use bytes::{BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::{frame, MIN_FRAME_LEN};
use crate::error::ProtocolError;

/// Tokio codec splitting a byte stream into hub frames on the length byte.
///
/// Decoded items are complete raw frames; turning them into [`Message`]s is
/// left to the router so malformed payloads are counted, not fatal.
///
/// [`Message`]: super::Message
#[derive(Debug, Default, Clone, Copy)]
pub struct FrameCodec;

impl FrameCodec {
    pub fn new() -> Self {
        Self
    }
}

impl Decoder for FrameCodec {
    type Item = Vec<u8>;
    type Error = crate::Error;

    fn decode(
        &mut self,
        src: &mut BytesMut,
    ) -> std::result::Result<Option<Self::Item>, Self::Error> {
        let Some(&len) = src.first() else {
            return Ok(None);
        };

        let total_len = len as usize;
        // A length byte below the header size can never resync
        if total_len < MIN_FRAME_LEN {
            return Err(ProtocolError::InvalidLength {
                declared: total_len,
                actual: src.len(),
            }
            .into());
        }

        if src.len() < total_len {
            src.reserve(total_len - src.len());
            return Ok(None);
        }

        Ok(Some(src.split_to(total_len).to_vec()))
    }
}

impl Encoder<Vec<u8>> for FrameCodec {
    type Error = crate::Error;

    fn encode(&mut self, item: Vec<u8>, dst: &mut BytesMut) -> std::result::Result<(), Self::Error> {
        frame::validate(&item)?;

        dst.reserve(item.len());
        dst.put_slice(&item);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::encode;

    #[test]
    fn test_frame_codec() {
        let mut codec = FrameCodec::new();
        let frame = encode(&[0x81, 0x32, 0x01, 0x51, 0x00, 0x64]).unwrap();

        let mut buf = BytesMut::new();
        codec.encode(frame.clone(), &mut buf).unwrap();

        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, frame);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_partial_and_back_to_back() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::from(&[0x05, 0x00, 0x05][..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(&[0x01, 0x06, 0x05, 0x00, 0x82, 0x32, 0x0A]);
        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            Some(vec![0x05, 0x00, 0x05, 0x01, 0x06])
        );
        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            Some(vec![0x05, 0x00, 0x82, 0x32, 0x0A])
        );
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_rejects_bad_length() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::from(&[0x02, 0x00, 0x04][..]);
        assert!(codec.decode(&mut buf).is_err());

        let mut out = BytesMut::new();
        assert!(codec.encode(vec![0x09, 0x00, 0x04], &mut out).is_err());
    }
}
