//! NUL-delimited GELF frames for stream transports

use crate::{GelfError, Result};
use bytes::{BufMut, Bytes, BytesMut};
use serde::Serialize;
use tokio_util::codec::{Decoder, Encoder};

/// Frame terminator
pub const FRAME_DELIMITER: u8 = 0x00;

/// Codec turning messages into `JSON + NUL` frames and back into raw JSON
/// byte frames.
#[derive(Debug, Clone, Default)]
pub struct GelfFrameCodec {
    max_frame_length: Option<usize>,
    next_index: usize,
}

impl GelfFrameCodec {
    /// Codec with no frame length limit
    pub fn new() -> Self {
        Self::default()
    }

    /// Codec rejecting decoded frames longer than `max` bytes
    pub fn with_max_frame_length(max: usize) -> Self {
        Self {
            max_frame_length: Some(max),
            next_index: 0,
        }
    }

    /// Encode one message into a standalone frame
    pub fn frame<M: Serialize + ?Sized>(message: &M) -> Result<Bytes> {
        let mut buf = BytesMut::new();
        Self::new().encode(message, &mut buf)?;
        Ok(buf.freeze())
    }
}

impl<M: Serialize + ?Sized> Encoder<&M> for GelfFrameCodec {
    type Error = GelfError;

    fn encode(&mut self, item: &M, dst: &mut BytesMut) -> Result<()> {
        let json = serde_json::to_vec(item)?;
        dst.reserve(json.len() + 1);
        dst.put_slice(&json);
        dst.put_u8(FRAME_DELIMITER);
        Ok(())
    }
}

impl Decoder for GelfFrameCodec {
    type Item = Bytes;
    type Error = GelfError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>> {
        let found = src[self.next_index..]
            .iter()
            .position(|b| *b == FRAME_DELIMITER)
            .map(|offset| self.next_index + offset);

        match found {
            Some(end) => {
                self.next_index = 0;
                let frame = src.split_to(end + 1);
                Ok(Some(frame.freeze().slice(..end)))
            }
            None => {
                self.next_index = src.len();
                match self.max_frame_length {
                    Some(max) if src.len() > max => Err(GelfError::Validation(format!(
                        "frame exceeds {} bytes without a terminator",
                        max
                    ))),
                    _ => Ok(None),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_is_json_plus_nul() {
        let frame = GelfFrameCodec::frame(&serde_json::json!({ "a": 1 })).unwrap();
        assert_eq!(&frame[..], b"{\"a\":1}\0");
    }

    #[test]
    fn test_decode_across_partial_reads() {
        let mut codec = GelfFrameCodec::new();
        let mut buf = BytesMut::from(&b"{\"a\":1}\0{\"b\""[..]);

        assert_eq!(codec.decode(&mut buf).unwrap().unwrap(), Bytes::from_static(b"{\"a\":1}"));
        assert_eq!(codec.decode(&mut buf).unwrap(), None);

        buf.extend_from_slice(b":2}\0");
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap(), Bytes::from_static(b"{\"b\":2}"));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decode_rejects_unterminated_oversize_frame() {
        let mut codec = GelfFrameCodec::with_max_frame_length(4);
        let mut buf = BytesMut::from(&b"0123456789"[..]);
        assert!(codec.decode(&mut buf).is_err());
    }
}
