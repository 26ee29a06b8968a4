use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::Message;
use crate::error::PokerError;

/// Wraps [`Message`] framing with an outer `u32` total-length prefix so a
/// `tokio_util::codec::Framed` stream can wait for a complete frame
/// before attempting to decode it.
#[derive(Default)]
pub struct MessageCodec {
    expected_len: Option<u32>,
}

const LENGTH_PREFIX_BYTES: usize = 4;
const MAX_FRAME_BYTES: u32 = 64 * 1024 * 1024;

impl Encoder<Message> for MessageCodec {
    type Error = PokerError;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let body = item.encode();
        if body.len() as u64 > MAX_FRAME_BYTES as u64 {
            return Err(PokerError::MalformedFrame("frame exceeds maximum size".into()));
        }
        dst.reserve(LENGTH_PREFIX_BYTES + body.len());
        dst.put_u32(body.len() as u32);
        dst.put_slice(&body);
        Ok(())
    }
}

impl Decoder for MessageCodec {
    type Item = Message;
    type Error = PokerError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let body_len = match self.expected_len {
            Some(len) => len,
            None => {
                if src.len() < LENGTH_PREFIX_BYTES {
                    return Ok(None);
                }
                let len = (&src[..LENGTH_PREFIX_BYTES]).get_u32();
                if len > MAX_FRAME_BYTES {
                    return Err(PokerError::MalformedFrame("frame exceeds maximum size".into()));
                }
                src.advance(LENGTH_PREFIX_BYTES);
                self.expected_len = Some(len);
                len
            }
        };

        if src.len() < body_len as usize {
            return Ok(None);
        }

        let body = src.split_to(body_len as usize);
        self.expected_len = None;
        Message::decode(&body).map(Some)
    }
}
