//! Bit-stable binary framing for the six protocol messages (spec.md §4.4).
//!
//! This is a from-scratch peer pair (spec.md §6.1 explicitly permits this
//! when not interoperating with an existing deployment), so the framing
//! below is a length-prefixed tagged union rather than a port of the
//! source's Go `encoding/gob` wire format — see DESIGN.md.

mod codec;

pub use codec::MessageCodec;

use num_bigint::BigUint;

use crate::error::{PokerError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    Quit = 0,
    StartDeck = 1,
    EndDeck = 2,
    DecryptCard = 3,
    OneCipherCard = 4,
    AppMessage = 5,
}

impl MessageType {
    fn from_u8(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(MessageType::Quit),
            1 => Some(MessageType::StartDeck),
            2 => Some(MessageType::EndDeck),
            3 => Some(MessageType::DecryptCard),
            4 => Some(MessageType::OneCipherCard),
            5 => Some(MessageType::AppMessage),
            _ => None,
        }
    }
}

/// A self-describing protocol record. Only the fields relevant to `kind`
/// are meaningfully populated; the rest default to empty/zero so every
/// record round-trips through the same fixed layout.
#[derive(Debug, Clone)]
pub struct Message {
    pub kind: MessageType,
    pub deck: Vec<BigUint>,
    pub index: u64,
    pub value: Option<BigUint>,
    pub payload: Vec<u8>,
}

impl Message {
    pub fn quit() -> Self {
        Message {
            kind: MessageType::Quit,
            deck: Vec::new(),
            index: 0,
            value: None,
            payload: Vec::new(),
        }
    }

    pub fn start_deck(prime: BigUint, mine: Vec<BigUint>) -> Self {
        Message {
            kind: MessageType::StartDeck,
            deck: mine,
            index: 0,
            value: Some(prime),
            payload: Vec::new(),
        }
    }

    pub fn end_deck(both: Vec<BigUint>) -> Self {
        Message {
            kind: MessageType::EndDeck,
            deck: both,
            index: 0,
            value: None,
            payload: Vec::new(),
        }
    }

    pub fn decrypt_card(index: u64) -> Self {
        Message {
            kind: MessageType::DecryptCard,
            deck: Vec::new(),
            index,
            value: None,
            payload: Vec::new(),
        }
    }

    pub fn one_cipher_card(index: u64, value: BigUint) -> Self {
        Message {
            kind: MessageType::OneCipherCard,
            deck: Vec::new(),
            index,
            value: Some(value),
            payload: Vec::new(),
        }
    }

    pub fn app_message(payload: Vec<u8>) -> Self {
        Message {
            kind: MessageType::AppMessage,
            deck: Vec::new(),
            index: 0,
            value: None,
            payload,
        }
    }

    /// Encodes the message body (without the outer frame-length prefix,
    /// which the [`MessageCodec`] owns).
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.push(self.kind as u8);

        buf.extend_from_slice(&(self.deck.len() as u32).to_be_bytes());
        for v in &self.deck {
            encode_biguint(&mut buf, v);
        }

        buf.extend_from_slice(&self.index.to_be_bytes());

        match &self.value {
            Some(v) => {
                buf.push(1);
                encode_biguint(&mut buf, v);
            }
            None => buf.push(0),
        }

        buf.extend_from_slice(&(self.payload.len() as u32).to_be_bytes());
        buf.extend_from_slice(&self.payload);

        buf
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut cursor = Cursor { bytes, pos: 0 };
        let tag = cursor.take_u8()?;
        let kind = MessageType::from_u8(tag)
            .ok_or_else(|| PokerError::MalformedFrame(format!("unknown message tag {tag}")))?;

        let deck_len = cursor.take_u32()? as usize;
        let mut deck = Vec::with_capacity(deck_len.min(1 << 16));
        for _ in 0..deck_len {
            deck.push(decode_biguint(&mut cursor)?);
        }

        let index = cursor.take_u64()?;

        let has_value = cursor.take_u8()?;
        let value = match has_value {
            0 => None,
            1 => Some(decode_biguint(&mut cursor)?),
            other => {
                return Err(PokerError::MalformedFrame(format!(
                    "invalid value presence byte {other}"
                )))
            }
        };

        let payload_len = cursor.take_u32()? as usize;
        let payload = cursor.take_bytes(payload_len)?.to_vec();

        Ok(Message {
            kind,
            deck,
            index,
            value,
            payload,
        })
    }
}

fn encode_biguint(buf: &mut Vec<u8>, v: &BigUint) {
    let bytes = v.to_bytes_be();
    let bytes = if bytes == [0] { Vec::new() } else { bytes };
    buf.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
    buf.extend_from_slice(&bytes);
}

fn decode_biguint(cursor: &mut Cursor) -> Result<BigUint> {
    let len = cursor.take_u32()? as usize;
    let bytes = cursor.take_bytes(len)?;
    Ok(BigUint::from_bytes_be(bytes))
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take_bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.pos + n > self.bytes.len() {
            return Err(PokerError::MalformedFrame("frame truncated".into()));
        }
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn take_u8(&mut self) -> Result<u8> {
        Ok(self.take_bytes(1)?[0])
    }

    fn take_u32(&mut self) -> Result<u32> {
        let b = self.take_bytes(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn take_u64(&mut self) -> Result<u64> {
        let b = self.take_bytes(8)?;
        let mut arr = [0u8; 8];
        arr.copy_from_slice(b);
        Ok(u64::from_be_bytes(arr))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_deck_round_trips() {
        let msg = Message::start_deck(
            BigUint::from(104729u64),
            vec![BigUint::from(1u32), BigUint::from(2u32)],
        );
        let bytes = msg.encode();
        let decoded = Message::decode(&bytes).unwrap();
        assert_eq!(decoded.kind, MessageType::StartDeck);
        assert_eq!(decoded.deck, msg.deck);
        assert_eq!(decoded.value, msg.value);
    }

    #[test]
    fn identical_logical_messages_serialize_identically() {
        let a = Message::decrypt_card(7);
        let b = Message::decrypt_card(7);
        assert_eq!(a.encode(), b.encode(), "framing must be bit-stable");
    }

    #[test]
    fn zero_encodes_as_empty_run() {
        let msg = Message::one_cipher_card(0, BigUint::from(0u32));
        let bytes = msg.encode();
        let decoded = Message::decode(&bytes).unwrap();
        assert_eq!(decoded.value, Some(BigUint::from(0u32)));
    }

    #[test]
    fn truncated_frame_is_malformed_not_panicking() {
        let msg = Message::app_message(vec![1, 2, 3]);
        let bytes = msg.encode();
        let truncated = &bytes[..bytes.len() - 2];
        assert!(matches!(
            Message::decode(truncated),
            Err(PokerError::MalformedFrame(_))
        ));
    }

    #[test]
    fn unknown_type_is_reported_not_panicking() {
        let mut bytes = Message::quit().encode();
        bytes[0] = 200;
        assert!(matches!(
            Message::decode(&bytes),
            Err(PokerError::MalformedFrame(_))
        ));
    }
}
