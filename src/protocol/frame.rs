use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::Decoder;
use crate::error::ApnsError;
use crate::protocol::identifier::Identifier;
use crate::protocol::{MAX_PAYLOAD_LEN, TOKEN_LEN};
use crate::safe_converter::{PrecheckedCast, SafeCast};
use crate::util::buf_ext::BufExt;

const COMMAND_SIMPLE: u8 = 0;
const COMMAND_ENHANCED: u8 = 1;
const COMMAND_ITEM_BASED: u8 = 2;

const ITEM_TOKEN: u8 = 1;
const ITEM_PAYLOAD: u8 = 2;
const ITEM_IDENTIFIER: u8 = 3;
const ITEM_EXPIRATION: u8 = 4;
const ITEM_PRIORITY: u8 = 5;

/// an item header is the item id followed by a u16 length
const ITEM_HEADER_LEN: usize = 3;

/// Anything bigger is not something a provider could have sent
const MAX_ITEM_FRAME_LEN: usize = 64 * 1024;

/// Which frame layout the push connection writes. Both are accepted by APNs' binary
///  interface, but only the item based one carries a priority.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
pub enum FrameFormat {
    /// command 1: identifier, expiration, token, payload as fixed fields
    Enhanced,
    /// command 2: a frame length followed by id / length / value items
    #[default]
    ItemBased,
}

/// The data going into one device's frame, borrowed from a notification
#[derive(Debug, Clone, Copy)]
pub struct FrameRef<'a> {
    pub token: &'a [u8; TOKEN_LEN],
    pub payload: &'a [u8],
    pub identifier: Identifier,
    pub expiration: u32,
    pub priority: u8,
}

impl FrameRef<'_> {
    fn items_len(&self) -> usize {
        ITEM_HEADER_LEN + TOKEN_LEN
            + ITEM_HEADER_LEN + self.payload.len()
            + ITEM_HEADER_LEN + 4
            + ITEM_HEADER_LEN + 4
            + ITEM_HEADER_LEN + 1
    }

    pub fn serialized_len(&self, format: FrameFormat) -> usize {
        match format {
            FrameFormat::Enhanced => 1 + 4 + 4 + 2 + TOKEN_LEN + 2 + self.payload.len(),
            FrameFormat::ItemBased => 1 + 4 + self.items_len(),
        }
    }

    /// Writing a payload that exceeds [MAX_PAYLOAD_LEN] is a protocol violation and fails
    ///  before anything is written to `buf`
    pub fn ser(&self, format: FrameFormat, buf: &mut impl BufMut) -> Result<(), ApnsError> {
        if self.payload.len() > MAX_PAYLOAD_LEN {
            return Err(ApnsError::PayloadTooLarge { len: self.payload.len(), max: MAX_PAYLOAD_LEN });
        }
        let payload_len: u16 = self.payload.len().prechecked_cast();

        match format {
            FrameFormat::Enhanced => {
                buf.put_u8(COMMAND_ENHANCED);
                buf.put_u32(self.identifier.to_raw());
                buf.put_u32(self.expiration);
                buf.put_u16(TOKEN_LEN.prechecked_cast());
                buf.put_slice(self.token);
                buf.put_u16(payload_len);
                buf.put_slice(self.payload);
            }
            FrameFormat::ItemBased => {
                buf.put_u8(COMMAND_ITEM_BASED);
                buf.put_u32(self.items_len().prechecked_cast());

                put_item_header(buf, ITEM_TOKEN, TOKEN_LEN);
                buf.put_slice(self.token);

                put_item_header(buf, ITEM_PAYLOAD, self.payload.len());
                buf.put_slice(self.payload);

                put_item_header(buf, ITEM_IDENTIFIER, 4);
                buf.put_u32(self.identifier.to_raw());

                put_item_header(buf, ITEM_EXPIRATION, 4);
                buf.put_u32(self.expiration);

                put_item_header(buf, ITEM_PRIORITY, 1);
                buf.put_u8(self.priority);
            }
        }
        Ok(())
    }
}

fn put_item_header(buf: &mut impl BufMut, item_id: u8, len: usize) {
    buf.put_u8(item_id);
    buf.put_u16(len.prechecked_cast());
}

/// A frame as received by the APNs side of a connection. Fields that the frame's command
///  does not carry are `None`.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct DecodedFrame {
    pub command: u8,
    pub token: Bytes,
    pub payload: Bytes,
    pub identifier: Option<Identifier>,
    pub expiration: Option<u32>,
    pub priority: Option<u8>,
}

impl DecodedFrame {
    /// Expects a complete frame
    pub fn deser(buf: &mut impl Buf) -> Result<DecodedFrame, ApnsError> {
        let command = buf.checked_get_u8()?;
        match command {
            COMMAND_SIMPLE => {
                let token = get_u16_prefixed(buf)?;
                let payload = get_u16_prefixed(buf)?;
                Ok(DecodedFrame { command, token, payload, identifier: None, expiration: None, priority: None })
            }
            COMMAND_ENHANCED => {
                let identifier = Identifier::from_raw(buf.checked_get_u32()?);
                let expiration = buf.checked_get_u32()?;
                let token = get_u16_prefixed(buf)?;
                let payload = get_u16_prefixed(buf)?;
                Ok(DecodedFrame { command, token, payload, identifier: Some(identifier), expiration: Some(expiration), priority: None })
            }
            COMMAND_ITEM_BASED => {
                let frame_len: usize = buf.checked_get_u32()?.safe_cast();
                let mut items = buf.checked_get_bytes(frame_len)?;
                Self::deser_items(&mut items)
            }
            other => Err(ApnsError::MalformedFrame(format!("unknown command {}", other))),
        }
    }

    fn deser_items(items: &mut Bytes) -> Result<DecodedFrame, ApnsError> {
        let mut token = None;
        let mut payload = None;
        let mut identifier = None;
        let mut expiration = None;
        let mut priority = None;

        while items.has_remaining() {
            let item_id = items.checked_get_u8()?;
            let value = get_u16_prefixed(items)?;
            match item_id {
                ITEM_TOKEN => token = Some(value),
                ITEM_PAYLOAD => payload = Some(value),
                ITEM_IDENTIFIER => identifier = Some(Identifier::from_raw(fixed_u32(item_id, value)?)),
                ITEM_EXPIRATION => expiration = Some(fixed_u32(item_id, value)?),
                ITEM_PRIORITY => {
                    if value.len() != 1 {
                        return Err(ApnsError::MalformedFrame(format!("priority item of length {}", value.len())));
                    }
                    priority = Some(value[0]);
                }
                other => return Err(ApnsError::MalformedFrame(format!("unknown item id {}", other))),
            }
        }

        Ok(DecodedFrame {
            command: COMMAND_ITEM_BASED,
            token: token.ok_or_else(|| ApnsError::MalformedFrame("frame without device token".to_string()))?,
            payload: payload.ok_or_else(|| ApnsError::MalformedFrame("frame without payload".to_string()))?,
            identifier,
            expiration,
            priority,
        })
    }
}

fn get_u16_prefixed(buf: &mut impl Buf) -> Result<Bytes, ApnsError> {
    let len: usize = buf.checked_get_u16()?.safe_cast();
    buf.checked_get_bytes(len)
}

fn fixed_u32(item_id: u8, mut value: Bytes) -> Result<u32, ApnsError> {
    if value.len() != 4 {
        return Err(ApnsError::MalformedFrame(format!("item {} has length {}, expected 4", item_id, value.len())));
    }
    Ok(value.get_u32())
}

/// Incremental decoder for the provider-to-APNs direction, accepting frames of all three
///  commands as they arrive in arbitrary chunks.
#[derive(Debug, Default)]
pub struct FrameCodec {}

impl FrameCodec {
    /// Number of bytes the frame at the start of `buf` occupies, if enough of its header is
    ///  present to tell
    fn frame_len(buf: &[u8]) -> Result<Option<usize>, ApnsError> {
        let Some(&command) = buf.first() else {
            return Ok(None);
        };

        let len = match command {
            COMMAND_SIMPLE => {
                let Some(token_len) = peek_u16(buf, 1) else { return Ok(None) };
                let Some(payload_len) = peek_u16(buf, 3 + token_len) else { return Ok(None) };
                1 + 2 + token_len + 2 + payload_len
            }
            COMMAND_ENHANCED => {
                let Some(token_len) = peek_u16(buf, 9) else { return Ok(None) };
                let Some(payload_len) = peek_u16(buf, 11 + token_len) else { return Ok(None) };
                1 + 4 + 4 + 2 + token_len + 2 + payload_len
            }
            COMMAND_ITEM_BASED => {
                let Some(raw) = buf.get(1..5) else { return Ok(None) };
                let frame_len: usize = u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]).safe_cast();
                if frame_len > MAX_ITEM_FRAME_LEN {
                    return Err(ApnsError::MalformedFrame(format!("frame length {} exceeds {}", frame_len, MAX_ITEM_FRAME_LEN)));
                }
                1 + 4 + frame_len
            }
            other => return Err(ApnsError::MalformedFrame(format!("unknown command {}", other))),
        };
        Ok(Some(len))
    }
}

fn peek_u16(buf: &[u8], offset: usize) -> Option<usize> {
    buf.get(offset..offset + 2)
        .map(|raw| u16::from_be_bytes([raw[0], raw[1]]).safe_cast())
}

impl Decoder for FrameCodec {
    type Item = DecodedFrame;
    type Error = ApnsError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<DecodedFrame>, ApnsError> {
        let Some(len) = Self::frame_len(src)? else {
            return Ok(None);
        };
        if src.len() < len {
            src.reserve(len - src.len());
            return Ok(None);
        }

        let mut frame = src.split_to(len).freeze();
        DecodedFrame::deser(&mut frame).map(Some)
    }
}
