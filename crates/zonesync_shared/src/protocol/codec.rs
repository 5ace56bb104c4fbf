//! # Message Codec
//!
//! Byte-level encoding for the three message shapes.
//!
//! ## Design
//!
//! - Mini and small frames are fixed-size `Pod` structs, cast straight to bytes
//! - Entity-info messages go through a growable writer and a bounds-checked reader
//! - Every length prefix is checked against the remaining buffer before use
//!
//! ## Entity-Info Layout
//!
//! ```text
//! [1 byte:  tag 0x10]
//! [4 bytes: template id]
//! [4 bytes: parent zone id]
//! [4 bytes: associated player id, 0 = none]
//! [4 bytes: network id]
//! [2 bytes: name length]   [N bytes: name, utf-8]
//! [2 bytes: path length]   [N bytes: parent path, utf-8]
//! [4 bytes: payload length][N bytes: payload]
//! ```

use bytemuck::{Pod, Zeroable};

use crate::constants::{MAX_STRING_LEN, MINI_MESSAGE_LEN, SMALL_MESSAGE_LEN};
use crate::error::{CodecError, CodecResult};
use crate::ids::NO_PLAYER;

use super::message::{EntityInfo, MessageShape, MessageType};

/// Mini frame: tag + one u32.
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
#[repr(C)]
struct MiniFrame {
    tag: u8,
    value: [u8; 4],
}

/// Small frame: tag + two u32.
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
#[repr(C)]
struct SmallFrame {
    tag: u8,
    first: [u8; 4],
    second: [u8; 4],
}

/// Encodes a mini message.
#[must_use]
pub fn encode_mini(message_type: MessageType, value: u32) -> [u8; MINI_MESSAGE_LEN] {
    bytemuck::cast(MiniFrame {
        tag: message_type as u8,
        value: value.to_le_bytes(),
    })
}

/// Decodes the value of a mini message.
pub fn decode_mini(bytes: &[u8]) -> CodecResult<u32> {
    check_len(bytes, MINI_MESSAGE_LEN)?;
    let frame: MiniFrame = bytemuck::try_pod_read_unaligned(bytes).map_err(|_| {
        CodecError::Truncated {
            offset: 0,
            needed: MINI_MESSAGE_LEN,
            available: bytes.len(),
        }
    })?;
    check_shape(frame.tag, MessageShape::Mini)?;
    Ok(u32::from_le_bytes(frame.value))
}

/// Encodes a small message.
#[must_use]
pub fn encode_small(message_type: MessageType, first: u32, second: u32) -> [u8; SMALL_MESSAGE_LEN] {
    bytemuck::cast(SmallFrame {
        tag: message_type as u8,
        first: first.to_le_bytes(),
        second: second.to_le_bytes(),
    })
}

/// Decodes both values of a small message.
pub fn decode_small(bytes: &[u8]) -> CodecResult<(u32, u32)> {
    check_len(bytes, SMALL_MESSAGE_LEN)?;
    let frame: SmallFrame = bytemuck::try_pod_read_unaligned(bytes).map_err(|_| {
        CodecError::Truncated {
            offset: 0,
            needed: SMALL_MESSAGE_LEN,
            available: bytes.len(),
        }
    })?;
    check_shape(frame.tag, MessageShape::Small)?;
    Ok((
        u32::from_le_bytes(frame.first),
        u32::from_le_bytes(frame.second),
    ))
}

/// Encodes a `CREATE_ENTITY_REQUEST` carrying `info`.
pub fn encode_entity_info(info: &EntityInfo) -> CodecResult<Vec<u8>> {
    let mut writer = MessageWriter::with_capacity(
        1 + 16 + 2 + info.name.len() + 2 + info.parent_path.len() + 4 + info.payload.len(),
    );
    writer.write_u8(MessageType::CreateEntityRequest as u8);
    writer.write_u32(info.template_id);
    writer.write_u32(info.parent_zone);
    writer.write_u32(info.associated_player.unwrap_or(NO_PLAYER));
    writer.write_u32(info.network_id);
    writer.write_str16("name", &info.name)?;
    writer.write_str16("parent_path", &info.parent_path)?;
    writer.write_bytes32("payload", &info.payload)?;
    Ok(writer.into_inner())
}

/// Decodes a `CREATE_ENTITY_REQUEST` body.
pub fn decode_entity_info(bytes: &[u8]) -> CodecResult<EntityInfo> {
    let mut reader = MessageReader::new(bytes);
    let tag = reader.read_u8()?;
    check_shape(tag, MessageShape::EntityInfo)?;

    let template_id = reader.read_u32()?;
    let parent_zone = reader.read_u32()?;
    let associated = reader.read_u32()?;
    let network_id = reader.read_u32()?;
    let name = reader.read_str16("name")?;
    let parent_path = reader.read_str16("parent_path")?;
    let payload = reader.read_bytes32()?.to_vec();
    reader.finish()?;

    Ok(EntityInfo {
        template_id,
        name,
        parent_path,
        parent_zone,
        network_id,
        associated_player: (associated != NO_PLAYER).then_some(associated),
        payload,
    })
}

fn check_shape(tag: u8, expected: MessageShape) -> CodecResult<()> {
    let message_type = MessageType::from_u8(tag).ok_or(CodecError::UnknownMessageType(tag))?;
    if message_type.shape() == expected {
        Ok(())
    } else {
        Err(CodecError::WrongShape {
            tag,
            expected: match expected {
                MessageShape::Mini => "mini",
                MessageShape::Small => "small",
                MessageShape::EntityInfo => "entity-info",
            },
        })
    }
}

fn check_len(bytes: &[u8], len: usize) -> CodecResult<()> {
    if bytes.is_empty() {
        return Err(CodecError::Empty);
    }
    if bytes.len() < len {
        return Err(CodecError::Truncated {
            offset: 1,
            needed: len - 1,
            available: bytes.len() - 1,
        });
    }
    if bytes.len() > len {
        return Err(CodecError::TrailingBytes(bytes.len() - len));
    }
    Ok(())
}

/// Growable little-endian writer for variable-size messages.
#[derive(Debug, Default)]
pub struct MessageWriter {
    buffer: Vec<u8>,
}

impl MessageWriter {
    /// Creates a writer with room for `capacity` bytes.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity),
        }
    }

    /// Returns the number of bytes written.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Returns true if no bytes have been written.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Writes a single byte.
    #[inline]
    pub fn write_u8(&mut self, value: u8) {
        self.buffer.push(value);
    }

    /// Writes a u16 in little-endian format.
    #[inline]
    pub fn write_u16(&mut self, value: u16) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Writes a u32 in little-endian format.
    #[inline]
    pub fn write_u32(&mut self, value: u32) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Writes a string with a u16 length prefix.
    pub fn write_str16(&mut self, field: &'static str, value: &str) -> CodecResult<()> {
        let len = u16::try_from(value.len()).map_err(|_| CodecError::FieldTooLong {
            field,
            len: value.len(),
            max: MAX_STRING_LEN,
        })?;
        self.write_u16(len);
        self.buffer.extend_from_slice(value.as_bytes());
        Ok(())
    }

    /// Writes a byte buffer with a u32 length prefix.
    pub fn write_bytes32(&mut self, field: &'static str, value: &[u8]) -> CodecResult<()> {
        let len = u32::try_from(value.len()).map_err(|_| CodecError::FieldTooLong {
            field,
            len: value.len(),
            max: u32::MAX as usize,
        })?;
        self.write_u32(len);
        self.buffer.extend_from_slice(value);
        Ok(())
    }

    /// Consumes the writer, returning the encoded bytes.
    #[must_use]
    pub fn into_inner(self) -> Vec<u8> {
        self.buffer
    }
}

/// Bounds-checked little-endian reader.
///
/// Every read verifies the remaining length first, so a lying length
/// prefix produces `CodecError::Truncated` instead of an out-of-bounds read.
pub struct MessageReader<'a> {
    buffer: &'a [u8],
    position: usize,
}

impl<'a> MessageReader<'a> {
    /// Creates a reader over `buffer`.
    #[must_use]
    pub const fn new(buffer: &'a [u8]) -> Self {
        Self { buffer, position: 0 }
    }

    /// Returns the number of bytes remaining.
    #[inline]
    #[must_use]
    pub const fn remaining(&self) -> usize {
        self.buffer.len().saturating_sub(self.position)
    }

    fn take(&mut self, len: usize) -> CodecResult<&'a [u8]> {
        if len > self.remaining() {
            return Err(CodecError::Truncated {
                offset: self.position,
                needed: len,
                available: self.remaining(),
            });
        }
        let slice = &self.buffer[self.position..self.position + len];
        self.position += len;
        Ok(slice)
    }

    /// Reads a single byte.
    pub fn read_u8(&mut self) -> CodecResult<u8> {
        if self.position == 0 && self.buffer.is_empty() {
            return Err(CodecError::Empty);
        }
        Ok(self.take(1)?[0])
    }

    /// Reads a u16 in little-endian format.
    pub fn read_u16(&mut self) -> CodecResult<u16> {
        let bytes = self.take(2)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    /// Reads a u32 in little-endian format.
    pub fn read_u32(&mut self) -> CodecResult<u32> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Reads a string with a u16 length prefix.
    pub fn read_str16(&mut self, field: &'static str) -> CodecResult<String> {
        let len = usize::from(self.read_u16()?);
        let bytes = self.take(len)?;
        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|_| CodecError::InvalidUtf8(field))
    }

    /// Reads a byte buffer with a u32 length prefix.
    pub fn read_bytes32(&mut self) -> CodecResult<&'a [u8]> {
        let len = self.read_u32()? as usize;
        self.take(len)
    }

    /// Fails if any bytes are left unread.
    pub fn finish(&self) -> CodecResult<()> {
        match self.remaining() {
            0 => Ok(()),
            extra => Err(CodecError::TrailingBytes(extra)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_info() -> EntityInfo {
        EntityInfo {
            template_id: 7,
            name: "lantern".to_string(),
            parent_path: "Props/Pier".to_string(),
            parent_zone: 5,
            network_id: 42,
            associated_player: Some(3),
            payload: vec![0xDE, 0xAD, 0xBE, 0xEF],
        }
    }

    #[test]
    fn test_mini_layout_is_little_endian() {
        let bytes = encode_mini(MessageType::AssignPlayerId, 0x0403_0201);
        assert_eq!(bytes, [0x01, 0x01, 0x02, 0x03, 0x04]);
        assert_eq!(decode_mini(&bytes).unwrap(), 0x0403_0201);
    }

    #[test]
    fn test_small_round_trip() {
        let bytes = encode_small(MessageType::PlayerEnteredZone, 5, u32::MAX);
        assert_eq!(bytes.len(), SMALL_MESSAGE_LEN);
        assert_eq!(decode_small(&bytes).unwrap(), (5, u32::MAX));
    }

    #[test]
    fn test_mini_rejects_truncated_and_trailing() {
        let bytes = encode_mini(MessageType::LoadZoneRequest, 5);
        assert!(matches!(
            decode_mini(&bytes[..3]),
            Err(CodecError::Truncated { .. })
        ));

        let mut long = bytes.to_vec();
        long.push(0);
        assert_eq!(decode_mini(&long), Err(CodecError::TrailingBytes(1)));
    }

    #[test]
    fn test_mini_rejects_small_tag() {
        let bytes = encode_small(MessageType::PlayerLeftZone, 1, 2);
        assert!(matches!(
            decode_mini(&bytes[..MINI_MESSAGE_LEN]),
            Err(CodecError::WrongShape { tag: 0x0B, .. })
        ));
    }

    #[test]
    fn test_entity_info_round_trip() {
        let info = sample_info();
        let bytes = encode_entity_info(&info).unwrap();
        assert_eq!(bytes[0], MessageType::CreateEntityRequest as u8);
        assert_eq!(decode_entity_info(&bytes).unwrap(), info);
    }

    #[test]
    fn test_entity_info_empty_fields() {
        let info = EntityInfo::new(1, 2);
        let bytes = encode_entity_info(&info).unwrap();
        // tag + 4 ids + two empty strings + empty payload
        assert_eq!(bytes.len(), 1 + 16 + 2 + 2 + 4);
        assert_eq!(decode_entity_info(&bytes).unwrap(), info);
    }

    #[test]
    fn test_entity_info_max_length_strings() {
        let info = EntityInfo::new(1, 2)
            .with_name("n".repeat(MAX_STRING_LEN))
            .with_parent_path("p".repeat(MAX_STRING_LEN));
        let bytes = encode_entity_info(&info).unwrap();
        assert_eq!(decode_entity_info(&bytes).unwrap(), info);
    }

    #[test]
    fn test_entity_info_rejects_oversized_name() {
        let info = EntityInfo::new(1, 2).with_name("n".repeat(MAX_STRING_LEN + 1));
        assert!(matches!(
            encode_entity_info(&info),
            Err(CodecError::FieldTooLong { field: "name", .. })
        ));
    }

    #[test]
    fn test_entity_info_lying_name_length() {
        let bytes = encode_entity_info(&sample_info()).unwrap();
        // Cut the message in the middle of the name: the prefix promises 7 bytes.
        let cut = 1 + 16 + 2 + 3;
        let result = decode_entity_info(&bytes[..cut]);
        assert_eq!(
            result,
            Err(CodecError::Truncated {
                offset: 19,
                needed: 7,
                available: 3,
            })
        );
    }

    #[test]
    fn test_entity_info_every_truncation_fails() {
        let bytes = encode_entity_info(&sample_info()).unwrap();
        for len in 0..bytes.len() {
            assert!(decode_entity_info(&bytes[..len]).is_err(), "length {len} decoded");
        }
    }

    #[test]
    fn test_entity_info_rejects_bad_utf8() {
        let mut bytes = encode_entity_info(&EntityInfo::new(1, 1).with_name("ab")).unwrap();
        bytes[19] = 0xFF;
        assert_eq!(
            decode_entity_info(&bytes),
            Err(CodecError::InvalidUtf8("name"))
        );
    }

    #[test]
    fn test_entity_info_unowned_encodes_zero() {
        let bytes = encode_entity_info(&EntityInfo::new(1, 1)).unwrap();
        assert_eq!(&bytes[9..13], &[0, 0, 0, 0]);
    }
}
