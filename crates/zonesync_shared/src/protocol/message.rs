//! # Message Definitions
//!
//! The tag space and the typed form of every message.

use crate::error::{CodecError, CodecResult};
use crate::ids::{NetworkId, PlayerId, TemplateId, ZoneId, NO_PLAYER};

use super::codec::{
    decode_entity_info, decode_mini, decode_small, encode_entity_info, encode_mini, encode_small,
};

/// Message type tag, the first byte of every message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    /// Server -> Client: your player identity.
    AssignPlayerId = 0x01,
    /// Client -> Server request, then Server -> Client directive to load a zone.
    LoadZoneRequest = 0x02,
    /// Server -> Client: the zone cannot be loaded.
    LoadZoneDeny = 0x03,
    /// Client -> Server: the zone is loaded locally.
    LoadZoneAcknowledge = 0x04,
    /// Server -> Client: every resident entity has been acknowledged.
    LoadZoneComplete = 0x05,
    /// Reserved.
    LoadEntityRequest = 0x06,
    /// Reserved.
    LoadEntityAcknowledge = 0x07,
    /// Server -> Client: another player joined your zone.
    PlayerEnteredZone = 0x0A,
    /// Server -> Client: another player left your zone.
    PlayerLeftZone = 0x0B,
    /// Bidirectional: spawn an entity.
    CreateEntityRequest = 0x10,
    /// Server -> Requester: the spawn was refused.
    CreateEntityDeny = 0x11,
    /// Client -> Server: the entity exists locally.
    CreateEntityAcknowledge = 0x12,
    /// Server -> Requester: the spawn was accepted under this network id.
    CreateEntityComplete = 0x13,
}

/// Body layout that follows a tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MessageShape {
    /// One u32.
    Mini,
    /// Two u32.
    Small,
    /// A full entity record.
    EntityInfo,
}

impl MessageType {
    /// Converts from the tag byte.
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Self::AssignPlayerId),
            0x02 => Some(Self::LoadZoneRequest),
            0x03 => Some(Self::LoadZoneDeny),
            0x04 => Some(Self::LoadZoneAcknowledge),
            0x05 => Some(Self::LoadZoneComplete),
            0x06 => Some(Self::LoadEntityRequest),
            0x07 => Some(Self::LoadEntityAcknowledge),
            0x0A => Some(Self::PlayerEnteredZone),
            0x0B => Some(Self::PlayerLeftZone),
            0x10 => Some(Self::CreateEntityRequest),
            0x11 => Some(Self::CreateEntityDeny),
            0x12 => Some(Self::CreateEntityAcknowledge),
            0x13 => Some(Self::CreateEntityComplete),
            _ => None,
        }
    }

    /// Body layout for this tag.
    #[must_use]
    pub const fn shape(self) -> MessageShape {
        match self {
            Self::PlayerEnteredZone | Self::PlayerLeftZone | Self::CreateEntityDeny => {
                MessageShape::Small
            }
            Self::CreateEntityRequest => MessageShape::EntityInfo,
            _ => MessageShape::Mini,
        }
    }

    /// Returns true for tags that have no handler on either side.
    #[must_use]
    pub const fn is_reserved(self) -> bool {
        matches!(self, Self::LoadEntityRequest | Self::LoadEntityAcknowledge)
    }
}

/// Replicated description of one entity instance.
///
/// This is the payload of `CREATE_ENTITY_REQUEST`. The network id is ignored
/// on the first hop (requester -> server) and authoritative afterwards.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EntityInfo {
    /// Which template to instantiate.
    pub template_id: TemplateId,
    /// Human readable instance name.
    pub name: String,
    /// Attach path relative to the zone root. Empty attaches at the root.
    pub parent_path: String,
    /// Zone the entity lives in.
    pub parent_zone: ZoneId,
    /// Server-assigned instance identity.
    pub network_id: NetworkId,
    /// Owning player, if any.
    pub associated_player: Option<PlayerId>,
    /// Opaque entity-specific state.
    pub payload: Vec<u8>,
}

impl EntityInfo {
    /// Creates an unowned, unnamed entity of `template_id` at the root of `parent_zone`.
    #[must_use]
    pub fn new(template_id: TemplateId, parent_zone: ZoneId) -> Self {
        Self {
            template_id,
            parent_zone,
            ..Self::default()
        }
    }

    /// Sets the instance name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sets the zone-relative attach path.
    #[must_use]
    pub fn with_parent_path(mut self, path: impl Into<String>) -> Self {
        self.parent_path = path.into();
        self
    }

    /// Associates the entity with a player. `NO_PLAYER` clears the owner.
    #[must_use]
    pub fn with_owner(mut self, player_id: PlayerId) -> Self {
        self.associated_player = (player_id != NO_PLAYER).then_some(player_id);
        self
    }

    /// Sets the opaque payload.
    #[must_use]
    pub fn with_payload(mut self, payload: impl Into<Vec<u8>>) -> Self {
        self.payload = payload.into();
        self
    }
}

/// A decoded protocol message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Message {
    /// New player identity.
    AssignPlayerId(PlayerId),
    /// Request (C->S) or directive (S->C) to load a zone.
    LoadZoneRequest(ZoneId),
    /// Zone load refused.
    LoadZoneDeny(ZoneId),
    /// Zone loaded on the client.
    LoadZoneAcknowledge(ZoneId),
    /// All resident entities acknowledged.
    LoadZoneComplete(ZoneId),
    /// Reserved.
    LoadEntityRequest(NetworkId),
    /// Reserved.
    LoadEntityAcknowledge(NetworkId),
    /// Presence: a player joined the zone.
    PlayerEnteredZone {
        /// Zone joined.
        zone_id: ZoneId,
        /// Player who joined.
        player_id: PlayerId,
    },
    /// Presence: a player left the zone.
    PlayerLeftZone {
        /// Zone left.
        zone_id: ZoneId,
        /// Player who left.
        player_id: PlayerId,
    },
    /// Spawn an entity.
    CreateEntityRequest(EntityInfo),
    /// Spawn refused.
    CreateEntityDeny {
        /// Zone named in the request.
        zone_id: ZoneId,
        /// Template named in the request.
        template_id: TemplateId,
    },
    /// Entity created on the client.
    CreateEntityAcknowledge(NetworkId),
    /// Spawn accepted under this network id.
    CreateEntityComplete(NetworkId),
}

impl Message {
    /// Tag of this message.
    #[must_use]
    pub const fn message_type(&self) -> MessageType {
        match self {
            Self::AssignPlayerId(_) => MessageType::AssignPlayerId,
            Self::LoadZoneRequest(_) => MessageType::LoadZoneRequest,
            Self::LoadZoneDeny(_) => MessageType::LoadZoneDeny,
            Self::LoadZoneAcknowledge(_) => MessageType::LoadZoneAcknowledge,
            Self::LoadZoneComplete(_) => MessageType::LoadZoneComplete,
            Self::LoadEntityRequest(_) => MessageType::LoadEntityRequest,
            Self::LoadEntityAcknowledge(_) => MessageType::LoadEntityAcknowledge,
            Self::PlayerEnteredZone { .. } => MessageType::PlayerEnteredZone,
            Self::PlayerLeftZone { .. } => MessageType::PlayerLeftZone,
            Self::CreateEntityRequest(_) => MessageType::CreateEntityRequest,
            Self::CreateEntityDeny { .. } => MessageType::CreateEntityDeny,
            Self::CreateEntityAcknowledge(_) => MessageType::CreateEntityAcknowledge,
            Self::CreateEntityComplete(_) => MessageType::CreateEntityComplete,
        }
    }

    /// Encodes the message into a fresh buffer.
    ///
    /// Only entity-info messages can fail, when a string or the payload
    /// outgrows its length prefix.
    pub fn encode(&self) -> CodecResult<Vec<u8>> {
        let tag = self.message_type();
        let bytes = match self {
            Self::AssignPlayerId(value)
            | Self::LoadZoneRequest(value)
            | Self::LoadZoneDeny(value)
            | Self::LoadZoneAcknowledge(value)
            | Self::LoadZoneComplete(value)
            | Self::LoadEntityRequest(value)
            | Self::LoadEntityAcknowledge(value)
            | Self::CreateEntityAcknowledge(value)
            | Self::CreateEntityComplete(value) => encode_mini(tag, *value).to_vec(),
            Self::PlayerEnteredZone { zone_id, player_id }
            | Self::PlayerLeftZone { zone_id, player_id } => {
                encode_small(tag, *zone_id, *player_id).to_vec()
            }
            Self::CreateEntityDeny { zone_id, template_id } => {
                encode_small(tag, *zone_id, *template_id).to_vec()
            }
            Self::CreateEntityRequest(info) => encode_entity_info(info)?,
        };
        Ok(bytes)
    }

    /// Decodes one message, validating its tag and exact length.
    pub fn decode(bytes: &[u8]) -> CodecResult<Self> {
        let tag = *bytes.first().ok_or(CodecError::Empty)?;
        let message_type = MessageType::from_u8(tag).ok_or(CodecError::UnknownMessageType(tag))?;

        let message = match message_type.shape() {
            MessageShape::Mini => {
                let value = decode_mini(bytes)?;
                match message_type {
                    MessageType::AssignPlayerId => Self::AssignPlayerId(value),
                    MessageType::LoadZoneRequest => Self::LoadZoneRequest(value),
                    MessageType::LoadZoneDeny => Self::LoadZoneDeny(value),
                    MessageType::LoadZoneAcknowledge => Self::LoadZoneAcknowledge(value),
                    MessageType::LoadZoneComplete => Self::LoadZoneComplete(value),
                    MessageType::LoadEntityRequest => Self::LoadEntityRequest(value),
                    MessageType::LoadEntityAcknowledge => Self::LoadEntityAcknowledge(value),
                    MessageType::CreateEntityAcknowledge => Self::CreateEntityAcknowledge(value),
                    _ => Self::CreateEntityComplete(value),
                }
            }
            MessageShape::Small => {
                let (first, second) = decode_small(bytes)?;
                match message_type {
                    MessageType::PlayerEnteredZone => Self::PlayerEnteredZone {
                        zone_id: first,
                        player_id: second,
                    },
                    MessageType::PlayerLeftZone => Self::PlayerLeftZone {
                        zone_id: first,
                        player_id: second,
                    },
                    _ => Self::CreateEntityDeny {
                        zone_id: first,
                        template_id: second,
                    },
                }
            }
            MessageShape::EntityInfo => Self::CreateEntityRequest(decode_entity_info(bytes)?),
        };

        Ok(message)
    }
}
