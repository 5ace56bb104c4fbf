//! # Wire Protocol
//!
//! Message tags, typed messages and their byte encoding.
//!
//! ## Handshakes
//!
//! ```text
//! CLIENT                                   SERVER
//!   |<-------- ASSIGN_PLAYER_ID(p) ----------|  on connect
//!   |--------- LOAD_ZONE_REQUEST(z) -------->|
//!   |<-------- LOAD_ZONE_REQUEST(z) ---------|  "load it locally"
//!   |--------- LOAD_ZONE_ACKNOWLEDGE(z) ---->|
//!   |<-------- CREATE_ENTITY_REQUEST(e) -----|  once per resident entity
//!   |--------- CREATE_ENTITY_ACKNOWLEDGE(n)->|
//!   |<-------- LOAD_ZONE_COMPLETE(z) --------|  pending-ack queue drained
//! ```

mod codec;
mod message;

pub use codec::{
    decode_entity_info, decode_mini, decode_small, encode_entity_info, encode_mini, encode_small,
    MessageReader, MessageWriter,
};
pub use message::{EntityInfo, Message, MessageShape, MessageType};
