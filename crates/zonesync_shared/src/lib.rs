//! # Zonesync Shared
//!
//! Identifiers and the binary wire protocol spoken between a zonesync
//! server and its clients.
//!
//! ## Wire Format
//!
//! One transport message carries exactly one protocol message:
//!
//! ```text
//! ┌──────────┬──────────────────────────────────────────────┐
//! │ Tag (1)  │ Body (type specific)                         │
//! ├──────────┼──────────────────────────────────────────────┤
//! │ mini     │ u32                              (5 bytes)   │
//! │ small    │ u32 u32                          (9 bytes)   │
//! │ entity   │ 4 x u32, str16, str16, bytes32   (variable)  │
//! └──────────┴──────────────────────────────────────────────┘
//! ```
//!
//! All integers are little-endian.

#![deny(missing_docs)]
#![deny(unsafe_code)]

pub mod constants;
pub mod error;
pub mod ids;
pub mod protocol;

pub use constants::{
    CLIENT_POLL_BATCH, DEFAULT_PORT, MINI_MESSAGE_LEN, POLL_INTERVAL_MS, SERVER_POLL_BATCH,
    SMALL_MESSAGE_LEN,
};
pub use error::{CodecError, CodecResult};
pub use ids::{NetworkId, PlayerId, TemplateId, ZoneId, NO_PLAYER};
pub use protocol::{
    decode_entity_info, decode_mini, decode_small, encode_entity_info, encode_mini, encode_small,
    EntityInfo, Message, MessageType,
};
