//! # Zonesync Networking
//!
//! Zone-scoped world replication between one authoritative server and
//! its clients.
//!
//! ## Architecture
//!
//! ```text
//!  application thread                 loop thread (one per role)
//! ┌───────────────────┐  commands   ┌──────────────────────────────┐
//! │ World             │ ──────────> │ ServerLoop / ClientLoop      │
//! │  start_server     │             │  receive batch -> handlers   │
//! │  join_as_client   │  events     │  run_callbacks -> lifecycle  │
//! │  drain_events     │ <────────── │  sleep poll_interval         │
//! └───────────────────┘             └──────────────┬───────────────┘
//!                                                  │
//!                                        ┌─────────▼─────────┐
//!                                        │ Transport (trait) │
//!                                        │ loopback │ tcp    │
//!                                        └───────────────────┘
//! ```
//!
//! Scene mutations are never made from the loop thread: entity attachment
//! is queued on the [`zonesync_core::SceneHost`] and runs when the
//! application drains it.

#![deny(missing_docs)]
#![deny(unsafe_code)]

pub mod config;
pub mod error;
pub mod events;
pub mod session;
pub mod transport;
pub mod world;

pub use config::WorldConfig;
pub use error::{TransportError, TransportResult, WorldError, WorldResult};
pub use events::{EventBus, EventSender, WorldEvent};
pub use session::PlayerSession;
pub use transport::{
    ConnectionId, ConnectionState, LoopbackNetwork, LoopbackTransport, SendMode, TcpTransport,
    Transport,
};
pub use world::{ClientState, ServerState, World};
