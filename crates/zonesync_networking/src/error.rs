//! # Networking Error Types

use thiserror::Error;
use zonesync_core::{RegistryError, ReplicaError};
use zonesync_shared::{CodecError, ZoneId};

use crate::transport::ConnectionId;

/// Errors reported by a [`Transport`](crate::transport::Transport).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Something is already listening on the port.
    #[error("port {0} is already in use")]
    AddressInUse(u16),

    /// Nobody accepted the connection attempt.
    #[error("connection to {address}:{port} refused")]
    ConnectionRefused {
        /// Target host.
        address: String,
        /// Target port.
        port: u16,
    },

    /// The handle does not name a live connection of this endpoint.
    #[error("invalid connection {0:?}")]
    InvalidConnection(ConnectionId),

    /// The connection exists but is not in a state that allows the call.
    #[error("connection {0:?} is not connected")]
    NotConnected(ConnectionId),

    /// The poll group handle is unknown.
    #[error("invalid poll group")]
    InvalidPollGroup,

    /// A frame exceeded the transport's size limit.
    #[error("frame of {len} bytes exceeds limit of {max}")]
    FrameTooLarge {
        /// Frame size.
        len: usize,
        /// Limit.
        max: usize,
    },

    /// The peer stopped reading and the outbound buffer is full.
    #[error("send buffer of connection {0:?} is full")]
    SendBufferFull(ConnectionId),

    /// Operating system I/O failure.
    #[error("i/o error: {0}")]
    Io(String),
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// Errors returned by [`World`](crate::world::World) operations and handlers.
#[derive(Error, Debug)]
pub enum WorldError {
    /// A role is already running.
    #[error("world is already running as {0}")]
    AlreadyRunning(&'static str),

    /// The call needs the server role.
    #[error("world is not running as a server")]
    NotServer,

    /// The call is only valid for clients and the world is a server.
    #[error("operation is not available to a server")]
    ServerRole,

    /// The call needs a live client connection.
    #[error("world is not connected")]
    NotConnected,

    /// The client's connection went away.
    #[error("connection to the server was lost")]
    ConnectionLost,

    /// The zone id is not in the catalog.
    #[error("unknown zone {0}")]
    UnknownZone(ZoneId),

    /// No zone in the catalog has this name.
    #[error("unknown zone `{0}`")]
    UnknownZoneName(String),

    /// The configuration is invalid.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The loop thread could not be started.
    #[error("failed to spawn loop thread: {0}")]
    Spawn(String),

    /// The server's command queue is closed.
    #[error("server loop is not accepting commands")]
    CommandQueueClosed,

    /// Transport failure.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Message encoding failure.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// Replica state rejected the operation.
    #[error(transparent)]
    Replica(#[from] ReplicaError),

    /// Catalog failure.
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Result type for world operations.
pub type WorldResult<T> = Result<T, WorldError>;
