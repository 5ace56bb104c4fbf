//! # Transport Layer
//!
//! The connection-oriented message service the world runs on.
//!
//! ## Contract
//!
//! - One `send` is one message on the other side: no framing leaks through
//! - Messages on one connection arrive in send order on the reliable channel
//! - State transitions are reported through `run_callbacks`, never inline
//!
//! ```text
//!            accept()             peer closes / I/O fault
//! Connecting ────────> Connected ─────────────────────────> ClosedByPeer
//!                                                          ProblemDetectedLocally
//! ```
//!
//! Two implementations ship with the crate: [`LoopbackNetwork`] for
//! in-process tests and [`TcpTransport`] for real processes.

mod loopback;
mod tcp;

pub use loopback::{LoopbackNetwork, LoopbackTransport};
pub use tcp::{TcpTransport, DEFAULT_MAX_FRAME_LEN, DEFAULT_MAX_WRITE_BUFFER};

use crate::error::TransportResult;

/// Handle to one connection, local to the transport that issued it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u32);

/// Handle to a listening socket.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenSocket(pub u32);

/// Handle to a poll group.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PollGroup(pub u32);

/// State of a connection as reported in a [`StatusChange`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No connection.
    #[default]
    None,
    /// Handshake in progress; a server must `accept` it.
    Connecting,
    /// Fully connected.
    Connected,
    /// The remote end closed the connection.
    ClosedByPeer,
    /// This end detected a fault (timeout, I/O error, bad frame).
    ProblemDetectedLocally,
}

impl ConnectionState {
    /// Returns true for the two terminal states.
    #[inline]
    #[must_use]
    pub const fn is_lost(self) -> bool {
        matches!(self, Self::ClosedByPeer | Self::ProblemDetectedLocally)
    }
}

/// A connection changed state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StatusChange {
    /// Connection concerned.
    pub connection: ConnectionId,
    /// State before the change.
    pub old_state: ConnectionState,
    /// State after the change.
    pub state: ConnectionState,
    /// Listen socket the connection arrived on, for inbound connections.
    pub listen_socket: Option<ListenSocket>,
}

/// Delivery guarantee for a send.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum SendMode {
    /// Delivered once, in order.
    #[default]
    Reliable,
    /// May be lost or reordered.
    Unreliable,
}

/// One received message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IncomingMessage {
    /// Connection it arrived on.
    pub connection: ConnectionId,
    /// Message bytes.
    pub payload: Vec<u8>,
}

/// Transport statistics.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TransportStats {
    /// Messages sent.
    pub messages_sent: u64,
    /// Messages received.
    pub messages_received: u64,
    /// Payload bytes sent.
    pub bytes_sent: u64,
    /// Payload bytes received.
    pub bytes_received: u64,
}

/// Connection-oriented message transport.
///
/// All methods take `&self`: the world's loop thread drives receives and
/// callbacks while the application thread may send.
pub trait Transport: Send + Sync {
    /// Starts listening on `port`.
    fn listen(&self, port: u16) -> TransportResult<ListenSocket>;

    /// Stops listening. Existing connections are unaffected.
    fn close_listen_socket(&self, socket: ListenSocket);

    /// Creates a poll group for batched receives.
    fn create_poll_group(&self) -> TransportResult<PollGroup>;

    /// Destroys a poll group. Its connections stay open.
    fn destroy_poll_group(&self, group: PollGroup);

    /// Opens a connection to `address:port`.
    fn connect(&self, address: &str, port: u16) -> TransportResult<ConnectionId>;

    /// Accepts an inbound connection in the `Connecting` state.
    fn accept(&self, connection: ConnectionId) -> TransportResult<()>;

    /// Routes the connection's messages into `group`.
    fn set_poll_group(&self, connection: ConnectionId, group: PollGroup) -> TransportResult<()>;

    /// Closes the connection. Returns false if the handle was already gone.
    fn close(&self, connection: ConnectionId) -> bool;

    /// Sends one message.
    fn send(&self, connection: ConnectionId, payload: &[u8], mode: SendMode)
        -> TransportResult<()>;

    /// Takes up to `max` messages from any connection in `group`.
    fn receive_on_poll_group(
        &self,
        group: PollGroup,
        max: usize,
    ) -> TransportResult<Vec<IncomingMessage>>;

    /// Takes up to `max` messages from one connection.
    fn receive_on_connection(
        &self,
        connection: ConnectionId,
        max: usize,
    ) -> TransportResult<Vec<IncomingMessage>>;

    /// Returns the state changes observed since the last call.
    fn run_callbacks(&self) -> Vec<StatusChange>;
}
