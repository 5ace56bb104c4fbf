//! # TCP Transport
//!
//! Non-blocking TCP with length-prefixed frames.
//!
//! ## Frame Format
//!
//! ```text
//! [4 bytes: payload length, little-endian][N bytes: payload]
//! ```
//!
//! TCP is already reliable and ordered, so both send modes map onto the
//! same stream. Socket I/O happens inside `receive_*` and `run_callbacks`;
//! nothing here blocks except `connect`.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, TcpListener, TcpStream};

use parking_lot::Mutex;

use super::{
    ConnectionId, ConnectionState, IncomingMessage, ListenSocket, PollGroup, SendMode,
    StatusChange, Transport, TransportStats,
};
use crate::error::{TransportError, TransportResult};

/// Largest payload accepted in one frame unless configured otherwise.
pub const DEFAULT_MAX_FRAME_LEN: usize = 1 << 20;

/// Outbound bytes a connection may hold unsent before it is faulted.
pub const DEFAULT_MAX_WRITE_BUFFER: usize = 8 << 20;

/// Length prefix size.
const PREFIX_LEN: usize = 4;

/// Read chunk size.
const READ_CHUNK: usize = 4096;

/// Outcome of servicing one stream.
enum Pump {
    Open,
    Closed,
    Fault(String),
}

struct TcpLink {
    stream: TcpStream,
    state: ConnectionState,
    listen_socket: Option<ListenSocket>,
    poll_group: Option<PollGroup>,
    read_buf: Vec<u8>,
    write_buf: Vec<u8>,
    inbox: VecDeque<Vec<u8>>,
}

impl TcpLink {
    fn new(stream: TcpStream, state: ConnectionState, listen_socket: Option<ListenSocket>) -> Self {
        Self {
            stream,
            state,
            listen_socket,
            poll_group: None,
            read_buf: Vec::new(),
            write_buf: Vec::new(),
            inbox: VecDeque::new(),
        }
    }

    /// Writes as much of the outbound buffer as the socket takes.
    fn flush(&mut self) -> std::io::Result<()> {
        while !self.write_buf.is_empty() {
            match self.stream.write(&self.write_buf) {
                Ok(0) => return Err(ErrorKind::WriteZero.into()),
                Ok(n) => {
                    self.write_buf.drain(..n);
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Reads everything available and splits it into frames.
    fn pump(&mut self, max_frame_len: usize, stats: &mut TransportStats) -> Pump {
        if let Err(e) = self.flush() {
            return Pump::Fault(e.to_string());
        }

        let mut chunk = [0u8; READ_CHUNK];
        let mut closed = false;
        loop {
            match self.stream.read(&mut chunk) {
                Ok(0) => {
                    closed = true;
                    break;
                }
                Ok(n) => self.read_buf.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => return Pump::Fault(e.to_string()),
            }
        }

        let before = self.inbox.len();
        if let Err(len) = split_frames(&mut self.read_buf, &mut self.inbox, max_frame_len) {
            return Pump::Fault(format!("frame of {len} bytes exceeds limit"));
        }
        for frame in self.inbox.iter().skip(before) {
            stats.messages_received += 1;
            stats.bytes_received += frame.len() as u64;
        }

        if closed {
            Pump::Closed
        } else {
            Pump::Open
        }
    }
}

/// Moves every complete frame from `buffer` into `inbox`.
///
/// Returns the offending length if a prefix exceeds `max_frame_len`.
fn split_frames(
    buffer: &mut Vec<u8>,
    inbox: &mut VecDeque<Vec<u8>>,
    max_frame_len: usize,
) -> Result<(), usize> {
    let mut offset = 0;
    while buffer.len() - offset >= PREFIX_LEN {
        let prefix = [
            buffer[offset],
            buffer[offset + 1],
            buffer[offset + 2],
            buffer[offset + 3],
        ];
        let len = u32::from_le_bytes(prefix) as usize;
        if len > max_frame_len {
            return Err(len);
        }
        let end = offset + PREFIX_LEN + len;
        if buffer.len() < end {
            break;
        }
        inbox.push_back(buffer[offset + PREFIX_LEN..end].to_vec());
        offset = end;
    }
    buffer.drain(..offset);
    Ok(())
}

#[derive(Default)]
struct TcpState {
    next_handle: u32,
    listeners: BTreeMap<u32, TcpListener>,
    groups: HashSet<PollGroup>,
    links: BTreeMap<ConnectionId, TcpLink>,
    pending: Vec<StatusChange>,
    stats: TransportStats,
}

impl TcpState {
    fn next_handle(&mut self) -> u32 {
        self.next_handle += 1;
        self.next_handle
    }

    fn set_state(&mut self, connection: ConnectionId, state: ConnectionState) {
        if let Some(link) = self.links.get_mut(&connection) {
            self.pending.push(StatusChange {
                connection,
                old_state: link.state,
                state,
                listen_socket: link.listen_socket,
            });
            link.state = state;
        }
    }

    /// Accepts new sockets and services every connected stream.
    fn pump(&mut self, max_frame_len: usize) {
        let mut accepted = Vec::new();
        for (&socket, listener) in &self.listeners {
            loop {
                match listener.accept() {
                    Ok((stream, peer)) => {
                        if let Err(e) = configure(&stream) {
                            tracing::warn!(%peer, error = %e, "dropping inbound socket");
                            continue;
                        }
                        accepted.push((ListenSocket(socket), stream));
                    }
                    Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                    Err(e) => {
                        tracing::warn!(error = %e, "accept failed");
                        break;
                    }
                }
            }
        }
        for (socket, stream) in accepted {
            let connection = ConnectionId(self.next_handle());
            self.links.insert(
                connection,
                TcpLink::new(stream, ConnectionState::None, Some(socket)),
            );
            self.set_state(connection, ConnectionState::Connecting);
        }

        let mut lost = Vec::new();
        for (&connection, link) in &mut self.links {
            if link.state != ConnectionState::Connected {
                continue;
            }
            match link.pump(max_frame_len, &mut self.stats) {
                Pump::Open => {}
                Pump::Closed => lost.push((connection, ConnectionState::ClosedByPeer)),
                Pump::Fault(reason) => {
                    tracing::debug!(?connection, %reason, "stream fault");
                    lost.push((connection, ConnectionState::ProblemDetectedLocally));
                }
            }
        }
        for (connection, state) in lost {
            self.set_state(connection, state);
        }
    }
}

fn configure(stream: &TcpStream) -> std::io::Result<()> {
    stream.set_nonblocking(true)?;
    stream.set_nodelay(true)
}

/// TCP implementation of [`Transport`].
pub struct TcpTransport {
    state: Mutex<TcpState>,
    max_frame_len: usize,
    max_write_buffer: usize,
}

impl TcpTransport {
    /// Creates a transport with the default frame limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_frame_len(DEFAULT_MAX_FRAME_LEN)
    }

    /// Creates a transport rejecting frames larger than `max_frame_len`.
    #[must_use]
    pub fn with_max_frame_len(max_frame_len: usize) -> Self {
        Self::with_limits(max_frame_len, DEFAULT_MAX_WRITE_BUFFER)
    }

    /// Creates a transport with explicit limits.
    ///
    /// A connection whose unsent bytes would exceed `max_write_buffer` is
    /// moved to `ProblemDetectedLocally`: the peer has stopped reading.
    #[must_use]
    pub fn with_limits(max_frame_len: usize, max_write_buffer: usize) -> Self {
        Self {
            state: Mutex::new(TcpState::default()),
            max_frame_len,
            max_write_buffer,
        }
    }

    /// Port a listen socket is bound to. Useful after listening on port 0.
    #[must_use]
    pub fn local_port(&self, socket: ListenSocket) -> Option<u16> {
        self.state
            .lock()
            .listeners
            .get(&socket.0)
            .and_then(|listener| listener.local_addr().ok())
            .map(|addr| addr.port())
    }

    /// Counters since creation.
    #[must_use]
    pub fn stats(&self) -> TransportStats {
        self.state.lock().stats
    }
}

impl Default for TcpTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for TcpTransport {
    fn listen(&self, port: u16) -> TransportResult<ListenSocket> {
        let listener = TcpListener::bind(("0.0.0.0", port)).map_err(|e| match e.kind() {
            ErrorKind::AddrInUse => TransportError::AddressInUse(port),
            _ => TransportError::from(e),
        })?;
        listener.set_nonblocking(true)?;

        let mut state = self.state.lock();
        let handle = state.next_handle();
        state.listeners.insert(handle, listener);
        tracing::info!(port, "listening");
        Ok(ListenSocket(handle))
    }

    fn close_listen_socket(&self, socket: ListenSocket) {
        self.state.lock().listeners.remove(&socket.0);
    }

    fn create_poll_group(&self) -> TransportResult<PollGroup> {
        let mut state = self.state.lock();
        let group = PollGroup(state.next_handle());
        state.groups.insert(group);
        Ok(group)
    }

    fn destroy_poll_group(&self, group: PollGroup) {
        let mut state = self.state.lock();
        if state.groups.remove(&group) {
            for link in state.links.values_mut() {
                if link.poll_group == Some(group) {
                    link.poll_group = None;
                }
            }
        }
    }

    fn connect(&self, address: &str, port: u16) -> TransportResult<ConnectionId> {
        let stream = TcpStream::connect((address, port)).map_err(|e| match e.kind() {
            ErrorKind::ConnectionRefused => TransportError::ConnectionRefused {
                address: address.to_string(),
                port,
            },
            _ => TransportError::from(e),
        })?;
        configure(&stream)?;

        let mut state = self.state.lock();
        let connection = ConnectionId(state.next_handle());
        state.links.insert(
            connection,
            TcpLink::new(stream, ConnectionState::Connecting, None),
        );
        state.set_state(connection, ConnectionState::Connected);
        Ok(connection)
    }

    fn accept(&self, connection: ConnectionId) -> TransportResult<()> {
        let mut state = self.state.lock();
        let link = state
            .links
            .get(&connection)
            .ok_or(TransportError::InvalidConnection(connection))?;
        if link.state != ConnectionState::Connecting {
            return Err(TransportError::NotConnected(connection));
        }
        state.set_state(connection, ConnectionState::Connected);
        Ok(())
    }

    fn set_poll_group(&self, connection: ConnectionId, group: PollGroup) -> TransportResult<()> {
        let mut state = self.state.lock();
        if !state.groups.contains(&group) {
            return Err(TransportError::InvalidPollGroup);
        }
        state
            .links
            .get_mut(&connection)
            .ok_or(TransportError::InvalidConnection(connection))?
            .poll_group = Some(group);
        Ok(())
    }

    fn close(&self, connection: ConnectionId) -> bool {
        let Some(mut link) = self.state.lock().links.remove(&connection) else {
            return false;
        };
        // Best effort: the socket is non-blocking, so unsent bytes may be lost.
        let _ = link.flush();
        let _ = link.stream.shutdown(Shutdown::Both);
        true
    }

    fn send(&self, connection: ConnectionId, payload: &[u8], _mode: SendMode) -> TransportResult<()> {
        if payload.len() > self.max_frame_len {
            return Err(TransportError::FrameTooLarge {
                len: payload.len(),
                max: self.max_frame_len,
            });
        }
        let len = u32::try_from(payload.len()).map_err(|_| TransportError::FrameTooLarge {
            len: payload.len(),
            max: self.max_frame_len,
        })?;

        let mut state = self.state.lock();
        let link = state
            .links
            .get_mut(&connection)
            .ok_or(TransportError::InvalidConnection(connection))?;
        if link.state != ConnectionState::Connected {
            return Err(TransportError::NotConnected(connection));
        }
        let flushed = link.flush();
        let buffered = link.write_buf.len() + PREFIX_LEN + payload.len();
        if flushed.is_ok() && buffered > self.max_write_buffer {
            tracing::warn!(?connection, buffered, "peer is not draining, dropping connection");
            state.set_state(connection, ConnectionState::ProblemDetectedLocally);
            return Err(TransportError::SendBufferFull(connection));
        }
        link.write_buf.extend_from_slice(&len.to_le_bytes());
        link.write_buf.extend_from_slice(payload);
        if let Err(e) = flushed.and_then(|()| link.flush()) {
            state.set_state(connection, ConnectionState::ProblemDetectedLocally);
            return Err(e.into());
        }
        state.stats.messages_sent += 1;
        state.stats.bytes_sent += payload.len() as u64;
        Ok(())
    }

    fn receive_on_poll_group(
        &self,
        group: PollGroup,
        max: usize,
    ) -> TransportResult<Vec<IncomingMessage>> {
        let mut state = self.state.lock();
        if !state.groups.contains(&group) {
            return Err(TransportError::InvalidPollGroup);
        }
        state.pump(self.max_frame_len);

        let mut messages = Vec::new();
        for (&connection, link) in &mut state.links {
            if link.poll_group != Some(group) {
                continue;
            }
            while messages.len() < max {
                let Some(payload) = link.inbox.pop_front() else {
                    break;
                };
                messages.push(IncomingMessage {
                    connection,
                    payload,
                });
            }
        }
        Ok(messages)
    }

    fn receive_on_connection(
        &self,
        connection: ConnectionId,
        max: usize,
    ) -> TransportResult<Vec<IncomingMessage>> {
        let mut state = self.state.lock();
        state.pump(self.max_frame_len);

        let link = state
            .links
            .get_mut(&connection)
            .ok_or(TransportError::InvalidConnection(connection))?;
        let take = max.min(link.inbox.len());
        let messages = link
            .inbox
            .drain(..take)
            .map(|payload| IncomingMessage {
                connection,
                payload,
            })
            .collect();
        Ok(messages)
    }

    fn run_callbacks(&self) -> Vec<StatusChange> {
        let mut state = self.state.lock();
        state.pump(self.max_frame_len);
        std::mem::take(&mut state.pending)
    }
}
