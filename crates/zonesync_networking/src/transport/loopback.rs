//! # Loopback Transport
//!
//! An in-process network: every endpoint created from one
//! [`LoopbackNetwork`] can listen, connect and exchange messages with the
//! others without touching a socket. Delivery is immediate, ordered and
//! lossless for both send modes.
//!
//! ```text
//!          LoopbackNetwork (hub)
//!     ┌───────────────────────────────┐
//!     │ listeners: port -> endpoint   │
//!     │ links:     conn -> peer conn  │
//!     └───────┬───────────────┬───────┘
//!       endpoint A       endpoint B
//!       (server)         (client)
//! ```

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;

use super::{
    ConnectionId, ConnectionState, IncomingMessage, ListenSocket, PollGroup, SendMode,
    StatusChange, Transport,
};
use crate::error::{TransportError, TransportResult};

type EndpointId = u32;

/// One direction of a connection, owned by one endpoint.
struct Link {
    owner: EndpointId,
    peer: Option<ConnectionId>,
    state: ConnectionState,
    listen_socket: Option<ListenSocket>,
    poll_group: Option<PollGroup>,
    inbox: VecDeque<Vec<u8>>,
}

#[derive(Default)]
struct Hub {
    next_handle: u32,
    listeners: HashMap<u16, (EndpointId, ListenSocket)>,
    groups: HashMap<PollGroup, EndpointId>,
    links: BTreeMap<ConnectionId, Link>,
    callbacks: HashMap<EndpointId, Vec<StatusChange>>,
}

impl Hub {
    fn next_handle(&mut self) -> u32 {
        self.next_handle += 1;
        self.next_handle
    }

    fn notify(&mut self, owner: EndpointId, change: StatusChange) {
        self.callbacks.entry(owner).or_default().push(change);
    }

    /// Moves a link to `state` and reports it to its owner.
    fn transition(&mut self, connection: ConnectionId, state: ConnectionState) {
        let Some(link) = self.links.get_mut(&connection) else {
            return;
        };
        let change = StatusChange {
            connection,
            old_state: link.state,
            state,
            listen_socket: link.listen_socket,
        };
        link.state = state;
        if state.is_lost() {
            link.peer = None;
        }
        let owner = link.owner;
        self.notify(owner, change);
    }

    /// Faults `connection` locally and closes its peer.
    fn inject_problem(&mut self, connection: ConnectionId) -> bool {
        let Some(link) = self.links.get(&connection) else {
            return false;
        };
        if link.state.is_lost() {
            return false;
        }
        let peer = link.peer;
        self.transition(connection, ConnectionState::ProblemDetectedLocally);
        if let Some(peer) = peer {
            self.transition(peer, ConnectionState::ClosedByPeer);
        }
        true
    }

    fn owned_link(&mut self, owner: EndpointId, connection: ConnectionId) -> TransportResult<&mut Link> {
        self.links
            .get_mut(&connection)
            .filter(|link| link.owner == owner)
            .ok_or(TransportError::InvalidConnection(connection))
    }
}

/// Shared in-process network.
#[derive(Clone, Default)]
pub struct LoopbackNetwork {
    hub: Arc<Mutex<Hub>>,
}

impl LoopbackNetwork {
    /// Creates an empty network.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new endpoint on this network.
    #[must_use]
    pub fn endpoint(&self) -> LoopbackTransport {
        let id = self.hub.lock().next_handle();
        LoopbackTransport {
            hub: Arc::clone(&self.hub),
            id,
        }
    }

    /// Simulates a local fault on `connection`, whichever endpoint owns it.
    ///
    /// Returns false for unknown or already lost connections.
    pub fn inject_problem(&self, connection: ConnectionId) -> bool {
        self.hub.lock().inject_problem(connection)
    }
}

/// One endpoint of a [`LoopbackNetwork`].
pub struct LoopbackTransport {
    hub: Arc<Mutex<Hub>>,
    id: EndpointId,
}

impl LoopbackTransport {
    /// Simulates a local fault on `connection`: this end sees
    /// `ProblemDetectedLocally`, the peer sees `ClosedByPeer`.
    ///
    /// Returns false if the connection is not owned by this endpoint or is
    /// already lost.
    pub fn inject_problem(&self, connection: ConnectionId) -> bool {
        let mut hub = self.hub.lock();
        if hub.owned_link(self.id, connection).is_err() {
            return false;
        }
        hub.inject_problem(connection)
    }

    /// Number of live connections owned by this endpoint.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.hub
            .lock()
            .links
            .values()
            .filter(|link| link.owner == self.id)
            .count()
    }
}

impl Transport for LoopbackTransport {
    fn listen(&self, port: u16) -> TransportResult<ListenSocket> {
        let mut hub = self.hub.lock();
        if hub.listeners.contains_key(&port) {
            return Err(TransportError::AddressInUse(port));
        }
        let socket = ListenSocket(hub.next_handle());
        hub.listeners.insert(port, (self.id, socket));
        Ok(socket)
    }

    fn close_listen_socket(&self, socket: ListenSocket) {
        self.hub
            .lock()
            .listeners
            .retain(|_, &mut (owner, s)| !(owner == self.id && s == socket));
    }

    fn create_poll_group(&self) -> TransportResult<PollGroup> {
        let mut hub = self.hub.lock();
        let group = PollGroup(hub.next_handle());
        hub.groups.insert(group, self.id);
        Ok(group)
    }

    fn destroy_poll_group(&self, group: PollGroup) {
        let mut hub = self.hub.lock();
        if hub.groups.remove(&group).is_some() {
            for link in hub.links.values_mut() {
                if link.poll_group == Some(group) {
                    link.poll_group = None;
                }
            }
        }
    }

    fn connect(&self, address: &str, port: u16) -> TransportResult<ConnectionId> {
        let mut hub = self.hub.lock();
        let (server, socket) = *hub.listeners.get(&port).ok_or_else(|| {
            TransportError::ConnectionRefused {
                address: address.to_string(),
                port,
            }
        })?;

        let local = ConnectionId(hub.next_handle());
        let remote = ConnectionId(hub.next_handle());
        hub.links.insert(
            local,
            Link {
                owner: self.id,
                peer: Some(remote),
                state: ConnectionState::Connecting,
                listen_socket: None,
                poll_group: None,
                inbox: VecDeque::new(),
            },
        );
        hub.links.insert(
            remote,
            Link {
                owner: server,
                peer: Some(local),
                state: ConnectionState::None,
                listen_socket: Some(socket),
                poll_group: None,
                inbox: VecDeque::new(),
            },
        );
        hub.transition(remote, ConnectionState::Connecting);
        Ok(local)
    }

    fn accept(&self, connection: ConnectionId) -> TransportResult<()> {
        let mut hub = self.hub.lock();
        let link = hub.owned_link(self.id, connection)?;
        if link.state != ConnectionState::Connecting {
            return Err(TransportError::NotConnected(connection));
        }
        let peer = link.peer.ok_or(TransportError::NotConnected(connection))?;
        hub.transition(connection, ConnectionState::Connected);
        hub.transition(peer, ConnectionState::Connected);
        Ok(())
    }

    fn set_poll_group(&self, connection: ConnectionId, group: PollGroup) -> TransportResult<()> {
        let mut hub = self.hub.lock();
        if hub.groups.get(&group) != Some(&self.id) {
            return Err(TransportError::InvalidPollGroup);
        }
        hub.owned_link(self.id, connection)?.poll_group = Some(group);
        Ok(())
    }

    fn close(&self, connection: ConnectionId) -> bool {
        let mut hub = self.hub.lock();
        if hub.owned_link(self.id, connection).is_err() {
            return false;
        }
        let peer = hub.links.remove(&connection).and_then(|link| link.peer);
        if let Some(peer) = peer {
            let alive = hub
                .links
                .get(&peer)
                .is_some_and(|link| !link.state.is_lost());
            if alive {
                hub.transition(peer, ConnectionState::ClosedByPeer);
            }
        }
        true
    }

    fn send(&self, connection: ConnectionId, payload: &[u8], _mode: SendMode) -> TransportResult<()> {
        let mut hub = self.hub.lock();
        let link = hub.owned_link(self.id, connection)?;
        if link.state != ConnectionState::Connected {
            return Err(TransportError::NotConnected(connection));
        }
        let peer = link.peer.ok_or(TransportError::NotConnected(connection))?;
        let peer_link = hub
            .links
            .get_mut(&peer)
            .filter(|link| link.state == ConnectionState::Connected)
            .ok_or(TransportError::NotConnected(connection))?;
        peer_link.inbox.push_back(payload.to_vec());
        Ok(())
    }

    fn receive_on_poll_group(
        &self,
        group: PollGroup,
        max: usize,
    ) -> TransportResult<Vec<IncomingMessage>> {
        let mut hub = self.hub.lock();
        if hub.groups.get(&group) != Some(&self.id) {
            return Err(TransportError::InvalidPollGroup);
        }
        let mut messages = Vec::new();
        for (&connection, link) in &mut hub.links {
            if link.owner != self.id || link.poll_group != Some(group) {
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
        let mut hub = self.hub.lock();
        let link = hub.owned_link(self.id, connection)?;
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
        self.hub.lock().callbacks.remove(&self.id).unwrap_or_default()
    }
}
