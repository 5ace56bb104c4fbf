//! # Client Role
//!
//! Mirrors the server's zones locally and answers its handshakes.

use std::collections::HashSet;
use std::sync::Arc;

use crossbeam_channel::Receiver;
use parking_lot::Mutex;
use zonesync_core::{ReplicaError, ReplicaState};
use zonesync_shared::{EntityInfo, Message, PlayerId, ZoneId};

use super::Context;
use crate::config::WorldConfig;
use crate::error::{WorldError, WorldResult};
use crate::events::{EventSender, WorldEvent};
use crate::transport::{ConnectionId, Transport};

/// What a client knows about the world.
pub struct ClientState {
    connection: ConnectionId,
    player_id: Option<PlayerId>,
    current_zone: Option<ZoneId>,
    zone_load_complete: bool,
    known_players: HashSet<PlayerId>,
    replica: ReplicaState,
    connected: bool,
}

impl ClientState {
    pub(crate) fn new(connection: ConnectionId, replica: ReplicaState) -> Self {
        Self {
            connection,
            player_id: None,
            current_zone: None,
            zone_load_complete: false,
            known_players: HashSet::new(),
            replica,
            connected: true,
        }
    }

    /// Id assigned by the server.
    #[inline]
    #[must_use]
    pub const fn player_id(&self) -> Option<PlayerId> {
        self.player_id
    }

    /// Zone most recently loaded at the server's request.
    #[inline]
    #[must_use]
    pub const fn current_zone(&self) -> Option<ZoneId> {
        self.current_zone
    }

    /// True once the server reported the current zone fully synced.
    #[inline]
    #[must_use]
    pub const fn zone_load_complete(&self) -> bool {
        self.zone_load_complete
    }

    /// Returns true for the local player and players announced in the current zone.
    #[must_use]
    pub fn player_exists(&self, player_id: PlayerId) -> bool {
        self.known_players.contains(&player_id)
    }

    /// Local mirror of zones and entities.
    #[must_use]
    pub fn replica(&self) -> &ReplicaState {
        &self.replica
    }

    /// False once the connection to the server is gone.
    #[inline]
    #[must_use]
    pub const fn is_connected(&self) -> bool {
        self.connected
    }

    pub(crate) fn handle_message(&mut self, ctx: &Context<'_>, payload: &[u8]) {
        let message = match Message::decode(payload) {
            Ok(message) => message,
            Err(err) => {
                tracing::warn!(%err, "malformed message from server dropped");
                return;
            }
        };

        tracing::debug!(message_type = ?message.message_type(), "message received");
        match message {
            Message::AssignPlayerId(player_id) => {
                self.player_id = Some(player_id);
                self.known_players.insert(player_id);
                tracing::info!(player_id, "joined world");
                ctx.emit(WorldEvent::JoinedWorld { player_id });
            }
            Message::LoadZoneRequest(zone_id) => self.load_zone(ctx, zone_id),
            Message::LoadZoneDeny(zone_id) => {
                tracing::warn!(zone_id, "zone load denied by server");
                ctx.emit(WorldEvent::ZoneLoadDenied { zone_id });
            }
            Message::LoadZoneComplete(zone_id) => {
                if self.current_zone == Some(zone_id) {
                    self.zone_load_complete = true;
                }
                tracing::info!(zone_id, "zone loaded");
                ctx.emit(WorldEvent::ZoneLoaded { zone_id });
            }
            Message::CreateEntityRequest(info) => self.create_entity(ctx, info),
            Message::CreateEntityDeny {
                zone_id,
                template_id,
            } => {
                tracing::warn!(zone_id, template_id, "entity creation denied by server");
                ctx.emit(WorldEvent::EntityCreateDenied {
                    zone_id,
                    template_id,
                });
            }
            Message::CreateEntityComplete(network_id) => {
                ctx.emit(WorldEvent::EntitySpawnConfirmed { network_id });
            }
            Message::PlayerEnteredZone { zone_id, player_id } => {
                self.known_players.insert(player_id);
                ctx.emit(WorldEvent::PlayerEnteredZone { zone_id, player_id });
            }
            Message::PlayerLeftZone { zone_id, player_id } => {
                if Some(player_id) != self.player_id {
                    self.known_players.remove(&player_id);
                }
                ctx.emit(WorldEvent::PlayerLeftZone { zone_id, player_id });
            }
            Message::LoadEntityRequest(_) | Message::LoadEntityAcknowledge(_) => {
                tracing::debug!("reserved message type ignored");
            }
            other => {
                tracing::warn!(message_type = ?other.message_type(), "unexpected message from server");
            }
        }
    }

    fn load_zone(&mut self, ctx: &Context<'_>, zone_id: ZoneId) {
        if let Err(err) = self.replica.instantiate_zone(zone_id) {
            tracing::warn!(zone_id, %err, "cannot load zone locally");
            ctx.emit(WorldEvent::ZoneLoadDenied { zone_id });
            return;
        }

        self.current_zone = Some(zone_id);
        self.zone_load_complete = false;
        self.known_players.clear();
        self.known_players.extend(self.player_id);

        if let Err(err) = ctx.send(self.connection, &Message::LoadZoneAcknowledge(zone_id)) {
            tracing::warn!(zone_id, %err, "zone acknowledgment failed");
        }
    }

    fn create_entity(&mut self, ctx: &Context<'_>, info: EntityInfo) {
        let network_id = info.network_id;
        let zone_id = info.parent_zone;
        match self.replica.create_entity(info) {
            Ok(_) => ctx.emit(WorldEvent::EntityCreated { network_id, zone_id }),
            // Already mirrored; the server is waiting on the ack regardless.
            Err(ReplicaError::DuplicateNetworkId(_)) => {
                tracing::debug!(network_id, "entity already mirrored");
            }
            Err(err) => {
                tracing::warn!(network_id, zone_id, %err, "cannot mirror entity");
                return;
            }
        }
        if let Err(err) = ctx.send(self.connection, &Message::CreateEntityAcknowledge(network_id)) {
            tracing::warn!(network_id, %err, "entity acknowledgment failed");
        }
    }
}

/// The client's loop body.
pub(crate) struct ClientLoop {
    state: Arc<Mutex<ClientState>>,
    transport: Arc<dyn Transport>,
    events: EventSender,
    connection: ConnectionId,
    batch: usize,
}

impl ClientLoop {
    pub(crate) fn new(
        state: Arc<Mutex<ClientState>>,
        transport: Arc<dyn Transport>,
        events: EventSender,
        connection: ConnectionId,
        config: &WorldConfig,
    ) -> Self {
        Self {
            state,
            transport,
            events,
            connection,
            batch: config.client_poll_batch,
        }
    }

    /// One iteration. Fails with [`WorldError::ConnectionLost`] once the
    /// server is gone.
    pub(crate) fn pump(&self, stop: &Receiver<()>) -> WorldResult<()> {
        let ctx = Context {
            transport: &*self.transport,
            events: &self.events,
        };

        while stop.is_empty() {
            let batch = self
                .transport
                .receive_on_connection(self.connection, self.batch)?;
            if batch.is_empty() {
                break;
            }
            let mut state = self.state.lock();
            for incoming in &batch {
                state.handle_message(&ctx, &incoming.payload);
            }
        }

        for change in self.transport.run_callbacks() {
            if change.connection == self.connection && change.state.is_lost() {
                tracing::warn!(state = ?change.state, "connection to server lost");
                return Err(WorldError::ConnectionLost);
            }
        }
        Ok(())
    }

    /// Tears down after the server went away.
    pub(crate) fn lose_connection(&self) {
        let was_connected = {
            let mut state = self.state.lock();
            std::mem::replace(&mut state.connected, false)
        };
        self.transport.close(self.connection);
        if was_connected {
            tracing::info!("disconnected from server");
            self.events.send(WorldEvent::Disconnected);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventBus;
    use crate::transport::{LoopbackNetwork, LoopbackTransport, PollGroup, SendMode};
    use crossbeam_channel::{bounded, Sender};
    use zonesync_core::{Catalog, MockSceneHost, ZoneDescriptor};

    const HARBOR: ZoneId = 5;
    const CRATE: zonesync_shared::TemplateId = 1;

    /// A hand-driven server endpoint.
    struct FakeServer {
        transport: LoopbackTransport,
        group: PollGroup,
        connection: ConnectionId,
    }

    impl FakeServer {
        fn send(&self, message: &Message) {
            let bytes = message.encode().unwrap();
            self.transport
                .send(self.connection, &bytes, SendMode::Reliable)
                .unwrap();
        }

        fn recv(&self) -> Vec<Message> {
            self.transport
                .receive_on_poll_group(self.group, 64)
                .unwrap()
                .iter()
                .map(|incoming| Message::decode(&incoming.payload).unwrap())
                .collect()
        }
    }

    struct Harness {
        server: FakeServer,
        scene: Arc<MockSceneHost>,
        state: Arc<Mutex<ClientState>>,
        client: ClientLoop,
        events: EventBus,
        stop: Receiver<()>,
        _stop_tx: Sender<()>,
    }

    impl Harness {
        fn new() -> Self {
            let mut catalog = Catalog::new();
            catalog
                .register_zone(ZoneDescriptor::new(HARBOR, "harbor", "zones/harbor"))
                .unwrap();
            catalog
                .register_entity_template(CRATE, "crate", "props/crate")
                .unwrap();

            let network = LoopbackNetwork::new();
            let server_transport = network.endpoint();
            server_transport.listen(7777).unwrap();
            let group = server_transport.create_poll_group().unwrap();

            let client_transport = Arc::new(network.endpoint());
            let connection = client_transport.connect("127.0.0.1", 7777).unwrap();
            let server_connection = server_transport.run_callbacks()[0].connection;
            server_transport.accept(server_connection).unwrap();
            server_transport
                .set_poll_group(server_connection, group)
                .unwrap();
            client_transport.run_callbacks();

            let scene = Arc::new(MockSceneHost::new());
            let replica = ReplicaState::new(Arc::new(catalog), Arc::clone(&scene) as _);
            let state = Arc::new(Mutex::new(ClientState::new(connection, replica)));
            let events = EventBus::new(64);
            let client = ClientLoop::new(
                Arc::clone(&state),
                client_transport,
                events.sender(),
                connection,
                &WorldConfig::default(),
            );
            let (stop_tx, stop) = bounded(1);

            Self {
                server: FakeServer {
                    transport: server_transport,
                    group,
                    connection: server_connection,
                },
                scene,
                state,
                client,
                events,
                stop,
                _stop_tx: stop_tx,
            }
        }

        fn pump(&self) -> WorldResult<()> {
            self.client.pump(&self.stop)
        }
    }

    #[test]
    fn test_assignment_and_zone_load() {
        let harness = Harness::new();
        harness.server.send(&Message::AssignPlayerId(4));
        harness.server.send(&Message::LoadZoneRequest(HARBOR));
        harness.pump().unwrap();

        assert_eq!(
            harness.server.recv(),
            vec![Message::LoadZoneAcknowledge(HARBOR)]
        );
        {
            let state = harness.state.lock();
            assert_eq!(state.player_id(), Some(4));
            assert!(state.player_exists(4));
            assert_eq!(state.current_zone(), Some(HARBOR));
            assert!(!state.zone_load_complete());
            assert!(state.replica().is_instantiated(HARBOR));
        }

        harness.server.send(&Message::LoadZoneComplete(HARBOR));
        harness.pump().unwrap();
        assert!(harness.state.lock().zone_load_complete());
        assert_eq!(
            harness.events.drain(),
            vec![
                WorldEvent::JoinedWorld { player_id: 4 },
                WorldEvent::ZoneLoaded { zone_id: HARBOR },
            ]
        );
    }

    #[test]
    fn test_unknown_zone_request_not_acknowledged() {
        let harness = Harness::new();
        harness.server.send(&Message::LoadZoneRequest(77));
        harness.pump().unwrap();

        assert!(harness.server.recv().is_empty());
        assert_eq!(
            harness.events.drain(),
            vec![WorldEvent::ZoneLoadDenied { zone_id: 77 }]
        );
    }

    #[test]
    fn test_entity_request_acknowledged_once_mirrored() {
        let harness = Harness::new();
        harness.server.send(&Message::LoadZoneRequest(HARBOR));
        harness.pump().unwrap();
        harness.server.recv();

        let info = EntityInfo {
            network_id: 12,
            ..EntityInfo::new(CRATE, HARBOR).with_name("crate")
        };
        harness
            .server
            .send(&Message::CreateEntityRequest(info.clone()));
        harness.server.send(&Message::CreateEntityRequest(info));
        harness.pump().unwrap();

        assert_eq!(
            harness.server.recv(),
            vec![
                Message::CreateEntityAcknowledge(12),
                Message::CreateEntityAcknowledge(12),
            ]
        );
        assert_eq!(harness.state.lock().replica().entity_count(), 1);
        assert_eq!(harness.scene.pending_tasks(), 1);
        assert_eq!(
            harness.events.drain(),
            vec![WorldEvent::EntityCreated {
                network_id: 12,
                zone_id: HARBOR
            }]
        );
    }

    #[test]
    fn test_entity_in_unloaded_zone_not_acknowledged() {
        let harness = Harness::new();
        let info = EntityInfo {
            network_id: 3,
            ..EntityInfo::new(CRATE, HARBOR)
        };
        harness.server.send(&Message::CreateEntityRequest(info));
        harness.pump().unwrap();

        assert!(harness.server.recv().is_empty());
        assert_eq!(harness.state.lock().replica().entity_count(), 0);
    }

    #[test]
    fn test_presence_tracking() {
        let harness = Harness::new();
        harness.server.send(&Message::AssignPlayerId(1));
        harness.server.send(&Message::LoadZoneRequest(HARBOR));
        harness.server.send(&Message::PlayerEnteredZone {
            zone_id: HARBOR,
            player_id: 2,
        });
        harness.pump().unwrap();
        assert!(harness.state.lock().player_exists(2));

        harness.server.send(&Message::PlayerLeftZone {
            zone_id: HARBOR,
            player_id: 2,
        });
        harness.pump().unwrap();
        let state = harness.state.lock();
        assert!(!state.player_exists(2));
        assert!(state.player_exists(1));
    }

    #[test]
    fn test_malformed_and_unexpected_messages_dropped() {
        let harness = Harness::new();
        harness
            .server
            .transport
            .send(harness.server.connection, &[0xEE, 0x00], SendMode::Reliable)
            .unwrap();
        harness.server.send(&Message::LoadZoneAcknowledge(HARBOR));
        harness.server.send(&Message::AssignPlayerId(8));
        harness.pump().unwrap();

        assert_eq!(harness.state.lock().player_id(), Some(8));
        assert!(harness.server.recv().is_empty());
    }

    #[test]
    fn test_server_close_loses_connection() {
        let harness = Harness::new();
        harness.server.transport.close(harness.server.connection);

        assert!(matches!(harness.pump(), Err(WorldError::ConnectionLost)));
        harness.client.lose_connection();
        harness.client.lose_connection();

        assert!(!harness.state.lock().is_connected());
        assert_eq!(harness.events.drain(), vec![WorldEvent::Disconnected]);
    }
}
