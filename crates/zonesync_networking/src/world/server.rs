//! # Server Role
//!
//! Authoritative state and message handlers.
//!
//! ## Connection Lifecycle
//!
//! ```text
//! Connecting ──accept + poll group──> Connected ──> ClosedByPeer / ProblemDetectedLocally
//!     │ accept failed: close               │ allocate id,       │ leave zone, release id,
//!     ▼                                    │ ASSIGN_PLAYER_ID   │ close connection
//!   closed                                 ▼                    ▼
//! ```
//!
//! ## Zone Join
//!
//! ```text
//! LOAD_ZONE_REQUEST(z)      ─> instantiate z, echo LOAD_ZONE_REQUEST(z)
//!                              (unknown zone: LOAD_ZONE_DENY(z))
//! LOAD_ZONE_ACKNOWLEDGE(z)  ─> leave old zone, join z, presence broadcast,
//!                              CREATE_ENTITY_REQUEST per resident entity
//! CREATE_ENTITY_ACKNOWLEDGE ─> confirm; queue empty: LOAD_ZONE_COMPLETE(z)
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use crossbeam_channel::Receiver;
use parking_lot::Mutex;
use zonesync_core::{IdAllocator, ReplicaState};
use zonesync_shared::{EntityInfo, Message, NetworkId, PlayerId, TemplateId, ZoneId};

use super::Context;
use crate::config::WorldConfig;
use crate::error::WorldResult;
use crate::events::{EventSender, WorldEvent};
use crate::session::PlayerSession;
use crate::transport::{
    ConnectionId, ConnectionState, IncomingMessage, PollGroup, StatusChange, Transport,
};

/// Work handed to the server loop from other threads.
pub(crate) enum ServerCommand {
    /// Run the entity-creation handshake for a server-originated entity.
    SpawnEntity(EntityInfo),
}

/// Everything the server knows.
pub struct ServerState {
    sessions_by_connection: HashMap<ConnectionId, PlayerId>,
    sessions: HashMap<PlayerId, PlayerSession>,
    player_ids: IdAllocator,
    network_ids: IdAllocator,
    replica: ReplicaState,
    malformed: HashMap<ConnectionId, u32>,
}

impl ServerState {
    pub(crate) fn new(replica: ReplicaState) -> Self {
        Self {
            sessions_by_connection: HashMap::new(),
            sessions: HashMap::new(),
            player_ids: IdAllocator::new(),
            network_ids: IdAllocator::new(),
            replica,
            malformed: HashMap::new(),
        }
    }

    /// Session of a connected player.
    #[must_use]
    pub fn session(&self, player_id: PlayerId) -> Option<&PlayerSession> {
        self.sessions.get(&player_id)
    }

    /// Player behind a connection.
    #[must_use]
    pub fn player_for_connection(&self, connection: ConnectionId) -> Option<PlayerId> {
        self.sessions_by_connection.get(&connection).copied()
    }

    /// Returns true if the player is connected.
    #[must_use]
    pub fn player_exists(&self, player_id: PlayerId) -> bool {
        self.sessions.contains_key(&player_id)
    }

    /// Number of connected players.
    #[must_use]
    pub fn player_count(&self) -> usize {
        self.sessions.len()
    }

    /// Authoritative zones and entities.
    #[must_use]
    pub fn replica(&self) -> &ReplicaState {
        &self.replica
    }

    /// Connections with a registered player.
    #[must_use]
    pub fn connections(&self) -> Vec<ConnectionId> {
        self.sessions_by_connection.keys().copied().collect()
    }

    fn connection_of(&self, player_id: PlayerId) -> Option<ConnectionId> {
        self.sessions.get(&player_id).map(PlayerSession::connection)
    }

    /// Sends `message` to every resident of `zone_id` except `except`.
    fn broadcast(&self, ctx: &Context<'_>, zone_id: ZoneId, except: PlayerId, message: &Message) {
        for &player_id in self.replica.players_in_zone(zone_id) {
            if player_id == except {
                continue;
            }
            if let Some(connection) = self.connection_of(player_id) {
                if let Err(err) = ctx.send(connection, message) {
                    tracing::warn!(player_id, %err, "broadcast send failed");
                }
            }
        }
    }

    // ========================================================================
    // CONNECTION STATUS
    // ========================================================================

    pub(crate) fn handle_status(&mut self, ctx: &Context<'_>, group: PollGroup, change: StatusChange) {
        match change.state {
            ConnectionState::Connecting if change.listen_socket.is_some() => {
                accept_connection(ctx, group, change.connection);
            }
            ConnectionState::Connected => self.player_connected(ctx, change.connection),
            state if state.is_lost() => {
                tracing::debug!(connection = ?change.connection, ?state, "connection lost");
                self.remove_player(ctx, change.connection);
            }
            _ => {}
        }
    }

    fn player_connected(&mut self, ctx: &Context<'_>, connection: ConnectionId) {
        if self.sessions_by_connection.contains_key(&connection) {
            return;
        }
        let player_id = self.player_ids.allocate();
        if let Err(err) = ctx.send(connection, &Message::AssignPlayerId(player_id)) {
            tracing::warn!(player_id, %err, "cannot assign player id, closing");
            self.player_ids.release(player_id);
            ctx.transport.close(connection);
            return;
        }

        self.sessions_by_connection.insert(connection, player_id);
        self.sessions
            .insert(player_id, PlayerSession::new(player_id, connection));
        tracing::info!(player_id, "player connected");
        ctx.emit(WorldEvent::PlayerConnected { player_id });
    }

    fn remove_player(&mut self, ctx: &Context<'_>, connection: ConnectionId) {
        self.malformed.remove(&connection);
        if let Some(player_id) = self.sessions_by_connection.remove(&connection) {
            if let Some(mut session) = self.sessions.remove(&player_id) {
                if let Some(zone_id) = session.leave_zone() {
                    self.replica.remove_player(zone_id, player_id);
                    self.broadcast(
                        ctx,
                        zone_id,
                        player_id,
                        &Message::PlayerLeftZone { zone_id, player_id },
                    );
                    ctx.emit(WorldEvent::PlayerLeftZone { zone_id, player_id });
                }
            }
            self.player_ids.release(player_id);
            tracing::info!(player_id, "player disconnected");
            ctx.emit(WorldEvent::PlayerDisconnected { player_id });
        }
        ctx.transport.close(connection);
    }

    // ========================================================================
    // MESSAGES
    // ========================================================================

    pub(crate) fn handle_message(
        &mut self,
        ctx: &Context<'_>,
        incoming: &IncomingMessage,
        malformed_limit: u32,
    ) {
        let connection = incoming.connection;
        let Some(&player_id) = self.sessions_by_connection.get(&connection) else {
            tracing::debug!(?connection, "message from unregistered connection dropped");
            return;
        };

        let message = match Message::decode(&incoming.payload) {
            Ok(message) => message,
            Err(err) => {
                let count = self.malformed.entry(connection).or_insert(0);
                *count += 1;
                tracing::warn!(player_id, %err, count = *count, "malformed message dropped");
                if *count >= malformed_limit {
                    tracing::warn!(player_id, "too many malformed messages, closing");
                    self.remove_player(ctx, connection);
                }
                return;
            }
        };

        tracing::debug!(player_id, message_type = ?message.message_type(), "message received");
        match message {
            Message::LoadZoneRequest(zone_id) => self.load_zone_request(ctx, player_id, zone_id),
            Message::LoadZoneAcknowledge(zone_id) => self.load_zone_ack(ctx, player_id, zone_id),
            Message::CreateEntityRequest(info) => {
                self.create_entity_request(ctx, Some(player_id), info);
            }
            Message::CreateEntityAcknowledge(network_id) => {
                self.create_entity_ack(ctx, player_id, network_id);
            }
            Message::LoadEntityRequest(_) | Message::LoadEntityAcknowledge(_) => {
                tracing::debug!(player_id, "reserved message type ignored");
            }
            other => {
                tracing::warn!(
                    player_id,
                    message_type = ?other.message_type(),
                    "unexpected message from client"
                );
            }
        }
    }

    fn load_zone_request(&mut self, ctx: &Context<'_>, player_id: PlayerId, zone_id: ZoneId) {
        let Some(connection) = self.connection_of(player_id) else {
            return;
        };
        let reply = match self.replica.instantiate_zone(zone_id) {
            Ok(_) => Message::LoadZoneRequest(zone_id),
            Err(err) => {
                tracing::warn!(player_id, zone_id, %err, "zone load denied");
                Message::LoadZoneDeny(zone_id)
            }
        };
        if let Err(err) = ctx.send(connection, &reply) {
            tracing::warn!(player_id, %err, "zone load reply failed");
        }
    }

    fn load_zone_ack(&mut self, ctx: &Context<'_>, player_id: PlayerId, zone_id: ZoneId) {
        let Some(session) = self.sessions.get_mut(&player_id) else {
            return;
        };
        let connection = session.connection();

        if !self.replica.is_instantiated(zone_id) {
            tracing::warn!(player_id, zone_id, "acknowledged a zone that was never loaded");
            if let Err(err) = ctx.send(connection, &Message::LoadZoneDeny(zone_id)) {
                tracing::warn!(player_id, %err, "zone deny failed");
            }
            return;
        }
        if session.current_zone() == Some(zone_id) {
            tracing::debug!(player_id, zone_id, "duplicate zone acknowledgment ignored");
            return;
        }

        if let Some(previous) = session.enter_zone(zone_id) {
            self.replica.remove_player(previous, player_id);
            self.broadcast(
                ctx,
                previous,
                player_id,
                &Message::PlayerLeftZone {
                    zone_id: previous,
                    player_id,
                },
            );
            ctx.emit(WorldEvent::PlayerLeftZone {
                zone_id: previous,
                player_id,
            });
        }
        if let Err(err) = self.replica.add_player(zone_id, player_id) {
            tracing::warn!(player_id, zone_id, %err, "cannot add player to zone");
            if let Some(session) = self.sessions.get_mut(&player_id) {
                session.leave_zone();
            }
            return;
        }
        tracing::info!(player_id, zone_id, "player entered zone");

        // Presence both ways: the newcomer learns the residents, the residents learn the newcomer.
        for &resident in self.replica.players_in_zone(zone_id) {
            if resident == player_id {
                continue;
            }
            let announce = Message::PlayerEnteredZone {
                zone_id,
                player_id: resident,
            };
            if let Err(err) = ctx.send(connection, &announce) {
                tracing::warn!(player_id, %err, "presence send failed");
            }
        }
        self.broadcast(
            ctx,
            zone_id,
            player_id,
            &Message::PlayerEnteredZone { zone_id, player_id },
        );
        ctx.emit(WorldEvent::PlayerEnteredZone { zone_id, player_id });

        let Self {
            sessions, replica, ..
        } = self;
        if let Some(session) = sessions.get_mut(&player_id) {
            for record in replica.entities_in_zone(zone_id) {
                if let Err(err) = session.load_entity(&record.info, ctx.transport) {
                    tracing::warn!(player_id, %err, "entity sync aborted");
                    break;
                }
            }
        }
        self.complete_zone_load(ctx, player_id);
    }

    /// Sends `LOAD_ZONE_COMPLETE` once the joining player's queue drains.
    fn complete_zone_load(&mut self, ctx: &Context<'_>, player_id: PlayerId) {
        let Some(session) = self.sessions.get_mut(&player_id) else {
            return;
        };
        if session.zone_load_complete() || !session.pending_acks().is_empty() {
            return;
        }
        let Some(zone_id) = session.current_zone() else {
            return;
        };
        session.mark_zone_loaded();
        if let Err(err) = ctx.send(session.connection(), &Message::LoadZoneComplete(zone_id)) {
            tracing::warn!(player_id, %err, "zone completion send failed");
        }
        tracing::debug!(player_id, zone_id, "zone load complete");
    }

    /// Runs the entity-creation handshake. `requester` is `None` for
    /// server-originated entities.
    pub(crate) fn create_entity_request(
        &mut self,
        ctx: &Context<'_>,
        requester: Option<PlayerId>,
        mut info: EntityInfo,
    ) -> Option<NetworkId> {
        let zone_id = info.parent_zone;
        let template_id = info.template_id;

        if let Some(owner) = info.associated_player {
            if !self.sessions.contains_key(&owner) {
                self.deny_entity(ctx, requester, zone_id, template_id, "unknown associated player");
                return None;
            }
        }
        if !self.replica.catalog().template_exists(template_id) {
            self.deny_entity(ctx, requester, zone_id, template_id, "unknown template");
            return None;
        }
        if let Err(err) = self.replica.instantiate_zone(zone_id) {
            self.deny_entity(ctx, requester, zone_id, template_id, &err.to_string());
            return None;
        }

        let network_id = self.network_ids.allocate();
        info.network_id = network_id;
        let info = match self.replica.create_entity(info) {
            Ok(record) => record.info.clone(),
            Err(err) => {
                self.network_ids.release(network_id);
                self.deny_entity(ctx, requester, zone_id, template_id, &err.to_string());
                return None;
            }
        };

        if let Some(owner) = info.associated_player {
            if let Some(session) = self.sessions.get_mut(&owner) {
                session.add_associated_entity(network_id);
            }
        }

        let Self {
            sessions, replica, ..
        } = self;
        for player_id in replica.players_in_zone(zone_id) {
            if let Some(session) = sessions.get_mut(player_id) {
                if let Err(err) = session.load_entity(&info, ctx.transport) {
                    tracing::warn!(player_id, network_id, %err, "entity fan-out failed");
                }
            }
        }

        if let Some(connection) = requester.and_then(|player_id| self.connection_of(player_id)) {
            if let Err(err) = ctx.send(connection, &Message::CreateEntityComplete(network_id)) {
                tracing::warn!(network_id, %err, "spawn confirmation failed");
            }
        }

        tracing::info!(network_id, template_id, zone_id, "entity created");
        ctx.emit(WorldEvent::EntityCreated { network_id, zone_id });
        Some(network_id)
    }

    fn deny_entity(
        &self,
        ctx: &Context<'_>,
        requester: Option<PlayerId>,
        zone_id: ZoneId,
        template_id: TemplateId,
        reason: &str,
    ) {
        tracing::warn!(?requester, zone_id, template_id, reason, "entity creation denied");
        match requester.and_then(|player_id| self.connection_of(player_id)) {
            Some(connection) => {
                let deny = Message::CreateEntityDeny {
                    zone_id,
                    template_id,
                };
                if let Err(err) = ctx.send(connection, &deny) {
                    tracing::warn!(%err, "entity deny send failed");
                }
            }
            None => ctx.emit(WorldEvent::EntityCreateDenied {
                zone_id,
                template_id,
            }),
        }
    }

    fn create_entity_ack(&mut self, ctx: &Context<'_>, player_id: PlayerId, network_id: NetworkId) {
        let Some(session) = self.sessions.get_mut(&player_id) else {
            return;
        };
        if !session.confirm_entity(network_id) {
            tracing::debug!(player_id, network_id, "duplicate or unknown acknowledgment ignored");
            return;
        }
        self.complete_zone_load(ctx, player_id);
    }
}

/// Accepts a pending connection into the server's poll group.
fn accept_connection(ctx: &Context<'_>, group: PollGroup, connection: ConnectionId) {
    if let Err(err) = ctx.transport.accept(connection) {
        tracing::warn!(?connection, %err, "accept failed, closing");
        ctx.transport.close(connection);
        return;
    }
    if let Err(err) = ctx.transport.set_poll_group(connection, group) {
        tracing::warn!(?connection, %err, "poll group assignment failed, closing");
        ctx.transport.close(connection);
    }
}

// ============================================================================
// LOOP
// ============================================================================

/// The server's loop body.
pub(crate) struct ServerLoop {
    state: Arc<Mutex<ServerState>>,
    transport: Arc<dyn Transport>,
    events: EventSender,
    commands: Receiver<ServerCommand>,
    poll_group: PollGroup,
    batch: usize,
    malformed_limit: u32,
}

impl ServerLoop {
    pub(crate) fn new(
        state: Arc<Mutex<ServerState>>,
        transport: Arc<dyn Transport>,
        events: EventSender,
        commands: Receiver<ServerCommand>,
        poll_group: PollGroup,
        config: &WorldConfig,
    ) -> Self {
        Self {
            state,
            transport,
            events,
            commands,
            poll_group,
            batch: config.server_poll_batch,
            malformed_limit: config.malformed_message_limit,
        }
    }

    /// One iteration: commands, message batches, then status callbacks.
    pub(crate) fn pump(&self, stop: &Receiver<()>) -> WorldResult<()> {
        let ctx = Context {
            transport: &*self.transport,
            events: &self.events,
        };

        for command in self.commands.try_iter() {
            match command {
                ServerCommand::SpawnEntity(info) => {
                    self.state.lock().create_entity_request(&ctx, None, info);
                }
            }
        }

        while stop.is_empty() {
            let batch = self
                .transport
                .receive_on_poll_group(self.poll_group, self.batch)?;
            if batch.is_empty() {
                break;
            }
            let mut state = self.state.lock();
            for incoming in &batch {
                state.handle_message(&ctx, incoming, self.malformed_limit);
            }
        }

        let changes = self.transport.run_callbacks();
        if !changes.is_empty() {
            let mut state = self.state.lock();
            for change in changes {
                state.handle_status(&ctx, self.poll_group, change);
            }
        }
        Ok(())
    }
}
