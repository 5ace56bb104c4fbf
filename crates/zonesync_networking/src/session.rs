//! # Player Session
//!
//! Server-side bookkeeping for one connected player.
//!
//! ## Pending-Ack Queue
//!
//! ```text
//! load_entity(e1) ──> [e1]        ── CREATE_ENTITY_REQUEST(e1) ──> client
//! load_entity(e2) ──> [e1, e2]    ── CREATE_ENTITY_REQUEST(e2) ──> client
//! confirm_entity(e1)  [e2]        <── CREATE_ENTITY_ACKNOWLEDGE(e1)
//! confirm_entity(e1)  [e2]        (duplicate, ignored)
//! ```
//!
//! Every id in the queue belongs to the zone the player is currently in;
//! moving zones clears it.

use std::collections::VecDeque;

use zonesync_shared::{encode_entity_info, EntityInfo, NetworkId, PlayerId, ZoneId};

use crate::error::WorldResult;
use crate::transport::{ConnectionId, SendMode, Transport};

/// One connected player.
#[derive(Clone, Debug)]
pub struct PlayerSession {
    player_id: PlayerId,
    connection: ConnectionId,
    zone_load_complete: bool,
    current_zone: Option<ZoneId>,
    associated_entities: Vec<NetworkId>,
    pending_acks: VecDeque<NetworkId>,
}

impl PlayerSession {
    /// Creates a session with no zone.
    #[must_use]
    pub fn new(player_id: PlayerId, connection: ConnectionId) -> Self {
        Self {
            player_id,
            connection,
            zone_load_complete: false,
            current_zone: None,
            associated_entities: Vec::new(),
            pending_acks: VecDeque::new(),
        }
    }

    /// Player id.
    #[inline]
    #[must_use]
    pub const fn player_id(&self) -> PlayerId {
        self.player_id
    }

    /// Connection the player is reached through.
    #[inline]
    #[must_use]
    pub const fn connection(&self) -> ConnectionId {
        self.connection
    }

    /// Zone the player is loaded into, if any.
    #[inline]
    #[must_use]
    pub const fn current_zone(&self) -> Option<ZoneId> {
        self.current_zone
    }

    /// True once `LOAD_ZONE_COMPLETE` has been sent for the current zone.
    #[inline]
    #[must_use]
    pub const fn zone_load_complete(&self) -> bool {
        self.zone_load_complete
    }

    /// Entities owned by this player, in creation order.
    #[must_use]
    pub fn associated_entities(&self) -> &[NetworkId] {
        &self.associated_entities
    }

    /// Network ids sent to this player and not yet acknowledged.
    #[must_use]
    pub fn pending_acks(&self) -> &VecDeque<NetworkId> {
        &self.pending_acks
    }

    /// Sends the player a `CREATE_ENTITY_REQUEST` for `info` and waits for its ack.
    pub fn load_entity(&mut self, info: &EntityInfo, transport: &dyn Transport) -> WorldResult<()> {
        let bytes = encode_entity_info(info)?;
        transport.send(self.connection, &bytes, SendMode::Reliable)?;
        self.pending_acks.push_back(info.network_id);
        tracing::debug!(
            player_id = self.player_id,
            network_id = info.network_id,
            pending = self.pending_acks.len(),
            "entity sent to player"
        );
        Ok(())
    }

    /// Clears `network_id` from the pending queue. Returns false for
    /// unknown or duplicate confirmations.
    pub fn confirm_entity(&mut self, network_id: NetworkId) -> bool {
        match self.pending_acks.iter().position(|&id| id == network_id) {
            Some(index) => {
                self.pending_acks.remove(index);
                true
            }
            None => false,
        }
    }

    /// Records an entity as owned by this player.
    pub fn add_associated_entity(&mut self, network_id: NetworkId) {
        self.associated_entities.push(network_id);
    }

    /// Moves the session into `zone_id`, returning the zone it left.
    pub fn enter_zone(&mut self, zone_id: ZoneId) -> Option<ZoneId> {
        let previous = self.leave_zone();
        self.current_zone = Some(zone_id);
        previous
    }

    /// Clears the zone reference and everything tied to it.
    pub fn leave_zone(&mut self) -> Option<ZoneId> {
        self.pending_acks.clear();
        self.zone_load_complete = false;
        self.current_zone.take()
    }

    /// Marks the current zone as fully loaded.
    pub fn mark_zone_loaded(&mut self) {
        self.zone_load_complete = true;
    }
}
