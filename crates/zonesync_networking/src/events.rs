//! # Application Events
//!
//! Notifications raised on the network thread and consumed on the
//! application's own thread.
//!
//! ```text
//! ┌──────────────┐   bounded channel   ┌──────────────────┐
//! │  loop thread │────────────────────>│ World::drain_    │
//! │  (handlers)  │    WorldEvent       │ events (app tick)│
//! └──────────────┘                     └──────────────────┘
//! ```
//!
//! The loop never blocks on a full queue. Events that do not fit are
//! dropped and logged.

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use zonesync_shared::{NetworkId, PlayerId, TemplateId, ZoneId};

/// Something the embedding application may want to react to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WorldEvent {
    // =========================================================================
    // Client side
    // =========================================================================
    /// The server assigned this client its player id.
    JoinedWorld {
        /// Our player id.
        player_id: PlayerId,
    },
    /// Every entity of the zone has been created locally.
    ZoneLoaded {
        /// Zone that finished loading.
        zone_id: ZoneId,
    },
    /// The zone could not be loaded.
    ZoneLoadDenied {
        /// Zone that was refused.
        zone_id: ZoneId,
    },
    /// The server refused an entity spawn.
    EntityCreateDenied {
        /// Zone named in the request.
        zone_id: ZoneId,
        /// Template named in the request.
        template_id: TemplateId,
    },
    /// The server accepted our spawn under this id.
    EntitySpawnConfirmed {
        /// Assigned network id.
        network_id: NetworkId,
    },
    /// The connection to the server is gone.
    Disconnected,

    // =========================================================================
    // Both sides
    // =========================================================================
    /// An entity now exists in the local replica.
    EntityCreated {
        /// Entity id.
        network_id: NetworkId,
        /// Zone it lives in.
        zone_id: ZoneId,
    },
    /// A player entered a zone.
    PlayerEnteredZone {
        /// Zone entered.
        zone_id: ZoneId,
        /// Player.
        player_id: PlayerId,
    },
    /// A player left a zone.
    PlayerLeftZone {
        /// Zone left.
        zone_id: ZoneId,
        /// Player.
        player_id: PlayerId,
    },

    // =========================================================================
    // Server side
    // =========================================================================
    /// A player connected and was assigned an id.
    PlayerConnected {
        /// New player id.
        player_id: PlayerId,
    },
    /// A player's connection closed and its id was released.
    PlayerDisconnected {
        /// Released player id.
        player_id: PlayerId,
    },
}

/// Bounded event queue.
pub struct EventBus {
    sender: Sender<WorldEvent>,
    receiver: Receiver<WorldEvent>,
}

impl EventBus {
    /// Creates a bus holding at most `capacity` undrained events.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = bounded(capacity);
        Self { sender, receiver }
    }

    /// Creates a sender handle.
    #[must_use]
    pub fn sender(&self) -> EventSender {
        EventSender {
            sender: self.sender.clone(),
        }
    }

    /// Takes every pending event.
    pub fn drain(&self) -> Vec<WorldEvent> {
        self.receiver.try_iter().collect()
    }

    /// Number of pending events.
    #[inline]
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.receiver.len()
    }
}

/// Handle for raising events from a loop thread.
#[derive(Clone)]
pub struct EventSender {
    sender: Sender<WorldEvent>,
}

impl EventSender {
    /// Queues an event without blocking.
    ///
    /// Returns `false` if the event was dropped.
    pub fn send(&self, event: WorldEvent) -> bool {
        match self.sender.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(event)) => {
                tracing::warn!(?event, "event queue full, dropping event");
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }
}
