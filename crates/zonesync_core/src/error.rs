//! # Core Error Types
//!
//! Catalog, scene and replica failures.

use thiserror::Error;
use zonesync_shared::{NetworkId, PlayerId, TemplateId, ZoneId};

/// Errors raised while building or querying the catalog.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// A zone with this id is already registered.
    #[error("zone {0} is already registered")]
    DuplicateZone(ZoneId),

    /// A template with this id is already registered.
    #[error("entity template {0} is already registered")]
    DuplicateTemplate(TemplateId),

    /// No zone with this id is registered.
    #[error("zone {0} is not registered")]
    UnknownZone(ZoneId),

    /// A catalog file could not be parsed.
    #[error("invalid catalog: {0}")]
    Parse(String),
}

/// Result type for catalog operations.
pub type RegistryResult<T> = Result<T, RegistryError>;

/// Errors reported by a scene host.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SceneError {
    /// The template reference could not be instantiated.
    #[error("cannot instantiate template `{0}`")]
    InstantiateFailed(String),
}

/// Errors raised while mutating the replica state.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReplicaError {
    /// The zone id does not resolve in the catalog.
    #[error("zone {0} is not in the catalog")]
    UnknownZone(ZoneId),

    /// The template id does not resolve in the catalog.
    #[error("entity template {0} is not in the catalog")]
    UnknownTemplate(TemplateId),

    /// The zone exists but has not been instantiated yet.
    #[error("zone {0} has not been instantiated")]
    ZoneNotInstantiated(ZoneId),

    /// An entity with this network id is already alive.
    #[error("network id {0} is already in use")]
    DuplicateNetworkId(NetworkId),

    /// The player is already resident in a zone.
    #[error("player {player_id} is already in zone {zone_id}")]
    PlayerAlreadyInZone {
        /// Player being added.
        player_id: PlayerId,
        /// Zone the player already occupies.
        zone_id: ZoneId,
    },

    /// The scene host refused the request.
    #[error(transparent)]
    Scene(#[from] SceneError),
}

/// Result type for replica operations.
pub type ReplicaResult<T> = Result<T, ReplicaError>;
