//! # Replica State
//!
//! Arena of runtime zones and live entity records.
//!
//! ## Ownership
//!
//! ```text
//! ReplicaState
//! ├── zones:    ZoneId    -> Zone { instance, players: [PlayerId], entities: [NetworkId] }
//! └── entities: NetworkId -> EntityRecord { info, instance }
//! ```
//!
//! Zones and sessions refer to entities by network id only; the arena is
//! the single owner of every record. Both the server and the client keep
//! one of these, the server as ground truth and the client as its copy.

use std::collections::HashMap;
use std::sync::Arc;

use zonesync_shared::{EntityInfo, NetworkId, PlayerId, ZoneId};

use crate::catalog::Catalog;
use crate::error::{ReplicaError, ReplicaResult};
use crate::scene::{InstanceHandle, SceneHost};

/// Runtime state of one zone.
#[derive(Clone, Debug, Default)]
pub struct Zone {
    instance: Option<InstanceHandle>,
    players: Vec<PlayerId>,
    entities: Vec<NetworkId>,
}

impl Zone {
    /// Returns true once the scene host has built the zone.
    #[inline]
    #[must_use]
    pub const fn is_instantiated(&self) -> bool {
        self.instance.is_some()
    }

    /// Scene handle of the zone root.
    #[inline]
    #[must_use]
    pub const fn instance(&self) -> Option<InstanceHandle> {
        self.instance
    }

    /// Resident players, in arrival order.
    #[must_use]
    pub fn players(&self) -> &[PlayerId] {
        &self.players
    }

    /// Resident entities, in creation order.
    #[must_use]
    pub fn entities(&self) -> &[NetworkId] {
        &self.entities
    }
}

/// One live entity.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EntityRecord {
    /// Replicated description, carrying the authoritative network id.
    pub info: EntityInfo,
    /// Scene handle of the instance.
    pub instance: InstanceHandle,
}

/// Zones and entities known to one process.
pub struct ReplicaState {
    catalog: Arc<Catalog>,
    scene: Arc<dyn SceneHost>,
    zones: HashMap<ZoneId, Zone>,
    entities: HashMap<NetworkId, EntityRecord>,
}

impl ReplicaState {
    /// Creates an empty replica over `catalog`.
    #[must_use]
    pub fn new(catalog: Arc<Catalog>, scene: Arc<dyn SceneHost>) -> Self {
        Self {
            catalog,
            scene,
            zones: HashMap::new(),
            entities: HashMap::new(),
        }
    }

    /// The catalog this replica resolves ids against.
    #[must_use]
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Builds the zone through the scene host if it is not built yet.
    ///
    /// Returns the zone root handle either way.
    pub fn instantiate_zone(&mut self, zone_id: ZoneId) -> ReplicaResult<InstanceHandle> {
        if let Some(handle) = self.zones.get(&zone_id).and_then(Zone::instance) {
            return Ok(handle);
        }

        let descriptor = self
            .catalog
            .zone(zone_id)
            .ok_or(ReplicaError::UnknownZone(zone_id))?;
        let handle = self.scene.instantiate(&descriptor.template)?;
        tracing::info!(zone_id, name = %descriptor.name, "zone instantiated");

        self.zones.entry(zone_id).or_default().instance = Some(handle);
        Ok(handle)
    }

    /// Runtime zone, if it has been touched.
    #[must_use]
    pub fn zone(&self, zone_id: ZoneId) -> Option<&Zone> {
        self.zones.get(&zone_id)
    }

    /// Returns true if the zone has been instantiated.
    #[must_use]
    pub fn is_instantiated(&self, zone_id: ZoneId) -> bool {
        self.zones.get(&zone_id).is_some_and(Zone::is_instantiated)
    }

    /// Appends `player_id` to the zone's resident list.
    ///
    /// A player can be resident in one zone at a time; the caller removes
    /// it from its previous zone first.
    pub fn add_player(&mut self, zone_id: ZoneId, player_id: PlayerId) -> ReplicaResult<()> {
        if let Some(current) = self.zone_of_player(player_id) {
            return Err(ReplicaError::PlayerAlreadyInZone {
                player_id,
                zone_id: current,
            });
        }
        let zone = self
            .zones
            .get_mut(&zone_id)
            .filter(|zone| zone.is_instantiated())
            .ok_or(ReplicaError::ZoneNotInstantiated(zone_id))?;
        zone.players.push(player_id);
        Ok(())
    }

    /// Removes `player_id` from the zone. Returns false if it was not resident.
    pub fn remove_player(&mut self, zone_id: ZoneId, player_id: PlayerId) -> bool {
        let Some(zone) = self.zones.get_mut(&zone_id) else {
            return false;
        };
        let before = zone.players.len();
        zone.players.retain(|&p| p != player_id);
        zone.players.len() != before
    }

    /// Returns true if `player_id` is resident in the zone.
    #[must_use]
    pub fn player_in_zone(&self, zone_id: ZoneId, player_id: PlayerId) -> bool {
        self.zones
            .get(&zone_id)
            .is_some_and(|zone| zone.players.contains(&player_id))
    }

    /// Zone the player is resident in, if any.
    #[must_use]
    pub fn zone_of_player(&self, player_id: PlayerId) -> Option<ZoneId> {
        self.zones
            .iter()
            .find(|(_, zone)| zone.players.contains(&player_id))
            .map(|(&id, _)| id)
    }

    /// Resident players of a zone (empty if the zone was never touched).
    #[must_use]
    pub fn players_in_zone(&self, zone_id: ZoneId) -> &[PlayerId] {
        self.zones
            .get(&zone_id)
            .map_or(&[][..], |zone| zone.players.as_slice())
    }

    /// Creates an entity from `info`, which must carry its final network id.
    ///
    /// The template is instantiated immediately; attaching it under the
    /// zone root (or `info.parent_path` below it) is deferred to the scene
    /// thread.
    pub fn create_entity(&mut self, info: EntityInfo) -> ReplicaResult<&EntityRecord> {
        let template = self
            .catalog
            .template(info.template_id)
            .ok_or(ReplicaError::UnknownTemplate(info.template_id))?;
        let zone_root = self
            .zones
            .get(&info.parent_zone)
            .and_then(Zone::instance)
            .ok_or(ReplicaError::ZoneNotInstantiated(info.parent_zone))?;
        if self.entities.contains_key(&info.network_id) {
            return Err(ReplicaError::DuplicateNetworkId(info.network_id));
        }

        let instance = self.scene.instantiate(&template.template)?;
        let scene = Arc::clone(&self.scene);
        let path = info.parent_path.clone();
        self.scene
            .defer(Box::new(move || scene.attach(zone_root, instance, &path)));

        tracing::debug!(
            network_id = info.network_id,
            template_id = info.template_id,
            zone_id = info.parent_zone,
            "entity created"
        );

        let network_id = info.network_id;
        if let Some(zone) = self.zones.get_mut(&info.parent_zone) {
            zone.entities.push(network_id);
        }
        Ok(self
            .entities
            .entry(network_id)
            .or_insert(EntityRecord { info, instance }))
    }

    /// Looks up a live entity.
    #[must_use]
    pub fn entity(&self, network_id: NetworkId) -> Option<&EntityRecord> {
        self.entities.get(&network_id)
    }

    /// Entities resident in a zone, in creation order.
    pub fn entities_in_zone(&self, zone_id: ZoneId) -> impl Iterator<Item = &EntityRecord> + '_ {
        self.zones
            .get(&zone_id)
            .into_iter()
            .flat_map(|zone| zone.entities.iter())
            .filter_map(|id| self.entities.get(id))
    }

    /// Total number of live entities.
    #[must_use]
    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ZoneDescriptor;
    use crate::error::SceneError;
    use crate::scene::MockSceneHost;

    fn setup() -> (ReplicaState, Arc<MockSceneHost>) {
        let mut catalog = Catalog::new();
        catalog
            .register_zone(ZoneDescriptor::new(5, "harbor", "zones/harbor"))
            .unwrap();
        catalog
            .register_zone(ZoneDescriptor::new(6, "market", "zones/market"))
            .unwrap();
        catalog
            .register_entity_template(1, "crate", "props/crate")
            .unwrap();
        let scene = Arc::new(MockSceneHost::new());
        let replica = ReplicaState::new(Arc::new(catalog), scene.clone());
        (replica, scene)
    }

    fn entity(network_id: NetworkId, zone: ZoneId) -> EntityInfo {
        EntityInfo {
            network_id,
            ..EntityInfo::new(1, zone)
        }
    }

    #[test]
    fn test_instantiate_zone_is_idempotent() {
        let (mut replica, scene) = setup();
        let first = replica.instantiate_zone(5).unwrap();
        let second = replica.instantiate_zone(5).unwrap();
        assert_eq!(first, second);
        assert_eq!(scene.instantiated().len(), 1);
        assert!(replica.is_instantiated(5));
        assert!(!replica.is_instantiated(6));
    }

    #[test]
    fn test_instantiate_unknown_zone() {
        let (mut replica, _) = setup();
        assert_eq!(
            replica.instantiate_zone(99),
            Err(ReplicaError::UnknownZone(99))
        );
    }

    #[test]
    fn test_instantiate_failure_leaves_zone_unbuilt() {
        let (mut replica, scene) = setup();
        scene.fail_template("zones/harbor");
        assert!(matches!(
            replica.instantiate_zone(5),
            Err(ReplicaError::Scene(SceneError::InstantiateFailed(_)))
        ));
        assert!(!replica.is_instantiated(5));
    }

    #[test]
    fn test_players_live_in_one_zone() {
        let (mut replica, _) = setup();
        replica.instantiate_zone(5).unwrap();
        replica.instantiate_zone(6).unwrap();

        replica.add_player(5, 1).unwrap();
        assert!(replica.player_in_zone(5, 1));
        assert_eq!(
            replica.add_player(6, 1),
            Err(ReplicaError::PlayerAlreadyInZone {
                player_id: 1,
                zone_id: 5,
            })
        );

        assert!(replica.remove_player(5, 1));
        assert!(!replica.remove_player(5, 1));
        replica.add_player(6, 1).unwrap();
        assert_eq!(replica.zone_of_player(1), Some(6));
    }

    #[test]
    fn test_add_player_requires_instantiated_zone() {
        let (mut replica, _) = setup();
        assert_eq!(
            replica.add_player(5, 1),
            Err(ReplicaError::ZoneNotInstantiated(5))
        );
    }

    #[test]
    fn test_create_entity_defers_attach() {
        let (mut replica, scene) = setup();
        let root = replica.instantiate_zone(5).unwrap();

        let record = replica
            .create_entity(entity(10, 5).with_parent_path("Props"))
            .unwrap();
        let child = record.instance;

        assert!(scene.attachments().is_empty());
        scene.run_deferred();
        let attachments = scene.attachments();
        assert_eq!(attachments.len(), 1);
        assert_eq!(attachments[0].parent, root);
        assert_eq!(attachments[0].child, child);
        assert_eq!(attachments[0].path, "Props");
    }

    #[test]
    fn test_create_entity_rejects_bad_input() {
        let (mut replica, _) = setup();
        assert_eq!(
            replica.create_entity(entity(10, 5)).unwrap_err(),
            ReplicaError::ZoneNotInstantiated(5)
        );

        replica.instantiate_zone(5).unwrap();
        let mut unknown = entity(10, 5);
        unknown.template_id = 42;
        assert_eq!(
            replica.create_entity(unknown).unwrap_err(),
            ReplicaError::UnknownTemplate(42)
        );

        replica.create_entity(entity(10, 5)).unwrap();
        assert_eq!(
            replica.create_entity(entity(10, 5)).unwrap_err(),
            ReplicaError::DuplicateNetworkId(10)
        );
        assert_eq!(replica.entity_count(), 1);
    }

    #[test]
    fn test_entities_in_zone_keep_creation_order() {
        let (mut replica, _) = setup();
        replica.instantiate_zone(5).unwrap();
        replica.instantiate_zone(6).unwrap();
        for id in [3, 1, 2] {
            replica.create_entity(entity(id, 5)).unwrap();
        }
        replica.create_entity(entity(9, 6)).unwrap();

        let ids: Vec<NetworkId> = replica
            .entities_in_zone(5)
            .map(|record| record.info.network_id)
            .collect();
        assert_eq!(ids, vec![3, 1, 2]);
        assert_eq!(replica.entities_in_zone(7).count(), 0);
    }
}
