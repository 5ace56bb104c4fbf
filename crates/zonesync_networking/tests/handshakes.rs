//! End-to-end handshakes between a server world and client worlds, each
//! running its own loop thread over a shared loopback network.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use zonesync_core::{Catalog, MockSceneHost};
use zonesync_networking::{LoopbackNetwork, World, WorldConfig, WorldError, WorldEvent};
use zonesync_shared::{EntityInfo, PlayerId, ZoneId};

const PORT: u16 = 7777;
const HARBOR: ZoneId = 2;
const LAMP: u32 = 1;

const CATALOG: &str = r#"
    [[zones]]
    id = 2
    name = "harbor"
    template = "zones/harbor"

    [[zones]]
    id = 3
    name = "market"
    template = "zones/market"

    [[templates]]
    id = 1
    name = "lamp"
    template = "props/lamp"
"#;

const TIMEOUT: Duration = Duration::from_secs(5);

struct Node {
    world: World,
    scene: Arc<MockSceneHost>,
    log: Vec<WorldEvent>,
}

impl Node {
    fn new(network: &LoopbackNetwork, catalog: Catalog) -> Self {
        let config = WorldConfig {
            poll_interval_ms: 1,
            ..WorldConfig::default()
        };
        let scene = Arc::new(MockSceneHost::new());
        let world = World::new(
            config,
            catalog,
            Arc::new(network.endpoint()),
            Arc::clone(&scene) as _,
        )
        .unwrap();
        Self {
            world,
            scene,
            log: Vec::new(),
        }
    }

    fn server(network: &LoopbackNetwork) -> Self {
        let node = Self::new(network, Catalog::from_toml_str(CATALOG).unwrap());
        node.world.start_server(PORT).unwrap();
        node
    }

    /// Joins and waits for the player id.
    fn client(network: &LoopbackNetwork) -> (Self, PlayerId) {
        let mut node = Self::new(network, Catalog::from_toml_str(CATALOG).unwrap());
        node.world.join_as_client("127.0.0.1", PORT).unwrap();
        assert!(node.wait_until(Self::has_joined));
        let player_id = node.world.local_player_id().unwrap();
        (node, player_id)
    }

    fn enter_harbor(&mut self) {
        assert_eq!(self.world.load_zone_by_name("harbor").unwrap(), HARBOR);
        assert!(self.wait_for(&WorldEvent::ZoneLoaded { zone_id: HARBOR }));
    }

    /// Polls `condition`, collecting events, until it holds or time runs out.
    fn wait_until(&mut self, mut condition: impl FnMut(&Self) -> bool) -> bool {
        let deadline = Instant::now() + TIMEOUT;
        while Instant::now() < deadline {
            self.log.extend(self.world.drain_events());
            if condition(self) {
                return true;
            }
            thread::sleep(Duration::from_millis(1));
        }
        false
    }

    fn has_joined(&self) -> bool {
        self.log
            .iter()
            .any(|event| matches!(event, WorldEvent::JoinedWorld { .. }))
    }

    fn wait_for(&mut self, event: &WorldEvent) -> bool {
        self.wait_until(|node| node.log.contains(event))
    }

    fn count(&self, matches: impl Fn(&WorldEvent) -> bool) -> usize {
        self.log.iter().filter(|event| matches(event)).count()
    }
}

#[test]
fn test_join_and_load_zone() {
    let network = LoopbackNetwork::new();
    let mut server = Node::server(&network);
    let (mut client, player_id) = Node::client(&network);

    assert_eq!(player_id, 1);
    assert!(client.log.contains(&WorldEvent::JoinedWorld { player_id: 1 }));
    assert!(server.wait_for(&WorldEvent::PlayerConnected { player_id: 1 }));
    assert!(server.world.player_exists(1).unwrap());
    assert!(client.world.player_exists(1).unwrap());

    client.enter_harbor();
    assert_eq!(
        client
            .world
            .with_client_state(|state| (state.current_zone(), state.zone_load_complete())),
        Some((Some(HARBOR), true))
    );
    assert!(server.wait_until(|node| {
        node.world
            .with_server_state(|state| {
                state
                    .session(1)
                    .is_some_and(|session| session.zone_load_complete())
            })
            .unwrap_or(false)
    }));
    assert!(server.wait_for(&WorldEvent::PlayerEnteredZone {
        zone_id: HARBOR,
        player_id: 1
    }));
}

#[test]
fn test_entities_reach_residents_and_late_joiners() {
    let network = LoopbackNetwork::new();
    let mut server = Node::server(&network);
    let (mut alice, alice_id) = Node::client(&network);
    let (mut bob, _) = Node::client(&network);
    alice.enter_harbor();
    bob.enter_harbor();

    server
        .world
        .spawn_entity(EntityInfo::new(LAMP, HARBOR).with_name("lamp"))
        .unwrap();
    let lamp = WorldEvent::EntityCreated {
        network_id: 1,
        zone_id: HARBOR,
    };
    assert!(alice.wait_for(&lamp));
    assert!(bob.wait_for(&lamp));
    assert!(server.wait_until(|node| {
        node.world
            .with_server_state(|state| {
                [1, 2].iter().all(|&player_id| {
                    state
                        .session(player_id)
                        .is_some_and(|session| session.pending_acks().is_empty())
                })
            })
            .unwrap_or(false)
    }));

    alice
        .world
        .spawn_entity(
            EntityInfo::new(LAMP, HARBOR)
                .with_name("alice_lamp")
                .with_owner(alice_id),
        )
        .unwrap();
    assert!(alice.wait_for(&WorldEvent::EntitySpawnConfirmed { network_id: 2 }));
    assert!(bob.wait_for(&WorldEvent::EntityCreated {
        network_id: 2,
        zone_id: HARBOR
    }));

    let (mut carol, _) = Node::client(&network);
    carol.enter_harbor();
    assert_eq!(
        carol.count(|event| matches!(event, WorldEvent::EntityCreated { .. })),
        2
    );
    assert_eq!(
        carol
            .world
            .with_client_state(|state| state.replica().entity_count()),
        Some(2)
    );

    // Attachment waits for the application thread.
    assert_eq!(carol.scene.attachments().len(), 0);
    assert_eq!(carol.scene.run_deferred(), 2);
    assert_eq!(carol.scene.attachments().len(), 2);
}

#[test]
fn test_presence_follows_joins_and_departures() {
    let network = LoopbackNetwork::new();
    let mut server = Node::server(&network);
    let (mut alice, _) = Node::client(&network);
    let (mut bob, bob_id) = Node::client(&network);
    alice.enter_harbor();
    bob.enter_harbor();

    assert!(alice.wait_for(&WorldEvent::PlayerEnteredZone {
        zone_id: HARBOR,
        player_id: bob_id
    }));
    assert!(alice.world.player_exists(bob_id).unwrap());

    bob.world.leave_world().unwrap();
    assert!(!bob.world.is_client());
    assert!(server.wait_for(&WorldEvent::PlayerDisconnected { player_id: bob_id }));
    assert!(alice.wait_for(&WorldEvent::PlayerLeftZone {
        zone_id: HARBOR,
        player_id: bob_id
    }));
    assert!(!alice.world.player_exists(bob_id).unwrap());
    assert!(!server.world.player_exists(bob_id).unwrap());
}

#[test]
fn test_connection_problem_disconnects_both_sides() {
    let network = LoopbackNetwork::new();
    let mut server = Node::server(&network);
    let (mut client, player_id) = Node::client(&network);
    assert!(server.wait_for(&WorldEvent::PlayerConnected { player_id }));

    let connections = server
        .world
        .with_server_state(zonesync_networking::ServerState::connections)
        .unwrap();
    assert_eq!(connections.len(), 1);
    assert!(network.inject_problem(connections[0]));

    assert!(client.wait_for(&WorldEvent::Disconnected));
    assert!(server.wait_for(&WorldEvent::PlayerDisconnected { player_id }));
    assert_eq!(client.count(|event| *event == WorldEvent::Disconnected), 1);
}

#[test]
fn test_zone_unknown_to_server_is_denied() {
    let network = LoopbackNetwork::new();
    let _server = Node::server(&network);

    let mut catalog = Catalog::from_toml_str(CATALOG).unwrap();
    catalog
        .register_zone(zonesync_core::ZoneDescriptor::new(9, "annex", "zones/annex"))
        .unwrap();
    let mut client = Node::new(&network, catalog);
    client.world.join_as_client("127.0.0.1", PORT).unwrap();
    assert!(client.wait_until(Node::has_joined));

    assert_eq!(client.world.load_zone_by_name("annex").unwrap(), 9);
    assert!(client.wait_for(&WorldEvent::ZoneLoadDenied { zone_id: 9 }));
    assert!(matches!(
        client.world.load_zone_by_name("nowhere"),
        Err(WorldError::UnknownZoneName(_))
    ));
}

#[test]
fn test_server_restart_after_stop() {
    let network = LoopbackNetwork::new();
    let server = Node::server(&network);
    let (mut client, _) = Node::client(&network);

    server.world.stop_server().unwrap();
    assert!(client.wait_for(&WorldEvent::Disconnected));

    server.world.start_server(PORT).unwrap();
    let (_, player_id) = Node::client(&network);
    assert_eq!(player_id, 1);
}
