//! # World
//!
//! The orchestrator. A `World` runs at most one role at a time:
//!
//! ```text
//!                 start_server(port)            stop_server()
//!        ┌──────────────────────────> Server ──────────────────┐
//!  Idle ─┤                                                     ├─> Idle
//!        └──────────────────────────> Client ──────────────────┘
//!                 join_as_client(addr, port)    leave_world()
//! ```
//!
//! Each role owns one loop thread. The thread is the only writer of the
//! role's state; application threads read it under the same lock and hand
//! mutations to the loop (server commands) or straight to the transport
//! (client requests).
//!
//! ## Loop Iteration
//!
//! 1. Drain queued commands (server only)
//! 2. Receive batches until one comes back empty, dispatching each message
//! 3. Run transport callbacks (connection state changes)
//! 4. Sleep `poll_interval`, waking early on stop

mod client;
mod server;

pub use client::ClientState;
pub use server::ServerState;

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use zonesync_core::{Catalog, ReplicaState, SceneHost};
use zonesync_shared::{EntityInfo, Message, PlayerId, ZoneId};

use crate::config::WorldConfig;
use crate::error::{WorldError, WorldResult};
use crate::events::{EventBus, EventSender, WorldEvent};
use crate::transport::{ConnectionId, ListenSocket, PollGroup, SendMode, Transport};

use client::ClientLoop;
use server::{ServerCommand, ServerLoop};

// ============================================================================
// HANDLER CONTEXT
// ============================================================================

/// What a handler may touch besides its own state.
pub(crate) struct Context<'a> {
    pub transport: &'a dyn Transport,
    pub events: &'a EventSender,
}

impl Context<'_> {
    /// Encodes and sends `message` on the reliable channel.
    pub fn send(&self, connection: ConnectionId, message: &Message) -> WorldResult<()> {
        send_message(self.transport, connection, message)
    }

    /// Raises an application event.
    pub fn emit(&self, event: WorldEvent) {
        self.events.send(event);
    }
}

fn send_message(
    transport: &dyn Transport,
    connection: ConnectionId,
    message: &Message,
) -> WorldResult<()> {
    let bytes = message.encode()?;
    transport.send(connection, &bytes, SendMode::Reliable)?;
    Ok(())
}

/// Logs a rejected public call and hands the error back.
fn reject(err: WorldError) -> WorldError {
    tracing::error!(%err, "world operation rejected");
    err
}

// ============================================================================
// LOOP THREADS
// ============================================================================

/// A running loop thread and its stop signal.
struct LoopThread {
    stop: Sender<()>,
    thread: Option<JoinHandle<()>>,
}

impl LoopThread {
    fn spawn(
        name: &str,
        body: impl FnOnce(Receiver<()>) + Send + 'static,
    ) -> WorldResult<Self> {
        let (stop, stop_rx) = bounded(1);
        let thread = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || body(stop_rx))
            .map_err(|e| WorldError::Spawn(e.to_string()))?;
        Ok(Self {
            stop,
            thread: Some(thread),
        })
    }

    /// Signals the loop and waits for it to finish its current iteration.
    fn shutdown(&mut self) {
        let _ = self.stop.try_send(());
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!("loop thread panicked");
            }
        }
    }
}

/// Runs `iteration` every `interval` until stopped or it fails.
pub(crate) fn run_loop(
    role: &'static str,
    stop: &Receiver<()>,
    interval: Duration,
    mut iteration: impl FnMut() -> WorldResult<()>,
) -> WorldResult<()> {
    tracing::info!(role, "loop started");
    loop {
        iteration()?;
        match stop.recv_timeout(interval) {
            Err(RecvTimeoutError::Timeout) => {}
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    tracing::info!(role, "loop stopped");
    Ok(())
}

// ============================================================================
// ROLES
// ============================================================================

struct ServerHandle {
    state: Arc<Mutex<ServerState>>,
    commands: Sender<ServerCommand>,
    listen_socket: ListenSocket,
    poll_group: PollGroup,
    thread: LoopThread,
}

impl ServerHandle {
    /// Joins the loop, then releases transport resources.
    fn shutdown(mut self, transport: &dyn Transport) {
        self.thread.shutdown();
        for connection in self.state.lock().connections() {
            transport.close(connection);
        }
        transport.destroy_poll_group(self.poll_group);
        transport.close_listen_socket(self.listen_socket);
    }
}

struct ClientHandle {
    state: Arc<Mutex<ClientState>>,
    connection: ConnectionId,
    thread: LoopThread,
}

impl ClientHandle {
    fn shutdown(mut self, transport: &dyn Transport) {
        self.thread.shutdown();
        transport.close(self.connection);
    }
}

enum Role {
    Idle,
    Server(ServerHandle),
    Client(ClientHandle),
}

impl Role {
    const fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Server(_) => "server",
            Self::Client(_) => "client",
        }
    }
}

// ============================================================================
// WORLD
// ============================================================================

/// Session and registry orchestrator.
///
/// # Example
///
/// ```rust,ignore
/// let world = World::new(WorldConfig::default(), catalog, transport, scene)?;
/// world.start_server(7777)?;
/// loop {
///     scene.run_deferred();
///     for event in world.drain_events() { /* ... */ }
/// }
/// ```
pub struct World {
    config: WorldConfig,
    catalog: Arc<Catalog>,
    transport: Arc<dyn Transport>,
    scene: Arc<dyn SceneHost>,
    events: EventBus,
    role: Mutex<Role>,
}

impl World {
    /// Creates an idle world.
    pub fn new(
        config: WorldConfig,
        catalog: Catalog,
        transport: Arc<dyn Transport>,
        scene: Arc<dyn SceneHost>,
    ) -> WorldResult<Self> {
        config.validate()?;
        Ok(Self {
            events: EventBus::new(config.event_queue_capacity),
            config,
            catalog: Arc::new(catalog),
            transport,
            scene,
            role: Mutex::new(Role::Idle),
        })
    }

    /// Active configuration.
    #[must_use]
    pub fn config(&self) -> &WorldConfig {
        &self.config
    }

    /// Zone and template catalog.
    #[must_use]
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Returns true while running as a server.
    #[must_use]
    pub fn is_server(&self) -> bool {
        matches!(*self.role.lock(), Role::Server(_))
    }

    /// Returns true while running as a client.
    #[must_use]
    pub fn is_client(&self) -> bool {
        matches!(*self.role.lock(), Role::Client(_))
    }

    fn new_replica(&self) -> ReplicaState {
        ReplicaState::new(Arc::clone(&self.catalog), Arc::clone(&self.scene))
    }

    /// Starts listening on `port` and spawns the server loop.
    pub fn start_server(&self, port: u16) -> WorldResult<()> {
        let mut role = self.role.lock();
        if !matches!(*role, Role::Idle) {
            return Err(reject(WorldError::AlreadyRunning(role.name())));
        }

        let listen_socket = self
            .transport
            .listen(port)
            .map_err(|e| reject(e.into()))?;
        let poll_group = match self.transport.create_poll_group() {
            Ok(group) => group,
            Err(e) => {
                self.transport.close_listen_socket(listen_socket);
                return Err(reject(e.into()));
            }
        };

        let state = Arc::new(Mutex::new(ServerState::new(self.new_replica())));
        let (commands, command_rx) = unbounded();
        let server_loop = ServerLoop::new(
            Arc::clone(&state),
            Arc::clone(&self.transport),
            self.events.sender(),
            command_rx,
            poll_group,
            &self.config,
        );
        let interval = self.config.poll_interval();

        let thread = LoopThread::spawn("zonesync-server", move |stop| {
            if let Err(err) = run_loop("server", &stop, interval, || server_loop.pump(&stop)) {
                tracing::error!(%err, "server loop aborted");
            }
        });
        let thread = match thread {
            Ok(thread) => thread,
            Err(e) => {
                self.transport.destroy_poll_group(poll_group);
                self.transport.close_listen_socket(listen_socket);
                return Err(reject(e));
            }
        };

        *role = Role::Server(ServerHandle {
            state,
            commands,
            listen_socket,
            poll_group,
            thread,
        });
        tracing::info!(port, "server started");
        Ok(())
    }

    /// Stops the server loop and closes every connection.
    pub fn stop_server(&self) -> WorldResult<()> {
        let handle = {
            let mut role = self.role.lock();
            match std::mem::replace(&mut *role, Role::Idle) {
                Role::Server(handle) => handle,
                other => {
                    *role = other;
                    return Err(reject(WorldError::NotServer));
                }
            }
        };
        handle.shutdown(&*self.transport);
        tracing::info!("server stopped");
        Ok(())
    }

    /// Connects to a server and spawns the client loop.
    pub fn join_as_client(&self, address: &str, port: u16) -> WorldResult<()> {
        let mut role = self.role.lock();
        if !matches!(*role, Role::Idle) {
            return Err(reject(WorldError::AlreadyRunning(role.name())));
        }

        let connection = self
            .transport
            .connect(address, port)
            .map_err(|e| reject(e.into()))?;
        let state = Arc::new(Mutex::new(ClientState::new(connection, self.new_replica())));
        let client_loop = ClientLoop::new(
            Arc::clone(&state),
            Arc::clone(&self.transport),
            self.events.sender(),
            connection,
            &self.config,
        );
        let interval = self.config.poll_interval();

        let thread = LoopThread::spawn("zonesync-client", move |stop| {
            match run_loop("client", &stop, interval, || client_loop.pump(&stop)) {
                Ok(()) => {}
                Err(WorldError::ConnectionLost) => client_loop.lose_connection(),
                Err(err) => {
                    tracing::error!(%err, "client loop aborted");
                    client_loop.lose_connection();
                }
            }
        });
        let thread = match thread {
            Ok(thread) => thread,
            Err(e) => {
                self.transport.close(connection);
                return Err(reject(e));
            }
        };

        *role = Role::Client(ClientHandle {
            state,
            connection,
            thread,
        });
        tracing::info!(address, port, "joining world");
        Ok(())
    }

    /// Disconnects from the server.
    pub fn leave_world(&self) -> WorldResult<()> {
        let handle = {
            let mut role = self.role.lock();
            match std::mem::replace(&mut *role, Role::Idle) {
                Role::Client(handle) => handle,
                other => {
                    *role = other;
                    return Err(reject(WorldError::NotConnected));
                }
            }
        };
        handle.shutdown(&*self.transport);
        tracing::info!("left world");
        Ok(())
    }

    /// Client connection, or the error explaining why there is none.
    fn client_connection(&self) -> WorldResult<ConnectionId> {
        match &*self.role.lock() {
            Role::Client(handle) => Ok(handle.connection),
            Role::Server(_) => Err(WorldError::ServerRole),
            Role::Idle => Err(WorldError::NotConnected),
        }
    }

    /// Asks the server to load the zone called `name`. Client only.
    pub fn load_zone_by_name(&self, name: &str) -> WorldResult<ZoneId> {
        self.client_connection().map_err(reject)?;
        let zone_id = self
            .catalog
            .zone_by_name(name)
            .map(|zone| zone.id)
            .ok_or_else(|| reject(WorldError::UnknownZoneName(name.to_string())))?;
        self.load_zone_by_id(zone_id)?;
        Ok(zone_id)
    }

    /// Asks the server to load zone `zone_id`. Client only.
    pub fn load_zone_by_id(&self, zone_id: ZoneId) -> WorldResult<()> {
        let connection = self.client_connection().map_err(reject)?;
        if !self.catalog.zone_exists(zone_id) {
            return Err(reject(WorldError::UnknownZone(zone_id)));
        }
        send_message(&*self.transport, connection, &Message::LoadZoneRequest(zone_id))
            .map_err(reject)?;
        tracing::info!(zone_id, "zone load requested");
        Ok(())
    }

    /// Returns true if the player is known to this process.
    ///
    /// A server knows every connected player; a client knows itself and
    /// the players announced in its zone.
    pub fn player_exists(&self, player_id: PlayerId) -> WorldResult<bool> {
        match &*self.role.lock() {
            Role::Server(handle) => Ok(handle.state.lock().player_exists(player_id)),
            Role::Client(handle) => Ok(handle.state.lock().player_exists(player_id)),
            Role::Idle => Err(reject(WorldError::NotConnected)),
        }
    }

    /// Spawns an entity.
    ///
    /// On a server the request is queued for the loop thread, which assigns
    /// the network id; on a client it is sent to the server.
    pub fn spawn_entity(&self, info: EntityInfo) -> WorldResult<()> {
        match &*self.role.lock() {
            Role::Server(handle) => handle
                .commands
                .send(ServerCommand::SpawnEntity(info))
                .map_err(|_| reject(WorldError::CommandQueueClosed)),
            Role::Client(handle) => send_message(
                &*self.transport,
                handle.connection,
                &Message::CreateEntityRequest(info),
            )
            .map_err(reject),
            Role::Idle => Err(reject(WorldError::NotConnected)),
        }
    }

    /// Takes every pending application event.
    ///
    /// Call from the application's own thread, once per tick.
    pub fn drain_events(&self) -> Vec<WorldEvent> {
        self.events.drain()
    }

    /// Player id assigned by the server, once known. Client only.
    #[must_use]
    pub fn local_player_id(&self) -> Option<PlayerId> {
        match &*self.role.lock() {
            Role::Client(handle) => handle.state.lock().player_id(),
            _ => None,
        }
    }

    /// Reads the server state under its lock.
    pub fn with_server_state<R>(&self, read: impl FnOnce(&ServerState) -> R) -> Option<R> {
        match &*self.role.lock() {
            Role::Server(handle) => Some(read(&handle.state.lock())),
            _ => None,
        }
    }

    /// Reads the client state under its lock.
    pub fn with_client_state<R>(&self, read: impl FnOnce(&ClientState) -> R) -> Option<R> {
        match &*self.role.lock() {
            Role::Client(handle) => Some(read(&handle.state.lock())),
            _ => None,
        }
    }
}

impl Drop for World {
    fn drop(&mut self) {
        let role = std::mem::replace(&mut *self.role.lock(), Role::Idle);
        match role {
            Role::Server(handle) => handle.shutdown(&*self.transport),
            Role::Client(handle) => handle.shutdown(&*self.transport),
            Role::Idle => {}
        }
    }
}
