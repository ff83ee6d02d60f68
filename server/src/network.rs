//! Server network layer handling UDP communications and game loop coordination

use crate::client_manager::ClientManager;
use crate::config::ServerConfig;
use crate::error::GameError;
use crate::game::{GameState, TickGate};
use log::{debug, error, info, warn};
use shared::{ClientMessage, ServerMessage};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

pub type ServerError = Box<dyn std::error::Error + Send + Sync>;

const RECV_BUFFER_SIZE: usize = 2048;

/// Messages sent from network tasks to main server loop
#[derive(Debug)]
pub enum ServerEvent {
    PacketReceived {
        message: ClientMessage,
        addr: SocketAddr,
    },
    MalformedPacket {
        addr: SocketAddr,
        reason: String,
    },
    ClientTimeout {
        client_id: u32,
    },
    Shutdown,
}

/// Messages sent from game loop to network tasks
#[derive(Debug)]
pub enum GameMessage {
    SendPacket {
        packet: ServerMessage,
        addr: SocketAddr,
    },
    BroadcastPacket {
        packet: ServerMessage,
    },
}

/// Stops a running [`Server`] from another task.
#[derive(Clone)]
pub struct ShutdownHandle {
    server_tx: mpsc::UnboundedSender<ServerEvent>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        if self.server_tx.send(ServerEvent::Shutdown).is_err() {
            debug!("Server loop already stopped");
        }
    }
}

/// Main server coordinating networking and game simulation
///
/// Every mutation of the game state happens inside [`Server::run`], one
/// event at a time; the helper tasks only move bytes and timestamps.
pub struct Server {
    socket: Arc<UdpSocket>,
    clients: Arc<RwLock<ClientManager>>,
    game_state: GameState,
    tick_gate: TickGate,
    poll_interval: Duration,
    tasks: Vec<JoinHandle<()>>,

    // Communication channels
    server_tx: mpsc::UnboundedSender<ServerEvent>,
    server_rx: mpsc::UnboundedReceiver<ServerEvent>,
    game_tx: mpsc::UnboundedSender<GameMessage>,
    game_rx: mpsc::UnboundedReceiver<GameMessage>,
}

impl Server {
    pub async fn new(config: &ServerConfig) -> Result<Self, ServerError> {
        Self::with_game_state(config, GameState::new()).await
    }

    pub async fn with_game_state(
        config: &ServerConfig,
        game_state: GameState,
    ) -> Result<Self, ServerError> {
        let socket = Arc::new(UdpSocket::bind(config.bind_addr()).await?);
        info!("Server listening on {}", socket.local_addr()?);

        let (server_tx, server_rx) = mpsc::unbounded_channel();
        let (game_tx, game_rx) = mpsc::unbounded_channel();

        Ok(Server {
            socket,
            clients: Arc::new(RwLock::new(ClientManager::new(
                config.max_clients,
                config.client_timeout,
            ))),
            game_state,
            tick_gate: TickGate::new(config.tick_interval, Instant::now()),
            poll_interval: config.poll_interval,
            tasks: Vec::new(),
            server_tx,
            server_rx,
            game_tx,
            game_rx,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.socket.local_addr()?)
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            server_tx: self.server_tx.clone(),
        }
    }

    /// Spawns task that continuously listens for incoming packets
    fn spawn_network_receiver(&mut self) {
        let socket = Arc::clone(&self.socket);
        let server_tx = self.server_tx.clone();

        self.tasks.push(tokio::spawn(async move {
            let mut buffer = [0u8; RECV_BUFFER_SIZE];

            loop {
                match socket.recv_from(&mut buffer).await {
                    Ok((len, addr)) => {
                        let event = match ClientMessage::decode(&buffer[..len]) {
                            Ok(message) => ServerEvent::PacketReceived { message, addr },
                            Err(e) => ServerEvent::MalformedPacket {
                                addr,
                                reason: e.to_string(),
                            },
                        };

                        if let Err(e) = server_tx.send(event) {
                            error!("Failed to send packet to main loop: {}", e);
                            break;
                        }
                    }
                    Err(e) => {
                        error!("Error receiving packet: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        }));
    }

    /// Spawns task that processes outgoing packet queue
    ///
    /// Every queued message gets its own id so that fragments of different
    /// snapshots never mix on the client side.
    fn spawn_network_sender(&mut self) {
        let socket = Arc::clone(&self.socket);
        let clients = Arc::clone(&self.clients);
        let mut game_rx = std::mem::replace(&mut self.game_rx, mpsc::unbounded_channel().1);

        self.tasks.push(tokio::spawn(async move {
            let mut next_message_id: u32 = 0;

            while let Some(message) = game_rx.recv().await {
                let message_id = next_message_id;
                next_message_id = next_message_id.wrapping_add(1);

                match message {
                    GameMessage::SendPacket { packet, addr } => {
                        if let Err(e) =
                            Self::send_packet_impl(&socket, &packet, message_id, addr).await
                        {
                            error!("Failed to send packet to {}: {}", addr, e);
                        }
                    }
                    GameMessage::BroadcastPacket { packet } => {
                        let datagrams = match packet.encode_datagrams(message_id) {
                            Ok(datagrams) => datagrams,
                            Err(e) => {
                                error!("Failed to encode broadcast: {}", e);
                                continue;
                            }
                        };
                        if datagrams.len() > 1 {
                            debug!(
                                "Broadcast {} split into {} fragments",
                                message_id,
                                datagrams.len()
                            );
                        }

                        let client_addrs = {
                            let clients_guard = clients.read().await;
                            clients_guard.get_client_addrs()
                        };

                        for (client_id, addr) in client_addrs {
                            if let Err(e) = Self::send_datagrams(&socket, &datagrams, addr).await {
                                error!("Failed to send to client {}: {}", client_id, e);
                            }
                        }
                    }
                }
            }
        }));
    }

    /// Spawns task that monitors client timeouts
    fn spawn_timeout_checker(&mut self) {
        let clients = Arc::clone(&self.clients);
        let server_tx = self.server_tx.clone();

        self.tasks.push(tokio::spawn(async move {
            let mut interval = interval(Duration::from_secs(1));

            loop {
                interval.tick().await;

                let timed_out = {
                    let mut clients_guard = clients.write().await;
                    clients_guard.check_timeouts()
                };

                for client_id in timed_out {
                    if let Err(e) = server_tx.send(ServerEvent::ClientTimeout { client_id }) {
                        error!("Failed to send timeout message: {}", e);
                        return;
                    }
                }
            }
        }));
    }

    async fn send_packet_impl(
        socket: &UdpSocket,
        packet: &ServerMessage,
        message_id: u32,
        addr: SocketAddr,
    ) -> Result<(), ServerError> {
        let datagrams = packet.encode_datagrams(message_id)?;
        Self::send_datagrams(socket, &datagrams, addr).await?;
        Ok(())
    }

    async fn send_datagrams(
        socket: &UdpSocket,
        datagrams: &[Vec<u8>],
        addr: SocketAddr,
    ) -> std::io::Result<()> {
        for datagram in datagrams {
            socket.send_to(datagram, addr).await?;
        }
        Ok(())
    }

    fn send_packet(&self, packet: ServerMessage, addr: SocketAddr) {
        if let Err(e) = self.game_tx.send(GameMessage::SendPacket { packet, addr }) {
            error!("Failed to queue packet for sending: {}", e);
        }
    }

    async fn broadcast_packet(&self, packet: ServerMessage) {
        let client_count = {
            let clients = self.clients.read().await;
            clients.len()
        };

        if client_count == 0 {
            return;
        }

        if let Err(e) = self.game_tx.send(GameMessage::BroadcastPacket { packet }) {
            error!("Failed to queue broadcast packet: {}", e);
        }
    }

    fn update_packet(&self) -> ServerMessage {
        ServerMessage::Update {
            game_state: self.game_state.snapshot(),
        }
    }

    fn bullet_packet(&self) -> ServerMessage {
        ServerMessage::Bullet {
            game_state: self.game_state.snapshot(),
        }
    }

    /// Drops a connection and its player, then tells everyone.
    async fn drop_client(&mut self, client_id: u32) {
        {
            let mut clients = self.clients.write().await;
            clients.remove_client(&client_id);
        }

        if self.game_state.remove_player(&client_id) {
            self.broadcast_packet(self.update_packet()).await;
        }
    }

    /// Processes incoming packets and updates game state
    async fn handle_packet(&mut self, message: ClientMessage, addr: SocketAddr) {
        match message {
            ClientMessage::Connect => self.handle_connect(addr).await,

            ClientMessage::Disconnect => {
                let client_id = {
                    let clients = self.clients.read().await;
                    clients.find_client_by_addr(addr)
                };

                if let Some(client_id) = client_id {
                    self.drop_client(client_id).await;
                }
            }

            event => {
                let client_id = {
                    let mut clients = self.clients.write().await;
                    clients.touch(addr)
                };

                let Some(client_id) = client_id else {
                    warn!("Ignoring {:?} from unconnected address {}", event, addr);
                    return;
                };

                let result = match event {
                    ClientMessage::Move { x, y } => self
                        .game_state
                        .move_player(client_id, x, y)
                        .map(|_| Some(self.update_packet())),
                    ClientMessage::Shoot { dx, dy } => self
                        .game_state
                        .shoot(client_id, dx, dy)
                        .map(|_| Some(self.bullet_packet())),
                    ClientMessage::Pickup => self
                        .game_state
                        .pickup(client_id)
                        .map(|_| Some(self.update_packet())),
                    _ => Ok(None),
                };

                match result {
                    Ok(Some(packet)) => self.broadcast_packet(packet).await,
                    Ok(None) => {}
                    Err(e) => self.handle_game_error(e, addr),
                }
            }
        }
    }

    async fn handle_connect(&mut self, addr: SocketAddr) {
        info!("Client connecting from {}", addr);

        // A repeated connect from the same address starts a fresh session
        let existing_client_id = {
            let clients = self.clients.read().await;
            clients.find_client_by_addr(addr)
        };

        if let Some(existing_id) = existing_client_id {
            info!("Removing existing client {} from {}", existing_id, addr);
            let mut clients = self.clients.write().await;
            clients.remove_client(&existing_id);
            self.game_state.remove_player(&existing_id);
        }

        let client_id = {
            let mut clients = self.clients.write().await;
            clients.add_client(addr)
        };

        match client_id {
            Some(client_id) => {
                self.game_state.add_player(client_id);
                self.send_packet(ServerMessage::Connected { client_id }, addr);
                self.broadcast_packet(self.update_packet()).await;
            }
            None => {
                warn!("Refusing {}: server full", addr);
                self.send_packet(
                    ServerMessage::Disconnected {
                        reason: "Server full".to_string(),
                    },
                    addr,
                );
            }
        }
    }

    fn handle_game_error(&self, err: GameError, addr: SocketAddr) {
        match err {
            GameError::UnknownConnection(_) => {
                warn!("Ignoring event from {}: {}", addr, err);
            }
            GameError::InvalidPayload { .. } => {
                warn!("Rejected event from {}: {}", addr, err);
                self.send_packet(
                    ServerMessage::Rejected {
                        reason: err.to_string(),
                    },
                    addr,
                );
            }
        }
    }

    async fn handle_malformed(&mut self, addr: SocketAddr, reason: String) {
        let known = {
            let mut clients = self.clients.write().await;
            clients.touch(addr).is_some()
        };

        warn!("Malformed packet from {}: {}", addr, reason);
        if known {
            self.send_packet(ServerMessage::Rejected { reason }, addr);
        }
    }

    /// The connection is already gone from the client manager by the time a
    /// timeout arrives; this removes the player and tells everyone else.
    async fn handle_timeout(&mut self, client_id: u32) {
        info!("Removing player {} after timeout", client_id);
        self.drop_client(client_id).await;
    }

    /// Runs one simulation step if the tick gate allows it.
    ///
    /// Returns false, without touching state or broadcasting, when called
    /// again before the minimum interval has elapsed.
    async fn tick(&mut self, now: Instant) -> bool {
        if !self.tick_gate.try_advance(now) {
            return false;
        }

        let report = self.game_state.update_physics();
        let world = &self.game_state.world;
        debug!(
            "Tick {}: players={}, boxes={}, bullets={} ({} expired, {} hit)",
            self.game_state.tick,
            world.players.len(),
            world.boxes.len(),
            world.bullets.len(),
            report.bullets_expired.len(),
            report.bullets_hit.len()
        );

        self.broadcast_packet(self.update_packet()).await;
        true
    }

    /// Main server loop coordinating all operations
    pub async fn run(&mut self) -> Result<(), ServerError> {
        self.spawn_network_receiver();
        self.spawn_network_sender();
        self.spawn_timeout_checker();

        let mut poll_interval = interval(self.poll_interval);
        poll_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!("Server started successfully");

        loop {
            tokio::select! {
                event = self.server_rx.recv() => {
                    match event {
                        Some(ServerEvent::PacketReceived { message, addr }) => {
                            debug!("{:?} from {}", message, addr);
                            self.handle_packet(message, addr).await;
                        },
                        Some(ServerEvent::MalformedPacket { addr, reason }) => {
                            self.handle_malformed(addr, reason).await;
                        },
                        Some(ServerEvent::ClientTimeout { client_id }) => {
                            self.handle_timeout(client_id).await;
                        },
                        Some(ServerEvent::Shutdown) | None => {
                            info!("Server shutting down");
                            break;
                        }
                    }
                },

                _ = poll_interval.tick() => {
                    self.tick(Instant::now()).await;
                },
            }
        }

        for task in self.tasks.drain(..) {
            task.abort();
        }

        Ok(())
    }
}
