use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::Arc;

use super::Address;
use super::batch::{BatchedMessageSender, SendQueue};
use super::codec::MessageBuffer;
use super::connection::{ConnectionInfo, NetError, NetworkPipe, RemoteConnection};
use super::dispatcher::MessageDispatcher;
use super::protocol::{
    ConnectAcceptedMessage, ConnectMessage, DisconnectMessage, HeartBeatMessage, Message,
    PingMessage, ServerBeaconMessage, ServerQuitMessage, ViewportMessage, WireMessage,
};
use super::socket::{Socket, bind_udp};
use crate::config::ServerConfig;
use crate::math::Quad;
use crate::simulation::UpdateContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerStatus {
    Idle,
    Listening,
}

impl ServerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServerStatus::Idle => "Idle",
            ServerStatus::Listening => "Listening",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClientRecord {
    pub addr: Address,
    pub connected_at: u32,
    pub last_heartbeat: u32,
    /// `None` until the client uploads one; nothing is culled meanwhile.
    pub viewport: Option<Quad>,
}

#[derive(Debug, Clone)]
pub enum ServerEvent {
    ClientConnected {
        addr: Address,
    },
    ClientDisconnected {
        addr: Address,
        reason: DisconnectReason,
    },
    /// A message from a connected client with no built-in handling.
    Message {
        addr: Address,
        message: Message,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    Graceful,
    Timeout,
    Shutdown,
}

impl DisconnectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DisconnectReason::Graceful => "disconnected",
            DisconnectReason::Timeout => "timed out",
            DisconnectReason::Shutdown => "server shut down",
        }
    }
}

#[derive(Default)]
struct ServerState {
    clients: HashMap<Address, ClientRecord>,
    events: VecDeque<ServerEvent>,
    outbox: Vec<(Address, Message)>,
    now: u32,
}

impl ServerState {
    fn on_connect(&mut self, addr: Address) {
        if self.clients.contains_key(&addr) {
            return;
        }

        self.clients.insert(
            addr,
            ClientRecord {
                addr,
                connected_at: self.now,
                last_heartbeat: self.now,
                viewport: None,
            },
        );
        self.outbox.push((
            addr,
            ConnectAcceptedMessage {
                message_id: 0,
                server_time: self.now,
            }
            .into(),
        ));
        self.events.push_back(ServerEvent::ClientConnected { addr });
        log::info!("client {} connected ({} total)", addr, self.clients.len());
    }

    fn on_disconnect(&mut self, addr: Address) {
        if self.clients.remove(&addr).is_some() {
            self.events.push_back(ServerEvent::ClientDisconnected {
                addr,
                reason: DisconnectReason::Graceful,
            });
            log::info!("client {} disconnected", addr);
        }
    }

    fn purge_timed_out(&mut self, timeout_ms: u32) {
        let now = self.now;
        let expired: Vec<Address> = self
            .clients
            .values()
            .filter(|c| now.wrapping_sub(c.last_heartbeat) > timeout_ms)
            .map(|c| c.addr)
            .collect();

        for addr in expired {
            self.clients.remove(&addr);
            self.events.push_back(ServerEvent::ClientDisconnected {
                addr,
                reason: DisconnectReason::Timeout,
            });
            log::info!("client {} timed out", addr);
        }
    }
}

fn register_handlers(dispatcher: &mut MessageDispatcher<ServerState>) {
    dispatcher.register(|state: &mut ServerState, _: ConnectMessage, from| {
        state.on_connect(from);
    });
    dispatcher.register(|state: &mut ServerState, _: DisconnectMessage, from| {
        state.on_disconnect(from);
    });
    dispatcher.register(|state: &mut ServerState, _: HeartBeatMessage, from| {
        if let Some(client) = state.clients.get_mut(&from) {
            client.last_heartbeat = state.now;
        }
    });
    dispatcher.register(|state: &mut ServerState, ping: PingMessage, from| {
        let pong = PingMessage {
            server_time: state.now,
            ..ping
        };
        state.outbox.push((from, pong.into()));
    });
    dispatcher.register(|state: &mut ServerState, viewport: ViewportMessage, from| {
        if let Some(client) = state.clients.get_mut(&from) {
            client.viewport = Some(Quad::from_array(viewport.viewport));
        }
    });
    dispatcher.register(|_: &mut ServerState, _: ServerBeaconMessage, _| {});
    dispatcher.register_fallback(|state: &mut ServerState, message, from| {
        if state.clients.contains_key(&from) {
            state.events.push_back(ServerEvent::Message {
                addr: from,
                message,
            });
        } else {
            log::debug!("ignoring {} from unknown {}", message.name(), from);
        }
    });
}

/// Authoritative side of the connection lifecycle: accepts clients,
/// purges silent ones and advertises itself with periodic beacons.
pub struct ServerManager {
    config: ServerConfig,
    status: ServerStatus,
    dispatcher: MessageDispatcher<ServerState>,
    state: ServerState,
    connection: Option<RemoteConnection>,
    beacon_elapsed: u32,
}

impl ServerManager {
    pub fn new(config: ServerConfig) -> Self {
        let mut dispatcher = MessageDispatcher::new();
        register_handlers(&mut dispatcher);

        Self {
            config,
            status: ServerStatus::Idle,
            dispatcher,
            state: ServerState::default(),
            connection: None,
            beacon_elapsed: 0,
        }
    }

    pub fn start(&mut self) -> Result<(), NetError> {
        let socket = bind_udp(self.config.server_port)?;
        self.start_with_socket(socket)
    }

    pub fn start_with_socket(&mut self, socket: Arc<dyn Socket>) -> Result<(), NetError> {
        if self.status == ServerStatus::Listening {
            return Ok(());
        }

        let connection = RemoteConnection::open(
            socket,
            self.dispatcher.queue(),
            self.config.compress_payloads,
        )?;
        log::info!("server listening on {}", connection.local_addr());

        self.connection = Some(connection);
        self.status = ServerStatus::Listening;
        self.beacon_elapsed = self.config.beacon_interval_ms;
        Ok(())
    }

    pub fn update(&mut self, ctx: &UpdateContext) {
        if self.status != ServerStatus::Listening {
            return;
        }

        self.state.now = ctx.timestamp;
        self.state.purge_timed_out(self.config.heartbeat_timeout_ms);

        self.dispatcher.update(&mut self.state);
        self.flush_outbox();

        self.beacon_elapsed = self.beacon_elapsed.saturating_add(ctx.delta_ms);
        if self.beacon_elapsed >= self.config.beacon_interval_ms {
            self.beacon_elapsed = 0;
            self.send_to_beacon_targets(&ServerBeaconMessage::new(self.state.now));
        }
    }

    /// Tells every client and the beacon targets that the server is going
    /// away, then returns to `Idle`.
    pub fn quit(&mut self) {
        if self.status != ServerStatus::Listening {
            return;
        }

        let quit = ServerQuitMessage::default();
        let addrs: Vec<Address> = self.state.clients.keys().copied().collect();
        for addr in addrs {
            self.send_single(&quit, addr);
            self.state.events.push_back(ServerEvent::ClientDisconnected {
                addr,
                reason: DisconnectReason::Shutdown,
            });
        }
        self.send_to_beacon_targets(&quit);

        self.state.clients.clear();
        self.state.outbox.clear();
        self.connection = None;
        self.status = ServerStatus::Idle;
        log::info!("server stopped");
    }

    pub fn status(&self) -> ServerStatus {
        self.status
    }

    pub fn is_listening(&self) -> bool {
        self.status == ServerStatus::Listening
    }

    pub fn server_time(&self) -> u32 {
        self.state.now
    }

    pub fn local_addr(&self) -> Option<Address> {
        self.connection.as_ref().map(RemoteConnection::local_addr)
    }

    pub fn clients(&self) -> impl Iterator<Item = &ClientRecord> {
        self.state.clients.values()
    }

    pub fn client(&self, addr: &Address) -> Option<&ClientRecord> {
        self.state.clients.get(addr)
    }

    pub fn client_count(&self) -> usize {
        self.state.clients.len()
    }

    pub fn drain_events(&mut self) -> impl Iterator<Item = ServerEvent> + '_ {
        self.state.events.drain(..)
    }

    fn flush_outbox(&mut self) {
        if self.state.outbox.is_empty() {
            return;
        }

        let mut by_addr: HashMap<Address, Vec<Message>> = HashMap::new();
        for (addr, message) in self.state.outbox.drain(..) {
            by_addr.entry(addr).or_default().push(message);
        }

        let mut queue = SendQueue::new();
        for (addr, messages) in by_addr {
            let mut sender = BatchedMessageSender::new(addr, &mut queue);
            for message in &messages {
                sender.send_message(message);
            }
        }

        while let Some(mut batch) = queue.pop() {
            if let Err(e) = self.send_to(&mut batch.buffer, batch.addr) {
                log::warn!("failed to send to {}: {}", batch.addr, e);
            }
        }
    }

    fn send_single<T: WireMessage>(&mut self, message: &T, addr: Address) {
        let mut buffer = MessageBuffer::new();
        buffer.push(message);
        if let Err(e) = self.send_to(&mut buffer, addr) {
            log::warn!("failed to send {} to {}: {}", T::NAME, addr, e);
        }
    }

    fn send_to_beacon_targets<T: WireMessage>(&mut self, message: &T) {
        for port in self.config.beacon_ports() {
            let addr = SocketAddr::new(self.config.beacon_host, port);
            self.send_single(message, addr);
        }
    }
}

impl NetworkPipe for ServerManager {
    fn send_to(&mut self, buffer: &mut MessageBuffer, addr: Address) -> Result<usize, NetError> {
        let connection = self.connection.as_mut().ok_or(NetError::NotListening)?;
        connection.send_to(buffer, addr)
    }

    fn connection_info(&self) -> ConnectionInfo {
        ConnectionInfo {
            local_addr: self.local_addr(),
            stats: self
                .connection
                .as_ref()
                .map(RemoteConnection::stats)
                .unwrap_or_default(),
            clients: self.state.clients.keys().map(|a| a.to_string()).collect(),
        }
    }
}

impl Drop for ServerManager {
    fn drop(&mut self) {
        self.quit();
    }
}
