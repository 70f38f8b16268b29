use std::sync::Arc;

use super::Address;
use super::batch::{BatchedMessageSender, SendQueue};
use super::codec::MessageBuffer;
use super::connection::{ConnectionInfo, NetError, NetworkPipe, RemoteConnection};
use super::dispatcher::MessageDispatcher;
use super::protocol::{
    ConnectAcceptedMessage, ConnectMessage, DisconnectMessage, HeartBeatMessage, Message,
    PingMessage, ServerBeaconMessage, ServerQuitMessage,
};
use super::socket::{Socket, SocketFactory, udp_factory};
use crate::config::ClientConfig;
use crate::simulation::UpdateContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientStatus {
    Disconnected,
    Searching,
    FoundServer,
    Connected,
    Failed,
}

impl ClientStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClientStatus::Disconnected => "Disconnected",
            ClientStatus::Searching => "Searching",
            ClientStatus::FoundServer => "Found server",
            ClientStatus::Connected => "Connected",
            ClientStatus::Failed => "Failed",
        }
    }
}

/// A message from the server that the connection layer does not consume.
#[derive(Debug, Clone)]
pub struct Inbound {
    pub sender: Address,
    pub message: Message,
}

struct ClientState {
    status: ClientStatus,
    status_since: u32,
    server: Option<Address>,
    now: u32,
    last_traffic: u32,
    rtt: Option<u32>,
    server_time: Option<u32>,
    outbox: Vec<Message>,
    inbox: Vec<Inbound>,
}

impl ClientState {
    fn new() -> Self {
        Self {
            status: ClientStatus::Disconnected,
            status_since: 0,
            server: None,
            now: 0,
            last_traffic: 0,
            rtt: None,
            server_time: None,
            outbox: Vec::new(),
            inbox: Vec::new(),
        }
    }

    fn set_status(&mut self, status: ClientStatus) {
        if self.status == status {
            return;
        }
        log::info!("client {} -> {}", self.status.as_str(), status.as_str());
        self.status = status;
        self.status_since = self.now;
    }

    fn from_server(&mut self, sender: Address) -> bool {
        if self.server == Some(sender) {
            self.last_traffic = self.now;
            true
        } else {
            false
        }
    }

    fn forget_server(&mut self) {
        self.server = None;
        self.rtt = None;
        self.server_time = None;
        self.outbox.clear();
    }
}

fn register_handlers(dispatcher: &mut MessageDispatcher<ClientState>) {
    dispatcher.register(|state: &mut ClientState, beacon: ServerBeaconMessage, from| {
        if state.status != ClientStatus::Searching {
            state.from_server(from);
            return;
        }
        if !beacon.is_compatible() {
            log::debug!("ignoring beacon from {} with magic {:#x}", from, beacon.protocol_magic);
            return;
        }

        log::info!("found server at {}", from);
        state.server = Some(from);
        state.last_traffic = state.now;
        state.set_status(ClientStatus::FoundServer);
        state.outbox.push(ConnectMessage::default().into());
    });
    dispatcher.register(|state: &mut ClientState, accepted: ConnectAcceptedMessage, from| {
        if state.status == ClientStatus::FoundServer && state.from_server(from) {
            state.server_time.get_or_insert(accepted.server_time);
            state.set_status(ClientStatus::Connected);
        }
    });
    dispatcher.register(|state: &mut ClientState, pong: PingMessage, from| {
        if !state.from_server(from) {
            return;
        }
        let rtt = state.now.wrapping_sub(pong.local_time_stamp);
        state.rtt = Some(rtt);
        state.server_time = Some(pong.server_time.wrapping_add(rtt / 2));
        log::debug!("rtt {} ms, server time {}", rtt, pong.server_time);
    });
    dispatcher.register(|state: &mut ClientState, _: ServerQuitMessage, from| {
        if state.from_server(from) {
            log::info!("server {} quit", from);
            state.forget_server();
            state.set_status(ClientStatus::Disconnected);
        }
    });
    dispatcher.register_fallback(|state: &mut ClientState, message, from| {
        if state.status == ClientStatus::Connected && state.from_server(from) {
            state.inbox.push(Inbound {
                sender: from,
                message,
            });
        } else {
            log::debug!("ignoring {} from {}", message.name(), from);
        }
    });
}

/// Client side of the connection lifecycle: finds a server through its
/// beacons, connects, keeps the link alive and retries on failure.
pub struct ClientManager {
    config: ClientConfig,
    dispatcher: MessageDispatcher<ClientState>,
    state: ClientState,
    connection: Option<RemoteConnection>,
    factory: SocketFactory,
}

impl ClientManager {
    pub fn new(config: ClientConfig) -> Self {
        Self::with_socket_factory(config, udp_factory())
    }

    pub fn with_socket_factory(config: ClientConfig, factory: SocketFactory) -> Self {
        let mut dispatcher = MessageDispatcher::new();
        register_handlers(&mut dispatcher);

        Self {
            config,
            dispatcher,
            state: ClientState::new(),
            connection: None,
            factory,
        }
    }

    pub fn start(&mut self) -> Result<(), NetError> {
        if self.connection.is_some() {
            return Ok(());
        }

        let socket = self.open_socket()?;
        let connection = RemoteConnection::open(
            socket,
            self.dispatcher.queue(),
            self.config.compress_payloads,
        )?;
        log::info!("client listening for beacons on {}", connection.local_addr());

        self.connection = Some(connection);
        self.state.forget_server();
        self.state.set_status(ClientStatus::Searching);
        Ok(())
    }

    fn open_socket(&mut self) -> Result<Arc<dyn Socket>, NetError> {
        if self.config.client_port != 0 {
            return Ok((self.factory)(self.config.client_port)?);
        }

        let (start, end) = (self.config.port_range_start, self.config.port_range_end);
        for port in start..=end {
            match (self.factory)(port) {
                Ok(socket) => return Ok(socket),
                Err(e) => log::debug!("port {} unavailable: {}", port, e),
            }
        }
        Err(NetError::NoFreePort { start, end })
    }

    pub fn update(&mut self, ctx: &UpdateContext) {
        self.state.now = ctx.timestamp;
        if let Some(server_time) = self.state.server_time.as_mut() {
            *server_time = server_time.wrapping_add(ctx.delta_ms);
        }

        if self.connection.is_none() {
            return;
        }

        self.dispatcher.update(&mut self.state);
        self.check_timers();

        if self.state.status == ClientStatus::Connected {
            if is_due(ctx.frame_count, self.config.heartbeat_interval_frames) {
                self.state.outbox.push(HeartBeatMessage::default().into());
            }
            if is_due(ctx.frame_count, self.config.ping_interval_frames) {
                self.state.outbox.push(
                    PingMessage {
                        message_id: 0,
                        local_time_stamp: self.state.now,
                        server_time: 0,
                    }
                    .into(),
                );
            }
        }

        self.flush_outbox();

        if self.state.status == ClientStatus::Disconnected {
            self.connection = None;
        }
    }

    fn check_timers(&mut self) {
        let state = &mut self.state;
        let in_status = state.now.wrapping_sub(state.status_since);

        match state.status {
            ClientStatus::Searching | ClientStatus::FoundServer
                if in_status > self.config.search_timeout_ms =>
            {
                log::warn!("no server found within {} ms", self.config.search_timeout_ms);
                state.forget_server();
                state.set_status(ClientStatus::Failed);
            }
            ClientStatus::Failed if in_status >= self.config.failed_retry_ms => {
                state.set_status(ClientStatus::Searching);
            }
            ClientStatus::Connected
                if state.now.wrapping_sub(state.last_traffic) > self.config.connection_timeout_ms =>
            {
                log::warn!(
                    "no traffic from server for {} ms",
                    self.config.connection_timeout_ms
                );
                state.forget_server();
                state.set_status(ClientStatus::Failed);
            }
            _ => {}
        }
    }

    fn flush_outbox(&mut self) {
        let Some(server) = self.state.server else {
            self.state.outbox.clear();
            return;
        };
        if self.state.outbox.is_empty() {
            return;
        }

        let mut queue = SendQueue::new();
        {
            let mut sender = BatchedMessageSender::new(server, &mut queue);
            for message in self.state.outbox.drain(..) {
                sender.send_message(&message);
            }
        }

        while let Some(mut batch) = queue.pop() {
            if let Err(e) = self.send_to(&mut batch.buffer, batch.addr) {
                log::warn!("failed to send to server {}: {}", batch.addr, e);
            }
        }
    }

    /// Sends immediately; only valid while connected.
    pub fn send_message(&mut self, message: impl Into<Message>) -> Result<usize, NetError> {
        let server = match (self.state.status, self.state.server) {
            (ClientStatus::Connected, Some(server)) => server,
            _ => return Err(NetError::NotConnected),
        };

        let message = message.into();
        let mut buffer = MessageBuffer::new();
        message.encode_into(&mut buffer);
        self.send_to(&mut buffer, server)
    }

    /// Leaves any state for `Disconnected`, telling the server first when
    /// connected.
    pub fn disconnect(&mut self) {
        if self.state.status == ClientStatus::Connected {
            if let Err(e) = self.send_message(DisconnectMessage::default()) {
                log::warn!("failed to send disconnect: {}", e);
            }
        }
        self.state.forget_server();
        self.state.set_status(ClientStatus::Disconnected);
        self.connection = None;
    }

    pub fn status(&self) -> ClientStatus {
        self.state.status
    }

    pub fn status_str(&self) -> &'static str {
        self.state.status.as_str()
    }

    pub fn is_connected(&self) -> bool {
        self.state.status == ClientStatus::Connected
    }

    pub fn server_address(&self) -> Option<Address> {
        self.state.server
    }

    pub fn local_addr(&self) -> Option<Address> {
        self.connection.as_ref().map(RemoteConnection::local_addr)
    }

    pub fn rtt(&self) -> Option<u32> {
        self.state.rtt
    }

    pub fn server_time(&self) -> Option<u32> {
        self.state.server_time
    }

    /// Server time to render at, held back by the configured offset so
    /// interpolation has a sample on each side. 0 while unknown.
    pub fn server_time_predicted(&self) -> u32 {
        self.state
            .server_time
            .map_or(0, |t| t.saturating_sub(self.config.client_time_offset_ms))
    }

    pub fn drain_messages(&mut self) -> Vec<Inbound> {
        std::mem::take(&mut self.state.inbox)
    }
}

fn is_due(frame_count: u64, interval: u64) -> bool {
    interval > 0 && frame_count % interval == 0
}

impl NetworkPipe for ClientManager {
    fn send_to(&mut self, buffer: &mut MessageBuffer, addr: Address) -> Result<usize, NetError> {
        let connection = self.connection.as_mut().ok_or(NetError::NotConnected)?;
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
            clients: self.state.server.iter().map(|a| a.to_string()).collect(),
        }
    }
}

impl Drop for ClientManager {
    fn drop(&mut self) {
        self.disconnect();
    }
}
