pub mod batch;
pub mod client;
pub mod codec;
pub mod connection;
pub mod dispatcher;
pub mod protocol;
pub mod server;
pub mod simulator;
pub mod socket;
pub mod stats;

/// Transport endpoint; the key for all per-client bookkeeping.
pub type Address = std::net::SocketAddr;

pub use batch::{BatchedMessageSender, OutgoingBatch, SendQueue};
pub use client::{ClientManager, ClientStatus, Inbound};
pub use codec::{
    BATCH_HEADER_SIZE, BATCH_PAYLOAD_CAPACITY, BATCH_TOTAL_SIZE, BatchHeader, CodecError,
    MessageBuffer, deserialize, peek_type, serialize, serialize_into, unpack_batch,
};
pub use connection::{ConnectionInfo, NetError, NetworkPipe, RemoteConnection};
pub use dispatcher::{Datagram, DispatchQueue, DispatchStats, MessageDispatcher};
pub use protocol::{EntityId, Message, NO_PARENT, PROTOCOL_MAGIC, WireMessage};
pub use server::{ClientRecord, DisconnectReason, ServerEvent, ServerManager, ServerStatus};
pub use simulator::LoopbackNetwork;
pub use socket::{Socket, SocketFactory, bind_udp, udp_factory};
pub use stats::{ConnectionStats, PacketLossSimulation, StatsSnapshot};
