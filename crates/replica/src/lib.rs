pub mod config;
pub mod math;
pub mod net;
pub mod prediction;
pub mod replication;
pub mod simulation;

pub use config::{ClientConfig, ConfigError, NetConfig, ReplicationConfig, ServerConfig};
pub use math::Quad;
pub use net::{
    Address, ClientManager, ClientRecord, ClientStatus, CodecError, DisconnectReason, EntityId,
    Inbound, LoopbackNetwork, Message, MessageBuffer, MessageDispatcher, NetError, NetworkPipe,
    PacketLossSimulation, ServerEvent, ServerManager, ServerStatus,
};
pub use prediction::{PositionPrediction, PredictionBuffer, RemoteTransform, SpawnPrediction};
pub use replication::{
    ClientReplicator, DamageStore, EntityStore, KeyframeWindow, ReplicationSources,
    ReplicationStats, ReplicationTarget, ResourceRelease, ServerReplicator, SpriteStore,
    TransformSink,
};
pub use simulation::{FixedTimestep, TickClock, UpdateContext};
