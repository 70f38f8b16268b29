pub mod client;
pub mod keyframe;
pub mod server;
pub mod world;

pub use client::ClientReplicator;
pub use keyframe::KeyframeWindow;
pub use server::{ReplicationSources, ReplicationStats, ReplicationTarget, ServerReplicator};
pub use world::{
    DamageState, DamageStore, DirectionFlags, EntityStore, LevelMetadata, ResourceRelease,
    SpawnEvent, SpriteState, SpriteStore, TransformSink,
};
