use bitflags::bitflags;
use glam::{Affine2, Vec2};

use crate::math::Quad;
use crate::net::protocol::EntityId;

bitflags! {
    /// Facing and mirroring flags carried in `SpriteMessage::properties`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct DirectionFlags: u32 {
        const FACING_LEFT = 1 << 0;
        const FACING_UP = 1 << 1;
        const FLIP_X = 1 << 2;
        const FLIP_Y = 1 << 3;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpawnEvent {
    pub entity: EntityId,
    pub spawn: bool,
    pub timestamp: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SpriteState {
    pub sprite_hash: u32,
    pub hex_color: u32,
    pub animation_id: i32,
    pub direction: DirectionFlags,
    pub layer: i32,
    pub shadow_offset: Vec2,
    pub shadow_size: f32,
}

impl SpriteState {
    /// Fields that trigger a resend when they change.
    pub fn same_look(&self, other: &SpriteState) -> bool {
        self.animation_id == other.animation_id
            && self.sprite_hash == other.sprite_hash
            && self.hex_color == other.hex_color
            && self.direction == other.direction
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DamageState {
    pub health: i32,
    pub full_health: i32,
    pub last_damage: u32,
    pub is_boss: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LevelMetadata {
    pub camera_position: Vec2,
    pub camera_size: Vec2,
    pub background_texture_hash: u32,
    pub world_file_hash: u32,
}

/// Read-only view of the authoritative world.
pub trait EntityStore {
    fn for_each_live_entity(&self, f: &mut dyn FnMut(EntityId));

    fn world_transform(&self, id: EntityId) -> Option<Affine2>;

    fn world_bounding_box(&self, id: EntityId) -> Option<Quad>;

    fn parent(&self, id: EntityId) -> Option<EntityId>;

    /// Spawns and despawns recorded since the previous replication tick.
    fn spawn_events(&self) -> &[SpawnEvent];

    fn level_metadata(&self) -> LevelMetadata {
        LevelMetadata::default()
    }
}

pub trait SpriteStore {
    fn sprite(&self, id: EntityId) -> Option<SpriteState>;
}

pub trait DamageStore {
    fn damage(&self, id: EntityId) -> Option<DamageState>;
}

/// Client-side destination for predicted transforms.
pub trait TransformSink {
    fn set_transform(&mut self, id: EntityId, position: Vec2, rotation: f32);

    fn set_parent(&mut self, id: EntityId, parent: Option<EntityId>);
}

/// Client-side resources freed when a despawn takes effect.
pub trait ResourceRelease {
    fn release_sprite(&mut self, id: EntityId) -> bool;

    fn release_damage_record(&mut self, id: EntityId) -> bool;
}
