use std::collections::HashMap;

use glam::Vec2;

use replica::net::protocol::{DamageInfoMessage, LevelMetadataMessage, SpriteMessage};
use replica::replication::{DamageState, DirectionFlags, LevelMetadata, SpriteState};
use replica::{EntityId, Quad, ResourceRelease, TransformSink};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pose {
    pub position: Vec2,
    pub rotation: f32,
    pub parent: Option<EntityId>,
}

/// Client-side mirror of what the server replicates.
#[derive(Debug, Default)]
pub struct ClientWorld {
    poses: HashMap<EntityId, Pose>,
    sprites: HashMap<EntityId, SpriteState>,
    damage: HashMap<EntityId, DamageState>,
    level: Option<LevelMetadata>,
}

impl ClientWorld {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply_sprite(&mut self, message: &SpriteMessage) {
        self.sprites.insert(
            message.entity_id,
            SpriteState {
                sprite_hash: message.sprite_hash,
                hex_color: message.hex_color,
                animation_id: message.animation_id,
                direction: DirectionFlags::from_bits_truncate(message.properties),
                layer: message.layer,
                shadow_offset: Vec2::from_array(message.shadow_offset),
                shadow_size: message.shadow_size,
            },
        );
    }

    pub fn apply_damage(&mut self, message: &DamageInfoMessage) {
        self.damage.insert(
            message.entity_id,
            DamageState {
                health: message.health,
                full_health: message.full_health,
                last_damage: message.damage_timestamp,
                is_boss: message.is_boss != 0,
            },
        );
    }

    pub fn apply_level(&mut self, message: &LevelMetadataMessage) {
        let level = LevelMetadata {
            camera_position: Vec2::from_array(message.camera_position),
            camera_size: Vec2::from_array(message.camera_size),
            background_texture_hash: message.background_texture_hash,
            world_file_hash: message.world_file_hash,
        };
        log::info!(
            "level {:#010x}, background {:#010x}",
            level.world_file_hash,
            level.background_texture_hash
        );
        self.level = Some(level);
    }

    /// Camera rectangle from the level metadata, if any has arrived.
    pub fn camera(&self) -> Option<Quad> {
        self.level
            .map(|level| Quad::from_center(level.camera_position, level.camera_size))
    }

    pub fn visible_count(&self) -> usize {
        self.sprites.len()
    }

    pub fn clear(&mut self) {
        self.poses.clear();
        self.sprites.clear();
        self.damage.clear();
        self.level = None;
    }
}

impl TransformSink for ClientWorld {
    fn set_transform(&mut self, id: EntityId, position: Vec2, rotation: f32) {
        let pose = self.poses.entry(id).or_insert(Pose {
            position,
            rotation,
            parent: None,
        });
        pose.position = position;
        pose.rotation = rotation;
    }

    fn set_parent(&mut self, id: EntityId, parent: Option<EntityId>) {
        if let Some(pose) = self.poses.get_mut(&id) {
            pose.parent = parent;
        }
    }
}

impl ResourceRelease for ClientWorld {
    fn release_sprite(&mut self, id: EntityId) -> bool {
        self.poses.remove(&id);
        self.sprites.remove(&id).is_some()
    }

    fn release_damage_record(&mut self, id: EntityId) -> bool {
        self.damage.remove(&id).is_some()
    }
}
