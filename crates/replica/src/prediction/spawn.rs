use super::position::PositionPrediction;
use crate::net::protocol::{EntityId, SpawnMessage};
use crate::replication::world::ResourceRelease;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingDespawn {
    pub entity: EntityId,
    pub timestamp: u32,
}

/// Holds despawns back until the predicted server clock reaches them, so an
/// entity finishes its buffered motion before it disappears.
#[derive(Debug, Default)]
pub struct SpawnPrediction {
    pending: Vec<PendingDespawn>,
}

impl SpawnPrediction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle_spawn(&mut self, message: &SpawnMessage, positions: &mut PositionPrediction) {
        let entity = message.entity_id;
        self.pending.retain(|p| p.entity != entity);

        if message.is_spawn() {
            positions.clear_entity(entity);
            log::debug!("entity {} spawned at {}", entity, message.timestamp);
        } else {
            self.pending.push(PendingDespawn {
                entity,
                timestamp: message.timestamp,
            });
        }
    }

    /// Retires every despawn due at `server_time` and returns their ids.
    pub fn update(
        &mut self,
        server_time: u32,
        positions: &mut PositionPrediction,
        release: &mut dyn ResourceRelease,
    ) -> Vec<EntityId> {
        if server_time == 0 {
            return Vec::new();
        }

        let mut retired = Vec::new();
        self.pending.retain(|p| {
            if p.timestamp > server_time {
                return true;
            }
            release.release_sprite(p.entity);
            release.release_damage_record(p.entity);
            positions.clear_entity(p.entity);
            retired.push(p.entity);
            false
        });

        if !retired.is_empty() {
            log::debug!("despawned {:?} at {}", retired, server_time);
        }
        retired
    }

    /// Drops every pending despawn without releasing anything.
    pub fn clear(&mut self) {
        self.pending.clear();
    }

    pub fn pending(&self) -> &[PendingDespawn] {
        &self.pending
    }
}
