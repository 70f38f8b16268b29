use super::buffer::{PredictionBuffer, RemoteTransform};
use crate::net::protocol::{EntityId, TransformMessage};
use crate::replication::world::TransformSink;

/// Per-entity prediction buffers, indexed by entity id.
pub struct PositionPrediction {
    buffers: Vec<PredictionBuffer>,
    stale_samples: u64,
}

impl PositionPrediction {
    pub fn new(max_entities: u32) -> Self {
        Self {
            buffers: vec![PredictionBuffer::new(); max_entities as usize],
            stale_samples: 0,
        }
    }

    /// Buffers an authoritative sample. Stale or out-of-range samples are
    /// dropped and logged.
    pub fn handle_transform(&mut self, message: &TransformMessage) -> bool {
        let Some(buffer) = self.buffers.get_mut(message.entity_id as usize) else {
            log::debug!("transform for out of range entity {}", message.entity_id);
            return false;
        };

        if buffer.insert(RemoteTransform::from(message)) {
            return true;
        }

        self.stale_samples += 1;
        log::debug!(
            "dropping stale transform for entity {} at {}",
            message.entity_id,
            message.timestamp
        );
        false
    }

    /// Writes the interpolated pose of every entity that has a bracketing
    /// pair at `server_time`. Returns the number of entities written.
    pub fn update(&mut self, server_time: u32, sink: &mut dyn TransformSink) -> usize {
        if server_time == 0 {
            return 0;
        }

        let mut written = 0;
        for (id, buffer) in self.buffers.iter_mut().enumerate() {
            if buffer.len() < 2 {
                continue;
            }
            if let Some(pose) = buffer.predict(server_time) {
                let id = id as EntityId;
                sink.set_transform(id, pose.position, pose.rotation);
                sink.set_parent(id, pose.parent);
                written += 1;
            }
        }
        written
    }

    pub fn clear_entity(&mut self, id: EntityId) {
        if let Some(buffer) = self.buffers.get_mut(id as usize) {
            buffer.clear();
        }
    }

    /// Forgets every entity's history.
    pub fn clear(&mut self) {
        self.buffers.iter_mut().for_each(PredictionBuffer::clear);
    }

    pub fn buffer(&self, id: EntityId) -> Option<&PredictionBuffer> {
        self.buffers.get(id as usize)
    }

    pub fn stale_samples(&self) -> u64 {
        self.stale_samples
    }
}
