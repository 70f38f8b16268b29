use std::collections::VecDeque;

use glam::Vec2;

use crate::math;
use crate::net::protocol::{EntityId, TransformMessage};

pub const PREDICTION_BUFFER_SIZE: usize = 8;

/// One authoritative transform sample as received from the server.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RemoteTransform {
    pub timestamp: u32,
    pub position: Vec2,
    pub rotation: f32,
    pub parent: Option<EntityId>,
}

impl From<&TransformMessage> for RemoteTransform {
    fn from(message: &TransformMessage) -> Self {
        Self {
            timestamp: message.timestamp,
            position: Vec2::from_array(message.position),
            rotation: message.rotation,
            parent: message.parent(),
        }
    }
}

/// Ring of the most recent samples for one entity, strictly ordered by
/// timestamp.
#[derive(Debug, Clone, Default)]
pub struct PredictionBuffer {
    samples: VecDeque<RemoteTransform>,
    predicted: Option<RemoteTransform>,
}

impl PredictionBuffer {
    pub fn new() -> Self {
        Self {
            samples: VecDeque::with_capacity(PREDICTION_BUFFER_SIZE),
            predicted: None,
        }
    }

    /// Returns false when the sample is not newer than the newest one held.
    pub fn insert(&mut self, sample: RemoteTransform) -> bool {
        if let Some(newest) = self.samples.back() {
            if sample.timestamp <= newest.timestamp {
                return false;
            }
        }

        if self.samples.len() == PREDICTION_BUFFER_SIZE {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
        true
    }

    pub fn newest(&self) -> Option<&RemoteTransform> {
        self.samples.back()
    }

    pub fn samples(&self) -> impl Iterator<Item = &RemoteTransform> {
        self.samples.iter()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
        self.predicted = None;
    }

    /// Last pose produced by [`PredictionBuffer::predict`].
    pub fn predicted(&self) -> Option<RemoteTransform> {
        self.predicted
    }

    /// Interpolates between the last sample at or before `time` and the first
    /// one after it. `None` until such a pair exists.
    pub fn predict(&mut self, time: u32) -> Option<RemoteTransform> {
        let to_index = self.samples.iter().position(|s| s.timestamp > time)?;
        let from = self.samples.get(to_index.checked_sub(1)?)?;
        let to = &self.samples[to_index];

        let span = (to.timestamp - from.timestamp) as f32;
        let t = (time - from.timestamp) as f32 / span;

        let pose = RemoteTransform {
            timestamp: time,
            position: from.position.lerp(to.position, t),
            rotation: math::lerp(from.rotation, to.rotation, t),
            parent: from.parent,
        };
        self.predicted = Some(pose);
        Some(pose)
    }
}
