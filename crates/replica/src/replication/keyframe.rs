use crate::net::protocol::EntityId;

/// Sliding range of entity ids that are force-replicated this tick.
///
/// The window sweeps `0..capacity` and wraps, so every id is a keyframe at
/// least once per `ceil(capacity / size)` ticks.
#[derive(Debug, Clone)]
pub struct KeyframeWindow {
    low: u32,
    size: u32,
    capacity: u32,
}

impl KeyframeWindow {
    pub fn new(capacity: u32) -> Self {
        Self {
            low: 0,
            size: 1,
            capacity: capacity.max(1),
        }
    }

    /// Window size is `population / divisor`, never less than one id.
    pub fn resize(&mut self, population: usize, divisor: u32) {
        let size = population / divisor.max(1) as usize;
        self.size = (size as u32).clamp(1, self.capacity);
    }

    pub fn contains(&self, id: EntityId) -> bool {
        id >= self.low && id - self.low < self.size
    }

    pub fn advance(&mut self) {
        self.low += self.size;
        if self.low >= self.capacity {
            self.low = 0;
        }
    }

    pub fn low(&self) -> u32 {
        self.low
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn sweep_ticks(&self) -> u32 {
        self.capacity.div_ceil(self.size)
    }
}
