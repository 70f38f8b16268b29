/// Per-tick timing handed to every manager and replicator.
///
/// `timestamp` is milliseconds since the owning process started ticking and
/// doubles as server time on the server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateContext {
    pub frame_count: u64,
    pub delta_ms: u32,
    pub timestamp: u32,
}

impl UpdateContext {
    pub fn new(frame_count: u64, delta_ms: u32, timestamp: u32) -> Self {
        Self {
            frame_count,
            delta_ms,
            timestamp,
        }
    }
}

/// Produces consecutive `UpdateContext`s for a fixed tick length.
#[derive(Debug, Clone)]
pub struct TickClock {
    frame_count: u64,
    timestamp: u32,
    tick_ms: u32,
}

impl TickClock {
    pub fn new(tick_rate: u32) -> Self {
        Self::with_tick_ms(1000 / tick_rate.max(1))
    }

    pub fn with_tick_ms(tick_ms: u32) -> Self {
        Self {
            frame_count: 0,
            timestamp: 0,
            tick_ms: tick_ms.max(1),
        }
    }

    pub fn tick_ms(&self) -> u32 {
        self.tick_ms
    }

    pub fn timestamp(&self) -> u32 {
        self.timestamp
    }

    pub fn advance(&mut self) -> UpdateContext {
        self.advance_by(self.tick_ms)
    }

    pub fn advance_by(&mut self, delta_ms: u32) -> UpdateContext {
        self.frame_count += 1;
        self.timestamp = self.timestamp.wrapping_add(delta_ms);
        UpdateContext::new(self.frame_count, delta_ms, self.timestamp)
    }
}

pub struct FixedTimestep {
    tick_rate: u32,
    dt: f32,
    accumulator: f32,
}

impl FixedTimestep {
    pub fn new(tick_rate: u32) -> Self {
        let tick_rate = tick_rate.max(1);
        Self {
            tick_rate,
            dt: 1.0 / tick_rate as f32,
            accumulator: 0.0,
        }
    }

    pub fn tick_rate(&self) -> u32 {
        self.tick_rate
    }

    pub fn dt(&self) -> f32 {
        self.dt
    }

    pub fn accumulate(&mut self, delta: f32) {
        self.accumulator += delta.min(0.25);
    }

    pub fn consume_tick(&mut self) -> bool {
        if self.accumulator >= self.dt {
            self.accumulator -= self.dt;
            true
        } else {
            false
        }
    }
}
