use std::sync::atomic::{AtomicU64, Ordering};

/// Counters shared between the receive thread and the sending side.
#[derive(Debug, Default)]
pub struct ConnectionStats {
    packages_sent: AtomicU64,
    packages_received: AtomicU64,
    packages_dropped: AtomicU64,
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
    wire_bytes_sent: AtomicU64,
    wire_bytes_received: AtomicU64,
}

impl ConnectionStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// `raw` is the uncompressed datagram size, `wire` what hit the socket.
    pub fn record_sent(&self, raw: usize, wire: usize) {
        self.packages_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(raw as u64, Ordering::Relaxed);
        self.wire_bytes_sent.fetch_add(wire as u64, Ordering::Relaxed);
    }

    pub fn record_received(&self, raw: usize, wire: usize) {
        self.packages_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(raw as u64, Ordering::Relaxed);
        self.wire_bytes_received
            .fetch_add(wire as u64, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.packages_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            packages_sent: self.packages_sent.load(Ordering::Relaxed),
            packages_received: self.packages_received.load(Ordering::Relaxed),
            packages_dropped: self.packages_dropped.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            wire_bytes_sent: self.wire_bytes_sent.load(Ordering::Relaxed),
            wire_bytes_received: self.wire_bytes_received.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub packages_sent: u64,
    pub packages_received: u64,
    pub packages_dropped: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub wire_bytes_sent: u64,
    pub wire_bytes_received: u64,
}

impl StatsSnapshot {
    /// Wire bytes over raw bytes for outgoing traffic; 1.0 when nothing was sent.
    pub fn send_compression_ratio(&self) -> f32 {
        if self.bytes_sent == 0 {
            return 1.0;
        }
        self.wire_bytes_sent as f32 / self.bytes_sent as f32
    }
}

#[derive(Debug, Clone, Default)]
pub struct PacketLossSimulation {
    pub enabled: bool,
    pub loss_percent: f32,
    pub min_latency_ms: u32,
    pub max_latency_ms: u32,
    pub jitter_ms: u32,
}

impl PacketLossSimulation {
    pub fn lossy(loss_percent: f32) -> Self {
        Self {
            enabled: true,
            loss_percent,
            ..Default::default()
        }
    }

    pub fn should_drop(&self) -> bool {
        if !self.enabled || self.loss_percent <= 0.0 {
            return false;
        }
        self.loss_percent >= 100.0 || rand_percent() * 100.0 < self.loss_percent
    }

    pub fn delay_ms(&self) -> u32 {
        if !self.enabled || self.max_latency_ms == 0 {
            return 0;
        }
        let range = self.max_latency_ms.saturating_sub(self.min_latency_ms);
        let jitter = (rand_percent() * self.jitter_ms as f32) as u32;
        self.min_latency_ms + (rand_percent() * range as f32) as u32 + jitter
    }
}

pub fn rand_percent() -> f32 {
    rand_u64() as f32 / u64::MAX as f32
}

pub fn rand_u64() -> u64 {
    use std::collections::hash_map::RandomState;
    use std::hash::{BuildHasher, Hasher};
    use std::time::Instant;

    let mut hasher = RandomState::new().build_hasher();
    hasher.write_u128(Instant::now().elapsed().as_nanos());
    hasher.finish()
}
