use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Artificial loss and latency applied to one direction of a link.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
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
        rand_percent() * 100.0 < self.loss_percent
    }

    pub fn delay(&self) -> Duration {
        if !self.enabled || self.max_latency_ms == 0 {
            return Duration::ZERO;
        }
        let base = self.min_latency_ms;
        let range = self.max_latency_ms.saturating_sub(self.min_latency_ms);
        let jitter = if self.jitter_ms > 0 {
            (rand_percent() * self.jitter_ms as f32) as u32
        } else {
            0
        };
        Duration::from_millis((base + (rand_percent() * range as f32) as u32 + jitter) as u64)
    }
}

/// Observable counters of one channel, refreshed by `compute_stats`.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct NetworkStats {
    pub packets_sent: u64,
    pub packets_received: u64,
    pub packets_lost: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub rtt_ms: f32,
    pub rtt_variance: f32,
    pub packet_loss_percent: f32,
    pub sent_kbps: f32,
    pub received_kbps: f32,
}

/// Byte counts accumulated between two `compute_stats` calls.
#[derive(Debug)]
pub(crate) struct ThroughputWindow {
    started: Instant,
    sent_bytes: u64,
    received_bytes: u64,
    sent_packets: u64,
    lost_packets: u64,
}

impl ThroughputWindow {
    pub fn new(now: Instant) -> Self {
        Self {
            started: now,
            sent_bytes: 0,
            received_bytes: 0,
            sent_packets: 0,
            lost_packets: 0,
        }
    }

    pub fn record_sent(&mut self, bytes: usize) {
        self.sent_bytes += bytes as u64;
        self.sent_packets += 1;
    }

    pub fn record_received(&mut self, bytes: usize) {
        self.received_bytes += bytes as u64;
    }

    pub fn record_lost(&mut self, count: usize) {
        self.lost_packets += count as u64;
    }

    /// Folds the window into `stats` and starts a new one at `now`.
    pub fn roll(&mut self, now: Instant, stats: &mut NetworkStats) {
        let elapsed = now.duration_since(self.started).as_secs_f32();
        if elapsed > 0.0 {
            stats.sent_kbps = self.sent_bytes as f32 * 8.0 / 1000.0 / elapsed;
            stats.received_kbps = self.received_bytes as f32 * 8.0 / 1000.0 / elapsed;
        }

        // Losses are detected one second after the send, so compare against
        // the sends of the same window rather than the lifetime total.
        let attempted = self.sent_packets.max(self.lost_packets);
        stats.packet_loss_percent = if attempted > 0 {
            self.lost_packets as f32 / attempted as f32 * 100.0
        } else {
            0.0
        };

        *self = Self::new(now);
    }
}

pub fn rand_percent() -> f32 {
    (rand_u64() >> 40) as f32 / (1u64 << 24) as f32
}

pub fn rand_u64() -> u64 {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    static COUNTER: AtomicU64 = AtomicU64::new(0);

    let mut hasher = DefaultHasher::new();
    Instant::now().hash(&mut hasher);
    COUNTER.fetch_add(1, Ordering::Relaxed).hash(&mut hasher);
    hasher.finish()
}
