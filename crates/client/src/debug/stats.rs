use std::collections::VecDeque;
use std::time::Instant;

const SAMPLE_COUNT: usize = 60;

/// Rolling loop and fixed-step rates of the client process.
pub struct DebugStats {
    frame_times: VecDeque<f32>,
    tick_times: VecDeque<Instant>,
    fps: f32,
    tick_rate: f32,
    interpolated: u64,
    missed: u64,
}

impl Default for DebugStats {
    fn default() -> Self {
        Self::new()
    }
}

impl DebugStats {
    pub fn new() -> Self {
        Self {
            frame_times: VecDeque::with_capacity(SAMPLE_COUNT),
            tick_times: VecDeque::with_capacity(SAMPLE_COUNT),
            fps: 0.0,
            tick_rate: 0.0,
            interpolated: 0,
            missed: 0,
        }
    }

    pub fn record_frame(&mut self, dt: f32) {
        if dt <= 0.0 {
            return;
        }

        if self.frame_times.len() >= SAMPLE_COUNT {
            self.frame_times.pop_front();
        }
        self.frame_times.push_back(dt);

        let avg_dt: f32 = self.frame_times.iter().sum::<f32>() / self.frame_times.len() as f32;
        self.fps = 1.0 / avg_dt;
    }

    pub fn record_tick(&mut self) {
        self.record_tick_at(Instant::now());
    }

    fn record_tick_at(&mut self, now: Instant) {
        if self.tick_times.len() >= SAMPLE_COUNT {
            self.tick_times.pop_front();
        }
        self.tick_times.push_back(now);

        if let Some(oldest) = self.tick_times.front().filter(|_| self.tick_times.len() >= 2) {
            let elapsed = now.duration_since(*oldest).as_secs_f32();
            if elapsed > 0.0 {
                self.tick_rate = (self.tick_times.len() - 1) as f32 / elapsed;
            }
        }
    }

    /// Counts one render-time lookup and whether the ring could answer it.
    pub fn record_lookup(&mut self, hit: bool) {
        if hit {
            self.interpolated += 1;
        } else {
            self.missed += 1;
        }
    }

    pub fn fps(&self) -> f32 {
        self.fps
    }

    pub fn tick_rate(&self) -> f32 {
        self.tick_rate
    }

    /// Share of render lookups that found bracketing snapshots, in percent.
    pub fn hit_percent(&self) -> f32 {
        let total = self.interpolated + self.missed;
        if total == 0 {
            return 0.0;
        }
        self.interpolated as f32 * 100.0 / total as f32
    }
}
