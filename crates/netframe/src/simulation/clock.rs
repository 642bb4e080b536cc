use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::Frame;

pub const DEFAULT_SIM_DT_MS: f64 = 1000.0 / 60.0;
pub const DEFAULT_RENDER_DELAY_MS: f64 = 100.0;
pub const DEFAULT_SIM_LEAD_MS: f64 = 50.0;

/// Most fixed updates `fixed_updates_due` reports for a single tick.
pub const MAX_FIXED_UPDATES_PER_TICK: u32 = 8;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ClockError {
    #[error("simulation step must be positive and finite, got {0} ms")]
    InvalidSimDt(f64),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClockConfig {
    pub sim_dt_ms: f64,
    pub render_delay_ms: f64,
    pub sim_lead_ms: f64,
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            sim_dt_ms: DEFAULT_SIM_DT_MS,
            render_delay_ms: DEFAULT_RENDER_DELAY_MS,
            sim_lead_ms: DEFAULT_SIM_LEAD_MS,
        }
    }
}

/// Keeps real time, the fixed-step simulation timeline, render time and an
/// estimate of the server's timeline consistent with each other.
///
/// All times are milliseconds. `sim_time == sim_frame * sim_dt` holds at all
/// times; changing `sim_dt` restarts the timeline at zero to keep it that way.
#[derive(Debug, Clone)]
pub struct TimeBase {
    epoch: Instant,
    real_time: f64,
    real_dt: f64,
    sim_time: f64,
    sim_frame: Frame,
    sim_dt: f64,
    sim_lead: f64,
    render_time: f64,
    render_dt: f64,
    render_delay: f64,
    server_time: Option<f64>,
    paused: bool,
    speed: f64,
    queued_step: Option<f64>,
}

impl Default for TimeBase {
    fn default() -> Self {
        Self::new(ClockConfig::default())
    }
}

impl TimeBase {
    pub fn new(config: ClockConfig) -> Self {
        let sim_dt = if config.sim_dt_ms.is_finite() && config.sim_dt_ms > 0.0 {
            config.sim_dt_ms
        } else {
            log::warn!(
                "Invalid sim_dt {} ms, falling back to {} ms",
                config.sim_dt_ms,
                DEFAULT_SIM_DT_MS
            );
            DEFAULT_SIM_DT_MS
        };

        Self {
            epoch: Instant::now(),
            real_time: 0.0,
            real_dt: 0.0,
            sim_time: 0.0,
            sim_frame: 0,
            sim_dt,
            sim_lead: config.sim_lead_ms.max(0.0),
            render_time: -config.render_delay_ms,
            render_dt: 0.0,
            render_delay: config.render_delay_ms,
            server_time: None,
            paused: false,
            speed: 1.0,
            queued_step: None,
        }
    }

    /// Advances real time to `now_ms` (milliseconds since this clock's epoch)
    /// and refreshes render time.
    pub fn tick(&mut self, now_ms: f64) {
        let real_dt = now_ms - self.real_time;
        self.real_dt = real_dt;
        self.real_time += real_dt;

        if let Some(server_time) = self.server_time.as_mut() {
            *server_time += real_dt;
        }

        self.render_dt = if self.paused {
            self.queued_step.unwrap_or(0.0)
        } else {
            real_dt * self.speed
        };

        self.render_time = self.server_time.unwrap_or(self.real_time) - self.render_delay;
        self.queued_step = None;
    }

    /// `tick` driven by the internal monotonic epoch.
    pub fn tick_now(&mut self) {
        let now_ms = self.epoch.elapsed().as_secs_f64() * 1000.0;
        self.tick(now_ms);
    }

    /// Advances the simulation by exactly one fixed step.
    pub fn update_fixed(&mut self) {
        self.sim_frame += 1;
        self.sim_time = self.sim_frame as f64 * self.sim_dt;
    }

    /// Number of `update_fixed` calls owed to bring the simulation up to the
    /// target timeline (server estimate when known, else real time) plus the
    /// configured lead.
    pub fn fixed_updates_due(&self) -> u32 {
        let target = self.server_time.unwrap_or(self.real_time) + self.sim_lead;
        let owed = ((target - self.sim_time) / self.sim_dt).floor();
        if owed <= 0.0 {
            0
        } else {
            (owed as u32).min(MAX_FIXED_UPDATES_PER_TICK)
        }
    }

    pub fn set_sim_dt(&mut self, sim_dt_ms: f64) -> Result<(), ClockError> {
        if !sim_dt_ms.is_finite() || sim_dt_ms <= 0.0 {
            return Err(ClockError::InvalidSimDt(sim_dt_ms));
        }

        self.sim_dt = sim_dt_ms;
        self.sim_time = 0.0;
        self.sim_frame = 0;
        self.real_time = 0.0;
        self.real_dt = 0.0;
        self.epoch = Instant::now();
        Ok(())
    }

    /// Adopts the server's timeline. This is a one-time jump, not a smoothed
    /// correction.
    pub fn sync_to_server_time(&mut self, server_time_ms: f64) {
        self.server_time = Some(server_time_ms);
        self.sim_frame = (server_time_ms.max(0.0) / self.sim_dt).floor() as Frame;
        self.sim_time = self.sim_frame as f64 * self.sim_dt;
        self.render_time = server_time_ms - self.render_delay;
    }

    /// Moves the server estimate back while keeping `sim_frame`, so frame
    /// numbers never repeat. Fixed updates stall until the estimate catches
    /// up with `sim_time`.
    pub fn rewind_server_time(&mut self, server_time_ms: f64) {
        self.server_time = Some(server_time_ms);
        self.render_time = server_time_ms - self.render_delay;
    }

    pub fn clear_server_time(&mut self) {
        self.server_time = None;
    }

    pub fn pause(&mut self) {
        self.paused = true;
    }

    pub fn resume(&mut self) {
        self.paused = false;
    }

    /// Arms exactly one forced render advance of `ms` for the next tick.
    pub fn step(&mut self, ms: f64) {
        self.queued_step = Some(ms);
    }

    pub fn set_speed(&mut self, speed: f64) {
        self.speed = speed.max(0.0);
    }

    pub fn set_render_delay(&mut self, delay_ms: f64) {
        self.render_delay = delay_ms;
        self.render_time = self.server_time.unwrap_or(self.real_time) - delay_ms;
    }

    pub fn real_time(&self) -> f64 {
        self.real_time
    }

    pub fn real_dt(&self) -> f64 {
        self.real_dt
    }

    pub fn sim_time(&self) -> f64 {
        self.sim_time
    }

    pub fn sim_frame(&self) -> Frame {
        self.sim_frame
    }

    pub fn sim_dt(&self) -> f64 {
        self.sim_dt
    }

    pub fn render_time(&self) -> f64 {
        self.render_time
    }

    pub fn render_dt(&self) -> f64 {
        self.render_dt
    }

    pub fn render_delay(&self) -> f64 {
        self.render_delay
    }

    /// Render time expressed in (fractional) simulation frames, the key used
    /// to query a snapshot ring.
    pub fn render_frame(&self) -> f64 {
        self.render_time / self.sim_dt
    }

    pub fn server_time(&self) -> Option<f64> {
        self.server_time
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn speed(&self) -> f64 {
        self.speed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clock(sim_dt_ms: f64, render_delay_ms: f64) -> TimeBase {
        TimeBase::new(ClockConfig {
            sim_dt_ms,
            render_delay_ms,
            sim_lead_ms: 0.0,
        })
    }

    #[test]
    fn tick_advances_real_and_render_time() {
        let mut clock = clock(10.0, 100.0);

        clock.tick(250.0);
        assert_eq!(clock.real_dt(), 250.0);
        assert_eq!(clock.real_time(), 250.0);
        assert_eq!(clock.render_time(), 150.0);
        assert_eq!(clock.render_dt(), 250.0);
    }

    #[test]
    fn update_fixed_keeps_frame_and_time_aligned() {
        let mut clock = clock(10.0, 0.0);

        for _ in 0..7 {
            clock.update_fixed();
        }
        assert_eq!(clock.sim_frame(), 7);
        assert_eq!(clock.sim_time(), 70.0);
        assert_eq!(clock.sim_time() / clock.sim_dt(), clock.sim_frame() as f64);
    }

    #[test]
    fn changing_sim_dt_resets_timeline() {
        let mut clock = clock(10.0, 0.0);
        clock.tick(1000.0);
        for _ in 0..42 {
            clock.update_fixed();
        }

        clock.set_sim_dt(1000.0 / 30.0).unwrap();

        assert_eq!(clock.sim_frame(), 0);
        assert_eq!(clock.sim_time(), 0.0);
        assert_eq!(clock.real_time(), 0.0);
        assert_eq!(clock.sim_time() / clock.sim_dt(), clock.sim_frame() as f64);

        clock.update_fixed();
        assert_eq!(clock.sim_time() / clock.sim_dt(), clock.sim_frame() as f64);
    }

    #[test]
    fn rejects_invalid_sim_dt() {
        let mut clock = clock(10.0, 0.0);
        for _ in 0..3 {
            clock.update_fixed();
        }

        assert_eq!(clock.set_sim_dt(0.0), Err(ClockError::InvalidSimDt(0.0)));
        assert!(clock.set_sim_dt(f64::NAN).is_err());
        assert_eq!(clock.sim_frame(), 3);
    }

    #[test]
    fn server_time_drifts_with_real_time() {
        let mut clock = clock(10.0, 100.0);
        clock.tick(1000.0);

        clock.sync_to_server_time(5000.0);
        assert_eq!(clock.sim_frame(), 500);
        assert_eq!(clock.sim_time(), 5000.0);

        clock.tick(1016.0);
        assert_eq!(clock.server_time(), Some(5016.0));
        assert_eq!(clock.render_time(), 4916.0);
    }

    #[test]
    fn rewind_keeps_frames_and_stalls_updates() {
        let mut clock = clock(10.0, 100.0);
        clock.sync_to_server_time(5000.0);
        clock.update_fixed();
        assert_eq!(clock.sim_frame(), 501);

        clock.rewind_server_time(4000.0);
        assert_eq!(clock.sim_frame(), 501);
        assert_eq!(clock.server_time(), Some(4000.0));
        assert_eq!(clock.render_time(), 3900.0);
        assert_eq!(clock.fixed_updates_due(), 0);
    }

    #[test]
    fn paused_clock_consumes_single_step() {
        let mut clock = clock(10.0, 0.0);
        clock.pause();

        clock.step(16.0);
        clock.tick(100.0);
        assert_eq!(clock.render_dt(), 16.0);

        clock.tick(200.0);
        assert_eq!(clock.render_dt(), 0.0);
        assert!(clock.is_paused());

        clock.resume();
        clock.set_speed(0.5);
        clock.tick(300.0);
        assert_eq!(clock.render_dt(), 50.0);
    }

    #[test]
    fn fixed_updates_due_is_capped() {
        let mut clock = clock(10.0, 0.0);
        clock.tick(35.0);
        assert_eq!(clock.fixed_updates_due(), 3);

        clock.tick(10_000.0);
        assert_eq!(clock.fixed_updates_due(), MAX_FIXED_UPDATES_PER_TICK);
    }

    #[test]
    fn render_frame_is_fractional() {
        let mut clock = clock(10.0, 20.0);
        clock.tick(135.0);
        assert_eq!(clock.render_frame(), 11.5);
    }
}
