//! Randomized coordinates and timing so automated input looks less mechanical.

use crate::config::HumanizerConfig;
use log::{debug, info};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, LogNormal, Normal};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

const MICRO_PAUSE_EVERY: std::ops::RangeInclusive<u32> = 20..=40;
const MICRO_PAUSE_SECS: (f64, f64) = (1.5, 4.0);
const FATIGUE_AFTER_MINUTES: f64 = 30.0;
const FATIGUE_PER_MINUTE: f64 = 0.005;
const FATIGUE_CAP: f64 = 1.3;

struct Session {
    rng: StdRng,
    actions: u64,
    started: Instant,
    micro_pause_every: u32,
}

impl Session {
    fn new(mut rng: StdRng) -> Self {
        let micro_pause_every = rng.gen_range(MICRO_PAUSE_EVERY);
        Self {
            rng,
            actions: 0,
            started: Instant::now(),
            micro_pause_every,
        }
    }

    fn gauss(&mut self, mean: f64, std_dev: f64) -> f64 {
        Normal::new(mean, std_dev)
            .map(|n| n.sample(&mut self.rng))
            .unwrap_or(mean)
    }

    fn uniform(&mut self, lo: f64, hi: f64) -> f64 {
        if hi <= lo {
            lo
        } else {
            self.rng.gen_range(lo..hi)
        }
    }
}

/// Shared randomizer for input coordinates and delays.
///
/// All state (RNG, action counter, session clock) sits behind one mutex so the
/// macro run and the background scheduler can share an instance.
pub struct Humanizer {
    config: HumanizerConfig,
    session: Mutex<Session>,
}

impl Humanizer {
    pub fn new(config: HumanizerConfig) -> Self {
        Self::with_rng(config, StdRng::from_entropy())
    }

    /// Deterministic sequence for tests.
    pub fn with_seed(config: HumanizerConfig, seed: u64) -> Self {
        Self::with_rng(config, StdRng::seed_from_u64(seed))
    }

    fn with_rng(config: HumanizerConfig, rng: StdRng) -> Self {
        info!(
            "🎲 Humanizer: offset ±{}px, delay {}~{}s",
            config.click_offset_range, config.min_delay, config.max_delay
        );
        Self {
            config,
            session: Mutex::new(Session::new(rng)),
        }
    }

    pub fn config(&self) -> &HumanizerConfig {
        &self.config
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Offsets a click point.
    ///
    /// With a matched region larger than 4x4 the offset is Gaussian with σ of
    /// 15% of the region, clamped to a third of it. Otherwise (and only when
    /// jitter is enabled) σ is 60% of `click_offset_range`, clamped to the range.
    pub fn humanize_coords(&self, x: u32, y: u32, region_w: u32, region_h: u32) -> (u32, u32) {
        let (dx, dy) = {
            let mut s = self.lock();
            if region_w > 4 && region_h > 4 {
                let (lim_x, lim_y) = ((region_w / 3) as i64, (region_h / 3) as i64);
                let dx = s.gauss(0.0, region_w as f64 * 0.15) as i64;
                let dy = s.gauss(0.0, region_h as f64 * 0.15) as i64;
                (dx.clamp(-lim_x, lim_x), dy.clamp(-lim_y, lim_y))
            } else if self.config.enable_jitter {
                let radius = self.config.click_offset_range as i64;
                let std_dev = self.config.click_offset_range as f64 * 0.6;
                let dx = s.gauss(0.0, std_dev) as i64;
                let dy = s.gauss(0.0, std_dev) as i64;
                (dx.clamp(-radius, radius), dy.clamp(-radius, radius))
            } else {
                (0, 0)
            }
        };

        let nx = (x as i64 + dx).max(0) as u32;
        let ny = (y as i64 + dy).max(0) as u32;
        if dx != 0 || dy != 0 {
            debug!("Humanized ({x},{y}) -> ({nx},{ny})");
        }
        (nx, ny)
    }

    /// Delay before the next action. Counts as one action.
    pub fn click_delay(&self) -> Duration {
        let c = &self.config;
        let mut s = self.lock();
        s.actions += 1;

        if s.rng.gen_bool(c.long_pause_chance.clamp(0.0, 1.0)) {
            let secs = s.uniform(c.long_pause_min, c.long_pause_max);
            debug!("Distraction pause {secs:.2}s");
            return Duration::from_secs_f64(secs.max(0.0));
        }

        // log-normal, like human reaction times
        let mid = (c.min_delay + c.max_delay) / 2.0;
        let sigma = (c.max_delay - c.min_delay) / 4.0;
        let mut secs = if mid > 0.0 {
            LogNormal::new(mid.ln(), sigma / mid)
                .map(|d| d.sample(&mut s.rng))
                .unwrap_or(mid)
        } else {
            0.0
        };
        secs = secs.clamp(c.min_delay, (c.max_delay * 1.5).max(c.min_delay));

        let minutes = s.started.elapsed().as_secs_f64() / 60.0;
        if minutes > FATIGUE_AFTER_MINUTES {
            let fatigue = 1.0 + (minutes - FATIGUE_AFTER_MINUTES) * FATIGUE_PER_MINUTE;
            secs *= fatigue.min(FATIGUE_CAP);
        }

        debug!("Click delay {secs:.3}s (action #{})", s.actions);
        Duration::from_secs_f64(secs.max(0.0))
    }

    pub fn hold_duration_ms(&self) -> u32 {
        let (lo, hi) = (self.config.min_hold_ms, self.config.max_hold_ms);
        let mean = (lo as f64 + hi as f64) / 2.0;
        let std_dev = (hi as f64 - lo as f64).max(0.0) / 4.0;
        let hold = self.lock().gauss(mean, std_dev) as i64;
        hold.clamp(lo as i64, hi.max(lo) as i64) as u32
    }

    /// True on every N-th action, N drawn per session from 20..=40.
    pub fn should_micro_pause(&self) -> bool {
        let s = self.lock();
        s.actions > 0 && s.actions % s.micro_pause_every as u64 == 0
    }

    pub fn micro_pause_duration(&self) -> Duration {
        Duration::from_secs_f64(self.lock().uniform(MICRO_PAUSE_SECS.0, MICRO_PAUSE_SECS.1))
    }

    /// Uniform factor in `lo..hi`, used to vary gesture durations.
    pub fn factor(&self, lo: f64, hi: f64) -> f64 {
        self.lock().uniform(lo, hi)
    }

    /// Optional micro-pause, then a humanized click delay.
    pub async fn wait(&self) {
        if self.should_micro_pause() {
            let pause = self.micro_pause_duration();
            info!("☕ Micro pause {:.1}s", pause.as_secs_f64());
            tokio::time::sleep(pause).await;
        }
        let delay = self.click_delay();
        tokio::time::sleep(delay).await;
    }

    /// Zeroes the action counter, restarts the fatigue clock and redraws N.
    pub fn reset_session(&self) {
        let mut s = self.lock();
        s.actions = 0;
        s.started = Instant::now();
        s.micro_pause_every = s.rng.gen_range(MICRO_PAUSE_EVERY);
        info!("🔄 Humanizer session reset");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> HumanizerConfig {
        HumanizerConfig::default()
    }

    #[test]
    fn region_offsets_stay_within_a_third() {
        let h = Humanizer::with_seed(config(), 1);
        for _ in 0..2000 {
            let (x, y) = h.humanize_coords(100, 100, 60, 30);
            assert!(x.abs_diff(100) <= 20, "x={x}");
            assert!(y.abs_diff(100) <= 10, "y={y}");
        }
    }

    #[test]
    fn radius_jitter_is_clamped_and_never_negative() {
        let h = Humanizer::with_seed(config(), 2);
        for _ in 0..2000 {
            let (x, y) = h.humanize_coords(50, 50, 0, 0);
            assert!(x.abs_diff(50) <= 5 && y.abs_diff(50) <= 5);
            let (x, y) = h.humanize_coords(1, 0, 3, 100);
            assert!(x <= 6 && y <= 5);
        }
    }

    #[test]
    fn region_near_origin_saturates_at_zero() {
        let h = Humanizer::with_seed(config(), 3);
        let mut saw_zero = false;
        for _ in 0..2000 {
            let (x, y) = h.humanize_coords(0, 0, 90, 90);
            assert!(x <= 30 && y <= 30);
            saw_zero |= x == 0;
        }
        assert!(saw_zero);
    }

    #[test]
    fn jitter_disabled_keeps_point_without_region() {
        let h = Humanizer::with_seed(
            HumanizerConfig {
                enable_jitter: false,
                ..config()
            },
            4,
        );
        assert_eq!(h.humanize_coords(10, 20, 0, 0), (10, 20));
    }

    #[test]
    fn hold_duration_within_window() {
        let h = Humanizer::with_seed(config(), 5);
        for _ in 0..1000 {
            let hold = h.hold_duration_ms();
            assert!((50..=150).contains(&hold), "hold={hold}");
        }
    }

    #[test]
    fn same_seed_same_sequence() {
        let a = Humanizer::with_seed(config(), 42);
        let b = Humanizer::with_seed(config(), 42);
        for _ in 0..20 {
            assert_eq!(a.humanize_coords(200, 200, 40, 40), b.humanize_coords(200, 200, 40, 40));
            assert_eq!(a.click_delay(), b.click_delay());
        }
    }

    #[test]
    fn delay_bounds_with_and_without_distraction() {
        let calm = Humanizer::with_seed(
            HumanizerConfig {
                long_pause_chance: 0.0,
                ..config()
            },
            6,
        );
        for _ in 0..500 {
            let d = calm.click_delay().as_secs_f64();
            assert!((0.3..=1.8 + 1e-9).contains(&d), "d={d}");
        }

        let distracted = Humanizer::with_seed(
            HumanizerConfig {
                long_pause_chance: 1.0,
                ..config()
            },
            7,
        );
        for _ in 0..100 {
            let d = distracted.click_delay().as_secs_f64();
            assert!((2.0..5.0).contains(&d), "d={d}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn fatigue_slows_delays_after_thirty_minutes() {
        let h = Humanizer::with_seed(
            HumanizerConfig {
                min_delay: 1.0,
                max_delay: 1.0,
                long_pause_chance: 0.0,
                ..config()
            },
            8,
        );
        assert!((h.click_delay().as_secs_f64() - 1.0).abs() < 1e-9);

        tokio::time::advance(Duration::from_secs(60 * 60)).await;
        assert!((h.click_delay().as_secs_f64() - 1.15).abs() < 1e-6);

        tokio::time::advance(Duration::from_secs(120 * 60)).await;
        assert!((h.click_delay().as_secs_f64() - 1.3).abs() < 1e-6);

        h.reset_session();
        assert!((h.click_delay().as_secs_f64() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn micro_pause_every_n_actions() {
        let h = Humanizer::with_seed(config(), 9);
        assert!(!h.should_micro_pause());

        let mut first = None;
        for n in 1..=40u32 {
            h.click_delay();
            if h.should_micro_pause() {
                first = Some(n);
                break;
            }
        }
        let n = first.expect("micro pause within 40 actions");
        assert!((20..=40).contains(&n));

        for _ in 0..n - 1 {
            h.click_delay();
            assert!(!h.should_micro_pause());
        }
        h.click_delay();
        assert!(h.should_micro_pause());

        h.reset_session();
        assert!(!h.should_micro_pause());
    }

    #[test]
    fn micro_pause_duration_range() {
        let h = Humanizer::with_seed(config(), 10);
        for _ in 0..200 {
            let d = h.micro_pause_duration().as_secs_f64();
            assert!((1.5..4.0).contains(&d));
        }
    }
}
