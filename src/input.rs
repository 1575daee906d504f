//! Human-like input built from the [`Humanizer`] and a [`Device`].

use crate::adb::{AdbResult, CommandOutput, Device};
use crate::events::{EngineEvent, EventBus};
use crate::humanizer::Humanizer;
use crate::template_matching::MatchResult;
use log::{info, warn};
use std::sync::Arc;

/// Holds longer than this are sent as a zero-distance swipe instead of a tap.
const TAP_HOLD_LIMIT_MS: u32 = 80;

pub struct InputSimulator<D: Device> {
    device: Arc<D>,
    humanizer: Arc<Humanizer>,
    events: EventBus,
}

impl<D: Device> InputSimulator<D> {
    pub fn new(device: Arc<D>, humanizer: Arc<Humanizer>, events: EventBus) -> Self {
        Self {
            device,
            humanizer,
            events,
        }
    }

    /// Clicks a point. Returns whether the device accepted the command.
    pub async fn click(&self, x: u32, y: u32, humanize: bool) -> AdbResult<bool> {
        let (x, y) = if humanize {
            self.humanizer.humanize_coords(x, y, 0, 0)
        } else {
            (x, y)
        };
        self.press(x, y, None).await
    }

    /// Clicks inside a matched region.
    pub async fn click_match(&self, m: &MatchResult, humanize: bool) -> AdbResult<bool> {
        let (x, y) = if humanize {
            self.humanizer.humanize_coords(m.x, m.y, m.width, m.height)
        } else {
            (m.x, m.y)
        };
        self.press(x, y, Some(m.confidence)).await
    }

    pub async fn click_and_wait(&self, x: u32, y: u32, humanize: bool) -> AdbResult<bool> {
        let ok = self.click(x, y, humanize).await?;
        self.humanizer.wait().await;
        Ok(ok)
    }

    pub async fn click_match_and_wait(&self, m: &MatchResult, humanize: bool) -> AdbResult<bool> {
        let ok = self.click_match(m, humanize).await?;
        self.humanizer.wait().await;
        Ok(ok)
    }

    async fn press(&self, x: u32, y: u32, confidence: Option<f32>) -> AdbResult<bool> {
        let hold = self.humanizer.hold_duration_ms();
        let output = if hold > TAP_HOLD_LIMIT_MS {
            self.device.swipe(x, y, x, y, hold).await?
        } else {
            self.device.tap(x, y).await?
        };
        if !output.is_success() {
            warn!("⚠️ Click ({x}, {y}) rejected: {}", output.stderr);
            return Ok(false);
        }
        match confidence {
            Some(c) => info!("🖱️ Match click ({x}, {y}) confidence {c:.3} hold {hold}ms"),
            None => info!("🖱️ Click ({x}, {y}) hold {hold}ms"),
        }
        self.events.publish(EngineEvent::Click { x, y });
        Ok(true)
    }

    /// Swipe; when humanized both ends are jittered and the duration varies ±15%.
    pub async fn swipe(
        &self,
        x1: u32,
        y1: u32,
        x2: u32,
        y2: u32,
        duration_ms: u32,
        humanize: bool,
    ) -> AdbResult<CommandOutput> {
        let (mut from, mut to, mut duration) = ((x1, y1), (x2, y2), duration_ms);
        if humanize {
            from = self.humanizer.humanize_coords(x1, y1, 0, 0);
            to = self.humanizer.humanize_coords(x2, y2, 0, 0);
            duration = (duration_ms as f64 * self.humanizer.factor(0.85, 1.15)) as u32;
        }
        info!(
            "👆 Swipe ({},{}) -> ({},{}) {duration}ms",
            from.0, from.1, to.0, to.1
        );
        self.device
            .swipe(from.0, from.1, to.0, to.1, duration)
            .await
    }

    /// Long press; when humanized the point is jittered and the duration varies ±10%.
    pub async fn long_press(
        &self,
        x: u32,
        y: u32,
        duration_ms: u32,
        humanize: bool,
    ) -> AdbResult<CommandOutput> {
        let (mut point, mut duration) = ((x, y), duration_ms);
        if humanize {
            point = self.humanizer.humanize_coords(x, y, 0, 0);
            duration = (duration_ms as f64 * self.humanizer.factor(0.9, 1.1)) as u32;
        }
        info!("👇 Long press ({}, {}) {duration}ms", point.0, point.1);
        self.device.long_press(point.0, point.1, duration).await
    }

    pub async fn key_event(&self, keycode: u32) -> AdbResult<CommandOutput> {
        self.device.key_event(keycode).await
    }
}
