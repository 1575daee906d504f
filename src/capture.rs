//! Screen capture with a short-lived frame cache.

use crate::adb::Device;
use image::RgbImage;
use log::{debug, error};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

/// One decoded screenshot.
#[derive(Debug, Clone)]
pub struct Frame {
    pub image: Arc<RgbImage>,
    pub captured_at: Instant,
}

impl Frame {
    pub fn new(image: RgbImage) -> Self {
        Self {
            image: Arc::new(image),
            captured_at: Instant::now(),
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn age(&self) -> Duration {
        self.captured_at.elapsed()
    }
}

/// Fetches screenshots from a [`Device`] and reuses them for `ttl`.
///
/// On a failed capture or decode the last good frame is returned instead.
pub struct ScreenCapture<D: Device> {
    device: Arc<D>,
    ttl: Duration,
    last: Mutex<Option<Frame>>,
}

impl<D: Device> ScreenCapture<D> {
    pub fn new(device: Arc<D>, ttl: Duration) -> Self {
        Self {
            device,
            ttl,
            last: Mutex::new(None),
        }
    }

    pub async fn capture(&self, force: bool) -> Option<Frame> {
        if !force
            && let Some(frame) = self.cached()
            && frame.age() < self.ttl
        {
            debug!("Using cached screenshot ({:?} old)", frame.age());
            return Some(frame);
        }

        let Some(png) = self.device.screenshot().await else {
            return self.cached();
        };

        match image::load_from_memory(&png) {
            Ok(decoded) => {
                let frame = Frame::new(decoded.to_rgb8());
                debug!("📸 Frame {}x{}", frame.width(), frame.height());
                *self.lock() = Some(frame.clone());
                Some(frame)
            }
            Err(e) => {
                error!("❌ Screenshot decode failed: {e}");
                self.cached()
            }
        }
    }

    pub fn invalidate(&self) {
        *self.lock() = None;
    }

    fn cached(&self) -> Option<Frame> {
        self.lock().clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<Frame>> {
        self.last.lock().unwrap_or_else(|p| p.into_inner())
    }
}
