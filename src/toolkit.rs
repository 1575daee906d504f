// Shared bundle handed to every worker
use crate::adb::Device;
use crate::capture::{Frame, ScreenCapture};
use crate::config::{AppConfig, EngineConfig};
use crate::events::EventBus;
use crate::humanizer::Humanizer;
use crate::input::InputSimulator;
use crate::template_matching::{MatchResult, TemplateMatcher};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Device, capture cache, matcher, input and event bus, shared by the macro run,
/// the queue runner and the background scheduler.
pub struct Toolkit<D: Device> {
    pub device: Arc<D>,
    pub capture: ScreenCapture<D>,
    pub matcher: TemplateMatcher,
    pub humanizer: Arc<Humanizer>,
    pub input: InputSimulator<D>,
    pub events: EventBus,
    pub engine: EngineConfig,
}

impl<D: Device> Toolkit<D> {
    pub fn new(device: Arc<D>, config: &AppConfig) -> Arc<Self> {
        Self::with_humanizer(device, config, Humanizer::new(config.humanizer.clone()))
    }

    pub fn with_humanizer(device: Arc<D>, config: &AppConfig, humanizer: Humanizer) -> Arc<Self> {
        let events = EventBus::new();
        let humanizer = Arc::new(humanizer);
        Arc::new(Self {
            capture: ScreenCapture::new(
                device.clone(),
                Duration::from_millis(config.screenshot.cache_ttl_ms),
            ),
            matcher: TemplateMatcher::new(config.image_matching.clone()),
            input: InputSimulator::new(device.clone(), humanizer.clone(), events.clone()),
            device,
            humanizer,
            events,
            engine: config.engine.clone(),
        })
    }

    pub async fn frame(&self, force: bool) -> Option<Frame> {
        self.capture.capture(force).await
    }

    /// Captures (or reuses) a frame and looks for the template at `path`.
    pub async fn find(&self, path: &Path, threshold: f32) -> Option<MatchResult> {
        let frame = self.frame(false).await?;
        self.matcher.find(&frame.image, path, threshold)
    }
}
