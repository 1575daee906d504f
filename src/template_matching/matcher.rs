/// Template matcher
///
/// Finds template images inside captured frames. Templates are loaded from disk
/// once and cached by path.
use super::correlation::{ScoreMap, score_map};
use super::types::MatchResult;
use crate::config::MatchConfig;
use image::imageops::{self, FilterType};
use image::{GrayImage, RgbImage};
use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Scales tried, in order, when the 1:1 match misses.
const SCALE_LADDER: [f32; 10] = [0.9, 1.1, 0.8, 1.2, 0.7, 1.3, 0.6, 1.5, 0.5, 2.0];
/// Resized templates smaller than this on either axis are skipped.
const MIN_SCALED_SIDE: u32 = 10;

/// Frame or template after optional grayscale reduction.
enum Prepared {
    Gray(GrayImage),
    Channels([GrayImage; 3]),
}

impl Prepared {
    fn dimensions(&self) -> (u32, u32) {
        match self {
            Prepared::Gray(g) => g.dimensions(),
            Prepared::Channels(c) => c[0].dimensions(),
        }
    }
}

pub struct TemplateMatcher {
    config: MatchConfig,
    cache: Mutex<HashMap<PathBuf, Arc<RgbImage>>>,
}

impl TemplateMatcher {
    pub fn new(config: MatchConfig) -> Self {
        info!(
            "🔎 Template matcher: {:?}, threshold {}, grayscale {}, multi-scale {}",
            config.method, config.confidence_threshold, config.use_grayscale, config.multi_scale
        );
        Self {
            config,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn default_threshold(&self) -> f32 {
        self.config.confidence_threshold
    }

    /// Load a template, reusing the cached copy when present
    pub fn load_template(&self, path: &Path) -> Option<Arc<RgbImage>> {
        if let Some(template) = self.lock().get(path) {
            return Some(template.clone());
        }
        if !path.is_file() {
            error!("❌ Template file not found: {}", path.display());
            return None;
        }
        let template = match image::open(path) {
            Ok(img) => Arc::new(img.to_rgb8()),
            Err(e) => {
                error!("❌ Template load failed {}: {e}", path.display());
                return None;
            }
        };
        debug!(
            "Template loaded: {} ({}x{})",
            path.display(),
            template.width(),
            template.height()
        );
        self.lock().insert(path.to_path_buf(), template.clone());
        Some(template)
    }

    pub fn clear_cache(&self) {
        self.lock().clear();
        debug!("Template cache cleared");
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<PathBuf, Arc<RgbImage>>> {
        self.cache.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn prepare(&self, image: &RgbImage) -> Prepared {
        if self.config.use_grayscale {
            Prepared::Gray(imageops::grayscale(image))
        } else {
            let channel = |c: usize| {
                GrayImage::from_fn(image.width(), image.height(), |x, y| {
                    image::Luma([image.get_pixel(x, y)[c]])
                })
            };
            Prepared::Channels([channel(0), channel(1), channel(2)])
        }
    }

    fn scores(&self, frame: &Prepared, template: &Prepared) -> Option<ScoreMap> {
        let method = self.config.method;
        match (frame, template) {
            (Prepared::Gray(f), Prepared::Gray(t)) => score_map(f, t, method),
            (Prepared::Channels(f), Prepared::Channels(t)) => {
                let maps = f
                    .iter()
                    .zip(t)
                    .map(|(fc, tc)| score_map(fc, tc, method))
                    .collect::<Option<Vec<_>>>()?;
                ScoreMap::average(&maps)
            }
            _ => None,
        }
    }

    /// Best match of the template at `path`, if its confidence reaches `threshold`.
    ///
    /// A miss at 1:1 is retried across the scale ladder when multi-scale is on.
    pub fn find(&self, frame: &RgbImage, path: &Path, threshold: f32) -> Option<MatchResult> {
        let template = self.load_template(path)?;
        let name = display_name(path);
        let frame_p = self.prepare(frame);
        let (fw, fh) = frame_p.dimensions();
        let (tw, th) = template.dimensions();
        if tw > fw || th > fh {
            warn!("⚠️ Template {name} ({tw}x{th}) larger than frame ({fw}x{fh})");
            return None;
        }

        let template_p = self.prepare(&template);
        let (x, y, confidence) = self.scores(&frame_p, &template_p)?.best()?;
        if confidence >= threshold {
            let found = MatchResult::at((x, y), tw, th, confidence, 1.0);
            info!("✅ Match: {}", found.describe(&name));
            return Some(found);
        }

        if self.config.multi_scale
            && let Some(found) = self.find_multi_scale(&frame_p, &template, threshold)
        {
            info!("✅ Multi-scale match: {}", found.describe(&name));
            return Some(found);
        }

        debug!("❌ No match: {name} best {confidence:.3} < {threshold}");
        None
    }

    fn find_multi_scale(
        &self,
        frame: &Prepared,
        template: &RgbImage,
        threshold: f32,
    ) -> Option<MatchResult> {
        let (fw, fh) = frame.dimensions();
        let (tw, th) = template.dimensions();
        let mut best: Option<MatchResult> = None;

        for scale in SCALE_LADDER {
            let w = (tw as f32 * scale) as u32;
            let h = (th as f32 * scale) as u32;
            if w < MIN_SCALED_SIDE || h < MIN_SCALED_SIDE || w > fw || h > fh {
                continue;
            }
            let resized = imageops::resize(template, w, h, FilterType::Triangle);
            let Some((x, y, confidence)) = self
                .scores(frame, &self.prepare(&resized))
                .and_then(|map| map.best())
            else {
                continue;
            };
            if confidence >= threshold && best.is_none_or(|b| confidence > b.confidence) {
                best = Some(MatchResult::at((x, y), w, h, confidence, scale));
            }
        }
        best
    }

    /// Every non-overlapping match of the template at `path`, best first.
    ///
    /// A candidate is dropped when its anchor lies within half the template
    /// width and half the template height of an already accepted one.
    pub fn find_all(
        &self,
        frame: &RgbImage,
        path: &Path,
        threshold: f32,
        max_results: usize,
    ) -> Vec<MatchResult> {
        let Some(template) = self.load_template(path) else {
            return Vec::new();
        };
        let (tw, th) = template.dimensions();
        if tw > frame.width() || th > frame.height() {
            return Vec::new();
        }
        let Some(map) = self.scores(&self.prepare(frame), &self.prepare(&template)) else {
            return Vec::new();
        };

        let mut candidates = map.above(threshold);
        candidates.sort_by(|a, b| b.2.total_cmp(&a.2));

        let mut accepted: Vec<MatchResult> = Vec::new();
        for (x, y, confidence) in candidates {
            if accepted.len() >= max_results {
                break;
            }
            let overlaps = accepted.iter().any(|m| {
                let dx = x.abs_diff(m.top_left.0) as f32;
                let dy = y.abs_diff(m.top_left.1) as f32;
                dx < tw as f32 * 0.5 && dy < th as f32 * 0.5
            });
            if !overlaps {
                accepted.push(MatchResult::at((x, y), tw, th, confidence, 1.0));
            }
        }

        info!(
            "🔎 Multi match: {} - {} found",
            display_name(path),
            accepted.len()
        );
        accepted
    }

    /// Single-scale match of an in-memory template.
    pub fn find_image(
        &self,
        frame: &RgbImage,
        template: &RgbImage,
        threshold: f32,
    ) -> Option<MatchResult> {
        let (tw, th) = template.dimensions();
        if tw > frame.width() || th > frame.height() {
            return None;
        }
        let (x, y, confidence) = self
            .scores(&self.prepare(frame), &self.prepare(template))?
            .best()?;
        (confidence >= threshold).then(|| MatchResult::at((x, y), tw, th, confidence, 1.0))
    }
}

impl Default for TemplateMatcher {
    fn default() -> Self {
        Self::new(MatchConfig::default())
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}
