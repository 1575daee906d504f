// Template-tap program: tap whichever known template is most visible
use super::error::{MacroError, MacroResult};
use super::program::{MacroContext, MacroProgram};
use crate::adb::Device;
use crate::template_matching::MatchResult;
use log::{debug, info};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Pause between scans that found nothing.
const IDLE_SCAN_DELAY: Duration = Duration::from_millis(500);

pub struct TemplateTapProgram {
    name: String,
    templates: Vec<PathBuf>,
    threshold: f32,
    taps: u64,
}

impl TemplateTapProgram {
    pub fn new(name: impl Into<String>, templates: Vec<PathBuf>, threshold: f32) -> Self {
        Self {
            name: name.into(),
            templates,
            threshold,
            taps: 0,
        }
    }

    /// Every PNG directly inside `dir`, sorted for a stable scan order.
    pub fn from_dir(dir: &Path, threshold: f32) -> std::io::Result<Self> {
        let templates = scan_templates(dir)?;
        let name = dir
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "templates".to_string());
        Ok(Self::new(name, templates, threshold))
    }

    pub fn templates(&self) -> &[PathBuf] {
        &self.templates
    }

    pub fn taps(&self) -> u64 {
        self.taps
    }
}

pub fn scan_templates(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut templates: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.is_file()
                && path
                    .extension()
                    .is_some_and(|ext| ext.eq_ignore_ascii_case("png"))
        })
        .collect();
    templates.sort();
    Ok(templates)
}

impl<D: Device> MacroProgram<D> for TemplateTapProgram {
    fn name(&self) -> &str {
        &self.name
    }

    async fn setup(&mut self, _ctx: &MacroContext<D>) -> MacroResult<()> {
        if self.templates.is_empty() {
            return Err(MacroError::Setup(
                "no template images configured for matching".to_string(),
            ));
        }
        self.taps = 0;
        info!(
            "🔍 Scanning {} templates at threshold {:.2}",
            self.templates.len(),
            self.threshold
        );
        Ok(())
    }

    async fn iterate(&mut self, ctx: &MacroContext<D>) -> MacroResult<()> {
        let toolkit = &ctx.toolkit;
        let Some(frame) = toolkit.frame(true).await else {
            debug!("📷 No frame available");
            ctx.sleep(IDLE_SCAN_DELAY).await;
            return Ok(());
        };

        let best: Option<(&PathBuf, MatchResult)> = self
            .templates
            .iter()
            .filter_map(|path| {
                toolkit
                    .matcher
                    .find(&frame.image, path, self.threshold)
                    .map(|m| (path, m))
            })
            .max_by(|a, b| a.1.confidence.total_cmp(&b.1.confidence));

        match best {
            Some((path, m)) => {
                debug!("🎯 {}", m.describe(&path.display().to_string()));
                if toolkit.input.click_match_and_wait(&m, true).await? {
                    self.taps += 1;
                }
            }
            None => {
                debug!("👀 No template above {:.3}", self.threshold);
                ctx.sleep(IDLE_SCAN_DELAY).await;
            }
        }
        Ok(())
    }

    async fn teardown(&mut self, _ctx: &MacroContext<D>) -> MacroResult<()> {
        info!("🔍 [{}] {} taps", self.name, self.taps);
        Ok(())
    }
}
