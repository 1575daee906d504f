// Background actions: periodic or template-triggered input beside the main run
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    /// Periodic key event
    #[default]
    KeyPress,
    /// Periodic tap at a fixed point
    TapCoord,
    /// Key event while a template is visible
    ImageKey,
    /// Tap on the template while it is visible
    ImageTap,
}

/// Android keycodes offered by name.
pub const KEYCODE_PRESETS: &[(&str, u32)] = &[
    ("Space", 62),
    ("Enter", 66),
    ("Escape", 111),
    ("Back", 4),
    ("Tab", 61),
    ("Up", 19),
    ("Down", 20),
    ("Left", 21),
    ("Right", 22),
    ("Home", 3),
    ("Volume up", 24),
    ("Volume down", 25),
    ("Menu", 82),
    ("Power", 26),
    ("Delete", 67),
];

pub fn keycode_label(keycode: u32) -> Option<&'static str> {
    KEYCODE_PRESETS
        .iter()
        .find(|(_, code)| *code == keycode)
        .map(|(label, _)| *label)
}

fn default_name() -> String {
    "New action".to_string()
}

fn default_true() -> bool {
    true
}

fn default_keycode() -> u32 {
    62
}

fn default_keycode_label() -> String {
    "Space".to_string()
}

fn default_threshold() -> f32 {
    0.85
}

fn default_interval() -> f64 {
    2.0
}

fn default_jitter() -> f64 {
    0.5
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackgroundAction {
    #[serde(rename = "type", default)]
    pub kind: ActionKind,
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_keycode")]
    pub keycode: u32,
    #[serde(default = "default_keycode_label")]
    pub keycode_label: String,
    #[serde(default)]
    pub x: u32,
    #[serde(default)]
    pub y: u32,
    #[serde(default)]
    pub template_path: PathBuf,
    #[serde(default = "default_threshold")]
    pub threshold: f32,
    /// Seconds between firings
    #[serde(default = "default_interval")]
    pub interval: f64,
    /// ± seconds, redrawn on every evaluation
    #[serde(default = "default_jitter")]
    pub interval_jitter: f64,
}

impl BackgroundAction {
    pub fn new(name: impl Into<String>, kind: ActionKind) -> Self {
        Self {
            kind,
            name: name.into(),
            enabled: true,
            keycode: default_keycode(),
            keycode_label: default_keycode_label(),
            x: 0,
            y: 0,
            template_path: PathBuf::new(),
            threshold: default_threshold(),
            interval: default_interval(),
            interval_jitter: default_jitter(),
        }
    }

    pub fn key(name: impl Into<String>, keycode: u32) -> Self {
        Self {
            keycode,
            keycode_label: keycode_label(keycode)
                .map(str::to_string)
                .unwrap_or_else(|| keycode.to_string()),
            ..Self::new(name, ActionKind::KeyPress)
        }
    }

    pub fn every(mut self, interval: f64, jitter: f64) -> Self {
        self.interval = interval;
        self.interval_jitter = jitter;
        self
    }

    /// `None` when no template is configured.
    pub fn template(&self) -> Option<&Path> {
        (!self.template_path.as_os_str().is_empty()).then_some(self.template_path.as_path())
    }

    pub fn validate(&self) -> Result<(), String> {
        if !(self.interval.is_finite() && self.interval > 0.0) {
            return Err(format!(
                "action '{}': interval must be > 0 (got {})",
                self.name, self.interval
            ));
        }
        if !(self.interval_jitter.is_finite() && self.interval_jitter >= 0.0) {
            return Err(format!(
                "action '{}': interval_jitter must be >= 0 (got {})",
                self.name, self.interval_jitter
            ));
        }
        Ok(())
    }

    pub fn describe(&self, index: usize) -> String {
        let status = if self.enabled { "●" } else { "○" };
        let template = || {
            self.template()
                .and_then(Path::file_stem)
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_else(|| "unset".to_string())
        };
        let detail = match self.kind {
            ActionKind::KeyPress => format!("key:{} every {}s", self.keycode_label, self.interval),
            ActionKind::TapCoord => format!("({},{}) every {}s", self.x, self.y, self.interval),
            ActionKind::ImageKey => format!("[{}]->key:{}", template(), self.keycode_label),
            ActionKind::ImageTap => format!("[{}]->tap", template()),
        };
        format!("{status} {index}. {}  {detail}", self.name)
    }
}

fn default_set_name() -> String {
    "Background actions".to_string()
}

/// Named list of actions, persisted and activated as a unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackgroundActionSet {
    #[serde(default = "default_set_name")]
    pub name: String,
    #[serde(default)]
    pub actions: Vec<BackgroundAction>,
}

impl Default for BackgroundActionSet {
    fn default() -> Self {
        Self {
            name: default_set_name(),
            actions: Vec::new(),
        }
    }
}

impl BackgroundActionSet {
    pub fn new(name: impl Into<String>, actions: Vec<BackgroundAction>) -> Self {
        Self {
            name: name.into(),
            actions,
        }
    }

    pub fn enabled_count(&self) -> usize {
        self.actions.iter().filter(|a| a.enabled).count()
    }

    pub fn validate(&self) -> Result<(), String> {
        self.actions.iter().try_for_each(BackgroundAction::validate)
    }
}
