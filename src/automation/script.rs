// Step scripts: the author-level definition the interpreter executes
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// What to do after a step, chosen by its outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum FlowDirective {
    /// Advance to the next step
    #[default]
    Next,
    Stop,
    /// Back to the first step
    Loop,
    Retry,
    /// Jump to a 0-based step index
    Goto(usize),
}

impl FlowDirective {
    /// Unknown or malformed directives advance, like `next`.
    pub fn parse(raw: &str) -> Self {
        match raw.trim() {
            "next" => FlowDirective::Next,
            "stop" => FlowDirective::Stop,
            "loop" => FlowDirective::Loop,
            "retry" => FlowDirective::Retry,
            other => other
                .strip_prefix("goto:")
                .and_then(|n| n.trim().parse().ok())
                .map_or(FlowDirective::Next, FlowDirective::Goto),
        }
    }
}

impl From<String> for FlowDirective {
    fn from(raw: String) -> Self {
        Self::parse(&raw)
    }
}

impl From<FlowDirective> for String {
    fn from(d: FlowDirective) -> Self {
        d.to_string()
    }
}

impl fmt::Display for FlowDirective {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlowDirective::Next => write!(f, "next"),
            FlowDirective::Stop => write!(f, "stop"),
            FlowDirective::Loop => write!(f, "loop"),
            FlowDirective::Retry => write!(f, "retry"),
            FlowDirective::Goto(n) => write!(f, "goto:{n}"),
        }
    }
}

fn default_threshold() -> f32 {
    0.85
}

fn default_wait_time() -> f64 {
    1.0
}

fn default_timeout() -> f64 {
    10.0
}

fn default_swipe_ms() -> u32 {
    300
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepKind {
    ClickImage {
        template_path: PathBuf,
        #[serde(default = "default_threshold")]
        threshold: f32,
    },
    ClickCoord {
        x: u32,
        y: u32,
    },
    Wait {
        #[serde(default = "default_wait_time")]
        wait_time: f64,
    },
    WaitForImage {
        template_path: PathBuf,
        #[serde(default = "default_threshold")]
        threshold: f32,
        #[serde(default = "default_timeout")]
        timeout: f64,
    },
    IfImage {
        template_path: PathBuf,
        #[serde(default = "default_threshold")]
        threshold: f32,
    },
    Swipe {
        x: u32,
        y: u32,
        x2: u32,
        y2: u32,
        #[serde(default = "default_swipe_ms")]
        duration_ms: u32,
    },
}

impl StepKind {
    pub fn label(&self) -> &'static str {
        match self {
            StepKind::ClickImage { .. } => "click image",
            StepKind::ClickCoord { .. } => "click coord",
            StepKind::Wait { .. } => "wait",
            StepKind::WaitForImage { .. } => "wait for image",
            StepKind::IfImage { .. } => "if image",
            StepKind::Swipe { .. } => "swipe",
        }
    }

    /// Only image steps have a failure outcome.
    pub fn can_fail(&self) -> bool {
        matches!(
            self,
            StepKind::ClickImage { .. } | StepKind::WaitForImage { .. } | StepKind::IfImage { .. }
        )
    }

    pub fn template_path(&self) -> Option<&Path> {
        match self {
            StepKind::ClickImage { template_path, .. }
            | StepKind::WaitForImage { template_path, .. }
            | StepKind::IfImage { template_path, .. } => Some(template_path),
            _ => None,
        }
    }
}

fn default_step_name() -> String {
    "New step".to_string()
}

fn default_on_fail() -> FlowDirective {
    FlowDirective::Retry
}

fn default_max_retries() -> u32 {
    10
}

fn default_retry_delay() -> f64 {
    1.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    #[serde(default = "default_step_name")]
    pub name: String,
    #[serde(flatten)]
    pub kind: StepKind,
    #[serde(default)]
    pub on_success: FlowDirective,
    #[serde(default = "default_on_fail")]
    pub on_fail: FlowDirective,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Seconds between retries
    #[serde(default = "default_retry_delay")]
    pub retry_delay: f64,
}

impl Step {
    pub fn new(name: impl Into<String>, kind: StepKind) -> Self {
        Self {
            name: name.into(),
            kind,
            on_success: FlowDirective::Next,
            on_fail: default_on_fail(),
            max_retries: default_max_retries(),
            retry_delay: default_retry_delay(),
        }
    }

    pub fn on_success(mut self, directive: FlowDirective) -> Self {
        self.on_success = directive;
        self
    }

    pub fn on_fail(mut self, directive: FlowDirective) -> Self {
        self.on_fail = directive;
        self
    }

    pub fn retries(mut self, max_retries: u32, retry_delay: f64) -> Self {
        self.max_retries = max_retries;
        self.retry_delay = retry_delay;
        self
    }

    /// One-line summary, 1-based for display.
    pub fn describe(&self, index: usize) -> String {
        let detail = match &self.kind {
            StepKind::ClickImage { template_path, .. }
            | StepKind::WaitForImage { template_path, .. }
            | StepKind::IfImage { template_path, .. } => template_path
                .file_stem()
                .map(|s| format!("[{}]", s.to_string_lossy()))
                .unwrap_or_else(|| "[unset]".to_string()),
            StepKind::ClickCoord { x, y } => format!("({x}, {y})"),
            StepKind::Wait { wait_time } => format!("({wait_time}s)"),
            StepKind::Swipe { x, y, x2, y2, .. } => format!("({x},{y})->({x2},{y2})"),
        };
        format!("{index}. [{}] {}  {detail}", self.kind.label(), self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Script {
    #[serde(default = "default_script_name")]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub steps: Vec<Step>,
}

fn default_script_name() -> String {
    "unnamed".to_string()
}

impl Script {
    pub fn new(name: impl Into<String>, steps: Vec<Step>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            steps,
        }
    }
}
