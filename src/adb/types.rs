// Core ADB types and traits
use super::error::{AdbError, AdbResult};
use serde::Serialize;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

/// Captured result of one `adb` invocation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommandOutput {
    pub status: Option<i32>, // None when the process was killed by a signal
    pub stdout: Vec<u8>,
    pub stderr: String,
}

impl CommandOutput {
    /// A successful, empty result.
    pub fn ok() -> Self {
        Self {
            status: Some(0),
            ..Default::default()
        }
    }

    /// A successful result carrying `stdout`.
    pub fn with_stdout(stdout: impl Into<Vec<u8>>) -> Self {
        Self {
            status: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// A failed result with the given exit status and stderr text.
    pub fn failed(status: i32, stderr: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            stdout: Vec::new(),
            stderr: stderr.into(),
        }
    }

    /// Zero exit status and no `error` token on stderr.
    pub fn is_success(&self) -> bool {
        self.status == Some(0) && !self.stderr.to_lowercase().contains("error")
    }

    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).trim().to_string()
    }
}

/// Seam between the transport and the operating system process table.
pub trait CommandRunner: Send + Sync + 'static {
    /// Run `program args...` to completion. Launch failures and timeouts are `Err`.
    fn run(
        &self,
        program: &Path,
        args: &[String],
        timeout: Duration,
    ) -> impl Future<Output = AdbResult<CommandOutput>> + Send;
}

/// Spawns real subprocesses with tokio.
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner;

impl CommandRunner for ProcessRunner {
    async fn run(
        &self,
        program: &Path,
        args: &[String],
        timeout: Duration,
    ) -> AdbResult<CommandOutput> {
        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        let child = cmd.spawn().map_err(|source| AdbError::LaunchFailed {
            program: program.to_path_buf(),
            source,
        })?;
        let output = tokio::time::timeout(timeout, child.wait_with_output())
            .await
            .map_err(|_| AdbError::Timeout {
                duration: timeout,
                description: format!("{} {}", program.display(), args.join(" ")),
            })?
            .map_err(|source| AdbError::LaunchFailed {
                program: program.to_path_buf(),
                source,
            })?;
        Ok(CommandOutput {
            status: output.status.code(),
            stdout: output.stdout,
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }
}

/// What the automation layers need from a connected device.
///
/// All coordinates are in screenshot-pixel space; implementations translate them
/// to whatever the device input layer expects.
pub trait Device: Send + Sync + 'static {
    fn is_connected(&self) -> bool;

    fn tap(&self, x: u32, y: u32) -> impl Future<Output = AdbResult<CommandOutput>> + Send;

    fn swipe(
        &self,
        x1: u32,
        y1: u32,
        x2: u32,
        y2: u32,
        duration_ms: u32,
    ) -> impl Future<Output = AdbResult<CommandOutput>> + Send;

    /// A long press is a zero-distance swipe held for `duration_ms`.
    fn long_press(
        &self,
        x: u32,
        y: u32,
        duration_ms: u32,
    ) -> impl Future<Output = AdbResult<CommandOutput>> + Send {
        self.swipe(x, y, x, y, duration_ms)
    }

    fn key_event(&self, keycode: u32) -> impl Future<Output = AdbResult<CommandOutput>> + Send;

    /// Raw PNG bytes of the current screen, `None` on any failure.
    fn screenshot(&self) -> impl Future<Output = Option<Vec<u8>>> + Send;
}

#[derive(Debug, PartialEq, Serialize, Clone)]
pub struct DeviceEntry {
    pub serial: String,
    pub state: String,
}

/// Per-axis factor from screenshot pixels to logical input coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoordScale {
    pub sx: f64,
    pub sy: f64,
}

impl Default for CoordScale {
    fn default() -> Self {
        Self { sx: 1.0, sy: 1.0 }
    }
}

impl CoordScale {
    /// `logical / screenshot` per axis; identity when either size is degenerate.
    pub fn between(logical: (u32, u32), screenshot: (u32, u32)) -> Self {
        if screenshot.0 == 0 || screenshot.1 == 0 || logical.0 == 0 || logical.1 == 0 {
            return Self::default();
        }
        Self {
            sx: logical.0 as f64 / screenshot.0 as f64,
            sy: logical.1 as f64 / screenshot.1 as f64,
        }
    }

    pub fn is_identity(&self) -> bool {
        (self.sx - 1.0).abs() <= 0.01 && (self.sy - 1.0).abs() <= 0.01
    }

    /// Truncating conversion, matching how `input tap` receives integers.
    pub fn apply(&self, x: u32, y: u32) -> (u32, u32) {
        ((x as f64 * self.sx) as u32, (y as f64 * self.sy) as u32)
    }
}

/// Resolved location of the `adb` executable and how it was found.
#[derive(Debug, Clone, PartialEq)]
pub struct AdbExecutable {
    pub path: PathBuf,
    pub source: AdbSource,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdbSource {
    Explicit,
    Bundled,
    System,
    Fetched,
    Vendor,
    Bare,
}
