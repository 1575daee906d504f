use super::error::{AdbError, AdbResult};
use super::types::{
    AdbExecutable, CommandOutput, CommandRunner, CoordScale, Device, DeviceEntry, ProcessRunner,
};
use crate::config::AdbConfig;
use log::{debug, error, info, warn};
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);
const RECONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Anything shorter than this cannot be a PNG screenshot.
const MIN_SCREENSHOT_BYTES: usize = 100;

#[derive(Debug, Default)]
struct Connection {
    serial: Option<String>,
    screen_size: Option<(u32, u32)>,
    screenshot_size: Option<(u32, u32)>,
    scale: CoordScale,
}

/// Device transport built on the `adb` command-line bridge.
///
/// Every operation is one `adb` subprocess. Shell commands that fail are retried
/// after a disconnect/connect cycle; coordinates given in screenshot pixels are
/// translated to the device input space measured at connect time.
pub struct AdbShell<R: CommandRunner = ProcessRunner> {
    runner: R,
    adb: AdbExecutable,
    config: AdbConfig,
    connected: AtomicBool,
    connection: Mutex<Connection>,
}

impl AdbShell<ProcessRunner> {
    pub fn new(adb: AdbExecutable, config: AdbConfig) -> Self {
        Self::with_runner(ProcessRunner, adb, config)
    }
}

impl<R: CommandRunner> AdbShell<R> {
    pub fn with_runner(runner: R, adb: AdbExecutable, config: AdbConfig) -> Self {
        info!("🔧 ADB executable: {} ({:?})", adb.path.display(), adb.source);
        Self {
            runner,
            adb,
            config,
            connected: AtomicBool::new(false),
            connection: Mutex::new(Connection::default()),
        }
    }

    pub fn adb_path(&self) -> &Path {
        &self.adb.path
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    pub fn serial(&self) -> Option<String> {
        self.lock().serial.clone()
    }

    /// Logical display size reported by `wm size`.
    pub fn screen_size(&self) -> Option<(u32, u32)> {
        self.lock().screen_size
    }

    /// Pixel size of the screenshot taken during calibration.
    pub fn screenshot_size(&self) -> Option<(u32, u32)> {
        self.lock().screenshot_size
    }

    pub fn coord_scale(&self) -> CoordScale {
        self.lock().scale
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.connection
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn run_adb(&self, args: &[String], timeout: Duration) -> AdbResult<CommandOutput> {
        debug!("adb {}", args.join(" "));
        self.runner.run(&self.adb.path, args, timeout).await
    }

    /// Runs `args` against the connected serial (`-s <serial>`), or the default
    /// device when none has been selected yet.
    async fn run_device(&self, args: &[String], timeout: Duration) -> AdbResult<CommandOutput> {
        let serial = self.serial();
        match serial {
            Some(serial) => {
                let mut full = Vec::with_capacity(args.len() + 2);
                full.push("-s".to_string());
                full.push(serial);
                full.extend_from_slice(args);
                self.run_adb(&full, timeout).await
            }
            None => self.run_adb(args, timeout).await,
        }
    }

    /// Runs `adb shell <cmd>` and reconnects between failed attempts.
    ///
    /// A failed command (non-zero exit or `error` on stderr) is retried up to
    /// `retries` times; after that the last failed output is returned as `Ok`.
    /// Only launch failures and timeouts are returned as `Err`.
    pub async fn send_shell(
        &self,
        cmd: &str,
        timeout: Option<Duration>,
        retries: u32,
    ) -> AdbResult<CommandOutput> {
        let timeout = timeout.unwrap_or_else(|| self.config.timeout());
        let args: Vec<String> = std::iter::once("shell")
            .chain(cmd.split_whitespace())
            .map(str::to_string)
            .collect();

        let mut attempt = 0;
        loop {
            let output = self.run_device(&args, timeout).await?;
            if output.is_success() {
                return Ok(output);
            }
            if attempt >= retries {
                error!(
                    "❌ ADB command failed after {retries} retries: '{cmd}' ({})",
                    output.stderr
                );
                return Ok(output);
            }
            attempt += 1;
            warn!(
                "⚠️ ADB command failed ({}), reconnecting {attempt}/{retries}",
                output.stderr
            );
            self.reconnect().await?;
        }
    }

    /// `send_shell` with the configured timeout and retry count.
    pub async fn shell(&self, cmd: &str) -> AdbResult<CommandOutput> {
        self.send_shell(cmd, None, self.config.retries).await
    }

    async fn reconnect(&self) -> AdbResult<()> {
        let target = self.config.target();
        let pause = self.config.reconnect_pause();
        self.run_adb(&["disconnect".to_string(), target.clone()], self.config.timeout())
            .await?;
        tokio::time::sleep(pause).await;
        self.run_adb(&["connect".to_string(), target], RECONNECT_TIMEOUT)
            .await?;
        tokio::time::sleep(pause).await;
        Ok(())
    }

    /// Starts the adb server and connects to `host:port`.
    ///
    /// Falls back to the first attached device when the network connect does not
    /// report success. On success the coordinate scale is recalibrated.
    pub async fn connect(&self) -> AdbResult<bool> {
        let target = self.config.target();
        info!("🔌 Connecting to {target}");

        self.run_adb(&["start-server".to_string()], self.config.timeout())
            .await?;
        tokio::time::sleep(self.config.reconnect_pause()).await;

        let output = self
            .run_adb(&["connect".to_string(), target.clone()], CONNECT_TIMEOUT)
            .await?;
        let reply = output.stdout_text();
        info!("📡 adb connect: {reply}");

        let serial = if reply.to_lowercase().contains("connected") {
            Some(target)
        } else {
            self.list_devices()
                .await?
                .into_iter()
                .find(|d| d.state == "device")
                .map(|d| d.serial)
        };

        let Some(serial) = serial else {
            error!("❌ ADB connection failed");
            self.connected.store(false, Ordering::SeqCst);
            return Ok(false);
        };

        self.lock().serial = Some(serial.clone());
        self.connected.store(true, Ordering::SeqCst);
        self.calibrate().await;
        info!("✅ Connected to {serial}");
        Ok(true)
    }

    pub async fn disconnect(&self) -> AdbResult<()> {
        let serial = {
            let mut conn = self.lock();
            conn.scale = CoordScale::default();
            conn.serial.take()
        };
        self.connected.store(false, Ordering::SeqCst);
        if let Some(serial) = serial {
            self.run_adb(&["disconnect".to_string(), serial], self.config.timeout())
                .await?;
        }
        info!("🔌 ADB disconnected");
        Ok(())
    }

    /// Measures `wm size` against a real screenshot and stores the per-axis
    /// scale. Failures leave the scale at identity.
    async fn calibrate(&self) {
        let args = ["shell".to_string(), "wm".to_string(), "size".to_string()];
        match self.run_device(&args, self.config.timeout()).await {
            Ok(output) => match parse_screen_size(&output.stdout_text()) {
                Ok(size) => {
                    info!("📱 Screen size (wm size): {}x{}", size.0, size.1);
                    self.lock().screen_size = Some(size);
                }
                Err(e) => warn!("⚠️ {e}"),
            },
            Err(e) => warn!("⚠️ Screen size query failed: {e}"),
        }

        let Some(png) = self.screenshot().await else {
            warn!("⚠️ Coordinate calibration skipped: no screenshot");
            return;
        };
        let shot = match image::load_from_memory(&png) {
            Ok(img) => (img.width(), img.height()),
            Err(e) => {
                warn!(
                    "⚠️ {}",
                    AdbError::ScreenshotDecodeFailed {
                        description: e.to_string()
                    }
                );
                return;
            }
        };
        info!("🖼️ Screenshot size: {}x{}", shot.0, shot.1);

        let mut conn = self.lock();
        conn.screenshot_size = Some(shot);
        if let Some(logical) = conn.screen_size {
            let scale = CoordScale::between(logical, shot);
            if scale.is_identity() {
                info!("✅ Coordinate scale 1:1");
            } else {
                warn!(
                    "⚠️ Coordinate scale detected: screenshot {}x{} vs wm size {}x{} -> ({:.3}, {:.3})",
                    shot.0, shot.1, logical.0, logical.1, scale.sx, scale.sy
                );
            }
            conn.scale = scale;
        }
    }

    pub async fn list_devices(&self) -> AdbResult<Vec<DeviceEntry>> {
        let output = self
            .run_adb(&["devices".to_string()], self.config.timeout())
            .await?;
        let devices = parse_devices(&output.stdout_text());
        debug!("Attached devices: {devices:?}");
        Ok(devices)
    }

    pub async fn text_input(&self, text: &str) -> AdbResult<CommandOutput> {
        let escaped = text.replace(' ', "%s");
        debug!("⌨️ Text input: {text}");
        self.shell(&format!("input text {escaped}")).await
    }

    /// The `mResumedActivity`/`mFocusedActivity` line of the activity dump.
    pub async fn current_activity(&self) -> AdbResult<Option<String>> {
        let output = self.shell("dumpsys activity activities").await?;
        Ok(parse_current_activity(&String::from_utf8_lossy(&output.stdout)))
    }
}

impl<R: CommandRunner> Device for AdbShell<R> {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn tap(&self, x: u32, y: u32) -> AdbResult<CommandOutput> {
        let (sx, sy) = self.coord_scale().apply(x, y);
        debug!("👆 Tap ({x},{y}) -> ({sx},{sy})");
        self.shell(&format!("input tap {sx} {sy}")).await
    }

    async fn swipe(
        &self,
        x1: u32,
        y1: u32,
        x2: u32,
        y2: u32,
        duration_ms: u32,
    ) -> AdbResult<CommandOutput> {
        let scale = self.coord_scale();
        let (sx1, sy1) = scale.apply(x1, y1);
        let (sx2, sy2) = scale.apply(x2, y2);
        debug!("👉 Swipe ({x1},{y1})->({x2},{y2}) scaled ({sx1},{sy1})->({sx2},{sy2}) {duration_ms}ms");
        self.shell(&format!("input swipe {sx1} {sy1} {sx2} {sy2} {duration_ms}"))
            .await
    }

    async fn key_event(&self, keycode: u32) -> AdbResult<CommandOutput> {
        debug!("🔑 Key event {keycode}");
        self.shell(&format!("input keyevent {keycode}")).await
    }

    async fn screenshot(&self) -> Option<Vec<u8>> {
        if !self.is_connected() {
            error!("❌ Screenshot refused: ADB not connected");
            return None;
        }
        let args = [
            "exec-out".to_string(),
            "screencap".to_string(),
            "-p".to_string(),
        ];
        match self.run_device(&args, self.config.timeout()).await {
            Ok(output) if output.status == Some(0) && output.stdout.len() > MIN_SCREENSHOT_BYTES => {
                debug!("📸 Screenshot captured ({} bytes)", output.stdout.len());
                Some(output.stdout)
            }
            Ok(output) => {
                error!(
                    "❌ Screenshot failed: status {:?}, {} bytes",
                    output.status,
                    output.stdout.len()
                );
                None
            }
            Err(e) => {
                error!("❌ Screenshot error: {e}");
                None
            }
        }
    }
}

/// Parses `adb devices` output, skipping the header line.
pub fn parse_devices(output: &str) -> Vec<DeviceEntry> {
    output
        .lines()
        .skip(1)
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let serial = parts.next()?;
            let state = parts.next()?;
            Some(DeviceEntry {
                serial: serial.to_string(),
                state: state.to_string(),
            })
        })
        .collect()
}

/// First `<width>x<height>` pair in `wm size` output.
pub fn parse_screen_size(output: &str) -> AdbResult<(u32, u32)> {
    output
        .split(|c: char| !(c.is_ascii_digit() || c == 'x'))
        .find_map(|token| {
            let (w, h) = token.split_once('x')?;
            Some((w.parse::<u32>().ok()?, h.parse::<u32>().ok()?))
        })
        .ok_or_else(|| AdbError::ScreenSizeParseFailed {
            output: output.to_string(),
        })
}

fn parse_current_activity(dump: &str) -> Option<String> {
    dump.lines()
        .find(|line| line.contains("mResumedActivity") || line.contains("mFocusedActivity"))
        .map(|line| line.trim().to_string())
}

#[cfg(test)]
mod parse_tests {
    use super::*;

    #[test]
    fn parse_devices_basic() {
        let adb_output = "List of devices attached\nemulator-5554\tdevice\n";
        let devs = parse_devices(adb_output);
        assert_eq!(
            devs,
            vec![DeviceEntry {
                serial: "emulator-5554".to_string(),
                state: "device".to_string()
            }]
        );
    }

    #[test]
    fn parse_devices_keeps_offline_state() {
        let adb_output =
            "List of devices attached\n127.0.0.1:5555\toffline\n1d36d8f1\tdevice\n\n";
        let devs = parse_devices(adb_output);
        assert_eq!(devs.len(), 2);
        assert_eq!(devs[0].state, "offline");
        assert_eq!(devs[1].serial, "1d36d8f1");
    }

    #[test]
    fn parse_screen_size_prefers_first_pair() {
        let out = "Physical size: 1080x1920\nOverride size: 720x1280";
        assert_eq!(parse_screen_size(out).unwrap(), (1080, 1920));
    }

    #[test]
    fn parse_screen_size_rejects_garbage() {
        assert!(matches!(
            parse_screen_size("wm: not found"),
            Err(AdbError::ScreenSizeParseFailed { .. })
        ));
    }

    #[test]
    fn current_activity_line_is_trimmed() {
        let dump = "ACTIVITY MANAGER\n    mResumedActivity: ActivityRecord{42 u0 com.game/.Main t7}\n";
        assert_eq!(
            parse_current_activity(dump).as_deref(),
            Some("mResumedActivity: ActivityRecord{42 u0 com.game/.Main t7}")
        );
    }
}
