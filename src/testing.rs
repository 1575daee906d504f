// Test doubles shared by the unit tests of the higher layers
use crate::adb::{AdbResult, CommandOutput, Device};
use image::{ImageFormat, Rgb, RgbImage};
use std::io::Cursor;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

#[derive(Debug, Clone, PartialEq)]
pub enum Input {
    Tap(u32, u32),
    Swipe(u32, u32, u32, u32, u32),
    Key(u32),
}

/// In-memory device: records every input and serves a fixed screenshot.
pub struct FakeDevice {
    connected: AtomicBool,
    screen: Mutex<Option<Vec<u8>>>,
    inputs: Mutex<Vec<Input>>,
    screenshots: AtomicUsize,
    fail_input: AtomicBool,
}

impl FakeDevice {
    pub fn new() -> Self {
        Self {
            connected: AtomicBool::new(true),
            screen: Mutex::new(None),
            inputs: Mutex::new(Vec::new()),
            screenshots: AtomicUsize::new(0),
            fail_input: AtomicBool::new(false),
        }
    }

    pub fn with_screen(frame: &RgbImage) -> Self {
        let device = Self::new();
        device.set_screen(frame);
        device
    }

    pub fn set_screen(&self, frame: &RgbImage) {
        *self.screen.lock().unwrap() = Some(encode_png(frame));
    }

    pub fn set_raw_screen(&self, bytes: Option<Vec<u8>>) {
        *self.screen.lock().unwrap() = bytes;
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Makes every input command come back as a failed `CommandOutput`.
    pub fn set_fail_input(&self, fail: bool) {
        self.fail_input.store(fail, Ordering::SeqCst);
    }

    pub fn inputs(&self) -> Vec<Input> {
        self.inputs.lock().unwrap().clone()
    }

    pub fn screenshot_count(&self) -> usize {
        self.screenshots.load(Ordering::SeqCst)
    }

    fn record(&self, input: Input) -> AdbResult<CommandOutput> {
        self.inputs.lock().unwrap().push(input);
        if self.fail_input.load(Ordering::SeqCst) {
            Ok(CommandOutput::failed(1, "error: device offline"))
        } else {
            Ok(CommandOutput::ok())
        }
    }
}

impl Device for FakeDevice {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn tap(&self, x: u32, y: u32) -> AdbResult<CommandOutput> {
        self.record(Input::Tap(x, y))
    }

    async fn swipe(
        &self,
        x1: u32,
        y1: u32,
        x2: u32,
        y2: u32,
        duration_ms: u32,
    ) -> AdbResult<CommandOutput> {
        self.record(Input::Swipe(x1, y1, x2, y2, duration_ms))
    }

    async fn key_event(&self, keycode: u32) -> AdbResult<CommandOutput> {
        self.record(Input::Key(keycode))
    }

    async fn screenshot(&self) -> Option<Vec<u8>> {
        self.screenshots.fetch_add(1, Ordering::SeqCst);
        self.screen.lock().unwrap().clone()
    }
}

pub fn encode_png(frame: &RgbImage) -> Vec<u8> {
    let mut bytes = Cursor::new(Vec::new());
    frame.write_to(&mut bytes, ImageFormat::Png).unwrap();
    bytes.into_inner()
}

/// Deterministic textured background; no two nearby windows look alike.
pub fn noise_frame(width: u32, height: u32, seed: u32) -> RgbImage {
    RgbImage::from_fn(width, height, |x, y| {
        let v = x
            .wrapping_mul(73_856_093)
            ^ y.wrapping_mul(19_349_663)
            ^ seed.wrapping_mul(83_492_791);
        let v = v.wrapping_mul(2_654_435_761);
        Rgb([(v >> 24) as u8, (v >> 16) as u8, (v >> 8) as u8])
    })
}

/// Copies `patch` into `frame` with its top-left corner at (`x`, `y`).
pub fn paste(frame: &mut RgbImage, patch: &RgbImage, x: u32, y: u32) {
    image::imageops::replace(frame, patch, x as i64, y as i64);
}
