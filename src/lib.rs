pub mod adb;
pub mod automation;
pub mod background;
pub mod capture;
pub mod config;
pub mod events;
pub mod humanizer;
pub mod input;
pub mod logging;
pub mod store;
pub mod template_matching;
pub mod toolkit;

#[cfg(test)]
mod testing;

pub use adb::{AdbShell, Device};
pub use automation::{MacroEngine, RunState, Script};
pub use background::BackgroundScheduler;
pub use config::AppConfig;
pub use toolkit::Toolkit;
