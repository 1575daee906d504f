// ADB module - device transport over the `adb` command-line bridge
// Commands run as subprocesses through a `CommandRunner`, so the retry and
// calibration logic can be exercised without a device.

pub mod error;
pub mod resolve;
pub mod shell;
pub mod types;


// Re-export the main types and functions for easy access
pub use error::{AdbError, AdbResult};
pub use resolve::AdbLocator;
pub use shell::AdbShell;
pub use types::{
    AdbExecutable, AdbSource, CommandOutput, CommandRunner, CoordScale, Device, DeviceEntry,
    ProcessRunner,
};
