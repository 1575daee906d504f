use crate::adb::AdbError;
use thiserror::Error;

pub type MacroResult<T> = Result<T, MacroError>;

#[derive(Debug, Error)]
pub enum MacroError {
    #[error("Step '{step}' failed: {reason}")]
    Step { step: String, reason: String },

    #[error(transparent)]
    Adb(#[from] AdbError),

    #[error("Script '{0}' has no steps")]
    EmptyScript(String),

    #[error("Invalid action: {0}")]
    InvalidAction(String),

    #[error("Setup failed: {0}")]
    Setup(String),

    #[error("A run is already active")]
    AlreadyRunning,

    #[error("Device not connected")]
    NotConnected,
}
