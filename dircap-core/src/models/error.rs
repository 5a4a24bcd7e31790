use thiserror::Error;

/// Errors raised on the capture side of the engine.
///
/// None of these ever reach the host application: the controller logs them
/// and disables capture for the session.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CaptureError {
    #[error("configuration failed: {0}")]
    ConfigurationFailed(String),

    #[error("storage error: {0}")]
    StorageError(String),

    #[error("sink is not open")]
    NotOpen,
}

/// Errors raised while patching code or dispatch tables.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HookError {
    #[error("failed to change protection of {len} bytes at {address:#x} (os error {code})")]
    Protection { address: usize, len: usize, code: u32 },

    #[error("null instance pointer")]
    NullInstance,

    #[error("instance {0:#x} was never hooked")]
    NotHooked(usize),
}
