use std::process::ExitCode;

use thiserror::Error;

use dircap_windows::InjectError;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CliError {
    #[error("Process ID or window title required")]
    MissingTarget,

    #[error("Path is malformed: {0}")]
    MalformedPath(String),

    #[error("DirectSound injection is only available on Windows")]
    Unsupported,

    #[error(transparent)]
    Inject(#[from] InjectError),
}

/// Process exit codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    Success = 0,
    BadArguments = 1,
    MalformedPath = 2,
    NotAccessible = 3,
    PointerWidth = 4,
    ModuleNotFound = 5,
    TargetNotFound = 42,
}

impl ExitStatus {
    pub fn code(self) -> u8 {
        self as u8
    }
}

impl From<&CliError> for ExitStatus {
    fn from(e: &CliError) -> Self {
        match e {
            CliError::MissingTarget | CliError::Unsupported => ExitStatus::BadArguments,
            CliError::MalformedPath(_) => ExitStatus::MalformedPath,
            CliError::Inject(InjectError::WindowNotFound(_)) => ExitStatus::TargetNotFound,
            CliError::Inject(InjectError::PointerWidth { .. }) => ExitStatus::PointerWidth,
            CliError::Inject(InjectError::ModuleNotFound) => ExitStatus::ModuleNotFound,
            CliError::Inject(_) => ExitStatus::NotAccessible,
        }
    }
}

/// An uninstall against a target that never loaded the engine has nothing
/// to undo, so it is not a failure.
pub fn uninstall_outcome(result: Result<u32, InjectError>) -> Result<(), CliError> {
    match result {
        Ok(_) => Ok(()),
        Err(InjectError::ModuleNotLoaded) => {
            log::warn!("Engine module is not loaded in the target, nothing to unload");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

impl From<ExitStatus> for ExitCode {
    fn from(status: ExitStatus) -> Self {
        ExitCode::from(status.code())
    }
}
