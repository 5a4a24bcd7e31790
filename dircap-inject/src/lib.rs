//! # dircap-inject
//!
//! The controlling tool: picks a target process, injects the engine module
//! with a generated install blob, waits, and removes it again with an
//! uninstall blob.
//!
//! Argument handling, path helpers and exit-code mapping build and test on
//! any platform; the run loop itself is Windows-only.

pub mod cli;
pub mod error;
pub mod paths;

#[cfg(target_os = "windows")]
mod run;

pub use cli::{Args, Mode, Target};
pub use error::{CliError, ExitStatus};

#[cfg(target_os = "windows")]
pub use run::run;

#[cfg(not(target_os = "windows"))]
pub fn run(_args: &Args) -> Result<(), CliError> {
    Err(CliError::Unsupported)
}
