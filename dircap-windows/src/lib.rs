//! # dircap-windows
//!
//! Windows backend for dircap.
//!
//! Provides:
//! - `VirtualProtector`: `PageProtector` over `VirtualProtect`, used by the engine
//! - `TargetProcess`: process handle, window lookup, pointer width, working set
//! - `RemoteInjector`: runs install / uninstall blobs on a remote thread
//!
//! `InjectError` and the `InjectionTarget` checks are available on every
//! platform so front ends can map errors to exit codes without conditional
//! compilation.
//!
//! ## Usage
//! ```ignore
//! use dircap_windows::{RemoteInjector, TargetProcess};
//!
//! let target = TargetProcess::open(pid)?;
//! let injector = RemoteInjector::new(&target)?;
//! injector.install(&payload)?;
//! ```

pub mod error;
#[cfg(target_os = "windows")]
pub mod injector;
#[cfg(target_os = "windows")]
pub mod kernel;
pub mod preflight;
#[cfg(target_os = "windows")]
pub mod protect;
#[cfg(target_os = "windows")]
pub mod target;

pub use error::InjectError;
#[cfg(target_os = "windows")]
pub use injector::{RemoteInjector, RemotePage};
#[cfg(target_os = "windows")]
pub use kernel::resolve_kernel_routines;
pub use preflight::{allocate_checked, InjectionTarget};
#[cfg(target_os = "windows")]
pub use protect::VirtualProtector;
#[cfg(target_os = "windows")]
pub use target::TargetProcess;
