//! # dircap-engine
//!
//! The module the injector loads into the target process.
//!
//! On attach it reads its configuration from the environment values the
//! install blob set, hooks `DirectSoundCreate` and starts following the
//! DirectSound object lifecycle. The exported `dircap_unload` restores every
//! patch, finalizes the recording and unloads the module.

pub mod runtime;
mod thunks;

#[cfg(target_os = "windows")]
mod dll;
