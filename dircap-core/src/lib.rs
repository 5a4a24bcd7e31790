//! # dircap-core
//!
//! Platform-agnostic core of the DirectSound capture tool.
//!
//! Provides the hook primitives, the interception state machine that follows
//! DirectSound's object lifecycle, WAV I/O, and the shellcode emitter the
//! injector runs inside the target. Everything that touches page protection
//! goes through the `PageProtector` trait; the Windows crate supplies the
//! real implementation, tests use plain heap memory.
//!
//! ## Architecture
//!
//! ```text
//! dircap-core (this crate)
//! ├── hook/         ← InlineHook, VTableHook
//! ├── engine/       ← InterceptionController, UsageCounter, DirectSound ABI
//! ├── inject/       ← shellcode emission for install / uninstall
//! ├── models/       ← AudioFormat, EngineConfig, errors, RecordingSummary, EnginePhase
//! ├── processing/   ← WAV header generation
//! ├── session/      ← CaptureSession
//! ├── storage/      ← WavFileWriter
//! └── traits/       ← CaptureSink, PageProtector
//! ```

#[cfg(not(target_pointer_width = "64"))]
compile_error!("dircap only supports 64-bit targets");

pub mod engine;
pub mod hook;
pub mod inject;
pub mod models;
pub mod processing;
pub mod session;
pub mod storage;
pub mod traits;

// Re-export key types at crate root for convenience.
pub use engine::controller::{InterceptionController, SinkFactory};
pub use engine::dsound::{HookReplacements, WaveFormatEx};
pub use engine::usage::{UsageCounter, UsageGuard};
pub use hook::inline::InlineHook;
pub use hook::vtable::{HookOutcome, VTableHook};
pub use inject::shellcode::{emit_install, emit_uninstall, InstallPayload, KernelRoutines, ShellcodeBlob};
pub use models::config::EngineConfig;
pub use models::error::{CaptureError, HookError};
pub use models::format::AudioFormat;
pub use models::recording_result::RecordingSummary;
pub use models::state::EnginePhase;
pub use session::capture::CaptureSession;
pub use storage::wav_writer::WavFileWriter;
pub use traits::capture_sink::CaptureSink;
pub use traits::page_protector::{PageProtector, WritableMemory};
