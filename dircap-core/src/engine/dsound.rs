//! The slice of the DirectSound ABI the engine intercepts.
//!
//! Only raw pointers cross this boundary; the engine never takes part in
//! the objects' reference counting.

use std::ffi::c_void;

use crate::models::format::AudioFormat;

/// Success status shared by every intercepted call.
pub const DS_OK: i32 = 0;

/// Status returned when a call cannot be forwarded (`E_FAIL`).
pub const DSERR_GENERIC: i32 = 0x8000_4005_u32 as i32;

/// Exported name of the device factory in `dsound.dll`.
pub const FACTORY_EXPORT: &str = "DirectSoundCreate";

/// Module hosting the device factory.
pub const DSOUND_MODULE: &str = "dsound.dll";

/// `IDirectSound::CreateSoundBuffer`.
pub const DEVICE_CREATE_SOUND_BUFFER_SLOT: usize = 3;

/// `IDirectSoundBuffer::SetFormat`.
pub const BUFFER_SET_FORMAT_SLOT: usize = 14;

/// `IDirectSoundBuffer::Unlock`.
pub const BUFFER_UNLOCK_SLOT: usize = 19;

/// `DirectSoundCreate(guid, device_out, outer)`.
pub type FactoryFn = unsafe extern "system" fn(*const c_void, *mut *mut c_void, *mut c_void) -> i32;

/// `CreateSoundBuffer(this, desc, buffer_out, outer)`.
pub type CreateSoundBufferFn =
    unsafe extern "system" fn(*mut c_void, *const c_void, *mut *mut c_void, *mut c_void) -> i32;

/// `SetFormat(this, format)`.
pub type SetFormatFn = unsafe extern "system" fn(*mut c_void, *const WaveFormatEx) -> i32;

/// `Unlock(this, region1, len1, region2, len2)`.
pub type UnlockFn = unsafe extern "system" fn(*mut c_void, *mut c_void, u32, *mut c_void, u32) -> i32;

/// `WAVEFORMATEX`, byte-packed as in the Windows headers.
#[repr(C, packed(1))]
#[derive(Debug, Clone, Copy, Default)]
pub struct WaveFormatEx {
    pub format_tag: u16,
    pub channels: u16,
    pub samples_per_sec: u32,
    pub avg_bytes_per_sec: u32,
    pub block_align: u16,
    pub bits_per_sample: u16,
    pub cb_size: u16,
}

impl WaveFormatEx {
    /// Plain PCM descriptor, as a host would fill it in.
    pub fn pcm(sample_rate: u32, bits_per_sample: u16, channels: u16) -> Self {
        let format = AudioFormat::new(sample_rate, bits_per_sample, channels);
        Self {
            format_tag: 1,
            channels,
            samples_per_sec: sample_rate,
            avg_bytes_per_sec: format.byte_rate(),
            block_align: format.frame_size(),
            bits_per_sample,
            cb_size: 0,
        }
    }
}

impl From<&WaveFormatEx> for AudioFormat {
    fn from(w: &WaveFormatEx) -> Self {
        let (rate, bits, channels) = (w.samples_per_sec, w.bits_per_sample, w.channels);
        AudioFormat::new(rate, bits, channels)
    }
}

/// Hook replacements the controller patches into the process.
///
/// These are the engine's `extern "system"` thunks; each one looks up the
/// active controller and forwards to the matching `on_*` method.
#[derive(Clone, Copy)]
pub struct HookReplacements {
    pub factory: FactoryFn,
    pub create_sound_buffer: CreateSoundBufferFn,
    pub set_format: SetFormatFn,
    pub unlock: UnlockFn,
}
