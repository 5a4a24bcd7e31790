//! `extern "system"` entry points patched into the host. Each one forwards
//! to the running controller, or fails the call if none is running.

use std::ffi::c_void;

use dircap_core::engine::dsound::{HookReplacements, WaveFormatEx, DSERR_GENERIC};

use crate::runtime;

unsafe extern "system" fn direct_sound_create(
    guid: *const c_void,
    device_out: *mut *mut c_void,
    outer: *mut c_void,
) -> i32 {
    match runtime::current() {
        Some(engine) => engine.on_factory(guid, device_out, outer),
        None => DSERR_GENERIC,
    }
}

unsafe extern "system" fn create_sound_buffer(
    device: *mut c_void,
    desc: *const c_void,
    buffer_out: *mut *mut c_void,
    outer: *mut c_void,
) -> i32 {
    match runtime::current() {
        Some(engine) => engine.on_create_sound_buffer(device, desc, buffer_out, outer),
        None => DSERR_GENERIC,
    }
}

unsafe extern "system" fn set_format(buffer: *mut c_void, format: *const WaveFormatEx) -> i32 {
    match runtime::current() {
        Some(engine) => engine.on_set_format(buffer, format),
        None => DSERR_GENERIC,
    }
}

unsafe extern "system" fn unlock(
    buffer: *mut c_void,
    region1: *mut c_void,
    len1: u32,
    region2: *mut c_void,
    len2: u32,
) -> i32 {
    match runtime::current() {
        Some(engine) => engine.on_unlock(buffer, region1, len1, region2, len2),
        None => DSERR_GENERIC,
    }
}

pub fn replacements() -> HookReplacements {
    HookReplacements {
        factory: direct_sound_create,
        create_sound_buffer,
        set_format,
        unlock,
    }
}
