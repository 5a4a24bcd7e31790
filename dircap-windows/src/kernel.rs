//! kernel32 routine lookup for the shellcode emitter.

use windows::core::{s, w, PCSTR};
use windows::Win32::Foundation::HMODULE;
use windows::Win32::System::LibraryLoader::{GetModuleHandleW, GetProcAddress};

use dircap_core::inject::shellcode::KernelRoutines;

use crate::error::InjectError;

/// Resolve the routines the blobs call from this process's kernel32, which
/// shares its base with the target's.
pub fn resolve_kernel_routines() -> Result<KernelRoutines, InjectError> {
    let kernel32 =
        unsafe { GetModuleHandleW(w!("kernel32.dll")) }.map_err(|_| InjectError::KernelRoutine("kernel32.dll"))?;

    let routines = KernelRoutines {
        set_environment_variable_w: routine(kernel32, s!("SetEnvironmentVariableW"), "SetEnvironmentVariableW")?,
        load_library_w: routine(kernel32, s!("LoadLibraryW"), "LoadLibraryW")?,
        get_last_error: routine(kernel32, s!("GetLastError"), "GetLastError")?,
        get_module_handle_w: routine(kernel32, s!("GetModuleHandleW"), "GetModuleHandleW")?,
        get_proc_address: routine(kernel32, s!("GetProcAddress"), "GetProcAddress")?,
    };
    log::debug!("kernel32 routines: {:x?}", routines);
    Ok(routines)
}

fn routine(module: HMODULE, name: PCSTR, label: &'static str) -> Result<u64, InjectError> {
    unsafe { GetProcAddress(module, name) }
        .map(|f| f as usize as u64)
        .ok_or(InjectError::KernelRoutine(label))
}
