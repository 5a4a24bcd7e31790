//! `VirtualProtect`-backed page protection for in-process patching.

use std::ffi::c_void;

use windows::Win32::System::Diagnostics::Debug::FlushInstructionCache;
use windows::Win32::System::Memory::{VirtualProtect, PAGE_EXECUTE_READWRITE, PAGE_PROTECTION_FLAGS};
use windows::Win32::System::Threading::GetCurrentProcess;

use dircap_core::models::error::HookError;
use dircap_core::traits::page_protector::PageProtector;

use crate::error::os_code;

/// Makes code and dispatch-table pages writable before a patch.
///
/// Pages are left `PAGE_EXECUTE_READWRITE`: a patch and its restore always
/// come in pairs, and a concurrent restore of the previous protection could
/// race another hook writing the same page.
#[derive(Debug, Default, Clone, Copy)]
pub struct VirtualProtector;

impl PageProtector for VirtualProtector {
    unsafe fn make_writable(&self, address: usize, len: usize) -> Result<(), HookError> {
        let mut previous = PAGE_PROTECTION_FLAGS::default();
        VirtualProtect(address as *const c_void, len, PAGE_EXECUTE_READWRITE, &mut previous).map_err(|e| {
            HookError::Protection {
                address,
                len,
                code: os_code(&e),
            }
        })
    }

    fn flush_instructions(&self, address: usize, len: usize) {
        unsafe {
            if let Err(e) = FlushInstructionCache(GetCurrentProcess(), Some(address as *const c_void), len) {
                log::warn!("FlushInstructionCache({:#x}, {}) failed: {}", address, len, e);
            }
        }
    }
}
