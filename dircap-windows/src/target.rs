//! The process being captured: access, lookup by window, pointer width and
//! working-set tuning.

use windows::core::PCWSTR;
use windows::Win32::Foundation::{CloseHandle, HANDLE};
use windows::Win32::System::Threading::{
    GetCurrentProcess, IsWow64Process, OpenProcess, SetProcessWorkingSetSize, PROCESS_CREATE_THREAD,
    PROCESS_QUERY_INFORMATION, PROCESS_SET_QUOTA, PROCESS_VM_OPERATION, PROCESS_VM_READ, PROCESS_VM_WRITE,
};
use windows::Win32::UI::WindowsAndMessaging::{FindWindowW, GetWindowThreadProcessId};

use crate::error::{last_error, os_code, InjectError};

const MIB: usize = 1024 * 1024;

/// An open handle to the target, closed on drop.
pub struct TargetProcess {
    pid: u32,
    handle: HANDLE,
}

impl TargetProcess {
    /// Open `pid` with the rights injection and working-set tuning need.
    pub fn open(pid: u32) -> Result<Self, InjectError> {
        let access = PROCESS_CREATE_THREAD
            | PROCESS_QUERY_INFORMATION
            | PROCESS_SET_QUOTA
            | PROCESS_VM_OPERATION
            | PROCESS_VM_READ
            | PROCESS_VM_WRITE;
        let handle = unsafe { OpenProcess(access, false, pid) }.map_err(|e| InjectError::OpenProcess {
            pid,
            code: os_code(&e),
        })?;
        log::debug!("Opened process {}", pid);
        Ok(Self { pid, handle })
    }

    /// Process id owning the top-level window titled `title`.
    pub fn find_window(title: &str) -> Result<u32, InjectError> {
        let wide: Vec<u16> = title.encode_utf16().chain(std::iter::once(0)).collect();
        let hwnd = unsafe { FindWindowW(PCWSTR::null(), PCWSTR(wide.as_ptr())) }
            .map_err(|_| InjectError::WindowNotFound(title.to_string()))?;
        if hwnd.is_invalid() {
            return Err(InjectError::WindowNotFound(title.to_string()));
        }

        let mut pid = 0u32;
        unsafe { GetWindowThreadProcessId(hwnd, Some(&mut pid)) };
        if pid == 0 {
            return Err(InjectError::WindowNotFound(title.to_string()));
        }
        log::info!("Window {:?} belongs to process {}", title, pid);
        Ok(pid)
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn handle(&self) -> HANDLE {
        self.handle
    }

    /// Whether the target runs with the same pointer width as this tool.
    pub fn matches_pointer_width(&self) -> Result<bool, InjectError> {
        let target = wow64(self.handle).map_err(|code| InjectError::QueryProcess { pid: self.pid, code })?;
        let own = wow64(unsafe { GetCurrentProcess() }).map_err(|code| InjectError::QueryProcess { pid: 0, code })?;
        Ok(target == own)
    }

    /// Set the target's working-set bounds, in MiB.
    pub fn set_working_set(&self, min_mib: usize, max_mib: usize) -> Result<(), InjectError> {
        unsafe { SetProcessWorkingSetSize(self.handle, min_mib * MIB, max_mib * MIB) }
            .map_err(|e| InjectError::WorkingSet(os_code(&e)))?;
        log::info!("Working set size of process {} changed to {}MiB/{}MiB", self.pid, min_mib, max_mib);
        Ok(())
    }
}

impl Drop for TargetProcess {
    fn drop(&mut self) {
        if let Err(e) = unsafe { CloseHandle(self.handle) } {
            log::warn!("Closing handle of process {} failed: {}", self.pid, e);
        }
    }
}

fn wow64(process: HANDLE) -> Result<bool, u32> {
    let mut flag = Default::default();
    match unsafe { IsWow64Process(process, &mut flag) } {
        Ok(()) => Ok(flag.as_bool()),
        Err(_) => Err(last_error()),
    }
}
