//! Runs shellcode blobs inside the target through `CreateRemoteThread`.
//!
//! One page is allocated per injector and reused for every blob, so the
//! install and uninstall blobs are emitted for the same base address.

use std::ffi::c_void;

use windows::Win32::Foundation::{CloseHandle, HANDLE, WAIT_OBJECT_0};
use windows::Win32::System::Diagnostics::Debug::WriteProcessMemory;
use windows::Win32::System::Memory::{
    VirtualAllocEx, VirtualFreeEx, MEM_COMMIT, MEM_RELEASE, MEM_RESERVE, PAGE_EXECUTE_READ,
};
use windows::Win32::System::Threading::{CreateRemoteThread, GetExitCodeThread, WaitForSingleObject, INFINITE};

use dircap_core::inject::shellcode::{
    emit_install, emit_uninstall, InstallPayload, KernelRoutines, ShellcodeBlob, ERROR_MOD_NOT_FOUND, PAGE_SIZE,
};

use crate::error::{last_error, os_code, InjectError};
use crate::kernel::resolve_kernel_routines;
use crate::preflight::{allocate_checked, InjectionTarget};
use crate::target::TargetProcess;

type ThreadStart = unsafe extern "system" fn(*mut c_void) -> u32;

/// A page of executable memory inside the target, released on drop.
pub struct RemotePage<'p> {
    process: &'p TargetProcess,
    base: *mut c_void,
}

impl<'p> RemotePage<'p> {
    pub fn allocate(process: &'p TargetProcess) -> Result<Self, InjectError> {
        let base = unsafe {
            VirtualAllocEx(process.handle(), None, PAGE_SIZE, MEM_COMMIT | MEM_RESERVE, PAGE_EXECUTE_READ)
        };
        if base.is_null() {
            return Err(InjectError::Allocate(last_error()));
        }
        log::debug!("Allocated remote page at {:p} in process {}", base, process.pid());
        Ok(Self { process, base })
    }

    pub fn base(&self) -> u64 {
        self.base as u64
    }

    /// Copy `blob` to the start of the page.
    pub fn write(&self, blob: &ShellcodeBlob) -> Result<(), InjectError> {
        if blob.len() > PAGE_SIZE {
            return Err(InjectError::BlobTooLarge { len: blob.len() });
        }
        let mut written = 0usize;
        unsafe {
            WriteProcessMemory(
                self.process.handle(),
                self.base,
                blob.bytes().as_ptr() as *const c_void,
                blob.len(),
                Some(&mut written),
            )
        }
        .map_err(|e| InjectError::Write(os_code(&e)))?;
        if written != blob.len() {
            return Err(InjectError::Write(last_error()));
        }
        log::info!("Code placed at {:p}", self.base);
        Ok(())
    }
}

impl<'p> InjectionTarget for &'p TargetProcess {
    type Page = RemotePage<'p>;

    fn pid(&self) -> u32 {
        TargetProcess::pid(self)
    }

    fn matches_pointer_width(&self) -> Result<bool, InjectError> {
        TargetProcess::matches_pointer_width(self)
    }

    fn allocate_page(&self) -> Result<RemotePage<'p>, InjectError> {
        RemotePage::allocate(*self)
    }
}

impl Drop for RemotePage<'_> {
    fn drop(&mut self) {
        if let Err(e) = unsafe { VirtualFreeEx(self.process.handle(), self.base, 0, MEM_RELEASE) } {
            log::warn!("Releasing remote page at {:p} failed: {}", self.base, e);
        }
    }
}

/// Installs and removes the engine module in one target.
pub struct RemoteInjector<'p> {
    process: &'p TargetProcess,
    routines: KernelRoutines,
    page: RemotePage<'p>,
}

impl<'p> RemoteInjector<'p> {
    /// Check the target's pointer width, then allocate the shared page.
    /// Nothing is allocated in a target of the wrong width.
    pub fn new(process: &'p TargetProcess) -> Result<Self, InjectError> {
        let page = allocate_checked(&process)?;
        let routines = resolve_kernel_routines()?;
        Ok(Self { process, routines, page })
    }

    pub fn base(&self) -> u64 {
        self.page.base()
    }

    /// Set the engine configuration in the target and load the module.
    pub fn install(&self, payload: &InstallPayload) -> Result<u32, InjectError> {
        let blob = emit_install(self.base(), &self.routines, payload);
        match self.run(&blob)? {
            ERROR_MOD_NOT_FOUND => Err(InjectError::ModuleNotFound),
            status => Ok(status),
        }
    }

    /// Call the module's teardown export.
    pub fn uninstall(&self, module_path: &[u16]) -> Result<u32, InjectError> {
        let blob = emit_uninstall(self.base(), &self.routines, module_path);
        match self.run(&blob)? {
            ERROR_MOD_NOT_FOUND => Err(InjectError::ModuleNotLoaded),
            status => Ok(status),
        }
    }

    /// Write `blob`, run it on a new remote thread and wait for it without
    /// a timeout. Returns the thread's exit status.
    fn run(&self, blob: &ShellcodeBlob) -> Result<u32, InjectError> {
        self.page.write(blob)?;

        let entry = blob.entry_point(self.base()) as usize;
        // SAFETY: the entry point is only ever executed in the target, where
        // the blob was just written.
        let start = unsafe { std::mem::transmute::<usize, ThreadStart>(entry) };
        let mut thread_id = 0u32;
        let thread = unsafe {
            CreateRemoteThread(self.process.handle(), None, 0, Some(start), None, 0, Some(&mut thread_id))
        }
        .map_err(|e| InjectError::CreateThread(os_code(&e)))?;
        log::info!("Thread with ID {} created", thread_id);

        let status = wait_for_exit(thread);
        if let Err(e) = unsafe { CloseHandle(thread) } {
            log::warn!("Closing remote thread handle failed: {}", e);
        }
        let status = status?;

        if status == 0 {
            log::info!("Thread finished with code 0");
        } else {
            log::warn!("Thread finished with code {} [ERROR]", status);
        }
        Ok(status)
    }
}

fn wait_for_exit(thread: HANDLE) -> Result<u32, InjectError> {
    if unsafe { WaitForSingleObject(thread, INFINITE) } != WAIT_OBJECT_0 {
        return Err(InjectError::Wait(last_error()));
    }
    let mut status = 0u32;
    unsafe { GetExitCodeThread(thread, &mut status) }.map_err(|e| InjectError::Wait(os_code(&e)))?;
    Ok(status)
}
