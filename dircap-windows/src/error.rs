use thiserror::Error;

/// Errors from target acquisition and remote execution. OS failures carry
/// the Win32 error code.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InjectError {
    #[error("no window titled {0:?}")]
    WindowNotFound(String),

    #[error("opening process {pid} failed with error {code}")]
    OpenProcess { pid: u32, code: u32 },

    #[error("process {pid} does not have the injector's pointer width")]
    PointerWidth { pid: u32 },

    #[error("querying process {pid} failed with error {code}")]
    QueryProcess { pid: u32, code: u32 },

    #[error("changing working set size failed with error {0}")]
    WorkingSet(u32),

    #[error("kernel32 routine {0} could not be resolved")]
    KernelRoutine(&'static str),

    #[error("remote allocation failed with error {0}")]
    Allocate(u32),

    #[error("blob of {len} bytes does not fit the remote page")]
    BlobTooLarge { len: usize },

    #[error("writing remote memory failed with error {0}")]
    Write(u32),

    #[error("creating remote thread failed with error {0}")]
    CreateThread(u32),

    #[error("waiting for remote thread failed with error {0}")]
    Wait(u32),

    #[error("the engine module was not found in the target")]
    ModuleNotFound,

    #[error("the engine module is not loaded in the target")]
    ModuleNotLoaded,
}

#[cfg(target_os = "windows")]
pub(crate) fn os_code(e: &windows::core::Error) -> u32 {
    // HRESULT_FROM_WIN32 wraps the Win32 code in the low word.
    let hr = e.code().0 as u32;
    if hr & 0xFFFF_0000 == 0x8007_0000 {
        hr & 0xFFFF
    } else {
        hr
    }
}

#[cfg(target_os = "windows")]
pub(crate) fn last_error() -> u32 {
    unsafe { windows::Win32::Foundation::GetLastError().0 }
}
