//! Module entry points: `DllMain` and the teardown export.

use std::ffi::c_void;
use std::sync::atomic::{AtomicPtr, Ordering};
use std::sync::Arc;

use windows::core::{s, w, BOOL};
use windows::Win32::Foundation::HMODULE;
use windows::Win32::System::LibraryLoader::{FreeLibraryAndExitThread, GetModuleHandleW, GetProcAddress};
use windows::Win32::System::SystemServices::{DLL_PROCESS_ATTACH, DLL_PROCESS_DETACH};

use dircap_core::engine::dsound::{FactoryFn, DSOUND_MODULE, FACTORY_EXPORT};
use dircap_core::models::config::{EngineConfig, LOG_FILTER_VAR};
use dircap_windows::VirtualProtector;

use crate::runtime;

static MODULE: AtomicPtr<c_void> = AtomicPtr::new(std::ptr::null_mut());

#[no_mangle]
pub extern "system" fn DllMain(module: HMODULE, reason: u32, reserved: *mut c_void) -> BOOL {
    match reason {
        DLL_PROCESS_ATTACH => {
            MODULE.store(module.0, Ordering::Release);
            init_logging();
            attach();
        }
        // On process exit the host's threads are already gone and nothing
        // needs restoring.
        DLL_PROCESS_DETACH if reserved.is_null() => {
            runtime::shutdown();
        }
        _ => {}
    }
    BOOL::from(true)
}

/// Stop capturing, restore every patch and unload this module. Does not
/// return: the calling thread exits with status 0.
#[no_mangle]
pub extern "system" fn dircap_unload() {
    log::info!("Teardown requested");
    runtime::shutdown();
    let module = HMODULE(MODULE.load(Ordering::Acquire));
    unsafe { FreeLibraryAndExitThread(module, 0) }
}

fn init_logging() {
    let filter = std::env::var(LOG_FILTER_VAR).unwrap_or_else(|_| "error".to_string());
    let _ = env_logger::Builder::new().parse_filters(&filter).try_init();
}

fn attach() {
    let mut config = EngineConfig::from_env();
    if let Err(e) = config.validate() {
        log::warn!("{}; capture disabled", e);
        config.output_path = None;
    }

    let Ok(dsound) = (unsafe { GetModuleHandleW(w!("dsound.dll")) }) else {
        log::warn!("{} is not loaded in this process, nothing to intercept", DSOUND_MODULE);
        return;
    };
    let Some(factory) = (unsafe { GetProcAddress(dsound, s!("DirectSoundCreate")) }) else {
        log::warn!("{} does not export {}", DSOUND_MODULE, FACTORY_EXPORT);
        return;
    };

    let target = factory as usize;
    // SAFETY: `DirectSoundCreate` has the factory signature; calling its entry
    // point while the patch is lifted runs the genuine code.
    let result = unsafe {
        let original = std::mem::transmute::<usize, FactoryFn>(target);
        runtime::start(config, Arc::new(VirtualProtector), target, original)
    };
    if let Err(e) = result {
        log::error!("Failed to hook {}: {}", FACTORY_EXPORT, e);
    }
}
