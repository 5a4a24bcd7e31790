//! The one engine instance a loaded module hosts.
//!
//! The thunks reach the controller through this slot. It is filled when the
//! module attaches and emptied by the teardown export, after the controller
//! has restored every patch and drained in-flight callbacks.

use std::sync::Arc;

use parking_lot::Mutex;

use dircap_core::engine::controller::InterceptionController;
use dircap_core::engine::dsound::FactoryFn;
use dircap_core::models::config::EngineConfig;
use dircap_core::models::error::HookError;
use dircap_core::models::recording_result::RecordingSummary;
use dircap_core::traits::page_protector::PageProtector;

use crate::thunks;

static ENGINE: Mutex<Option<Arc<InterceptionController>>> = parking_lot::const_mutex(None);

/// Build the controller, hook the factory at `target` and publish the
/// controller to the thunks. Starting again while one is running returns
/// the running controller untouched.
///
/// # Safety
/// `target` must be the entry point of the device factory and `original`
/// must be callable in its place while the patch is lifted.
pub unsafe fn start(
    config: EngineConfig,
    protector: Arc<dyn PageProtector>,
    target: usize,
    original: FactoryFn,
) -> Result<Arc<InterceptionController>, HookError> {
    let mut slot = ENGINE.lock();
    if let Some(running) = slot.as_ref() {
        log::warn!("Engine already running, ignoring start");
        return Ok(Arc::clone(running));
    }

    let controller = Arc::new(InterceptionController::new(config, thunks::replacements(), protector));
    controller.setup(target, original)?;
    let config = controller.config();
    log::info!(
        "Engine started: output {:?}, throttle {:?}",
        config.output_path,
        config.throttle()
    );
    *slot = Some(Arc::clone(&controller));
    Ok(controller)
}

/// The running controller, if any.
pub fn current() -> Option<Arc<InterceptionController>> {
    ENGINE.lock().clone()
}

/// Tear the running controller down and empty the slot.
pub fn shutdown() -> Option<RecordingSummary> {
    let controller = current()?;
    // Teardown blocks until callbacks drain; the slot stays filled so late
    // thunk entries still find a controller that forwards them.
    let summary = controller.teardown();
    ENGINE.lock().take();
    summary
}
