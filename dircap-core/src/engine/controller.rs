//! The interception state machine.
//!
//! ```text
//! setup():             Idle → FactoryHooked          (inline hook on the factory)
//! factory call:        → device intercepted          (CreateSoundBuffer slot)
//! CreateSoundBuffer:   → buffer intercepted          (SetFormat + Unlock slots)
//! SetFormat:           → format known, session (re)opened
//! Unlock:              → committed regions appended to the session
//! teardown():          FactoryHooked → TornDown      (restore, drain, close)
//! ```
//!
//! Every `on_*` entry point raises the usage counter before touching state
//! and forwards the genuine call's status unchanged, whatever capture does.

use std::ffi::c_void;
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::engine::dsound::{
    CreateSoundBufferFn, FactoryFn, HookReplacements, SetFormatFn, UnlockFn, WaveFormatEx,
    BUFFER_SET_FORMAT_SLOT, BUFFER_UNLOCK_SLOT, DEVICE_CREATE_SOUND_BUFFER_SLOT, DSERR_GENERIC, DS_OK,
};
use crate::engine::usage::UsageCounter;
use crate::hook::inline::InlineHook;
use crate::hook::vtable::{HookOutcome, VTableHook};
use crate::models::config::EngineConfig;
use crate::models::error::{CaptureError, HookError};
use crate::models::format::AudioFormat;
use crate::models::recording_result::RecordingSummary;
use crate::models::state::EnginePhase;
use crate::session::capture::CaptureSession;
use crate::storage::wav_writer::WavFileWriter;
use crate::traits::capture_sink::CaptureSink;
use crate::traits::page_protector::PageProtector;

/// Creates the sink a new session writes to.
pub type SinkFactory = Box<dyn Fn(&Path) -> Result<Box<dyn CaptureSink>, CaptureError> + Send + Sync>;

/// Hook tables and the capture session, guarded by the controller's lock.
struct EngineState {
    phase: EnginePhase,
    factory_hook: Option<InlineHook>,
    factory: Option<FactoryFn>,
    create_buffer_hook: VTableHook<CreateSoundBufferFn>,
    set_format_hook: VTableHook<SetFormatFn>,
    unlock_hook: VTableHook<UnlockFn>,
    session: Option<CaptureSession>,
}

/// The process-wide interception context.
///
/// Constructed once when the engine module loads and torn down once by the
/// exported teardown entry point. The hook thunks reach it through the one
/// slot the engine module keeps.
pub struct InterceptionController {
    state: Mutex<EngineState>,
    usage: UsageCounter,
    config: EngineConfig,
    replacements: HookReplacements,
    protector: Arc<dyn PageProtector>,
    open_sink: SinkFactory,
}

impl InterceptionController {
    pub fn new(config: EngineConfig, replacements: HookReplacements, protector: Arc<dyn PageProtector>) -> Self {
        Self {
            state: Mutex::new(EngineState {
                phase: EnginePhase::Idle,
                factory_hook: None,
                factory: None,
                create_buffer_hook: VTableHook::new(DEVICE_CREATE_SOUND_BUFFER_SLOT, replacements.create_sound_buffer),
                set_format_hook: VTableHook::new(BUFFER_SET_FORMAT_SLOT, replacements.set_format),
                unlock_hook: VTableHook::new(BUFFER_UNLOCK_SLOT, replacements.unlock),
                session: None,
            }),
            usage: UsageCounter::new(),
            config,
            replacements,
            protector,
            open_sink: Box::new(open_wav_file),
        }
    }

    /// Replace the default WAV file sink.
    pub fn with_sink_factory(mut self, open_sink: SinkFactory) -> Self {
        self.open_sink = open_sink;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn phase(&self) -> EnginePhase {
        self.state.lock().phase
    }

    /// Callbacks currently inside the engine.
    pub fn in_flight(&self) -> usize {
        self.usage.active()
    }

    /// Format of the open session, if any.
    pub fn capture_format(&self) -> Option<AudioFormat> {
        self.state.lock().session.as_ref().map(CaptureSession::format)
    }

    pub fn is_device_hooked(&self, device: *mut c_void) -> bool {
        self.state.lock().create_buffer_hook.is_hooked(device)
    }

    pub fn is_buffer_hooked(&self, buffer: *mut c_void) -> bool {
        let state = self.state.lock();
        state.set_format_hook.is_hooked(buffer) && state.unlock_hook.is_hooked(buffer)
    }

    /// Patch the device factory. `Idle → FactoryHooked`.
    ///
    /// `original` is what gets invoked while the patch is lifted; for the
    /// real `DirectSoundCreate` it is `target` itself.
    ///
    /// # Safety
    /// `target` must be the entry point of a function with at least
    /// [`crate::hook::inline::ABS_JUMP_LEN`] bytes of code.
    pub unsafe fn setup(&self, target: usize, original: FactoryFn) -> Result<(), HookError> {
        let mut state = self.state.lock();
        if state.phase != EnginePhase::Idle {
            log::warn!("Setup requested in phase {:?}, ignoring", state.phase);
            return Ok(());
        }

        let mut hook = InlineHook::install(target, self.replacements.factory as usize);
        hook.enable(&*self.protector)?;

        log::info!("Device factory at {:#x} redirected to {:#x}", hook.target(), hook.replacement());
        state.factory_hook = Some(hook);
        state.factory = Some(original);
        state.phase = EnginePhase::FactoryHooked;
        Ok(())
    }

    /// Intercepted `DirectSoundCreate`.
    ///
    /// # Safety
    /// Arguments are forwarded verbatim from the host's call.
    pub unsafe fn on_factory(&self, guid: *const c_void, device_out: *mut *mut c_void, outer: *mut c_void) -> i32 {
        let _usage = self.usage.enter();
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let Some(factory) = state.factory else {
            log::error!("Factory call intercepted without a recorded original");
            return DSERR_GENERIC;
        };

        // With the patch still in place the genuine entry jumps straight
        // back here, so the call cannot be forwarded.
        if let Some(hook) = state.factory_hook.as_mut() {
            if let Err(e) = hook.disable(&*self.protector) {
                log::error!("Failed to lift factory hook, failing the call: {}", e);
                return DSERR_GENERIC;
            }
        }

        let status = factory(guid, device_out, outer);

        if state.phase == EnginePhase::FactoryHooked {
            if let Some(hook) = state.factory_hook.as_mut() {
                if let Err(e) = hook.enable(&*self.protector) {
                    log::warn!("Failed to re-apply factory hook: {}", e);
                }
            }
        }

        // Teardown may already have restored every slot while this call
        // waited on the lock; a patch made now would never be undone.
        if status == DS_OK && !device_out.is_null() && state.phase.is_active() {
            let device = *device_out;
            match state.create_buffer_hook.hook(device, &*self.protector) {
                Ok(HookOutcome::Unchanged) => {}
                Ok(_) => log::info!("Device {:?} intercepted", device),
                Err(e) => log::warn!("Could not hook device {:?}: {}", device, e),
            }
        }
        status
    }

    /// Intercepted `IDirectSound::CreateSoundBuffer`.
    ///
    /// # Safety
    /// Arguments are forwarded verbatim from the host's call.
    pub unsafe fn on_create_sound_buffer(
        &self,
        device: *mut c_void,
        desc: *const c_void,
        buffer_out: *mut *mut c_void,
        outer: *mut c_void,
    ) -> i32 {
        let _usage = self.usage.enter();
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let original = match state.create_buffer_hook.original(device) {
            Ok(original) => original,
            Err(e) => {
                log::error!("CreateSoundBuffer: {}", e);
                return DSERR_GENERIC;
            }
        };

        let status = original(device, desc, buffer_out, outer);
        if status != DS_OK || buffer_out.is_null() || !state.phase.is_active() {
            return status;
        }

        let buffer = *buffer_out;
        let set_format = state.set_format_hook.hook(buffer, &*self.protector);
        let unlock = state.unlock_hook.hook(buffer, &*self.protector);
        match (set_format, unlock) {
            (Ok(_), Ok(_)) => log::debug!("Buffer {:?} intercepted", buffer),
            (Err(e), _) | (_, Err(e)) => log::warn!("Could not hook buffer {:?}: {}", buffer, e),
        }
        status
    }

    /// Intercepted `IDirectSoundBuffer::SetFormat`.
    ///
    /// # Safety
    /// Arguments are forwarded verbatim from the host's call.
    pub unsafe fn on_set_format(&self, buffer: *mut c_void, format: *const WaveFormatEx) -> i32 {
        let _usage = self.usage.enter();
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let original = match state.set_format_hook.original(buffer) {
            Ok(original) => original,
            Err(e) => {
                log::error!("SetFormat: {}", e);
                return DSERR_GENERIC;
            }
        };

        let status = original(buffer, format);
        if status != DS_OK || format.is_null() || !state.phase.is_active() {
            return status;
        }

        let format = AudioFormat::from(&std::ptr::read_unaligned(format));
        self.reopen_session(state, format);
        status
    }

    /// Intercepted `IDirectSoundBuffer::Unlock`: the regions are committed
    /// back for playback, so their bytes are final.
    ///
    /// # Safety
    /// Arguments are forwarded verbatim from the host's call; non-null
    /// regions must be readable for their stated lengths.
    pub unsafe fn on_unlock(
        &self,
        buffer: *mut c_void,
        region1: *mut c_void,
        len1: u32,
        region2: *mut c_void,
        len2: u32,
    ) -> i32 {
        let _usage = self.usage.enter();
        let throttle = {
            let mut guard = self.state.lock();
            let state = &mut *guard;

            let original = match state.unlock_hook.original(buffer) {
                Ok(original) => original,
                Err(e) => {
                    log::error!("Unlock: {}", e);
                    return DSERR_GENERIC;
                }
            };

            let status = original(buffer, region1, len1, region2, len2);
            if status != DS_OK {
                return status;
            }

            let Some(session) = state.session.as_mut() else {
                return status;
            };

            let primary = region_bytes(region1, len1);
            let wraparound = (!region2.is_null()).then(|| region_bytes(region2, len2));
            let throttle = session.throttle();
            if let Err(e) = session.append(primary, wraparound) {
                log::warn!("Capture write failed, disabling capture: {}", e);
                Self::close_session(state);
                return status;
            }
            throttle
        };

        if let Some(delay) = throttle {
            std::thread::sleep(delay);
        }
        DS_OK
    }

    /// Restore every patch, wait for in-flight callbacks, then close the
    /// session. Safe to call more than once.
    pub fn teardown(&self) -> Option<RecordingSummary> {
        {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            if state.phase.is_terminal() {
                return None;
            }
            state.phase = EnginePhase::TornDown;

            // SAFETY: the patched code and tables belong to modules and
            // objects that outlive the engine's teardown call.
            unsafe {
                if let Some(hook) = state.factory_hook.as_mut() {
                    if let Err(e) = hook.disable(&*self.protector) {
                        log::error!("Failed to restore device factory: {}", e);
                    }
                }
                // Records stay until the drain below so queued callbacks can
                // still forward to the genuine methods.
                for result in [
                    state.create_buffer_hook.restore_all(&*self.protector),
                    state.set_format_hook.restore_all(&*self.protector),
                    state.unlock_hook.restore_all(&*self.protector),
                ] {
                    if let Err(e) = result {
                        log::error!("Failed to restore dispatch slot: {}", e);
                    }
                }
            }
        }

        self.usage.wait_idle();

        let mut guard = self.state.lock();
        guard.create_buffer_hook.forget_all();
        guard.set_format_hook.forget_all();
        guard.unlock_hook.forget_all();
        let summary = Self::close_session(&mut guard);
        log::info!("Interception engine torn down");
        summary
    }

    fn reopen_session(&self, state: &mut EngineState, format: AudioFormat) {
        Self::close_session(state);

        let Some(path) = self.config.output_path.as_deref() else {
            log::info!("Format {} set but no output path configured, not capturing", format);
            return;
        };

        let opened = (self.open_sink)(path).and_then(|sink| CaptureSession::open(sink, format, self.config.throttle()));
        match opened {
            Ok(session) => {
                log::info!("Capturing {} to {}", format, path.display());
                state.session = Some(session);
            }
            Err(e) => log::warn!("Capture disabled, cannot open {}: {}", path.display(), e),
        }
    }

    fn close_session(state: &mut EngineState) -> Option<RecordingSummary> {
        let session = state.session.take()?;
        let writes = session.writes();
        match session.close() {
            Ok(summary) => {
                log::info!(
                    "Capture closed after {} writes: {} bytes of {} ({:.1} s), sha256 {}",
                    writes,
                    summary.data_bytes,
                    summary.format,
                    summary.duration_secs(),
                    summary.checksum.as_deref().unwrap_or("-")
                );
                Some(summary)
            }
            Err(e) => {
                log::warn!("Failed to finalize capture: {}", e);
                None
            }
        }
    }
}

fn open_wav_file(path: &Path) -> Result<Box<dyn CaptureSink>, CaptureError> {
    Ok(Box::new(WavFileWriter::new(path.to_path_buf())))
}

unsafe fn region_bytes<'a>(region: *mut c_void, len: u32) -> &'a [u8] {
    if region.is_null() || len == 0 {
        return &[];
    }
    std::slice::from_raw_parts(region as *const u8, len as usize)
}

#[cfg(test)]
mod tests {
    // Drives the controller through fake DirectSound objects: heap tables whose
    // slots point at `extern "system"` test functions, and thunks that route to
    // a controller registered for the current test thread.

    use std::cell::{Cell, RefCell};
    use std::ffi::c_void;
    use std::fs;
    use std::path::PathBuf;
    use std::ptr::null_mut;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::{Duration, Instant};

    use parking_lot::Mutex;

    use super::*;
    use crate::hook::inline::{encode_abs_jump, ABS_JUMP_LEN};
    use crate::traits::page_protector::WritableMemory;

    const DSERR_INVALIDPARAM: i32 = 0x8007_0057_u32 as i32;

    thread_local! {
        static ACTIVE: RefCell<Option<Arc<InterceptionController>>> = const { RefCell::new(None) };
        static SET_FORMAT_STATUS: Cell<i32> = const { Cell::new(DS_OK) };
        static UNLOCK_STATUS: Cell<i32> = const { Cell::new(DS_OK) };
        static GENUINE_UNLOCKS: Cell<usize> = const { Cell::new(0) };
    }

    fn active() -> Arc<InterceptionController> {
        ACTIVE.with(|a| a.borrow().clone()).expect("no controller registered on this thread")
    }

    // Thunks standing in for the engine module's exports.

    unsafe extern "system" fn thunk_factory(guid: *const c_void, out: *mut *mut c_void, outer: *mut c_void) -> i32 {
        active().on_factory(guid, out, outer)
    }

    unsafe extern "system" fn thunk_create_buffer(
        this: *mut c_void,
        desc: *const c_void,
        out: *mut *mut c_void,
        outer: *mut c_void,
    ) -> i32 {
        active().on_create_sound_buffer(this, desc, out, outer)
    }

    unsafe extern "system" fn thunk_set_format(this: *mut c_void, format: *const WaveFormatEx) -> i32 {
        active().on_set_format(this, format)
    }

    unsafe extern "system" fn thunk_unlock(
        this: *mut c_void,
        p1: *mut c_void,
        l1: u32,
        p2: *mut c_void,
        l2: u32,
    ) -> i32 {
        active().on_unlock(this, p1, l1, p2, l2)
    }

    fn replacements() -> HookReplacements {
        HookReplacements {
            factory: thunk_factory,
            create_sound_buffer: thunk_create_buffer,
            set_format: thunk_set_format,
            unlock: thunk_unlock,
        }
    }

    // Fake DirectSound implementation.

    #[repr(C)]
    struct FakeCom {
        table: *mut usize,
    }

    fn fake_object(slots: &[(usize, usize)]) -> *mut c_void {
        let table: &'static mut [usize; 24] = Box::leak(Box::new([0usize; 24]));
        for &(index, method) in slots {
            table[index] = method;
        }
        let object = Box::leak(Box::new(FakeCom {
            table: table.as_mut_ptr(),
        }));
        object as *mut FakeCom as *mut c_void
    }

    fn slot_of(object: *mut c_void, index: usize) -> usize {
        unsafe {
            let table = *(object as *const *const usize);
            std::ptr::read_volatile(table.add(index))
        }
    }

    unsafe extern "system" fn genuine_factory(_guid: *const c_void, out: *mut *mut c_void, _outer: *mut c_void) -> i32 {
        *out = fake_object(&[(DEVICE_CREATE_SOUND_BUFFER_SLOT, genuine_create_buffer as usize)]);
        DS_OK
    }

    unsafe extern "system" fn genuine_create_buffer(
        _this: *mut c_void,
        _desc: *const c_void,
        out: *mut *mut c_void,
        _outer: *mut c_void,
    ) -> i32 {
        *out = fake_object(&[
            (BUFFER_SET_FORMAT_SLOT, genuine_set_format as usize),
            (BUFFER_UNLOCK_SLOT, genuine_unlock as usize),
        ]);
        DS_OK
    }

    unsafe extern "system" fn genuine_set_format(_this: *mut c_void, format: *const WaveFormatEx) -> i32 {
        if format.is_null() {
            return DSERR_INVALIDPARAM;
        }
        SET_FORMAT_STATUS.with(Cell::get)
    }

    unsafe extern "system" fn genuine_unlock(
        _this: *mut c_void,
        _p1: *mut c_void,
        _l1: u32,
        _p2: *mut c_void,
        _l2: u32,
    ) -> i32 {
        GENUINE_UNLOCKS.with(|c| c.set(c.get() + 1));
        UNLOCK_STATUS.with(Cell::get)
    }

    #[derive(Default)]
    struct Recorded {
        format: Option<AudioFormat>,
        data: Vec<u8>,
        closed: bool,
    }

    struct MemorySink(Arc<Mutex<Recorded>>);

    impl CaptureSink for MemorySink {
        fn open(&mut self, format: &AudioFormat) -> Result<(), CaptureError> {
            let mut recorded = self.0.lock();
            recorded.format = Some(*format);
            recorded.data.clear();
            Ok(())
        }

        fn write(&mut self, data: &[u8]) -> Result<(), CaptureError> {
            self.0.lock().data.extend_from_slice(data);
            Ok(())
        }

        fn close(&mut self) -> Result<RecordingSummary, CaptureError> {
            let mut recorded = self.0.lock();
            recorded.closed = true;
            Ok(RecordingSummary {
                file_path: None,
                format: recorded.format.ok_or(CaptureError::NotOpen)?,
                data_bytes: recorded.data.len() as u64,
                checksum: None,
            })
        }
    }

    const FACTORY_CODE: [u8; 16] = [0xCC; 16];

    struct Harness {
        controller: Arc<InterceptionController>,
        factory_code: usize,
    }

    impl Harness {
        fn new(controller: InterceptionController) -> Self {
            let controller = Arc::new(controller);
            ACTIVE.with(|a| *a.borrow_mut() = Some(Arc::clone(&controller)));
            SET_FORMAT_STATUS.with(|c| c.set(DS_OK));
            UNLOCK_STATUS.with(|c| c.set(DS_OK));
            GENUINE_UNLOCKS.with(|c| c.set(0));

            let code: &'static mut [u8; 16] = Box::leak(Box::new(FACTORY_CODE));
            let factory_code = code.as_mut_ptr() as usize;
            unsafe { controller.setup(factory_code, genuine_factory).unwrap() };
            Self {
                controller,
                factory_code,
            }
        }

        fn with_memory_sink(throttle: Duration) -> (Self, Arc<Mutex<Recorded>>) {
            let recorded = Arc::new(Mutex::new(Recorded::default()));
            let shared = Arc::clone(&recorded);
            let config = EngineConfig {
                output_path: Some(PathBuf::from("/memory")),
                throttle,
            };
            let controller = InterceptionController::new(config, replacements(), Arc::new(WritableMemory))
                .with_sink_factory(Box::new(move |_path: &Path| -> Result<Box<dyn CaptureSink>, CaptureError> {
                    Ok(Box::new(MemorySink(Arc::clone(&shared))))
                }));
            (Self::new(controller), recorded)
        }

        fn factory_bytes(&self) -> Vec<u8> {
            unsafe { std::slice::from_raw_parts(self.factory_code as *const u8, 16).to_vec() }
        }

        /// What a host call to the patched factory ends up doing.
        fn create_device(&self) -> *mut c_void {
            let mut device = null_mut();
            let status = unsafe { thunk_factory(std::ptr::null(), &mut device, null_mut()) };
            assert_eq!(status, DS_OK);
            device
        }

        fn create_buffer(&self, device: *mut c_void) -> *mut c_void {
            let slot = slot_of(device, DEVICE_CREATE_SOUND_BUFFER_SLOT);
            let method: CreateSoundBufferFn = unsafe { std::mem::transmute(slot) };
            let mut buffer = null_mut();
            let status = unsafe { method(device, std::ptr::null(), &mut buffer, null_mut()) };
            assert_eq!(status, DS_OK);
            buffer
        }

        fn set_format(&self, buffer: *mut c_void, format: &WaveFormatEx) -> i32 {
            let method: SetFormatFn = unsafe { std::mem::transmute(slot_of(buffer, BUFFER_SET_FORMAT_SLOT)) };
            unsafe { method(buffer, format) }
        }

        fn unlock(&self, buffer: *mut c_void, first: &mut [u8], second: Option<&mut [u8]>) -> i32 {
            let method: UnlockFn = unsafe { std::mem::transmute(slot_of(buffer, BUFFER_UNLOCK_SLOT)) };
            let (p2, l2) = match second {
                Some(region) => (region.as_mut_ptr() as *mut c_void, region.len() as u32),
                None => (null_mut(), 0),
            };
            unsafe { method(buffer, first.as_mut_ptr() as *mut c_void, first.len() as u32, p2, l2) }
        }
    }

    impl Drop for Harness {
        fn drop(&mut self) {
            ACTIVE.with(|a| a.borrow_mut().take());
        }
    }

    fn temp_file_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("dircap_controller_test_{}", name))
    }

    #[test]
    fn setup_patches_factory_entry() {
        let (harness, _) = Harness::with_memory_sink(Duration::ZERO);

        assert_eq!(harness.controller.phase(), EnginePhase::FactoryHooked);
        let bytes = harness.factory_bytes();
        assert_eq!(&bytes[..ABS_JUMP_LEN], &encode_abs_jump(thunk_factory as usize));
        assert_eq!(&bytes[ABS_JUMP_LEN..], &FACTORY_CODE[ABS_JUMP_LEN..]);
    }

    #[test]
    fn factory_call_hooks_device_and_rearms() {
        let (harness, _) = Harness::with_memory_sink(Duration::ZERO);
        let patched = harness.factory_bytes();

        let device = harness.create_device();

        assert!(harness.controller.is_device_hooked(device));
        assert_eq!(slot_of(device, DEVICE_CREATE_SOUND_BUFFER_SLOT), thunk_create_buffer as usize);
        assert_eq!(harness.factory_bytes(), patched);
    }

    #[test]
    fn every_buffer_gets_independent_hooks() {
        let (harness, _) = Harness::with_memory_sink(Duration::ZERO);
        let device = harness.create_device();

        let a = harness.create_buffer(device);
        let b = harness.create_buffer(device);
        assert_ne!(a, b);

        for buffer in [a, b] {
            assert!(harness.controller.is_buffer_hooked(buffer));
            assert_eq!(slot_of(buffer, BUFFER_SET_FORMAT_SLOT), thunk_set_format as usize);
            assert_eq!(slot_of(buffer, BUFFER_UNLOCK_SLOT), thunk_unlock as usize);
        }

        // Each instance still forwards to its own genuine method.
        let mut region = [0u8; 4];
        assert_eq!(harness.unlock(a, &mut region, None), DS_OK);
        assert_eq!(harness.unlock(b, &mut region, None), DS_OK);
        assert_eq!(GENUINE_UNLOCKS.with(Cell::get), 2);
    }

    #[test]
    fn format_then_unlock_writes_wav_file() {
        let path = temp_file_path("e2e.wav");
        let config = EngineConfig {
            output_path: Some(path.clone()),
            throttle: Duration::ZERO,
        };
        let harness = Harness::new(InterceptionController::new(config, replacements(), Arc::new(WritableMemory)));

        let device = harness.create_device();
        let buffer = harness.create_buffer(device);
        assert_eq!(harness.set_format(buffer, &WaveFormatEx::pcm(44100, 16, 2)), DS_OK);
        assert_eq!(harness.controller.capture_format(), Some(AudioFormat::new(44100, 16, 2)));

        let mut region: Vec<u8> = (0..100u8).collect();
        assert_eq!(harness.unlock(buffer, &mut region, None), DS_OK);

        let summary = harness.controller.teardown().unwrap();
        assert_eq!(summary.data_bytes, 100);

        let file = fs::read(&path).unwrap();
        let u16_at = |o: usize| u16::from_le_bytes([file[o], file[o + 1]]);
        let u32_at = |o: usize| u32::from_le_bytes(file[o..o + 4].try_into().unwrap());
        assert_eq!(file.len(), 144);
        assert_eq!(u16_at(22), 2);
        assert_eq!(u32_at(24), 44100);
        assert_eq!(u32_at(28), 176_400);
        assert_eq!(u16_at(32), 4);
        assert_eq!(u16_at(34), 16);
        assert_eq!(u32_at(40), 100);
        assert_eq!(u32_at(4), 136);
        assert_eq!(&file[44..], &region[..]);

        fs::remove_file(&path).ok();
    }

    #[test]
    fn regions_are_captured_in_call_order() {
        let (harness, recorded) = Harness::with_memory_sink(Duration::ZERO);
        let device = harness.create_device();
        let buffer = harness.create_buffer(device);
        harness.set_format(buffer, &WaveFormatEx::pcm(22050, 8, 1));

        let mut expected = Vec::new();
        for (round, (l1, l2)) in [(10usize, None), (6, Some(4usize)), (1, Some(0)), (8, None)].into_iter().enumerate() {
            let mut first = vec![round as u8; l1];
            let mut second = l2.map(|len| vec![0x80 | round as u8; len]);
            expected.extend_from_slice(&first);
            if let Some(second) = &second {
                expected.extend_from_slice(second);
            }
            assert_eq!(harness.unlock(buffer, &mut first, second.as_deref_mut()), DS_OK);
        }

        let summary = harness.controller.teardown().unwrap();
        assert_eq!(summary.data_bytes, expected.len() as u64);

        let recorded = recorded.lock();
        assert!(recorded.closed);
        assert_eq!(recorded.data, expected);
    }

    #[test]
    fn failed_unlock_is_forwarded_and_not_captured() {
        let (harness, recorded) = Harness::with_memory_sink(Duration::ZERO);
        let device = harness.create_device();
        let buffer = harness.create_buffer(device);
        harness.set_format(buffer, &WaveFormatEx::pcm(44100, 16, 2));

        UNLOCK_STATUS.with(|c| c.set(DSERR_GENERIC));
        let mut region = [1u8; 16];
        assert_eq!(harness.unlock(buffer, &mut region, None), DSERR_GENERIC);

        assert!(recorded.lock().data.is_empty());
    }

    #[test]
    fn failed_set_format_opens_no_session() {
        let (harness, recorded) = Harness::with_memory_sink(Duration::ZERO);
        let device = harness.create_device();
        let buffer = harness.create_buffer(device);

        SET_FORMAT_STATUS.with(|c| c.set(DSERR_INVALIDPARAM));
        assert_eq!(harness.set_format(buffer, &WaveFormatEx::pcm(44100, 16, 2)), DSERR_INVALIDPARAM);
        assert_eq!(harness.controller.capture_format(), None);

        let mut region = [1u8; 16];
        assert_eq!(harness.unlock(buffer, &mut region, None), DS_OK);
        assert!(recorded.lock().format.is_none());
    }

    #[test]
    fn new_format_replaces_session() {
        let (harness, recorded) = Harness::with_memory_sink(Duration::ZERO);
        let device = harness.create_device();
        let buffer = harness.create_buffer(device);

        harness.set_format(buffer, &WaveFormatEx::pcm(44100, 16, 2));
        harness.set_format(buffer, &WaveFormatEx::pcm(48000, 24, 2));

        assert_eq!(harness.controller.capture_format(), Some(AudioFormat::new(48000, 24, 2)));
        assert_eq!(recorded.lock().format, Some(AudioFormat::new(48000, 24, 2)));
    }

    #[test]
    fn sink_failure_disables_capture_only() {
        let config = EngineConfig {
            output_path: Some(PathBuf::from("/unwritable/rec.wav")),
            throttle: Duration::ZERO,
        };
        let controller = InterceptionController::new(config, replacements(), Arc::new(WritableMemory))
            .with_sink_factory(Box::new(|_path: &Path| -> Result<Box<dyn CaptureSink>, CaptureError> {
                Err(CaptureError::StorageError("access denied".into()))
            }));
        let harness = Harness::new(controller);
        let device = harness.create_device();
        let buffer = harness.create_buffer(device);

        assert_eq!(harness.set_format(buffer, &WaveFormatEx::pcm(44100, 16, 2)), DS_OK);
        assert_eq!(harness.controller.capture_format(), None);

        let mut region = [0u8; 32];
        assert_eq!(harness.unlock(buffer, &mut region, None), DS_OK);
        assert_eq!(GENUINE_UNLOCKS.with(Cell::get), 1);
        assert!(harness.controller.teardown().is_none());
    }

    #[test]
    fn missing_output_path_skips_capture() {
        let controller = InterceptionController::new(EngineConfig::default(), replacements(), Arc::new(WritableMemory));
        let harness = Harness::new(controller);
        let device = harness.create_device();
        let buffer = harness.create_buffer(device);

        assert_eq!(harness.set_format(buffer, &WaveFormatEx::pcm(44100, 16, 2)), DS_OK);
        assert_eq!(harness.controller.capture_format(), None);
    }

    #[test]
    fn throttle_paces_each_capture_write() {
        let (harness, _) = Harness::with_memory_sink(Duration::from_millis(30));
        let device = harness.create_device();
        let buffer = harness.create_buffer(device);
        harness.set_format(buffer, &WaveFormatEx::pcm(8000, 8, 1));

        let mut region = [0u8; 8];
        let start = Instant::now();
        harness.unlock(buffer, &mut region, None);
        harness.unlock(buffer, &mut region, None);
        assert!(start.elapsed() >= Duration::from_millis(60));
    }

    #[test]
    fn teardown_restores_every_patch() {
        let (harness, _) = Harness::with_memory_sink(Duration::ZERO);
        let device = harness.create_device();
        let buffer = harness.create_buffer(device);
        harness.set_format(buffer, &WaveFormatEx::pcm(44100, 16, 2));

        harness.controller.teardown();

        assert_eq!(harness.controller.phase(), EnginePhase::TornDown);
        assert_eq!(harness.factory_bytes(), FACTORY_CODE.to_vec());
        assert_eq!(slot_of(device, DEVICE_CREATE_SOUND_BUFFER_SLOT), genuine_create_buffer as usize);
        assert_eq!(slot_of(buffer, BUFFER_SET_FORMAT_SLOT), genuine_set_format as usize);
        assert_eq!(slot_of(buffer, BUFFER_UNLOCK_SLOT), genuine_unlock as usize);
        assert!(!harness.controller.is_buffer_hooked(buffer));

        assert!(harness.controller.teardown().is_none());
    }

    #[test]
    fn teardown_waits_for_in_flight_callback() {
        let (harness, _) = Harness::with_memory_sink(Duration::ZERO);
        let controller = Arc::clone(&harness.controller);
        let finished = Arc::new(AtomicBool::new(false));

        let in_flight = controller.usage.enter();
        assert_eq!(controller.in_flight(), 1);

        let teardown = {
            let controller = Arc::clone(&controller);
            let finished = Arc::clone(&finished);
            thread::spawn(move || {
                controller.teardown();
                finished.store(true, Ordering::SeqCst);
            })
        };

        thread::sleep(Duration::from_millis(200));
        assert!(!finished.load(Ordering::SeqCst));
        // Patches are already gone while the drain is pending.
        assert_eq!(harness.factory_bytes(), FACTORY_CODE.to_vec());

        let released = Instant::now();
        drop(in_flight);
        teardown.join().unwrap();
        assert!(finished.load(Ordering::SeqCst));
        assert!(released.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn objects_created_during_drain_stay_unpatched() {
        let (harness, _) = Harness::with_memory_sink(Duration::ZERO);
        let controller = Arc::clone(&harness.controller);
        let device = harness.create_device();

        let in_flight = controller.usage.enter();
        let teardown = {
            let controller = Arc::clone(&controller);
            thread::spawn(move || controller.teardown())
        };
        while controller.phase() != EnginePhase::TornDown {
            thread::sleep(Duration::from_millis(5));
        }

        // Callbacks that entered a thunk before the restore, still running.
        let mut buffer = null_mut();
        let status = unsafe { controller.on_create_sound_buffer(device, std::ptr::null(), &mut buffer, null_mut()) };
        assert_eq!(status, DS_OK);
        let mut late_device = null_mut();
        let status = unsafe { controller.on_factory(std::ptr::null(), &mut late_device, null_mut()) };
        assert_eq!(status, DS_OK);

        drop(in_flight);
        teardown.join().unwrap();

        assert_eq!(slot_of(buffer, BUFFER_SET_FORMAT_SLOT), genuine_set_format as usize);
        assert_eq!(slot_of(buffer, BUFFER_UNLOCK_SLOT), genuine_unlock as usize);
        assert_eq!(slot_of(late_device, DEVICE_CREATE_SOUND_BUFFER_SLOT), genuine_create_buffer as usize);
        assert!(!controller.is_buffer_hooked(buffer));
        assert!(!controller.is_device_hooked(late_device));
        assert_eq!(harness.factory_bytes(), FACTORY_CODE.to_vec());
    }

    /// Writable memory that can be told to refuse protection changes.
    #[derive(Default)]
    struct LockableMemory(AtomicBool);

    impl PageProtector for LockableMemory {
        unsafe fn make_writable(&self, address: usize, len: usize) -> Result<(), HookError> {
            if self.0.load(Ordering::SeqCst) {
                return Err(HookError::Protection { address, len, code: 5 });
            }
            Ok(())
        }
    }

    #[test]
    fn factory_call_fails_when_patch_cannot_be_lifted() {
        let memory = Arc::new(LockableMemory::default());
        let controller = InterceptionController::new(EngineConfig::default(), replacements(), memory.clone());
        let harness = Harness::new(controller);
        let patched = harness.factory_bytes();

        memory.0.store(true, Ordering::SeqCst);
        let mut device = null_mut();
        let status = unsafe { thunk_factory(std::ptr::null(), &mut device, null_mut()) };

        assert_eq!(status, DSERR_GENERIC);
        assert!(device.is_null());
        assert_eq!(harness.factory_bytes(), patched);
        assert_eq!(harness.controller.in_flight(), 0);
    }

    #[test]
    fn setup_twice_is_ignored() {
        let (harness, _) = Harness::with_memory_sink(Duration::ZERO);
        let other: &'static mut [u8; 16] = Box::leak(Box::new([0x90; 16]));
        let other_addr = other.as_mut_ptr() as usize;

        unsafe { harness.controller.setup(other_addr, genuine_factory).unwrap() };
        let untouched = unsafe { std::slice::from_raw_parts(other_addr as *const u8, 16) };
        assert!(untouched.iter().all(|&b| b == 0x90));
    }
}
