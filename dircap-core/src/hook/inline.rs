//! Entry-point patching for plain functions.
//!
//! The first [`ABS_JUMP_LEN`] bytes of the target are replaced with
//! `mov rax, imm64; jmp rax`. There is no trampoline: to reach the genuine
//! implementation the replacement lifts the patch, calls the target, and
//! re-applies it, all under the controller's lock.

use crate::models::error::HookError;
use crate::traits::page_protector::PageProtector;

/// Length of the absolute jump sequence written over the target.
pub const ABS_JUMP_LEN: usize = 12;

/// Encode `mov rax, destination; jmp rax`.
pub fn encode_abs_jump(destination: usize) -> [u8; ABS_JUMP_LEN] {
    let mut bytes = [0u8; ABS_JUMP_LEN];
    bytes[0] = 0x48; // REX.W
    bytes[1] = 0xB8; // mov rax, imm64
    bytes[2..10].copy_from_slice(&(destination as u64).to_le_bytes());
    bytes[10] = 0xFF; // jmp rax
    bytes[11] = 0xE0;
    bytes
}

/// Record of one patched entry point.
///
/// `original` always holds the bytes that were physically at `target` when
/// the hook was installed, so [`InlineHook::disable`] is an exact restore.
#[derive(Debug, Clone)]
pub struct InlineHook {
    target: usize,
    replacement: usize,
    original: [u8; ABS_JUMP_LEN],
    patch: [u8; ABS_JUMP_LEN],
    enabled: bool,
}

impl InlineHook {
    /// Snapshot the target's entry bytes. Memory is not modified yet.
    ///
    /// # Safety
    /// `target` must point to at least [`ABS_JUMP_LEN`] readable bytes.
    pub unsafe fn install(target: usize, replacement: usize) -> Self {
        let mut original = [0u8; ABS_JUMP_LEN];
        std::ptr::copy_nonoverlapping(target as *const u8, original.as_mut_ptr(), ABS_JUMP_LEN);

        Self {
            target,
            replacement,
            original,
            patch: encode_abs_jump(replacement),
            enabled: false,
        }
    }

    /// Redirect the target to the replacement.
    ///
    /// # Safety
    /// No thread may be executing the first bytes of the target while they
    /// are rewritten. Callers serialize through the controller's lock.
    pub unsafe fn enable(&mut self, protector: &dyn PageProtector) -> Result<(), HookError> {
        self.write(&self.patch, protector)?;
        self.enabled = true;
        Ok(())
    }

    /// Put the saved original bytes back.
    ///
    /// # Safety
    /// Same contract as [`InlineHook::enable`].
    pub unsafe fn disable(&mut self, protector: &dyn PageProtector) -> Result<(), HookError> {
        self.write(&self.original, protector)?;
        self.enabled = false;
        Ok(())
    }

    unsafe fn write(&self, bytes: &[u8; ABS_JUMP_LEN], protector: &dyn PageProtector) -> Result<(), HookError> {
        protector.make_writable(self.target, ABS_JUMP_LEN)?;
        std::ptr::copy_nonoverlapping(bytes.as_ptr(), self.target as *mut u8, ABS_JUMP_LEN);
        protector.flush_instructions(self.target, ABS_JUMP_LEN);
        Ok(())
    }

    pub fn target(&self) -> usize {
        self.target
    }

    pub fn replacement(&self) -> usize {
        self.replacement
    }

    pub fn original_bytes(&self) -> &[u8] {
        &self.original
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
}
