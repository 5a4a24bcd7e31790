use crate::models::error::HookError;

/// Makes patch targets writable and publishes code changes.
///
/// The hooks never touch page protection themselves; the platform layer
/// supplies this seam (`VirtualProtect` + `FlushInstructionCache` on
/// Windows).
pub trait PageProtector: Send + Sync {
    /// Ensure `len` bytes at `address` can be written by the current thread.
    ///
    /// # Safety
    /// `address..address + len` must lie inside mapped memory.
    unsafe fn make_writable(&self, address: usize, len: usize) -> Result<(), HookError>;

    /// Publish freshly written instructions to the instruction stream.
    fn flush_instructions(&self, _address: usize, _len: usize) {}
}

/// Protector for targets that are already mapped writable, such as
/// heap-allocated tables and code buffers.
#[derive(Debug, Default, Clone, Copy)]
pub struct WritableMemory;

impl PageProtector for WritableMemory {
    unsafe fn make_writable(&self, _address: usize, _len: usize) -> Result<(), HookError> {
        Ok(())
    }
}
