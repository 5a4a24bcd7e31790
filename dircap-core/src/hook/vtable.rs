//! Per-instance dispatch-table slot patching.
//!
//! COM-style objects keep a pointer to their dispatch table in the first
//! machine word. A [`VTableHook`] owns one slot index and one replacement
//! and remembers, for every instance it hooked, where that instance's slot
//! lives and what it held before.

use std::collections::HashMap;
use std::ffi::c_void;
use std::marker::PhantomData;
use std::mem::size_of;

use crate::models::error::HookError;
use crate::traits::page_protector::PageProtector;

/// Where an instance's slot lives and what it held before patching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VTableHookRecord {
    pub slot: usize,
    pub original: usize,
}

/// Outcome of a [`VTableHook::hook`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookOutcome {
    /// The slot was rewritten for this instance.
    Patched,
    /// The slot was already ours through a sibling sharing the same table;
    /// the instance now borrows the sibling's original.
    Shared,
    /// Nothing to do: the instance is tracked at this very slot, or the
    /// slot holds the replacement without any record explaining how.
    Unchanged,
}

/// One hooked slot index across any number of live instances.
///
/// `F` is the `extern "system"` function-pointer type stored in the slot.
/// Instances are keyed by address and never owned.
pub struct VTableHook<F> {
    slot_index: usize,
    replacement: usize,
    records: HashMap<usize, VTableHookRecord>,
    _method: PhantomData<F>,
}

impl<F: Copy> VTableHook<F> {
    pub fn new(slot_index: usize, replacement: F) -> Self {
        assert_eq!(size_of::<F>(), size_of::<usize>(), "slot type must be a thin function pointer");
        // SAFETY: F is a function pointer of pointer width (checked above).
        let replacement = unsafe { std::mem::transmute_copy::<F, usize>(&replacement) };
        Self {
            slot_index,
            replacement,
            records: HashMap::new(),
            _method: PhantomData,
        }
    }

    /// Point `instance`'s slot at the replacement.
    ///
    /// The slot is read on every call. A tracked address whose slot no
    /// longer holds the replacement (a recreated object, or a table patched
    /// back by someone else) is recorded afresh and patched again.
    ///
    /// # Safety
    /// `instance` must be a live object whose first word points to a
    /// dispatch table with more than `slot_index` entries.
    pub unsafe fn hook(
        &mut self,
        instance: *mut c_void,
        protector: &dyn PageProtector,
    ) -> Result<HookOutcome, HookError> {
        if instance.is_null() {
            return Err(HookError::NullInstance);
        }
        let key = instance as usize;
        let slot = self.slot_address(instance);
        protector.make_writable(slot, size_of::<usize>())?;

        let current = std::ptr::read_volatile(slot as *const usize);
        if current == self.replacement {
            if self.records.get(&key).is_some_and(|r| r.slot == slot) {
                return Ok(HookOutcome::Unchanged);
            }
            let Some(sibling) = self.records.values().find(|r| r.slot == slot).copied() else {
                return Ok(HookOutcome::Unchanged);
            };
            self.release_previous(key, slot, protector);
            self.records.insert(key, sibling);
            log::debug!("Slot {} of {:#x} shared with a hooked sibling", self.slot_index, key);
            return Ok(HookOutcome::Shared);
        }

        self.release_previous(key, slot, protector);
        self.records.insert(key, VTableHookRecord { slot, original: current });
        std::ptr::write_volatile(slot as *mut usize, self.replacement);
        log::debug!(
            "Slot {} of {:#x} patched ({:#x} -> {:#x})",
            self.slot_index,
            key,
            current,
            self.replacement
        );
        Ok(HookOutcome::Patched)
    }

    /// Drop `key`'s record if it points at a slot other than `slot`, and
    /// restore that slot when nothing else routes through it.
    unsafe fn release_previous(&mut self, key: usize, slot: usize, protector: &dyn PageProtector) {
        let Some(previous) = self.records.get(&key).copied() else {
            return;
        };
        if previous.slot == slot {
            return;
        }
        self.records.remove(&key);
        if self.records.values().any(|r| r.slot == previous.slot) {
            return;
        }
        if let Err(e) = self.restore(&previous, protector) {
            log::warn!("Could not restore stale slot at {:#x}: {}", previous.slot, e);
        }
    }

    /// Restore `instance`'s slot and forget it.
    ///
    /// The slot is written only if it still holds our replacement (a later
    /// patch by someone else is left alone) and no other tracked instance
    /// still routes through the same slot.
    ///
    /// # Safety
    /// The dispatch table recorded for `instance` must still be mapped.
    pub unsafe fn unhook(&mut self, instance: *mut c_void, protector: &dyn PageProtector) -> Result<bool, HookError> {
        let Some(record) = self.records.remove(&(instance as usize)) else {
            return Ok(false);
        };
        if self.records.values().any(|r| r.slot == record.slot) {
            return Ok(false);
        }
        self.restore(&record, protector)
    }

    /// Restore every tracked slot and forget all instances.
    ///
    /// # Safety
    /// Every recorded dispatch table must still be mapped.
    pub unsafe fn unhook_all(&mut self, protector: &dyn PageProtector) -> Result<usize, HookError> {
        let result = self.restore_all(protector);
        self.records.clear();
        result
    }

    /// Restore every tracked slot but keep the records, so calls already
    /// routed through the replacement can still reach their originals.
    ///
    /// # Safety
    /// Every recorded dispatch table must still be mapped.
    pub unsafe fn restore_all(&self, protector: &dyn PageProtector) -> Result<usize, HookError> {
        let mut restored = 0;
        let mut seen = Vec::new();
        let mut first_error = None;

        for record in self.records.values() {
            if seen.contains(&record.slot) {
                continue;
            }
            seen.push(record.slot);
            match self.restore(record, protector) {
                Ok(true) => restored += 1,
                Ok(false) => {}
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(restored),
        }
    }

    /// Drop every record without touching memory.
    pub fn forget_all(&mut self) {
        self.records.clear();
    }

    unsafe fn restore(&self, record: &VTableHookRecord, protector: &dyn PageProtector) -> Result<bool, HookError> {
        protector.make_writable(record.slot, size_of::<usize>())?;
        if std::ptr::read_volatile(record.slot as *const usize) != self.replacement {
            log::debug!("Slot at {:#x} was repatched by someone else, leaving it", record.slot);
            return Ok(false);
        }
        std::ptr::write_volatile(record.slot as *mut usize, record.original);
        Ok(true)
    }

    /// The genuine method recorded for `instance`.
    ///
    /// Callers invoke it with the instance prepended to the forwarded
    /// arguments. Fails if the instance was never hooked.
    pub fn original(&self, instance: *mut c_void) -> Result<F, HookError> {
        let record = self
            .records
            .get(&(instance as usize))
            .ok_or(HookError::NotHooked(instance as usize))?;
        // SAFETY: `original` was read from a slot of type F.
        Ok(unsafe { std::mem::transmute_copy::<usize, F>(&record.original) })
    }

    pub fn record(&self, instance: *mut c_void) -> Option<VTableHookRecord> {
        self.records.get(&(instance as usize)).copied()
    }

    pub fn is_hooked(&self, instance: *mut c_void) -> bool {
        self.records.contains_key(&(instance as usize))
    }

    pub fn hooked_count(&self) -> usize {
        self.records.len()
    }

    unsafe fn slot_address(&self, instance: *mut c_void) -> usize {
        let table = *(instance as *const *mut usize);
        table.add(self.slot_index) as usize
    }
}
