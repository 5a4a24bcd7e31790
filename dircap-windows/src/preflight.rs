//! Target checks that must pass before anything is placed in the target.

use crate::error::InjectError;

/// The part of a target process the injector touches before running code.
pub trait InjectionTarget {
    /// Memory reserved in the target for the blobs.
    type Page;

    fn pid(&self) -> u32;

    /// Whether the target runs with the same pointer width as this tool.
    fn matches_pointer_width(&self) -> Result<bool, InjectError>;

    fn allocate_page(&self) -> Result<Self::Page, InjectError>;
}

/// Allocate the blob page, but only in a target of our pointer width.
pub fn allocate_checked<T: InjectionTarget>(target: &T) -> Result<T::Page, InjectError> {
    if !target.matches_pointer_width()? {
        return Err(InjectError::PointerWidth { pid: target.pid() });
    }
    target.allocate_page()
}
