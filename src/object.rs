//! Objects the pool can release
//!
//! The engine never owns or inspects an object: it keeps the address and a
//! monomorphized release thunk, and calls the thunk when the scope closes.

use core::ptr::NonNull;

use crate::page::{ReleaseFn, Slot};

/// Capability required of anything registered with a pool
pub trait Release {
    /// Drop one reference; called once per registration
    fn release(&self);
}

/// Type-erased, non-owning reference to a [`Release`] object
#[derive(Clone, Copy)]
pub struct ObjectRef {
    ptr: NonNull<()>,
    release: ReleaseFn,
}

unsafe fn release_thunk<T: Release>(ptr: NonNull<()>) {
    ptr.cast::<T>().as_ref().release()
}

impl ObjectRef {
    /// Reference to an object that lives for the rest of the program
    pub fn new<T: Release + 'static>(object: &'static T) -> Self {
        // SAFETY: 'static outlives every scope.
        unsafe { Self::from_raw(NonNull::from(object)) }
    }

    /// Reference to an object managed elsewhere
    ///
    /// # Safety
    ///
    /// `object` must stay valid until the scope it is registered in is
    /// popped (or the thread exits).
    pub unsafe fn from_raw<T: Release>(object: NonNull<T>) -> Self {
        Self {
            ptr: object.cast(),
            release: release_thunk::<T>,
        }
    }

    #[inline]
    pub fn address(&self) -> usize {
        self.ptr.as_ptr() as usize
    }

    #[inline]
    pub(crate) fn to_slot(self) -> Slot {
        Slot::entry(self.address(), self.release)
    }
}

impl<T: Release + 'static> From<&'static T> for ObjectRef {
    fn from(object: &'static T) -> Self {
        Self::new(object)
    }
}

impl core::fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "ObjectRef({:#x})", self.address())
    }
}
