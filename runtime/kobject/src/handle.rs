//! Handles
//!
//! A [`Handle`] is one capability to an object: the dispatcher plus the
//! rights this holder has on it. Creating a handle bumps the object's handle
//! count; dropping the last one runs the object's `on_zero_handles`.
//! Handle-table bookkeeping (handle values, per-process tables) lives in the
//! layer above.

use crate::dispatcher::Dispatcher;
use crate::kref::KernelRef;
use crate::rights::Rights;
use crate::{ObjectError, Result};
use core::fmt;
use core::sync::atomic::{AtomicU64, Ordering};

static NEXT_HANDLE_ID: AtomicU64 = AtomicU64::new(1);

pub struct Handle {
    dispatcher: KernelRef<dyn Dispatcher>,
    rights: Rights,
    id: u64,
}

impl Handle {
    /// Wrap `dispatcher` in a new handle carrying `rights`
    pub fn make<T: Dispatcher>(dispatcher: KernelRef<T>, rights: Rights) -> Handle {
        Self::make_dyn(dispatcher.into_dispatcher(), rights)
    }

    pub fn make_dyn(dispatcher: KernelRef<dyn Dispatcher>, rights: Rights) -> Handle {
        dispatcher.base().increment_handle_count();
        Handle {
            dispatcher,
            rights,
            id: NEXT_HANDLE_ID.fetch_add(1, Ordering::Relaxed),
        }
    }

    pub fn dispatcher(&self) -> &KernelRef<dyn Dispatcher> {
        &self.dispatcher
    }

    pub fn rights(&self) -> Rights {
        self.rights
    }

    pub fn has_rights(&self, rights: Rights) -> bool {
        self.rights.contains(rights)
    }

    /// Unique for the lifetime of the kernel; observers match on it
    pub fn id(&self) -> u64 {
        self.id
    }

    /// New handle to the same object with `rights`
    ///
    /// # Errors
    /// `AccessDenied` without `DUPLICATE`, `InvalidArgs` if `rights` is not a
    /// subset of this handle's rights.
    pub fn duplicate(&self, rights: Rights) -> Result<Handle> {
        if !self.has_rights(Rights::DUPLICATE) {
            return Err(ObjectError::AccessDenied);
        }
        if !self.rights.contains(rights) {
            return Err(ObjectError::InvalidArgs);
        }
        Ok(Self::make_dyn(self.dispatcher.clone(), rights))
    }

    /// Typed reference to the object, if it is a `T`
    pub fn downcast<T: Dispatcher>(&self) -> Option<KernelRef<T>> {
        self.dispatcher.clone().downcast::<T>().ok()
    }
}

impl Drop for Handle {
    fn drop(&mut self) {
        if self.dispatcher.is_waitable() {
            self.dispatcher.cancel(self);
        }
        if self.dispatcher.base().decrement_handle_count() {
            log::trace!(
                "{} {} zero handles",
                self.dispatcher.get_type().name(),
                self.dispatcher.get_koid()
            );
            self.dispatcher.on_zero_handles(&self.dispatcher);
        }
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("id", &self.id)
            .field("koid", &self.dispatcher.get_koid())
            .field("rights", &self.rights)
            .finish()
    }
}
