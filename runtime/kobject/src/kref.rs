//! Shared references to kernel objects
//!
//! [`KernelRef`] is an `Arc` whose final drop is routed through the
//! [`deleter`](crate::deleter), so a destructor that releases further objects
//! never recurses into them.

use crate::deleter;
use crate::dispatcher::Dispatcher;
use core::fmt;
use core::mem::ManuallyDrop;
use core::ops::Deref;
use std::any::Any;
use std::sync::{Arc, Weak};

/// Upcasting support for dispatcher downcasts
pub trait AsAny: Any + Send + Sync {
    fn as_any(&self) -> &(dyn Any + Send + Sync);
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<T: Any + Send + Sync> AsAny for T {
    fn as_any(&self) -> &(dyn Any + Send + Sync) {
        self
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// Reference-counted pointer to a kernel object
pub struct KernelRef<T: ?Sized + 'static> {
    inner: ManuallyDrop<Arc<T>>,
}

impl<T: 'static> KernelRef<T> {
    pub fn new(value: T) -> Self {
        Self::from_arc(Arc::new(value))
    }
}

impl<T: ?Sized + 'static> KernelRef<T> {
    pub fn from_arc(arc: Arc<T>) -> Self {
        Self {
            inner: ManuallyDrop::new(arc),
        }
    }

    /// Give up the deleter routing and return the raw `Arc`
    pub fn into_arc(self) -> Arc<T> {
        let mut this = ManuallyDrop::new(self);
        // SAFETY: `this` is never dropped, so `inner` is taken exactly once.
        unsafe { ManuallyDrop::take(&mut this.inner) }
    }

    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Arc::ptr_eq(&a.inner, &b.inner)
    }

    pub fn strong_count(this: &Self) -> usize {
        Arc::strong_count(&this.inner)
    }

    pub fn downgrade(this: &Self) -> Weak<T> {
        Arc::downgrade(&this.inner)
    }

    /// Upgrade a weak pointer made by [`KernelRef::downgrade`]
    pub fn upgrade(weak: &Weak<T>) -> Option<Self> {
        weak.upgrade().map(Self::from_arc)
    }
}

impl<T: Dispatcher> KernelRef<T> {
    /// Erase the concrete type
    pub fn into_dispatcher(self) -> KernelRef<dyn Dispatcher> {
        let arc: Arc<dyn Dispatcher> = self.into_arc();
        KernelRef::from_arc(arc)
    }
}

impl KernelRef<dyn Dispatcher> {
    /// Recover the concrete type, handing `self` back on mismatch
    pub fn downcast<T: Dispatcher>(self) -> core::result::Result<KernelRef<T>, Self> {
        if !AsAny::as_any(&*self).is::<T>() {
            return Err(self);
        }
        let any = <dyn Dispatcher as AsAny>::into_any(self.into_arc());
        match any.downcast::<T>() {
            Ok(concrete) => Ok(KernelRef::from_arc(concrete)),
            // Checked with `is` above.
            Err(_) => unreachable!("dispatcher type changed during downcast"),
        }
    }

    pub fn downcast_ref<T: Dispatcher>(&self) -> Option<&T> {
        AsAny::as_any(&**self).downcast_ref::<T>()
    }
}

impl<T: ?Sized + 'static> Clone for KernelRef<T> {
    fn clone(&self) -> Self {
        Self::from_arc(Arc::clone(&self.inner))
    }
}

impl<T: ?Sized + 'static> Deref for KernelRef<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.inner
    }
}

impl<T: ?Sized + 'static> Drop for KernelRef<T> {
    fn drop(&mut self) {
        // SAFETY: drop runs once and `inner` is not touched afterwards.
        let arc = unsafe { ManuallyDrop::take(&mut self.inner) };
        deleter::release(arc);
    }
}

impl<T: ?Sized + fmt::Debug + 'static> fmt::Debug for KernelRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}
