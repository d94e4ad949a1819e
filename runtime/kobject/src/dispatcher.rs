//! Dispatcher base
//!
//! A dispatcher is the kernel-side half of every object user code can hold a
//! handle to. [`Dispatcher`] gives all of them one contract: a koid, a handle
//! count, and (for waitable objects) a signal word with observers and an
//! optional cookie, all guarded by one lock.
//!
//! ## Design
//!
//! The trait is object safe; handles hold `KernelRef<dyn Dispatcher>`. An
//! implementation only supplies its base, its type constants and
//! [`Dispatcher::with_state`], which runs a closure on the lock-protected
//! [`DispatcherState`]. Observer bookkeeping, signal updates and cookie
//! access are written once here on top of that.
//!
//! Every provided method that can unregister observers collects them into a
//! [`Deferred`] declared outside the lock, so `on_removed` always runs after
//! `with_state` has returned and the lock is free.

use crate::counters;
use crate::handle::Handle;
use crate::koid::{self, Koid, KOID_INVALID};
use crate::kref::{AsAny, KernelRef};
use crate::observer::{CountInfo, ObserverKey, StateObserver};
use crate::rights::Rights;
use crate::signals::Signals;
use crate::state::{Deferred, DispatcherState};
use crate::{ObjectError, Result};
use core::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Kernel object types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ObjType {
    Event = 5,
    Interrupt = 9,
    Socket = 14,
    EventPair = 16,
    Guest = 20,
    Vcpu = 21,
    Bti = 24,
    Pmt = 26,
}

impl ObjType {
    pub const COUNT: usize = 8;

    /// Dense index for per-type tables
    pub const fn index(self) -> usize {
        match self {
            ObjType::Event => 0,
            ObjType::Interrupt => 1,
            ObjType::Socket => 2,
            ObjType::EventPair => 3,
            ObjType::Guest => 4,
            ObjType::Vcpu => 5,
            ObjType::Bti => 6,
            ObjType::Pmt => 7,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            ObjType::Event => "event",
            ObjType::Interrupt => "interrupt",
            ObjType::Socket => "socket",
            ObjType::EventPair => "eventpair",
            ObjType::Guest => "guest",
            ObjType::Vcpu => "vcpu",
            ObjType::Bti => "bti",
            ObjType::Pmt => "pmt",
        }
    }
}

/// Identity and handle accounting shared by every dispatcher
#[derive(Debug)]
pub struct DispatcherBase {
    koid: Koid,
    ty: ObjType,
    handle_count: AtomicU32,
}

impl DispatcherBase {
    pub fn new(ty: ObjType) -> Self {
        let koid = koid::generate();
        counters::object_created(ty);
        log::trace!("{} {} created", ty.name(), koid);
        Self {
            koid,
            ty,
            handle_count: AtomicU32::new(0),
        }
    }

    pub fn koid(&self) -> Koid {
        self.koid
    }

    pub fn handle_count(&self) -> u32 {
        self.handle_count.load(Ordering::Acquire)
    }

    pub(crate) fn increment_handle_count(&self) {
        self.handle_count.fetch_add(1, Ordering::Relaxed);
    }

    /// # Returns
    /// `true` when this was the last handle.
    pub(crate) fn decrement_handle_count(&self) -> bool {
        let previous = self.handle_count.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(previous > 0, "handle count underflow on {}", self.koid);
        previous == 1
    }
}

impl Drop for DispatcherBase {
    fn drop(&mut self) {
        counters::object_destroyed(self.ty);
        log::trace!("{} {} destroyed", self.ty.name(), self.koid);
    }
}

/// The contract every kernel object implements
pub trait Dispatcher: AsAny + Send + Sync {
    fn base(&self) -> &DispatcherBase;

    fn get_type(&self) -> ObjType;

    /// Rights a freshly created handle to this type carries
    fn default_rights(&self) -> Rights;

    /// Run `f` on the lock-protected state, holding the lock for its duration
    fn with_state(&self, f: &mut dyn FnMut(&mut DispatcherState));

    /// Whether this object's lock is held right now, by anyone
    fn is_locked(&self) -> bool;

    /// User signal bits beyond `USER_ALL` that `user_signal_*` may touch
    fn extra_user_signals(&self) -> Signals {
        Signals::empty()
    }

    /// Koid of the object this one is paired with, if any
    fn get_related_koid(&self) -> Koid {
        KOID_INVALID
    }

    /// Change the peer's user signals
    fn user_signal_peer(&self, _clear: Signals, _set: Signals) -> Result<()> {
        Err(ObjectError::NotSupported)
    }

    /// The last handle to this object has been closed
    fn on_zero_handles(&self, _this: &KernelRef<dyn Dispatcher>) {}

    fn get_koid(&self) -> Koid {
        self.base().koid()
    }

    fn handle_count(&self) -> u32 {
        self.base().handle_count()
    }

    fn is_waitable(&self) -> bool {
        self.default_rights().contains(Rights::WAIT)
    }

    fn signals(&self) -> Signals {
        let mut signals = Signals::empty();
        self.with_state(&mut |state| signals = state.signals());
        signals
    }

    /// Register `observer`
    ///
    /// # Returns
    /// The key to remove it with, or `None` if the observer asked to be
    /// removed during `on_initialize` (its `on_removed` has already run).
    ///
    /// # Errors
    /// `NotSupported` on objects that cannot be waited on.
    fn add_observer(
        &self,
        observer: Arc<dyn StateObserver>,
        count: Option<&CountInfo>,
    ) -> Result<Option<ObserverKey>> {
        if !self.is_waitable() {
            return Err(ObjectError::NotSupported);
        }
        counters::OBSERVER_ADD.inc();

        let mut deferred = Deferred::new();
        let mut observer = Some(observer);
        let mut result = Ok(None);
        self.with_state(&mut |state| {
            if let Some(observer) = observer.take() {
                result = state.add_observer_locked(observer, count, &mut deferred);
            }
        });
        result
    }

    /// Unregister the observer behind `key` without calling it back
    fn remove_observer(&self, key: ObserverKey) -> bool {
        debug_assert!(self.is_waitable());
        let mut removed = false;
        self.with_state(&mut |state| removed = state.remove_observer_locked(key));
        removed
    }

    /// Offer `handle`'s closure to every observer
    fn cancel(&self, handle: &Handle) {
        debug_assert!(self.is_waitable());
        counters::CANCEL_BY_HANDLE.inc();

        let mut deferred = Deferred::new();
        self.with_state(&mut |state| {
            state.cancel_locked(handle, &mut deferred);
        });
    }

    /// # Returns
    /// Whether an observer matched (`port`, `key`).
    fn cancel_by_key(&self, handle: &Handle, port: Koid, key: u64) -> bool {
        debug_assert!(self.is_waitable());
        counters::CANCEL_BY_KEY.inc();

        let mut deferred = Deferred::new();
        let mut handled = false;
        self.with_state(&mut |state| {
            handled = state.cancel_by_key_locked(handle, port, key, &mut deferred);
        });
        handled
    }

    fn update_state(&self, clear: Signals, set: Signals) {
        debug_assert!(self.is_waitable());
        let mut deferred = Deferred::new();
        self.with_state(&mut |state| state.update_state_locked(clear, set, &mut deferred));
    }

    /// Change this object's user signals
    ///
    /// # Errors
    /// `NotSupported` on objects that cannot be waited on, `InvalidArgs` for
    /// bits outside the user range.
    fn user_signal_self(&self, clear: Signals, set: Signals) -> Result<()> {
        if !self.is_waitable() {
            return Err(ObjectError::NotSupported);
        }
        let allowed = Signals::USER_ALL | self.extra_user_signals();
        if !allowed.contains(clear) || !allowed.contains(set) {
            return Err(ObjectError::InvalidArgs);
        }
        self.update_state(clear, set);
        Ok(())
    }

    fn set_cookie(&self, scope: Koid, cookie: u64) -> Result<()> {
        let mut result = Err(ObjectError::NotSupported);
        self.with_state(&mut |state| {
            if let Some(jar) = state.cookie_mut() {
                result = jar.set(scope, cookie);
            }
        });
        if result.is_ok() {
            counters::COOKIE_SET.inc();
        }
        result
    }

    fn get_cookie(&self, scope: Koid) -> Result<u64> {
        let mut result = Err(ObjectError::NotSupported);
        self.with_state(&mut |state| {
            if let Some(jar) = state.cookie() {
                result = jar.get(scope);
            }
        });
        result
    }

    fn invalidate_cookie(&self) {
        let mut invalidated = false;
        self.with_state(&mut |state| {
            if let Some(jar) = state.cookie_mut() {
                jar.invalidate();
                invalidated = true;
            }
        });
        if invalidated {
            counters::COOKIE_RESET.inc();
        }
    }
}
