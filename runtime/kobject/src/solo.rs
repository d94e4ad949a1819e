//! Stand-alone dispatchers
//!
//! Most object types own their lock outright. [`SoloDispatcher`] is that
//! shape once: a base, an immutable per-type value, and one spin lock around
//! the dispatcher state plus the type's own mutable state. A type plugs in
//! by implementing [`SoloKind`].

use crate::dispatcher::{Dispatcher, DispatcherBase, ObjType};
use crate::koid::{Koid, KOID_INVALID};
use crate::kref::KernelRef;
use crate::rights::Rights;
use crate::signals::Signals;
use crate::state::DispatcherState;
use spin::{Mutex, MutexGuard};

/// Everything that varies between stand-alone object types
pub trait SoloKind: Send + Sync + Sized + 'static {
    /// Mutable per-object state, guarded by the object lock
    type State: Send + 'static;

    const TYPE: ObjType;
    const DEFAULT_RIGHTS: Rights;
    /// Bits beyond `USER_ALL` user code may signal
    const EXTRA_SIGNALS: Signals = Signals::empty();
    const HAS_COOKIE: bool = false;

    fn on_zero_handles(_this: &KernelRef<SoloDispatcher<Self>>) {}

    /// Final teardown; runs with exclusive access once the last reference
    /// is gone.
    fn on_destroy(&self, _state: &mut Self::State) {}

    fn related_koid(&self) -> Koid {
        KOID_INVALID
    }
}

/// Lock-protected part of a [`SoloDispatcher`]
pub struct SoloState<S> {
    pub state: DispatcherState,
    pub inner: S,
}

pub struct SoloDispatcher<K: SoloKind> {
    base: DispatcherBase,
    kind: K,
    lock: Mutex<SoloState<K::State>>,
}

impl<K: SoloKind> SoloDispatcher<K> {
    /// Build a new object and hand out the first reference to it
    pub fn publish(kind: K, inner: K::State, initial: Signals) -> KernelRef<Self> {
        KernelRef::new(Self {
            base: DispatcherBase::new(K::TYPE),
            kind,
            lock: Mutex::new(SoloState {
                state: DispatcherState::new(initial, K::HAS_COOKIE),
                inner,
            }),
        })
    }

    pub fn kind(&self) -> &K {
        &self.kind
    }

    /// Take the object lock
    pub fn lock(&self) -> MutexGuard<'_, SoloState<K::State>> {
        self.lock.lock()
    }
}

impl<K: SoloKind> Dispatcher for SoloDispatcher<K> {
    fn base(&self) -> &DispatcherBase {
        &self.base
    }

    fn get_type(&self) -> ObjType {
        K::TYPE
    }

    fn default_rights(&self) -> Rights {
        K::DEFAULT_RIGHTS
    }

    fn with_state(&self, f: &mut dyn FnMut(&mut DispatcherState)) {
        f(&mut self.lock.lock().state);
    }

    fn is_locked(&self) -> bool {
        self.lock.is_locked()
    }

    fn extra_user_signals(&self) -> Signals {
        K::EXTRA_SIGNALS
    }

    fn get_related_koid(&self) -> Koid {
        self.kind.related_koid()
    }

    fn on_zero_handles(&self, this: &KernelRef<dyn Dispatcher>) {
        if let Ok(typed) = this.clone().downcast::<Self>() {
            K::on_zero_handles(&typed);
        }
    }
}

impl<K: SoloKind> Drop for SoloDispatcher<K> {
    fn drop(&mut self) {
        let locked = self.lock.get_mut();
        self.kind.on_destroy(&mut locked.inner);
    }
}
