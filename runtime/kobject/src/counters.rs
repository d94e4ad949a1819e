//! Diagnostic counters
//!
//! Monotonic event counts for the object layer. They are only ever added to
//! and read; nothing in the kernel branches on them.

use crate::dispatcher::ObjType;
use core::sync::atomic::{AtomicU64, Ordering};

/// A named monotonic counter
pub struct Counter {
    name: &'static str,
    value: AtomicU64,
}

impl Counter {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            value: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn add(&self, n: u64) {
        self.value.fetch_add(n, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc(&self) {
        self.add(1);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

pub static DISPATCHER_CREATE: Counter = Counter::new("dispatcher.create");
pub static DISPATCHER_DESTROY: Counter = Counter::new("dispatcher.destroy");
pub static OBSERVER_ADD: Counter = Counter::new("dispatcher.observer.add");
pub static CANCEL_BY_HANDLE: Counter = Counter::new("dispatcher.observer.cancel.byhandle");
pub static CANCEL_BY_KEY: Counter = Counter::new("dispatcher.observer.cancel.bykey");
pub static COOKIE_SET: Counter = Counter::new("dispatcher.cookie.set");
pub static COOKIE_RESET: Counter = Counter::new("dispatcher.cookie.reset");

#[allow(clippy::declare_interior_mutable_const)]
const ZERO: AtomicU64 = AtomicU64::new(0);

static TYPE_CREATE: [AtomicU64; ObjType::COUNT] = [ZERO; ObjType::COUNT];
static TYPE_DESTROY: [AtomicU64; ObjType::COUNT] = [ZERO; ObjType::COUNT];

pub(crate) fn object_created(ty: ObjType) {
    DISPATCHER_CREATE.inc();
    TYPE_CREATE[ty.index()].fetch_add(1, Ordering::Relaxed);
}

pub(crate) fn object_destroyed(ty: ObjType) {
    DISPATCHER_DESTROY.inc();
    TYPE_DESTROY[ty.index()].fetch_add(1, Ordering::Relaxed);
}

/// Point-in-time copy of every counter
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    pub create: u64,
    pub destroy: u64,
    pub observer_add: u64,
    pub cancel_by_handle: u64,
    pub cancel_by_key: u64,
    pub cookie_set: u64,
    pub cookie_reset: u64,
    type_create: [u64; ObjType::COUNT],
    type_destroy: [u64; ObjType::COUNT],
}

impl Snapshot {
    pub fn created(&self, ty: ObjType) -> u64 {
        self.type_create[ty.index()]
    }

    pub fn destroyed(&self, ty: ObjType) -> u64 {
        self.type_destroy[ty.index()]
    }
}

pub fn snapshot() -> Snapshot {
    let mut snap = Snapshot {
        create: DISPATCHER_CREATE.get(),
        destroy: DISPATCHER_DESTROY.get(),
        observer_add: OBSERVER_ADD.get(),
        cancel_by_handle: CANCEL_BY_HANDLE.get(),
        cancel_by_key: CANCEL_BY_KEY.get(),
        cookie_set: COOKIE_SET.get(),
        cookie_reset: COOKIE_RESET.get(),
        ..Snapshot::default()
    };
    for i in 0..ObjType::COUNT {
        snap.type_create[i] = TYPE_CREATE[i].load(Ordering::Relaxed);
        snap.type_destroy[i] = TYPE_DESTROY[i].load(Ordering::Relaxed);
    }
    snap
}
