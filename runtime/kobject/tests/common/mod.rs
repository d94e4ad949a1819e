//! Shared fixtures for the integration tests

#![allow(dead_code)]

use kobject::{
    CountInfo, Dispatcher, Handle, KernelRef, Koid, ObserverFlags, Signals, StateObserver,
};
use spin::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

const LOCK_RELEASE_TIMEOUT: Duration = Duration::from_secs(1);

/// Observer that records everything it is told
///
/// It asks to be removed as soon as any `watch` bit is asserted, when the
/// handle it is bound to is cancelled, or when a port cancels its key.
pub struct RecordingObserver {
    watch: Signals,
    key: Option<(Koid, u64)>,
    handle_id: AtomicU64,
    target: Mutex<Option<Weak<dyn Dispatcher>>>,
    seen: Mutex<Vec<Signals>>,
    removed: AtomicUsize,
    removed_under_lock: AtomicBool,
}

impl RecordingObserver {
    pub fn new(watch: Signals) -> Arc<Self> {
        Self::build(watch, None)
    }

    /// Observer registered by a port under (`port`, `key`)
    pub fn with_key(watch: Signals, port: Koid, key: u64) -> Arc<Self> {
        Self::build(watch, Some((port, key)))
    }

    fn build(watch: Signals, key: Option<(Koid, u64)>) -> Arc<Self> {
        Arc::new(Self {
            watch,
            key,
            handle_id: AtomicU64::new(0),
            target: Mutex::new(None),
            seen: Mutex::new(Vec::new()),
            removed: AtomicUsize::new(0),
            removed_under_lock: AtomicBool::new(false),
        })
    }

    /// Tie this observer to `handle`; `on_removed` will also check that the
    /// handle's object lock is not held across the callback.
    pub fn bind(&self, handle: &Handle) {
        self.handle_id.store(handle.id(), Ordering::Relaxed);
        *self.target.lock() = Some(KernelRef::downgrade(handle.dispatcher()));
    }

    pub fn seen(&self) -> Vec<Signals> {
        self.seen.lock().clone()
    }

    pub fn removed(&self) -> usize {
        self.removed.load(Ordering::SeqCst)
    }

    pub fn removed_under_lock(&self) -> bool {
        self.removed_under_lock.load(Ordering::SeqCst)
    }
}

impl StateObserver for RecordingObserver {
    fn on_initialize(&self, initial: Signals, _count: Option<&CountInfo>) -> ObserverFlags {
        self.on_state_change(initial)
    }

    fn on_state_change(&self, new_state: Signals) -> ObserverFlags {
        self.seen.lock().push(new_state);
        if new_state.intersects(self.watch) {
            ObserverFlags::NEED_REMOVAL
        } else {
            ObserverFlags::empty()
        }
    }

    fn on_cancel(&self, handle: &Handle) -> ObserverFlags {
        if handle.id() == self.handle_id.load(Ordering::Relaxed) {
            ObserverFlags::NEED_REMOVAL
        } else {
            ObserverFlags::empty()
        }
    }

    fn on_cancel_by_key(&self, handle: &Handle, port: Koid, key: u64) -> ObserverFlags {
        if handle.id() == self.handle_id.load(Ordering::Relaxed) && self.key == Some((port, key)) {
            ObserverFlags::NEED_REMOVAL | ObserverFlags::HANDLED
        } else {
            ObserverFlags::empty()
        }
    }

    fn on_removed(&self) {
        let target = self.target.lock().as_ref().and_then(KernelRef::upgrade);
        if let Some(target) = target {
            // Other threads only hold the lock briefly; a caller that invoked
            // us under its own lock never lets go.
            let deadline = Instant::now() + LOCK_RELEASE_TIMEOUT;
            while target.is_locked() {
                if Instant::now() >= deadline {
                    self.removed_under_lock.store(true, Ordering::SeqCst);
                    break;
                }
                std::hint::spin_loop();
            }
        }
        self.removed.fetch_add(1, Ordering::SeqCst);
    }
}
