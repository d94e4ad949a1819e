//! Lock-protected dispatcher state
//!
//! [`DispatcherState`] is everything a waitable object guards with its single
//! lock: the signal word, the observer list and the optional cookie jar. The
//! `*_locked` methods assume the caller holds that lock. Anything that has to
//! happen after the lock is released is collected into a [`Deferred`].

use crate::cookie::CookieJar;
use crate::handle::Handle;
use crate::koid::Koid;
use crate::observer::{CountInfo, ObserverFlags, ObserverKey, ObserverList, StateObserver};
use crate::signals::Signals;
use crate::Result;
use std::sync::Arc;

/// Work postponed until the object lock is released
///
/// Declare it before the lock guard so it drops after the guard. Dropping it
/// fires `on_removed` for every collected observer, then drops every
/// collected value.
#[derive(Default)]
pub struct Deferred {
    removed: Vec<Arc<dyn StateObserver>>,
    drops: Vec<Box<dyn Send>>,
}

impl Deferred {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop `value` once the lock is released
    pub fn defer_drop<T: Send + 'static>(&mut self, value: T) {
        self.drops.push(Box::new(value));
    }
}

impl Drop for Deferred {
    fn drop(&mut self) {
        for observer in self.removed.drain(..) {
            observer.on_removed();
        }
        self.drops.clear();
    }
}

pub struct DispatcherState {
    signals: Signals,
    observers: ObserverList,
    cookie: Option<CookieJar>,
}

impl DispatcherState {
    pub const fn new(initial: Signals, has_cookie: bool) -> Self {
        Self {
            signals: initial,
            observers: ObserverList::new(),
            cookie: if has_cookie {
                Some(CookieJar::new())
            } else {
                None
            },
        }
    }

    pub fn signals(&self) -> Signals {
        self.signals
    }

    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }

    pub fn cookie(&self) -> Option<&CookieJar> {
        self.cookie.as_ref()
    }

    pub fn cookie_mut(&mut self) -> Option<&mut CookieJar> {
        self.cookie.as_mut()
    }

    /// Offer the current signals to `observer` and register it unless it
    /// asks to be removed straight away.
    ///
    /// # Returns
    /// The registration key, or `None` when the observer was not kept (its
    /// `on_removed` is then queued on `deferred`).
    pub fn add_observer_locked(
        &mut self,
        observer: Arc<dyn StateObserver>,
        count: Option<&CountInfo>,
        deferred: &mut Deferred,
    ) -> Result<Option<ObserverKey>> {
        let flags = observer.on_initialize(self.signals, count);
        if flags.contains(ObserverFlags::NEED_REMOVAL) {
            deferred.removed.push(observer);
            return Ok(None);
        }
        self.observers.push_front(observer).map(Some)
    }

    /// Unregister without any callback
    pub fn remove_observer_locked(&mut self, key: ObserverKey) -> bool {
        self.observers.remove(key).is_some()
    }

    /// Apply `clear` then `set`; notify observers if anything changed
    pub fn update_state_locked(&mut self, clear: Signals, set: Signals, deferred: &mut Deferred) {
        let previous = self.signals;
        self.signals = previous.apply(clear, set);
        if self.signals == previous {
            return;
        }
        let current = self.signals;
        self.observers
            .sweep(|o| o.on_state_change(current), false, &mut deferred.removed);
    }

    pub fn cancel_locked(&mut self, handle: &Handle, deferred: &mut Deferred) -> ObserverFlags {
        self.observers
            .sweep(|o| o.on_cancel(handle), false, &mut deferred.removed)
    }

    /// # Returns
    /// Whether any observer reported the cancellation as handled.
    pub fn cancel_by_key_locked(
        &mut self,
        handle: &Handle,
        port: Koid,
        key: u64,
        deferred: &mut Deferred,
    ) -> bool {
        let flags = self.observers.sweep(
            |o| o.on_cancel_by_key(handle, port, key),
            true,
            &mut deferred.removed,
        );
        flags.contains(ObserverFlags::HANDLED)
    }
}
