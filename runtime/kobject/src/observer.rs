//! State observers
//!
//! Wait queues and ports watch kernel objects by registering a
//! [`StateObserver`]. The object calls back into it on registration, on every
//! signal change and on cancellation; the callback's returned flags decide
//! whether the observer stays registered.
//!
//! ## Contract
//!
//! - `on_initialize`, `on_state_change`, `on_cancel` and `on_cancel_by_key`
//!   run with the object's lock held and must not call back into the object.
//! - `on_removed` runs exactly once for every observer the object unregisters,
//!   always after the lock has been released.
//!
//! ## Storage
//!
//! [`ObserverList`] is a slab of slots linked into a doubly linked list by
//! index. Insertion at the head and removal by [`ObserverKey`] are O(1); a
//! key carries the slot generation so a key for an observer that has already
//! gone is simply ignored.

use crate::handle::Handle;
use crate::koid::Koid;
use crate::signals::Signals;
use crate::{ObjectError, Result};
use bitflags::bitflags;
use std::sync::Arc;

bitflags! {
    /// Returned by observer callbacks
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ObserverFlags: u32 {
        /// Unregister this observer now
        const NEED_REMOVAL = 1 << 0;
        /// Key-scoped cancellation matched; stop walking the list
        const HANDLED      = 1 << 1;
    }
}

/// Signal counts accumulated by a port before it re-registers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CountInfo {
    pub count: u64,
    pub observed: Signals,
}

/// Listener registered against a waitable object
pub trait StateObserver: Send + Sync {
    /// Called once at registration with the current signals
    fn on_initialize(&self, initial: Signals, count: Option<&CountInfo>) -> ObserverFlags;

    /// Called after every signal change
    fn on_state_change(&self, new_state: Signals) -> ObserverFlags;

    /// Called when `handle` is being closed
    fn on_cancel(&self, handle: &Handle) -> ObserverFlags;

    /// Called when a port cancels its waits for (`handle`, `key`)
    fn on_cancel_by_key(&self, handle: &Handle, port: Koid, key: u64) -> ObserverFlags;

    /// Called after the observer has been unregistered
    fn on_removed(&self);
}

/// Identifies one registration in an [`ObserverList`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverKey {
    index: u32,
    generation: u32,
}

struct Entry {
    observer: Arc<dyn StateObserver>,
    prev: Option<u32>,
    next: Option<u32>,
}

struct Slot {
    generation: u32,
    entry: Option<Entry>,
}

/// Registered observers, newest first
#[derive(Default)]
pub struct ObserverList {
    slots: Vec<Slot>,
    free: Vec<u32>,
    head: Option<u32>,
    tail: Option<u32>,
    len: usize,
}

impl ObserverList {
    pub const fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            head: None,
            tail: None,
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Register `observer` at the head of the list
    ///
    /// # Errors
    /// `NoMemory` if the slab cannot grow.
    pub fn push_front(&mut self, observer: Arc<dyn StateObserver>) -> Result<ObserverKey> {
        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                self.slots
                    .try_reserve(1)
                    .map_err(|_| ObjectError::NoMemory)?;
                self.slots.push(Slot {
                    generation: 0,
                    entry: None,
                });
                (self.slots.len() - 1) as u32
            }
        };

        let old_head = self.head;
        let slot = &mut self.slots[index as usize];
        slot.entry = Some(Entry {
            observer,
            prev: None,
            next: old_head,
        });
        let key = ObserverKey {
            index,
            generation: slot.generation,
        };

        match old_head {
            Some(h) => self.link_mut(h).prev = Some(index),
            None => self.tail = Some(index),
        }
        self.head = Some(index);
        self.len += 1;
        Ok(key)
    }

    /// Unregister the observer behind `key`, if it is still registered
    pub fn remove(&mut self, key: ObserverKey) -> Option<Arc<dyn StateObserver>> {
        let slot = self.slots.get(key.index as usize)?;
        if slot.generation != key.generation || slot.entry.is_none() {
            return None;
        }
        Some(self.unlink(key.index))
    }

    /// Walk head to tail, unlinking every observer whose callback asks for
    /// removal and appending it to `removed`.
    ///
    /// # Returns
    /// The union of all flags returned by `f`.
    pub fn sweep<F>(
        &mut self,
        mut f: F,
        stop_on_handled: bool,
        removed: &mut Vec<Arc<dyn StateObserver>>,
    ) -> ObserverFlags
    where
        F: FnMut(&dyn StateObserver) -> ObserverFlags,
    {
        let mut all = ObserverFlags::empty();
        let mut cursor = self.head;
        while let Some(index) = cursor {
            let entry = self.link(index);
            cursor = entry.next;
            let flags = f(entry.observer.as_ref());
            all |= flags;
            if flags.contains(ObserverFlags::NEED_REMOVAL) {
                removed.push(self.unlink(index));
            }
            if stop_on_handled && flags.contains(ObserverFlags::HANDLED) {
                break;
            }
        }
        all
    }

    fn link(&self, index: u32) -> &Entry {
        match &self.slots[index as usize].entry {
            Some(entry) => entry,
            None => unreachable!("observer list links to empty slot {}", index),
        }
    }

    fn link_mut(&mut self, index: u32) -> &mut Entry {
        match &mut self.slots[index as usize].entry {
            Some(entry) => entry,
            None => unreachable!("observer list links to empty slot {}", index),
        }
    }

    fn unlink(&mut self, index: u32) -> Arc<dyn StateObserver> {
        let slot = &mut self.slots[index as usize];
        let entry = match slot.entry.take() {
            Some(entry) => entry,
            None => unreachable!("unlinking empty observer slot {}", index),
        };
        slot.generation = slot.generation.wrapping_add(1);

        match entry.prev {
            Some(p) => self.link_mut(p).next = entry.next,
            None => self.head = entry.next,
        }
        match entry.next {
            Some(n) => self.link_mut(n).prev = entry.prev,
            None => self.tail = entry.prev,
        }
        self.free.push(index);
        self.len -= 1;
        entry.observer
    }
}
