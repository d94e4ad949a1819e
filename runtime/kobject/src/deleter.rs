//! Safe deleter for cascading object destruction
//!
//! Destroying one object can drop the last reference to another, whose
//! destructor drops the last reference to a third, and so on. Left alone that
//! recursion is as deep as the chain is long.
//!
//! ## Design
//!
//! Every [`KernelRef`](crate::KernelRef) drop goes through [`release`]. The
//! first release on a thread marks the thread as deleting and drops the
//! object inline. Any release that happens while the mark is set (that is,
//! from inside a destructor) is pushed onto a thread-local pending list
//! instead. The outermost release then pops and drops pending entries until
//! the list is empty, so destructors never nest more than one level.

use std::cell::{Cell, RefCell};
use std::sync::Arc;

/// Anything whose drop we may postpone
trait Doomed {}

impl<T: ?Sized> Doomed for Arc<T> {}

thread_local! {
    static DELETING: Cell<bool> = const { Cell::new(false) };
    static PENDING: RefCell<Vec<Box<dyn Doomed>>> = const { RefCell::new(Vec::new()) };
}

/// Drop one reference to `obj` without recursing into nested destructors
pub fn release<T: ?Sized + 'static>(obj: Arc<T>) {
    // Thread teardown: TLS is gone, nothing left to protect
    let Ok(nested) = DELETING.try_with(|d| d.get()) else {
        drop(obj);
        return;
    };

    if nested {
        // Not the last reference; dropping cannot run a destructor here.
        if Arc::strong_count(&obj) > 1 {
            drop(obj);
            return;
        }
        if let Err(e) = PENDING.try_with(|p| p.borrow_mut().push(Box::new(obj))) {
            log::warn!("safe deleter queue unavailable: {:?}", e);
        }
        return;
    }

    let scope = DeleteScope::enter();
    drop(obj);
    scope.drain();
}

/// Marks the thread as deleting for as long as it lives
///
/// Clearing the mark happens in `Drop`, so a destructor that unwinds out of
/// [`release`] still leaves the thread able to delete afterwards.
struct DeleteScope;

impl DeleteScope {
    fn enter() -> Self {
        DELETING.with(|d| d.set(true));
        DeleteScope
    }

    fn drain(&self) {
        // Borrow only long enough to pop, the drop itself may push more.
        while let Some(next) = PENDING.with(|p| p.borrow_mut().pop()) {
            drop(next);
        }
    }
}

impl Drop for DeleteScope {
    fn drop(&mut self) {
        // Non-empty only when a destructor unwound past `drain`.
        self.drain();
        DELETING.with(|d| d.set(false));
    }
}

/// Whether this thread is currently inside a release
pub fn is_deleting() -> bool {
    DELETING.try_with(|d| d.get()).unwrap_or(false)
}

/// Entries queued behind the release running on this thread
pub fn pending() -> usize {
    PENDING.try_with(|p| p.borrow().len()).unwrap_or(0)
}
