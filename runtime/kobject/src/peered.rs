//! Peered dispatchers
//!
//! Some objects only exist in pairs: two endpoints created together, each
//! observing the other. Both halves share one [`PeerHolder`], which owns the
//! single lock and the state of both ends, so code running for one side can
//! update the other without a second lock or any lock ordering.
//!
//! ## Design
//!
//! The holder is reference counted by the two halves and freed when both are
//! gone. Both ends' state is built by value before the holder exists, and
//! the halves are published only after that, so there is no window in which
//! one half is reachable while the pair is half-linked.
//!
//! When one side's last handle closes, the surviving side has its cookie
//! invalidated and its peer-closed signals raised, and both sides forget the
//! link. The survivor keeps its signal history and any buffered data.

use crate::dispatcher::{Dispatcher, DispatcherBase, ObjType};
use crate::koid::Koid;
use crate::kref::KernelRef;
use crate::rights::Rights;
use crate::signals::Signals;
use crate::state::{Deferred, DispatcherState};
use crate::{ObjectError, Result};
use spin::{Mutex, MutexGuard};
use std::sync::Arc;

/// Everything that varies between peered object types
pub trait PeerEndpoint: Send + Sized + 'static {
    const TYPE: ObjType;
    const DEFAULT_RIGHTS: Rights;
    /// Bits beyond `USER_ALL` user code may signal
    const EXTRA_SIGNALS: Signals = Signals::empty();
    const HAS_COOKIE: bool = false;

    /// This side's last handle closed; the lock is held
    fn on_zero_handles_locked(&mut self, _deferred: &mut Deferred) {}

    /// The other side's last handle closed; the lock is held
    ///
    /// # Returns
    /// Signals to clear and to set on this side.
    fn on_peer_zero_handles_locked(&mut self, _deferred: &mut Deferred) -> (Signals, Signals) {
        (Signals::empty(), Signals::PEER_CLOSED)
    }
}

/// One side of a pair, as stored under the shared lock
pub struct PeerEnd<E> {
    pub state: DispatcherState,
    /// Cleared once either side's handles are gone
    pub peer_open: bool,
    pub inner: E,
}

impl<E: PeerEndpoint> PeerEnd<E> {
    pub fn new(inner: E, initial: Signals) -> Self {
        Self {
            state: DispatcherState::new(initial, E::HAS_COOKIE),
            peer_open: true,
            inner,
        }
    }
}

/// Shared lock and state of both ends of a pair
pub struct PeerHolder<E> {
    ends: Mutex<[PeerEnd<E>; 2]>,
}

/// The shared lock, held on behalf of one side
pub struct PeerGuard<'a, E> {
    guard: MutexGuard<'a, [PeerEnd<E>; 2]>,
    side: usize,
}

impl<E> PeerGuard<'_, E> {
    pub fn mine(&mut self) -> &mut PeerEnd<E> {
        &mut self.guard[self.side]
    }

    /// Both ends, this side first
    pub fn split(&mut self) -> (&mut PeerEnd<E>, &mut PeerEnd<E>) {
        let [a, b] = &mut *self.guard;
        if self.side == 0 {
            (a, b)
        } else {
            (b, a)
        }
    }

    /// Both ends, or `PeerClosed` once the link is gone
    pub fn split_open(&mut self) -> Result<(&mut PeerEnd<E>, &mut PeerEnd<E>)> {
        let (mine, peer) = self.split();
        if !mine.peer_open {
            return Err(ObjectError::PeerClosed);
        }
        Ok((mine, peer))
    }
}

pub struct PeeredDispatcher<E: PeerEndpoint> {
    base: DispatcherBase,
    holder: Arc<PeerHolder<E>>,
    side: usize,
    peer_koid: Koid,
}

impl<E: PeerEndpoint> PeeredDispatcher<E> {
    /// Build both halves around one holder and publish them
    pub fn publish_pair(first: PeerEnd<E>, second: PeerEnd<E>) -> (KernelRef<Self>, KernelRef<Self>) {
        let base0 = DispatcherBase::new(E::TYPE);
        let base1 = DispatcherBase::new(E::TYPE);
        let (koid0, koid1) = (base0.koid(), base1.koid());
        let holder = Arc::new(PeerHolder {
            ends: Mutex::new([first, second]),
        });

        let half0 = KernelRef::new(Self {
            base: base0,
            holder: holder.clone(),
            side: 0,
            peer_koid: koid1,
        });
        let half1 = KernelRef::new(Self {
            base: base1,
            holder,
            side: 1,
            peer_koid: koid0,
        });
        (half0, half1)
    }

    /// Take the shared lock
    pub fn lock(&self) -> PeerGuard<'_, E> {
        PeerGuard {
            guard: self.holder.ends.lock(),
            side: self.side,
        }
    }

    pub fn peer_koid(&self) -> Koid {
        self.peer_koid
    }

    /// Whether the other side still has handles
    pub fn peer_open(&self) -> bool {
        self.lock().mine().peer_open
    }
}

impl<E: PeerEndpoint> Dispatcher for PeeredDispatcher<E> {
    fn base(&self) -> &DispatcherBase {
        &self.base
    }

    fn get_type(&self) -> ObjType {
        E::TYPE
    }

    fn default_rights(&self) -> Rights {
        E::DEFAULT_RIGHTS
    }

    fn with_state(&self, f: &mut dyn FnMut(&mut DispatcherState)) {
        f(&mut self.lock().mine().state);
    }

    fn is_locked(&self) -> bool {
        self.holder.ends.is_locked()
    }

    fn extra_user_signals(&self) -> Signals {
        E::EXTRA_SIGNALS
    }

    fn get_related_koid(&self) -> Koid {
        self.peer_koid
    }

    fn user_signal_peer(&self, clear: Signals, set: Signals) -> Result<()> {
        if !self.is_waitable() {
            return Err(ObjectError::NotSupported);
        }
        let allowed = Signals::USER_ALL | E::EXTRA_SIGNALS;
        if !allowed.contains(clear) || !allowed.contains(set) {
            return Err(ObjectError::InvalidArgs);
        }

        let mut deferred = Deferred::new();
        let mut guard = self.lock();
        let (_, peer) = guard.split_open()?;
        peer.state.update_state_locked(clear, set, &mut deferred);
        Ok(())
    }

    fn on_zero_handles(&self, _this: &KernelRef<dyn Dispatcher>) {
        let mut deferred = Deferred::new();
        let mut guard = self.lock();
        let (mine, peer) = guard.split();
        mine.inner.on_zero_handles_locked(&mut deferred);
        if !mine.peer_open {
            return;
        }
        mine.peer_open = false;
        peer.peer_open = false;

        if let Some(jar) = peer.state.cookie_mut() {
            jar.invalidate();
        }
        let (clear, set) = peer.inner.on_peer_zero_handles_locked(&mut deferred);
        peer.state.update_state_locked(clear, set, &mut deferred);
        log::debug!("{} {} peer closed", E::TYPE.name(), self.peer_koid);
    }
}
