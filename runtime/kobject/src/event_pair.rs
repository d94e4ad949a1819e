//! Event pairs
//!
//! Two linked events. Each side can signal itself or the other, and learns
//! through `PEER_CLOSED` when the other side's handles are all gone.

use crate::dispatcher::ObjType;
use crate::kref::KernelRef;
use crate::peered::{PeerEnd, PeerEndpoint, PeeredDispatcher};
use crate::rights::Rights;
use crate::signals::Signals;
use crate::{ObjectError, Result};

pub struct EventPairEnd;

impl PeerEndpoint for EventPairEnd {
    const TYPE: ObjType = ObjType::EventPair;
    const DEFAULT_RIGHTS: Rights = Rights::BASIC
        .union(Rights::SIGNAL)
        .union(Rights::SIGNAL_PEER);
    const EXTRA_SIGNALS: Signals = Signals::SIGNALED;
    const HAS_COOKIE: bool = true;
}

pub type EventPairDispatcher = PeeredDispatcher<EventPairEnd>;

impl PeeredDispatcher<EventPairEnd> {
    /// # Errors
    /// `InvalidArgs` for any option bit.
    pub fn create(
        options: u32,
    ) -> Result<(KernelRef<EventPairDispatcher>, KernelRef<EventPairDispatcher>, Rights)> {
        if options != 0 {
            return Err(ObjectError::InvalidArgs);
        }
        let (a, b) = PeeredDispatcher::publish_pair(
            PeerEnd::new(EventPairEnd, Signals::empty()),
            PeerEnd::new(EventPairEnd, Signals::empty()),
        );
        Ok((a, b, EventPairEnd::DEFAULT_RIGHTS))
    }
}
