//! Events
//!
//! The simplest waitable object: no payload, just the signal word.

use crate::dispatcher::ObjType;
use crate::kref::KernelRef;
use crate::rights::Rights;
use crate::signals::Signals;
use crate::solo::{SoloDispatcher, SoloKind};
use crate::{ObjectError, Result};

pub struct EventKind;

impl SoloKind for EventKind {
    type State = ();

    const TYPE: ObjType = ObjType::Event;
    const DEFAULT_RIGHTS: Rights = Rights::BASIC.union(Rights::SIGNAL);
    const EXTRA_SIGNALS: Signals = Signals::SIGNALED;
    const HAS_COOKIE: bool = true;
}

pub type EventDispatcher = SoloDispatcher<EventKind>;

impl SoloDispatcher<EventKind> {
    /// # Errors
    /// `InvalidArgs` for any option bit.
    pub fn create(options: u32) -> Result<(KernelRef<EventDispatcher>, Rights)> {
        if options != 0 {
            return Err(ObjectError::InvalidArgs);
        }
        let event = SoloDispatcher::publish(EventKind, (), Signals::empty());
        Ok((event, EventKind::DEFAULT_RIGHTS))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::Dispatcher;
    use crate::koid::FIRST_KOID;

    #[test]
    fn test_create_rejects_options() {
        assert!(EventDispatcher::create(1).is_err());
    }

    #[test]
    fn test_user_signal_self() {
        let (event, rights) = EventDispatcher::create(0).unwrap();
        assert!(rights.contains(Rights::SIGNAL));
        assert!(event.is_waitable());

        event
            .user_signal_self(Signals::empty(), Signals::SIGNALED | Signals::USER_1)
            .unwrap();
        assert_eq!(event.signals(), Signals::SIGNALED | Signals::USER_1);

        assert_eq!(
            event.user_signal_self(Signals::empty(), Signals::READABLE),
            Err(ObjectError::InvalidArgs)
        );
        assert_eq!(
            event.user_signal_peer(Signals::empty(), Signals::USER_0),
            Err(ObjectError::NotSupported)
        );
    }

    #[test]
    fn test_event_has_cookie() {
        let (event, _) = EventDispatcher::create(0).unwrap();
        event.set_cookie(FIRST_KOID + 1, 9).unwrap();
        assert_eq!(event.get_cookie(FIRST_KOID + 1), Ok(9));
        assert_eq!(event.get_related_koid(), 0);
    }
}
