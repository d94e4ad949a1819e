//! Kernel objects - dispatchers, signals and observers
//!
//! # Purpose
//! Every object user code holds a handle to is backed by a dispatcher. This
//! crate provides the shared dispatcher machinery (identity, handle counts,
//! signal state, observers, cookies, cascade-free teardown) and the leaf
//! object types built on it.
//!
//! # Integration Points
//! - Depends on: `kobject-platform` for interrupt controllers and IOMMUs
//! - Provides to: the syscall layer (typed create/operate calls) and the
//!   wait/port layer (the [`StateObserver`] contract)
//!
//! # Architecture
//! - [`Dispatcher`]: object-safe trait every object implements
//! - [`SoloDispatcher`]: objects with their own lock (events, interrupts,
//!   guests, vCPUs, BTIs, PMTs)
//! - [`PeeredDispatcher`]: objects created in pairs sharing one lock (event
//!   pairs, sockets)
//! - [`KernelRef`]: shared reference whose last drop goes through the
//!   [`deleter`], so destroying long ownership chains never recurses
//!
//! No dispatcher method blocks. Waiting is done by registering an observer
//! and retrying once the signals change.
//!
//! # Testing Strategy
//! - Unit tests: inline in every module
//! - Integration tests: observer protocol, teardown cascades, pairs, sockets,
//!   interrupts and pinned memory against the platform mocks

pub mod bti;
pub mod config;
pub mod cookie;
pub mod counters;
pub mod deleter;
pub mod dispatcher;
pub mod error;
pub mod event;
pub mod event_pair;
pub mod handle;
pub mod interrupt;
pub mod koid;
pub mod kref;
pub mod observer;
pub mod peered;
pub mod pmt;
pub mod rights;
pub mod signals;
pub mod socket;
pub mod solo;
pub mod state;
pub mod vcpu;
pub mod vm;

pub use kobject_platform as platform;

pub use bti::BtiDispatcher;
pub use config::Limits;
pub use cookie::CookieJar;
pub use dispatcher::{Dispatcher, DispatcherBase, ObjType};
pub use error::{ObjectError, Result};
pub use event::EventDispatcher;
pub use event_pair::EventPairDispatcher;
pub use handle::Handle;
pub use interrupt::{InterruptEventDispatcher, InterruptStatus};
pub use koid::{Koid, FIRST_KOID, KOID_INVALID, KOID_KERNEL};
pub use kref::KernelRef;
pub use observer::{CountInfo, ObserverFlags, ObserverKey, StateObserver};
pub use peered::{PeerEndpoint, PeeredDispatcher};
pub use pmt::PmtDispatcher;
pub use rights::Rights;
pub use signals::Signals;
pub use socket::{ReadType, ShutdownFlags, SocketDispatcher, SocketInfo, SocketOptions};
pub use solo::{SoloDispatcher, SoloKind};
pub use state::{Deferred, DispatcherState};
pub use vcpu::{GuestDispatcher, VcpuDispatcher};
pub use vm::{PinnedVmObject, VmObject};
