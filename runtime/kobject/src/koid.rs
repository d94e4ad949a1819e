//! Kernel object ids
//!
//! Koids are handed out from one process-global counter and never reused.
//! Values below [`FIRST_KOID`] are reserved for sentinels.

use core::sync::atomic::{AtomicU64, Ordering};
use static_assertions::const_assert;

pub type Koid = u64;

/// No object; also the scope of an unclaimed cookie jar
pub const KOID_INVALID: Koid = 0;

/// The kernel itself; scope of an invalidated cookie jar
pub const KOID_KERNEL: Koid = 1;

/// First koid handed to a real object
pub const FIRST_KOID: Koid = 1024;

const_assert!(KOID_INVALID < KOID_KERNEL);
const_assert!(KOID_KERNEL < FIRST_KOID);

static NEXT_KOID: AtomicU64 = AtomicU64::new(FIRST_KOID);

/// Allocate the next koid
pub fn generate() -> Koid {
    NEXT_KOID.fetch_add(1, Ordering::Relaxed)
}

/// Whether `koid` is one of the reserved sentinel values
pub const fn is_reserved(koid: Koid) -> bool {
    koid < FIRST_KOID
}
