//! Boot-time limits
//!
//! Limits are installed once, early, with [`init`]. Anything that reads them
//! before that sees [`Limits::DEFAULT`].

use crate::{ObjectError, Result};
use spin::Once;

/// Sizes the object layer allocates against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    /// Capacity of each direction of a socket's data plane
    pub socket_buffer_size: usize,
    /// Capacity of a socket's control plane message
    pub control_msg_size: usize,
    /// Page size for pinning and IOMMU mappings
    pub page_size: usize,
}

impl Limits {
    pub const DEFAULT: Limits = Limits {
        socket_buffer_size: 256 * 1024,
        control_msg_size: 1024,
        page_size: kobject_platform::PAGE_SIZE,
    };

    fn validate(&self) -> Result<()> {
        if self.socket_buffer_size == 0
            || self.control_msg_size == 0
            || !self.page_size.is_power_of_two()
        {
            return Err(ObjectError::InvalidArgs);
        }
        Ok(())
    }
}

impl Default for Limits {
    fn default() -> Self {
        Self::DEFAULT
    }
}

static LIMITS: Once<Limits> = Once::new();

/// Install limits for the rest of the kernel's life
///
/// # Errors
/// `InvalidArgs` for zero sizes or a page size that is not a power of two,
/// `BadState` if different limits were already installed.
pub fn init(limits: Limits) -> Result<&'static Limits> {
    limits.validate()?;
    let installed = LIMITS.call_once(|| limits);
    if *installed != limits {
        return Err(ObjectError::BadState);
    }
    log::info!(
        "kobject limits: socket buffer {} bytes, control {} bytes, page {} bytes",
        installed.socket_buffer_size,
        installed.control_msg_size,
        installed.page_size
    );
    Ok(installed)
}

/// Installed limits, or the defaults if [`init`] never ran
pub fn limits() -> &'static Limits {
    LIMITS.get().unwrap_or(&Limits::DEFAULT)
}
