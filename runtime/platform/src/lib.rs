//! # Platform seams for kernel objects
//!
//! Kernel objects that front hardware (interrupt events, pinned DMA memory)
//! never touch registers directly. They talk to the two traits exported here:
//!
//! - [`InterruptController`]: vector validation, trigger configuration,
//!   handler registration, masking and inter-processor interrupts
//! - [`Iommu`]: device address translation for bus transaction initiators
//!
//! ## Build Modes
//!
//! ```bash
//! # Mock hardware (default - works on every host)
//! cargo test
//!
//! # Without mocks (a real backend crate provides the trait impls)
//! cargo build --no-default-features
//! ```

pub mod interrupt;
pub mod iommu;

#[cfg(feature = "mock")]
pub mod mock;

pub use interrupt::{
    CpuMask, InterruptController, IrqEoi, IrqHandler, Polarity, TriggerMode,
};
pub use iommu::{DevVaddr, Iommu, IommuMapping, IommuPerms, PAGE_SIZE};

use thiserror::Error;

/// Errors reported by the hardware layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PlatformError {
    #[error("Invalid interrupt vector {vector}")]
    InvalidVector { vector: u32 },

    #[error("Interrupt vector {vector} already has a handler")]
    VectorBound { vector: u32 },

    #[error("IOMMU rejected mapping of {len} bytes at offset {offset:#x}")]
    MapRejected { offset: u64, len: usize },

    #[error("IOMMU has no mapping at {addr:#x}")]
    NotMapped { addr: DevVaddr },

    #[error("IOMMU address space exhausted")]
    NoResources,
}

pub type Result<T> = core::result::Result<T, PlatformError>;

/// Platform configuration and detection
pub mod config {
    /// Check if mock hardware is compiled in
    pub const fn is_mock() -> bool {
        cfg!(feature = "mock")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(feature = "mock")]
    #[test]
    fn test_platform_detection() {
        assert!(config::is_mock());
    }

    #[test]
    fn test_error_display() {
        let err = PlatformError::VectorBound { vector: 33 };
        assert_eq!(err.to_string(), "Interrupt vector 33 already has a handler");
    }
}
