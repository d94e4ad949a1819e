//! Status values returned by kernel object operations
//!
//! Every failure is a value; nothing here panics. The syscall layer turns an
//! [`ObjectError`] into the user-visible status with [`ObjectError::raw`].

use kobject_platform::PlatformError;
use thiserror::Error;

/// Errors reported by dispatcher operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ObjectError {
    #[error("Operation not supported by this object")]
    NotSupported,

    #[error("Access denied")]
    AccessDenied,

    #[error("Out of memory")]
    NoMemory,

    #[error("Object is in the wrong state for this operation")]
    BadState,

    #[error("Object is already bound")]
    AlreadyBound,

    #[error("Invalid arguments")]
    InvalidArgs,

    #[error("Argument out of range")]
    OutOfRange,

    #[error("Operation would block")]
    ShouldWait,

    #[error("Peer closed")]
    PeerClosed,

    #[error("Operation canceled")]
    Canceled,

    #[error("Platform error: {0}")]
    Platform(#[from] PlatformError),
}

impl ObjectError {
    /// Stable status code handed back to user code
    pub const fn raw(&self) -> i32 {
        match self {
            ObjectError::NotSupported => -2,
            ObjectError::NoMemory => -4,
            ObjectError::InvalidArgs => -10,
            ObjectError::OutOfRange => -14,
            ObjectError::BadState => -20,
            ObjectError::ShouldWait => -22,
            ObjectError::Canceled => -23,
            ObjectError::PeerClosed => -24,
            ObjectError::AlreadyBound => -27,
            ObjectError::AccessDenied => -30,
            ObjectError::Platform(e) => match e {
                PlatformError::InvalidVector { .. } => -10,
                PlatformError::VectorBound { .. } => -27,
                PlatformError::MapRejected { .. } => -10,
                PlatformError::NotMapped { .. } => -25,
                PlatformError::NoResources => -3,
            },
        }
    }
}

pub type Result<T> = core::result::Result<T, ObjectError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_codes() {
        assert_eq!(ObjectError::AccessDenied.raw(), -30);
        assert_eq!(ObjectError::ShouldWait.raw(), -22);
        assert_eq!(
            ObjectError::from(PlatformError::VectorBound { vector: 3 }).raw(),
            ObjectError::AlreadyBound.raw()
        );
    }

    #[test]
    fn test_platform_error_wraps() {
        let err: ObjectError = PlatformError::NoResources.into();
        assert_eq!(err.to_string(), "Platform error: IOMMU address space exhausted");
    }
}
