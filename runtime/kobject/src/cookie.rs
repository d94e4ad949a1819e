//! Scoped cookie jar
//!
//! One opaque 64-bit value per object. The first caller to store a cookie
//! claims the jar for its scope (a koid); afterwards only that scope can read
//! or replace it. Invalidating moves the jar to the kernel's own scope, which
//! no caller can name, so the jar is dead from then on.

use crate::koid::{self, Koid, KOID_INVALID, KOID_KERNEL};
use crate::{ObjectError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CookieJar {
    scope: Koid,
    cookie: u64,
}

impl CookieJar {
    pub const fn new() -> Self {
        Self {
            scope: KOID_INVALID,
            cookie: 0,
        }
    }

    pub fn scope(&self) -> Koid {
        self.scope
    }

    /// Store `cookie` for `scope`, claiming the jar if it is unclaimed
    ///
    /// # Errors
    /// `InvalidArgs` for a reserved scope, `AccessDenied` if the jar belongs
    /// to another scope.
    pub fn set(&mut self, scope: Koid, cookie: u64) -> Result<()> {
        if koid::is_reserved(scope) {
            return Err(ObjectError::InvalidArgs);
        }
        if self.scope == KOID_INVALID {
            self.scope = scope;
        } else if self.scope != scope {
            return Err(ObjectError::AccessDenied);
        }
        self.cookie = cookie;
        Ok(())
    }

    pub fn get(&self, scope: Koid) -> Result<u64> {
        if koid::is_reserved(scope) {
            return Err(ObjectError::InvalidArgs);
        }
        if self.scope != scope {
            return Err(ObjectError::AccessDenied);
        }
        Ok(self.cookie)
    }

    pub fn invalidate(&mut self) {
        self.scope = KOID_KERNEL;
    }

    pub fn is_invalidated(&self) -> bool {
        self.scope == KOID_KERNEL
    }
}

impl Default for CookieJar {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::koid::FIRST_KOID;

    const A: Koid = FIRST_KOID + 7;
    const B: Koid = FIRST_KOID + 8;

    #[test]
    fn test_claim_update_and_deny() {
        let mut jar = CookieJar::new();
        assert_eq!(jar.get(A), Err(ObjectError::AccessDenied));
        jar.set(A, 1).unwrap();
        assert_eq!(jar.set(B, 2), Err(ObjectError::AccessDenied));
        jar.set(A, 3).unwrap();
        assert_eq!(jar.get(A), Ok(3));
        assert_eq!(jar.get(B), Err(ObjectError::AccessDenied));
    }

    #[test]
    fn test_invalidate_is_permanent() {
        let mut jar = CookieJar::new();
        jar.invalidate();
        assert!(jar.is_invalidated());
        assert_eq!(jar.set(A, 1), Err(ObjectError::AccessDenied));
        assert_eq!(jar.get(KOID_KERNEL), Err(ObjectError::InvalidArgs));
    }
}
