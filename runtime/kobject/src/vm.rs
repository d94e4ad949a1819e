//! Memory to pin
//!
//! The object layer only needs a VMO's page list and a committed window of
//! it. Page frames are synthetic: each VMO takes a fresh physical range from
//! a global bump counter, laid out contiguously or with a gap after every
//! page.

use crate::config;
use crate::{ObjectError, Result};
use core::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_PADDR: AtomicU64 = AtomicU64::new(0x8000_0000);

#[derive(Debug)]
pub struct VmObject {
    size: usize,
    contiguous: bool,
    pages: Vec<u64>,
}

impl VmObject {
    /// # Errors
    /// `InvalidArgs` unless `size` is a non-zero multiple of the page size.
    pub fn create(size: usize, contiguous: bool) -> Result<Arc<VmObject>> {
        let page = config::limits().page_size;
        if size == 0 || size % page != 0 {
            return Err(ObjectError::InvalidArgs);
        }
        let count = size / page;
        let mut pages = Vec::new();
        pages
            .try_reserve_exact(count)
            .map_err(|_| ObjectError::NoMemory)?;

        let stride = (if contiguous { page } else { 2 * page }) as u64;
        let base = NEXT_PADDR.fetch_add(stride * count as u64, Ordering::Relaxed);
        pages.extend((0..count as u64).map(|i| base + i * stride));

        Ok(Arc::new(VmObject {
            size,
            contiguous,
            pages,
        }))
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_contiguous(&self) -> bool {
        self.contiguous
    }

    /// Physical address of every page
    pub fn pages(&self) -> &[u64] {
        &self.pages
    }
}

/// A committed, page-aligned window of a [`VmObject`]
#[derive(Debug, Clone)]
pub struct PinnedVmObject {
    vmo: Arc<VmObject>,
    offset: usize,
    size: usize,
}

impl PinnedVmObject {
    /// # Errors
    /// `InvalidArgs` for an empty or unaligned window, `OutOfRange` if it
    /// runs past the end of `vmo`.
    pub fn create(vmo: Arc<VmObject>, offset: usize, size: usize) -> Result<Self> {
        let page = config::limits().page_size;
        if size == 0 || offset % page != 0 || size % page != 0 {
            return Err(ObjectError::InvalidArgs);
        }
        match offset.checked_add(size) {
            Some(end) if end <= vmo.size() => {}
            _ => return Err(ObjectError::OutOfRange),
        }
        Ok(Self { vmo, offset, size })
    }

    pub fn vmo(&self) -> &Arc<VmObject> {
        &self.vmo
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn size(&self) -> usize {
        self.size
    }
}
