//! IOMMU interface
//!
//! A bus transaction initiator (BTI) is identified by an id; every mapping is
//! made on behalf of one BTI. Mappings are created over page-aligned windows of
//! a physical region described by its page frame addresses.

use crate::Result;
use bitflags::bitflags;

/// Address as seen by a device behind the IOMMU
pub type DevVaddr = u64;

/// Size of a page for pinning and IOMMU purposes
pub const PAGE_SIZE: usize = 4096;

bitflags! {
    /// Access a device is granted to a mapping
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct IommuPerms: u32 {
        const READ    = 1 << 0;
        const WRITE   = 1 << 1;
        const EXECUTE = 1 << 2;
    }
}

/// One mapping created by [`Iommu::map`] or [`Iommu::map_contiguous`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IommuMapping {
    /// Device address of the first byte
    pub addr: DevVaddr,
    /// Bytes covered, may be less than requested
    pub len: usize,
}

/// Hardware (or mock) IOMMU
pub trait Iommu: Send + Sync {
    /// Map as much of `[offset, offset + len)` of `pages` as the IOMMU will
    /// take in one device-contiguous run. Callers loop until the range is
    /// covered.
    ///
    /// # Arguments
    /// * `bti_id` - Initiator the mapping belongs to
    /// * `pages` - Physical address of every page of the region
    /// * `offset` - Byte offset into the region, page aligned
    /// * `len` - Bytes requested, page aligned
    fn map(
        &self,
        bti_id: u64,
        pages: &[u64],
        offset: u64,
        len: usize,
        perms: IommuPerms,
    ) -> Result<IommuMapping>;

    /// Map the whole range as a single device-contiguous run or fail
    fn map_contiguous(
        &self,
        bti_id: u64,
        pages: &[u64],
        offset: u64,
        len: usize,
        perms: IommuPerms,
    ) -> Result<IommuMapping>;

    /// Remove `len` bytes of mapping starting at `addr`
    fn unmap(&self, bti_id: u64, addr: DevVaddr, len: usize) -> Result<()>;

    /// Largest run the IOMMU guarantees to be device-contiguous
    fn minimum_contiguity(&self, bti_id: u64) -> usize;
}
