//! Integration tests for BTIs and pinned memory tokens

use kobject::platform::mock::MockIommu;
use kobject::platform::{IommuPerms, PAGE_SIZE};
use kobject::*;
use std::sync::Arc;

fn setup(pages: usize) -> (Arc<MockIommu>, KernelRef<BtiDispatcher>, Handle, PinnedVmObject) {
    let iommu = Arc::new(MockIommu::new(PAGE_SIZE, 2 * PAGE_SIZE));
    let (bti, rights) = BtiDispatcher::create(iommu.clone(), 3).unwrap();
    let bti_handle = Handle::make(bti.clone(), rights);
    let vmo = VmObject::create(pages * PAGE_SIZE, false).unwrap();
    let pinned = PinnedVmObject::create(vmo, 0, pages * PAGE_SIZE).unwrap();
    (iommu, bti, bti_handle, pinned)
}

/// Closing a token without unpinning leaves the device mapping in place
#[test]
fn test_close_without_unpin_quarantines() {
    let (iommu, bti, _bti_handle, pinned) = setup(3);
    let (pmt, rights) = BtiDispatcher::pin(&bti, pinned, IommuPerms::READ | IommuPerms::WRITE).unwrap();
    let mut addrs = [0u64; 3];
    pmt.encode_addrs(false, false, &mut addrs).unwrap();

    drop(Handle::make(pmt, rights));
    assert_eq!(bti.quarantine_count(), 1);
    assert_eq!(bti.pmt_count(), 1);
    assert_eq!(iommu.mapped_pages(), 3);
    assert!(addrs.iter().all(|addr| iommu.is_mapped(*addr)));

    bti.release_quarantine();
    assert_eq!(bti.quarantine_count(), 0);
    assert_eq!(bti.pmt_count(), 0);
    assert_eq!(iommu.mapped_pages(), 0);
}

/// An explicit unpin makes the close unmap at once
#[test]
fn test_close_after_unpin_unmaps() {
    let (iommu, bti, _bti_handle, pinned) = setup(2);
    let (pmt, rights) = BtiDispatcher::pin(&bti, pinned, IommuPerms::READ).unwrap();
    let observer = pmt.clone();

    pmt.mark_unpinned();
    drop(Handle::make(pmt, rights));
    assert_eq!(bti.quarantine_count(), 0);
    assert!(!observer.is_mapped());
    assert_eq!(iommu.mapped_pages(), 0);

    drop(observer);
    assert_eq!(bti.pmt_count(), 0);
}

/// Closing the BTI releases everything it quarantined
#[test]
fn test_bti_close_releases_quarantine() {
    let (iommu, bti, bti_handle, pinned) = setup(4);
    let (pmt, rights) = BtiDispatcher::pin(&bti, pinned, IommuPerms::READ).unwrap();
    drop(Handle::make(pmt, rights));
    assert_eq!(iommu.mapped_bytes(3), 4 * PAGE_SIZE);

    drop(bti_handle);
    assert_eq!(bti.quarantine_count(), 0);
    assert_eq!(iommu.mapped_pages(), 0);

    let vmo = VmObject::create(PAGE_SIZE, true).unwrap();
    let pinned = PinnedVmObject::create(vmo, 0, PAGE_SIZE).unwrap();
    assert_eq!(
        BtiDispatcher::pin(&bti, pinned, IommuPerms::READ).err(),
        Some(ObjectError::BadState)
    );
}

#[test]
fn test_pmt_is_not_waitable() {
    let (_iommu, bti, _bti_handle, pinned) = setup(1);
    let (pmt, rights) = BtiDispatcher::pin(&bti, pinned, IommuPerms::READ).unwrap();
    assert_eq!(rights, Rights::INSPECT);
    assert!(!pmt.is_waitable());
    assert_eq!(pmt.get_type(), ObjType::Pmt);
    assert_eq!(pmt.perms(), IommuPerms::READ);
    assert_eq!(pmt.size(), PAGE_SIZE);
}
