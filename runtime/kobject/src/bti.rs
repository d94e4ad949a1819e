//! Bus transaction initiators
//!
//! A BTI is a device's identity in the IOMMU. Pinning memory through it
//! creates a [`PmtDispatcher`] holding the device mappings. PMTs whose last
//! handle closed without an explicit unpin land in the BTI's quarantine,
//! mappings intact, until the quarantine is released or the BTI's own last
//! handle closes.

use crate::dispatcher::{Dispatcher, ObjType};
use crate::kref::KernelRef;
use crate::pmt::PmtDispatcher;
use crate::rights::Rights;
use crate::signals::Signals;
use crate::solo::{SoloDispatcher, SoloKind};
use crate::state::Deferred;
use crate::vm::PinnedVmObject;
use crate::{ObjectError, Result};
use kobject_platform::{Iommu, IommuPerms};
use std::sync::Arc;

pub struct BtiKind {
    iommu: Arc<dyn Iommu>,
    bti_id: u64,
}

#[derive(Default)]
pub struct BtiState {
    /// Live PMTs pinned through this BTI
    pmts: usize,
    quarantine: Vec<KernelRef<PmtDispatcher>>,
    zero_handles: bool,
}

impl SoloKind for BtiKind {
    type State = BtiState;

    const TYPE: ObjType = ObjType::Bti;
    const DEFAULT_RIGHTS: Rights = Rights::BASIC.union(Rights::IO).union(Rights::MAP);

    fn on_zero_handles(this: &KernelRef<BtiDispatcher>) {
        let released = {
            let mut locked = this.lock();
            locked.inner.zero_handles = true;
            core::mem::take(&mut locked.inner.quarantine)
        };
        if !released.is_empty() {
            log::debug!(
                "bti {} closed, releasing {} quarantined pmts",
                this.get_koid(),
                released.len()
            );
        }
    }
}

pub type BtiDispatcher = SoloDispatcher<BtiKind>;

impl SoloDispatcher<BtiKind> {
    pub fn create(iommu: Arc<dyn Iommu>, bti_id: u64) -> Result<(KernelRef<BtiDispatcher>, Rights)> {
        let kind = BtiKind { iommu, bti_id };
        let bti = SoloDispatcher::publish(kind, BtiState::default(), Signals::empty());
        Ok((bti, BtiKind::DEFAULT_RIGHTS))
    }

    pub fn iommu(&self) -> &Arc<dyn Iommu> {
        &self.kind().iommu
    }

    pub fn bti_id(&self) -> u64 {
        self.kind().bti_id
    }

    /// Pin `pinned` for device access and map it into the IOMMU
    ///
    /// # Errors
    /// `InvalidArgs` for empty permissions, `BadState` once the BTI's
    /// handles are gone, plus any IOMMU failure (nothing stays mapped).
    pub fn pin(
        this: &KernelRef<BtiDispatcher>,
        pinned: PinnedVmObject,
        perms: IommuPerms,
    ) -> Result<(KernelRef<PmtDispatcher>, Rights)> {
        if perms.is_empty() {
            return Err(ObjectError::InvalidArgs);
        }
        PmtDispatcher::create(this.clone(), pinned, perms)
    }

    /// Count a new PMT against this BTI
    pub(crate) fn track_pmt(&self) -> Result<()> {
        let mut locked = self.lock();
        if locked.inner.zero_handles {
            return Err(ObjectError::BadState);
        }
        locked.inner.pmts += 1;
        Ok(())
    }

    pub(crate) fn untrack_pmt(&self) {
        let mut locked = self.lock();
        debug_assert!(locked.inner.pmts > 0);
        locked.inner.pmts = locked.inner.pmts.saturating_sub(1);
    }

    /// Park a PMT whose handles closed without an unpin
    ///
    /// Only a BTI someone holds a handle to can quarantine: the parked PMT
    /// keeps the BTI alive, and closing the BTI's last handle is what
    /// releases the quarantine. Without a handle the PMT is unmapped at once.
    pub(crate) fn quarantine(&self, pmt: KernelRef<PmtDispatcher>) {
        let koid = pmt.get_koid();
        let mut deferred = Deferred::new();
        let mut locked = self.lock();
        if locked.inner.zero_handles || self.handle_count() == 0 {
            deferred.defer_drop(pmt);
            return;
        }
        locked.inner.quarantine.push(pmt);
        log::debug!("bti {} quarantined pmt {}", self.get_koid(), koid);
    }

    /// Drop every quarantined PMT, unmapping its memory
    pub fn release_quarantine(&self) {
        let released = core::mem::take(&mut self.lock().inner.quarantine);
        log::debug!(
            "bti {} releasing {} quarantined pmts",
            self.get_koid(),
            released.len()
        );
    }

    pub fn quarantine_count(&self) -> usize {
        self.lock().inner.quarantine.len()
    }

    pub fn pmt_count(&self) -> usize {
        self.lock().inner.pmts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::Handle;
    use crate::vm::VmObject;
    use kobject_platform::mock::MockIommu;
    use kobject_platform::PAGE_SIZE;

    #[test]
    fn test_pin_requires_perms() {
        let iommu = Arc::new(MockIommu::new(PAGE_SIZE, PAGE_SIZE));
        let (bti, _) = BtiDispatcher::create(iommu, 1).unwrap();
        let vmo = VmObject::create(PAGE_SIZE, false).unwrap();
        let pinned = PinnedVmObject::create(vmo, 0, PAGE_SIZE).unwrap();
        assert_eq!(
            BtiDispatcher::pin(&bti, pinned, IommuPerms::empty()).err(),
            Some(ObjectError::InvalidArgs)
        );
    }

    #[test]
    fn test_unheld_bti_does_not_quarantine() {
        let iommu = Arc::new(MockIommu::new(PAGE_SIZE, PAGE_SIZE));
        let (bti, _) = BtiDispatcher::create(iommu.clone(), 4).unwrap();
        let vmo = VmObject::create(2 * PAGE_SIZE, false).unwrap();
        let pinned = PinnedVmObject::create(vmo, 0, 2 * PAGE_SIZE).unwrap();
        let (pmt, rights) = BtiDispatcher::pin(&bti, pinned, IommuPerms::READ).unwrap();
        assert_eq!(iommu.mapped_pages(), 2);

        drop(Handle::make(pmt, rights));
        assert_eq!(bti.quarantine_count(), 0);
        assert_eq!(bti.pmt_count(), 0);
        assert_eq!(iommu.mapped_pages(), 0);
        assert_eq!(KernelRef::strong_count(&bti), 1);
    }

    #[test]
    fn test_pin_after_close_is_rejected() {
        let iommu = Arc::new(MockIommu::new(PAGE_SIZE, PAGE_SIZE));
        let (bti, rights) = BtiDispatcher::create(iommu.clone(), 2).unwrap();
        drop(Handle::make(bti.clone(), rights));

        let vmo = VmObject::create(PAGE_SIZE, false).unwrap();
        let pinned = PinnedVmObject::create(vmo, 0, PAGE_SIZE).unwrap();
        assert!(matches!(
            BtiDispatcher::pin(&bti, pinned, IommuPerms::READ),
            Err(ObjectError::BadState)
        ));
        assert_eq!(iommu.mapped_pages(), 0);
        assert_eq!(bti.pmt_count(), 0);
    }
}
