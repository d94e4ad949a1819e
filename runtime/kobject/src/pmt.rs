//! Pinned memory tokens
//!
//! A PMT is a window of a VMO mapped into the IOMMU for one BTI. The device
//! addresses are recorded per extent: one entry for every run of minimum
//! contiguity the IOMMU guarantees.
//!
//! Closing the last handle only unmaps when the holder unpinned first.
//! Otherwise the token moves into its BTI's quarantine with the mapping left
//! in place, so a driver that dies mid-transfer cannot pull memory out from
//! under a device still doing DMA to it.

use crate::bti::BtiDispatcher;
use crate::dispatcher::{Dispatcher, ObjType};
use crate::kref::KernelRef;
use crate::rights::Rights;
use crate::signals::Signals;
use crate::solo::{SoloDispatcher, SoloKind};
use crate::vm::PinnedVmObject;
use crate::{config, ObjectError, Result};
use kobject_platform::{DevVaddr, Iommu, IommuMapping, IommuPerms, PlatformError};

pub struct PmtKind {
    bti: KernelRef<BtiDispatcher>,
    pinned: PinnedVmObject,
    perms: IommuPerms,
}

/// Device-contiguous run of a mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Extent {
    addr: DevVaddr,
    len: usize,
}

pub struct PmtState {
    extents: Vec<Extent>,
    mapped: bool,
    unpinned: bool,
}

impl SoloKind for PmtKind {
    type State = PmtState;

    const TYPE: ObjType = ObjType::Pmt;
    const DEFAULT_RIGHTS: Rights = Rights::INSPECT;

    fn on_zero_handles(this: &KernelRef<PmtDispatcher>) {
        if this.lock().inner.unpinned {
            this.unmap();
        } else {
            this.kind().bti.quarantine(this.clone());
        }
    }

    fn on_destroy(&self, state: &mut PmtState) {
        if state.mapped {
            state.mapped = false;
            self.unmap_extents(&state.extents);
        }
        self.bti.untrack_pmt();
    }
}

impl PmtKind {
    fn iommu(&self) -> &dyn Iommu {
        self.bti.iommu().as_ref()
    }

    /// Map the pinned window, recording an extent per contiguity run
    fn map_into_iommu(&self) -> Result<Vec<Extent>> {
        let iommu = self.iommu();
        let bti_id = self.bti.bti_id();
        let page = config::limits().page_size;
        let min_contig = iommu.minimum_contiguity(bti_id).max(page);
        let size = self.pinned.size();
        let offset = self.pinned.offset();
        let pages = self.pinned.vmo().pages();

        let mut extents = Vec::new();
        extents
            .try_reserve_exact(size.div_ceil(min_contig))
            .map_err(|_| ObjectError::NoMemory)?;

        let result = if self.pinned.vmo().is_contiguous() {
            iommu
                .map_contiguous(bti_id, pages, offset as u64, size, self.perms)
                .map(|mapping| push_extents(&mut extents, mapping, min_contig))
        } else {
            let mut done = 0;
            loop {
                if done >= size {
                    break Ok(());
                }
                let mapped = iommu.map(
                    bti_id,
                    pages,
                    (offset + done) as u64,
                    size - done,
                    self.perms,
                );
                match mapped {
                    Ok(mapping) if mapping.len == 0 => break Err(PlatformError::NoResources),
                    Ok(mapping) => {
                        let mapping = IommuMapping {
                            addr: mapping.addr,
                            len: mapping.len.min(size - done),
                        };
                        push_extents(&mut extents, mapping, min_contig);
                        done += mapping.len;
                    }
                    Err(e) => break Err(e),
                }
            }
        };

        if let Err(e) = result {
            self.unmap_extents(&extents);
            return Err(e.into());
        }
        Ok(extents)
    }

    fn unmap_extents(&self, extents: &[Extent]) {
        let bti_id = self.bti.bti_id();
        for extent in extents {
            if let Err(e) = self.iommu().unmap(bti_id, extent.addr, extent.len) {
                log::warn!(
                    "bti {}: unmap of {:#x}+{:#x} failed: {}",
                    bti_id,
                    extent.addr,
                    extent.len,
                    e
                );
            }
        }
    }
}

fn push_extents(extents: &mut Vec<Extent>, mapping: IommuMapping, min_contig: usize) {
    let mut done = 0;
    while done < mapping.len {
        let len = min_contig.min(mapping.len - done);
        extents.push(Extent {
            addr: mapping.addr + done as u64,
            len,
        });
        done += len;
    }
}

pub type PmtDispatcher = SoloDispatcher<PmtKind>;

impl SoloDispatcher<PmtKind> {
    /// Map `pinned` through `bti`; use [`BtiDispatcher::pin`]
    pub(crate) fn create(
        bti: KernelRef<BtiDispatcher>,
        pinned: PinnedVmObject,
        perms: IommuPerms,
    ) -> Result<(KernelRef<PmtDispatcher>, Rights)> {
        bti.track_pmt()?;
        let kind = PmtKind { bti, pinned, perms };
        let extents = match kind.map_into_iommu() {
            Ok(extents) => extents,
            Err(e) => {
                kind.bti.untrack_pmt();
                return Err(e);
            }
        };
        let state = PmtState {
            extents,
            mapped: true,
            unpinned: false,
        };
        let pmt = SoloDispatcher::publish(kind, state, Signals::empty());
        log::debug!(
            "pmt {} pinned {} bytes through bti {}",
            pmt.get_koid(),
            pmt.size(),
            pmt.kind().bti.get_koid()
        );
        Ok((pmt, PmtKind::DEFAULT_RIGHTS))
    }

    pub fn size(&self) -> usize {
        self.kind().pinned.size()
    }

    pub fn perms(&self) -> IommuPerms {
        self.kind().perms
    }

    pub fn is_mapped(&self) -> bool {
        self.lock().inner.mapped
    }

    pub fn extent_count(&self) -> usize {
        self.lock().inner.extents.len()
    }

    /// Let the next close unmap instead of quarantining
    pub fn mark_unpinned(&self) {
        self.lock().inner.unpinned = true;
    }

    /// Write the device addresses of the pinned window into `out`
    ///
    /// * `compress`: one address per extent
    /// * `contiguous`: a single address, only for contiguous VMOs
    /// * neither: one address per page
    ///
    /// # Errors
    /// `InvalidArgs` when `out` has the wrong length for the requested form,
    /// `BadState` once the mapping is gone.
    pub fn encode_addrs(&self, compress: bool, contiguous: bool, out: &mut [DevVaddr]) -> Result<()> {
        if compress && contiguous {
            return Err(ObjectError::InvalidArgs);
        }
        let locked = self.lock();
        let extents = &locked.inner.extents;
        if !locked.inner.mapped || extents.is_empty() {
            return Err(ObjectError::BadState);
        }

        if compress {
            if out.len() != extents.len() {
                return Err(ObjectError::InvalidArgs);
            }
            for (slot, extent) in out.iter_mut().zip(extents) {
                *slot = extent.addr;
            }
        } else if contiguous {
            if out.len() != 1 || !self.kind().pinned.vmo().is_contiguous() {
                return Err(ObjectError::InvalidArgs);
            }
            out[0] = extents[0].addr;
        } else {
            let page = config::limits().page_size;
            if out.len() != self.size() / page {
                return Err(ObjectError::InvalidArgs);
            }
            let addrs = extents.iter().flat_map(|extent| {
                (0..extent.len)
                    .step_by(page)
                    .map(move |off| extent.addr + off as u64)
            });
            for (slot, addr) in out.iter_mut().zip(addrs) {
                *slot = addr;
            }
        }
        Ok(())
    }

    /// Remove the device mapping now
    pub fn unmap(&self) {
        let extents = {
            let mut locked = self.lock();
            if !locked.inner.mapped {
                return;
            }
            locked.inner.mapped = false;
            core::mem::take(&mut locked.inner.extents)
        };
        self.kind().unmap_extents(&extents);
        log::debug!("pmt {} unmapped", self.get_koid());
    }
}
