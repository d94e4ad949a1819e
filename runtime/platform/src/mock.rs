//! Mock hardware for host-side development and tests
//!
//! Both mocks record every call so tests can assert on what a kernel object
//! asked the hardware to do. Interrupts are delivered by calling
//! [`MockInterruptController::fire`] from the test thread.

use crate::interrupt::{CpuMask, InterruptController, IrqEoi, IrqHandler, Polarity, TriggerMode};
use crate::iommu::{DevVaddr, Iommu, IommuMapping, IommuPerms, PAGE_SIZE};
use crate::{PlatformError, Result};
use spin::Mutex;
use std::collections::{BTreeMap, BTreeSet};

/// Number of vectors the mock controller accepts
pub const MOCK_VECTOR_COUNT: u32 = 1024;

#[derive(Default)]
struct IrqTable {
    handlers: BTreeMap<u32, IrqHandler>,
    masked: BTreeSet<u32>,
    configs: BTreeMap<u32, (TriggerMode, Polarity)>,
    ipis: Vec<CpuMask>,
    eois: Vec<(u32, IrqEoi)>,
    /// Vectors whose next unregister fails
    refuse_unregister: BTreeSet<u32>,
}

/// Software interrupt controller
pub struct MockInterruptController {
    table: Mutex<IrqTable>,
    remap_offset: u32,
}

impl MockInterruptController {
    pub fn new() -> Self {
        Self::with_remap(0)
    }

    /// Controller that shifts every vector by `remap_offset` on remap
    pub fn with_remap(remap_offset: u32) -> Self {
        Self {
            table: Mutex::new(IrqTable::default()),
            remap_offset,
        }
    }

    /// Deliver an interrupt on `vector`
    ///
    /// # Returns
    /// How the handler asked the interrupt to complete, or `None` if the
    /// vector is masked or has no handler.
    pub fn fire(&self, vector: u32) -> Option<IrqEoi> {
        let handler = {
            let table = self.table.lock();
            if table.masked.contains(&vector) {
                return None;
            }
            table.handlers.get(&vector).cloned()?
        };
        // Handlers may call back into mask/unmask, so run outside the table lock.
        let eoi = handler();
        self.table.lock().eois.push((vector, eoi));
        Some(eoi)
    }

    pub fn has_handler(&self, vector: u32) -> bool {
        self.table.lock().handlers.contains_key(&vector)
    }

    pub fn is_masked(&self, vector: u32) -> bool {
        self.table.lock().masked.contains(&vector)
    }

    pub fn config_of(&self, vector: u32) -> Option<(TriggerMode, Polarity)> {
        self.table.lock().configs.get(&vector).copied()
    }

    /// Every IPI mask sent so far, oldest first
    pub fn ipis(&self) -> Vec<CpuMask> {
        self.table.lock().ipis.clone()
    }

    /// Make the next attempt to remove `vector`'s handler fail
    pub fn refuse_unregister(&self, vector: u32) {
        self.table.lock().refuse_unregister.insert(vector);
    }

    /// Every completed interrupt, oldest first
    pub fn eois(&self) -> Vec<(u32, IrqEoi)> {
        self.table.lock().eois.clone()
    }
}

impl Default for MockInterruptController {
    fn default() -> Self {
        Self::new()
    }
}

impl InterruptController for MockInterruptController {
    fn is_valid(&self, vector: u32) -> bool {
        vector < MOCK_VECTOR_COUNT
    }

    fn remap(&self, vector: u32) -> u32 {
        vector + self.remap_offset
    }

    fn configure(&self, vector: u32, mode: TriggerMode, polarity: Polarity) -> Result<()> {
        if !self.is_valid(vector) {
            return Err(PlatformError::InvalidVector { vector });
        }
        self.table.lock().configs.insert(vector, (mode, polarity));
        Ok(())
    }

    fn register_handler(&self, vector: u32, handler: Option<IrqHandler>) -> Result<()> {
        if !self.is_valid(vector) {
            return Err(PlatformError::InvalidVector { vector });
        }
        let mut table = self.table.lock();
        match handler {
            Some(h) => {
                if table.handlers.contains_key(&vector) {
                    return Err(PlatformError::VectorBound { vector });
                }
                table.handlers.insert(vector, h);
            }
            None => {
                if table.refuse_unregister.remove(&vector) {
                    return Err(PlatformError::InvalidVector { vector });
                }
                table.handlers.remove(&vector);
            }
        }
        Ok(())
    }

    fn mask(&self, vector: u32) {
        self.table.lock().masked.insert(vector);
    }

    fn unmask(&self, vector: u32) {
        self.table.lock().masked.remove(&vector);
    }

    fn send_ipi(&self, mask: CpuMask) {
        log::debug!("mock ipi to cpus {:#x}", mask);
        self.table.lock().ipis.push(mask);
    }
}

struct IommuState {
    /// Mapped device pages, keyed by page address, valued by owning BTI
    pages: BTreeMap<DevVaddr, u64>,
    next_addr: DevVaddr,
    fail_after: Option<usize>,
    map_calls: usize,
}

/// Software IOMMU handing out device addresses from a bump allocator
///
/// Mappings are tracked page by page, so any page-aligned sub-range of an
/// earlier mapping can be unmapped on its own.
pub struct MockIommu {
    state: Mutex<IommuState>,
    min_contig: usize,
    max_chunk: usize,
}

impl MockIommu {
    /// Base of the device address space the mock hands out
    pub const DEV_BASE: DevVaddr = 0x1_0000_0000;

    /// # Arguments
    /// * `min_contig` - Value reported by `minimum_contiguity`
    /// * `max_chunk` - Largest run a single `map` call will cover
    pub fn new(min_contig: usize, max_chunk: usize) -> Self {
        Self {
            state: Mutex::new(IommuState {
                pages: BTreeMap::new(),
                next_addr: Self::DEV_BASE,
                fail_after: None,
                map_calls: 0,
            }),
            min_contig,
            max_chunk: max_chunk.max(PAGE_SIZE),
        }
    }

    /// Let the next `calls` map calls succeed, then fail every one after
    pub fn fail_after(&self, calls: usize) {
        let mut state = self.state.lock();
        state.fail_after = Some(state.map_calls + calls);
    }

    pub fn is_mapped(&self, addr: DevVaddr) -> bool {
        let page = addr - addr % PAGE_SIZE as u64;
        self.state.lock().pages.contains_key(&page)
    }

    /// Number of device pages currently mapped, across all BTIs
    pub fn mapped_pages(&self) -> usize {
        self.state.lock().pages.len()
    }

    /// Bytes currently mapped for `bti_id`
    pub fn mapped_bytes(&self, bti_id: u64) -> usize {
        self.state
            .lock()
            .pages
            .values()
            .filter(|owner| **owner == bti_id)
            .count()
            * PAGE_SIZE
    }

    fn check_range(pages: &[u64], offset: u64, len: usize) -> Result<()> {
        let end = offset as usize + len;
        if len == 0
            || offset as usize % PAGE_SIZE != 0
            || len % PAGE_SIZE != 0
            || end > pages.len() * PAGE_SIZE
        {
            return Err(PlatformError::MapRejected { offset, len });
        }
        Ok(())
    }

    fn insert(&self, bti_id: u64, len: usize) -> Result<IommuMapping> {
        let mut state = self.state.lock();
        if state.fail_after.is_some_and(|n| state.map_calls >= n) {
            return Err(PlatformError::NoResources);
        }
        state.map_calls += 1;
        let addr = state.next_addr;
        state.next_addr += len as u64;
        for page in (addr..addr + len as u64).step_by(PAGE_SIZE) {
            state.pages.insert(page, bti_id);
        }
        Ok(IommuMapping { addr, len })
    }
}

impl Iommu for MockIommu {
    fn map(
        &self,
        bti_id: u64,
        pages: &[u64],
        offset: u64,
        len: usize,
        _perms: IommuPerms,
    ) -> Result<IommuMapping> {
        Self::check_range(pages, offset, len)?;
        self.insert(bti_id, len.min(self.max_chunk))
    }

    fn map_contiguous(
        &self,
        bti_id: u64,
        pages: &[u64],
        offset: u64,
        len: usize,
        _perms: IommuPerms,
    ) -> Result<IommuMapping> {
        Self::check_range(pages, offset, len)?;
        self.insert(bti_id, len)
    }

    fn unmap(&self, bti_id: u64, addr: DevVaddr, len: usize) -> Result<()> {
        let mut state = self.state.lock();
        let end = addr + len as u64;
        let all_present = (addr..end)
            .step_by(PAGE_SIZE)
            .all(|page| state.pages.get(&page) == Some(&bti_id));
        if len == 0 || !all_present {
            return Err(PlatformError::NotMapped { addr });
        }
        for page in (addr..end).step_by(PAGE_SIZE) {
            state.pages.remove(&page);
        }
        Ok(())
    }

    fn minimum_contiguity(&self, _bti_id: u64) -> usize {
        self.min_contig
    }
}
