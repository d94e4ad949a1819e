//! Guests and virtual CPUs
//!
//! Only as much of the hypervisor as interrupt forwarding needs: a vCPU
//! belongs to exactly one guest, queues the vectors injected into it, and
//! knows which physical CPU (if any) it is running on.

use crate::dispatcher::{Dispatcher, ObjType};
use crate::koid::Koid;
use crate::kref::KernelRef;
use crate::rights::Rights;
use crate::signals::Signals;
use crate::solo::{SoloDispatcher, SoloKind};
use crate::{ObjectError, Result};
use kobject_platform::CpuMask;
use std::collections::BTreeSet;

pub struct GuestKind;

impl SoloKind for GuestKind {
    type State = ();

    const TYPE: ObjType = ObjType::Guest;
    const DEFAULT_RIGHTS: Rights = Rights::TRANSFER
        .union(Rights::DUPLICATE)
        .union(Rights::WRITE);
}

pub type GuestDispatcher = SoloDispatcher<GuestKind>;

impl SoloDispatcher<GuestKind> {
    pub fn create(options: u32) -> Result<(KernelRef<GuestDispatcher>, Rights)> {
        if options != 0 {
            return Err(ObjectError::InvalidArgs);
        }
        let guest = SoloDispatcher::publish(GuestKind, (), Signals::empty());
        Ok((guest, GuestKind::DEFAULT_RIGHTS))
    }
}

pub struct VcpuKind {
    guest_koid: Koid,
}

#[derive(Default)]
pub struct VcpuState {
    running_cpu: Option<u32>,
    pending: BTreeSet<u32>,
}

impl SoloKind for VcpuKind {
    type State = VcpuState;

    const TYPE: ObjType = ObjType::Vcpu;
    const DEFAULT_RIGHTS: Rights = Rights::BASIC
        .union(Rights::IO)
        .union(Rights::EXECUTE)
        .union(Rights::SIGNAL);
}

pub type VcpuDispatcher = SoloDispatcher<VcpuKind>;

impl SoloDispatcher<VcpuKind> {
    /// Create a vCPU of `guest`
    pub fn create(guest: &GuestDispatcher) -> Result<(KernelRef<VcpuDispatcher>, Rights)> {
        let kind = VcpuKind {
            guest_koid: guest.get_koid(),
        };
        let vcpu = SoloDispatcher::publish(kind, VcpuState::default(), Signals::empty());
        Ok((vcpu, VcpuKind::DEFAULT_RIGHTS))
    }

    pub fn guest_koid(&self) -> Koid {
        self.kind().guest_koid
    }

    /// Record which physical CPU runs this vCPU; `None` when descheduled
    pub fn set_running_cpu(&self, cpu: Option<u32>) -> Result<()> {
        if cpu.is_some_and(|c| c >= CpuMask::BITS) {
            return Err(ObjectError::OutOfRange);
        }
        self.lock().inner.running_cpu = cpu;
        Ok(())
    }

    pub fn running_cpu(&self) -> Option<u32> {
        self.lock().inner.running_cpu
    }

    /// Queue `vector` for injection
    ///
    /// # Returns
    /// The CPU to interrupt so the vCPU notices, or 0 when it is not
    /// running and will pick the vector up on its next entry.
    pub fn physical_interrupt(&self, vector: u32) -> CpuMask {
        let mut locked = self.lock();
        locked.inner.pending.insert(vector);
        match locked.inner.running_cpu {
            Some(cpu) => 1 << cpu,
            None => 0,
        }
    }

    /// Drain the queued vectors, lowest first
    pub fn take_pending(&self) -> Vec<u32> {
        let pending = core::mem::take(&mut self.lock().inner.pending);
        pending.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guest_is_not_waitable() {
        let (guest, rights) = GuestDispatcher::create(0).unwrap();
        assert!(!rights.contains(Rights::WAIT));
        assert!(!guest.is_waitable());
        assert_eq!(
            guest.user_signal_self(Signals::empty(), Signals::USER_0),
            Err(ObjectError::NotSupported)
        );
    }

    #[test]
    fn test_physical_interrupt_targets_running_cpu() {
        let (guest, _) = GuestDispatcher::create(0).unwrap();
        let (vcpu, _) = VcpuDispatcher::create(&guest).unwrap();
        assert_eq!(vcpu.guest_koid(), guest.get_koid());

        assert_eq!(vcpu.physical_interrupt(40), 0);
        vcpu.set_running_cpu(Some(3)).unwrap();
        assert_eq!(vcpu.physical_interrupt(41), 1 << 3);
        assert_eq!(vcpu.take_pending(), vec![40, 41]);
        assert!(vcpu.take_pending().is_empty());

        assert_eq!(vcpu.set_running_cpu(Some(64)), Err(ObjectError::OutOfRange));
    }
}
