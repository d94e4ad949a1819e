//! Interrupt events
//!
//! An interrupt event turns a hardware vector into `SIGNALED`. While no vCPU
//! is bound, the controller runs a simple handler that raises the signal
//! (and masks level-triggered lines until [`ack`](InterruptEventDispatcher::ack)).
//! Binding the first vCPU swaps in a fan-out handler that forwards the
//! interrupt to every bound vCPU and kicks the CPUs they run on.
//!
//! ```text
//! Waiting --irq--> Triggered --ack--> Waiting
//! Waiting --bind_vcpu--> VcpuBound
//! any --destroy / last handle--> Destroyed
//! ```

use crate::dispatcher::{Dispatcher, ObjType};
use crate::kref::KernelRef;
use crate::rights::Rights;
use crate::signals::Signals;
use crate::solo::{SoloDispatcher, SoloKind};
use crate::state::Deferred;
use crate::vcpu::VcpuDispatcher;
use crate::{ObjectError, Result};
use kobject_platform::{
    CpuMask, InterruptController, IrqEoi, IrqHandler, PlatformError, Polarity, TriggerMode,
};
use std::sync::{Arc, Weak};

/// Translate the vector through [`InterruptController::remap`] first
pub const REMAP_IRQ: u32 = 0x1;
pub const MODE_MASK: u32 = 0xE;
/// Leave the controller's trigger configuration alone
pub const MODE_DEFAULT: u32 = 0x0;
pub const MODE_EDGE_LOW: u32 = 0x2;
pub const MODE_EDGE_HIGH: u32 = 0x4;
pub const MODE_LEVEL_LOW: u32 = 0x6;
pub const MODE_LEVEL_HIGH: u32 = 0x8;
/// Virtual interrupts are not backed by a vector and are not supported here
pub const VIRTUAL: u32 = 0x10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptStatus {
    Waiting,
    /// Fired and not yet acknowledged
    Triggered,
    VcpuBound,
    Destroyed,
}

pub struct InterruptKind {
    controller: Arc<dyn InterruptController>,
    vector: u32,
    /// Level-triggered lines stay masked from delivery until ack
    level: bool,
}

pub struct InterruptState {
    status: InterruptStatus,
    vcpus: Vec<KernelRef<VcpuDispatcher>>,
    this: Weak<InterruptEventDispatcher>,
}

impl SoloKind for InterruptKind {
    type State = InterruptState;

    const TYPE: ObjType = ObjType::Interrupt;
    const DEFAULT_RIGHTS: Rights = Rights::BASIC.union(Rights::IO).union(Rights::SIGNAL);

    fn on_zero_handles(this: &KernelRef<InterruptEventDispatcher>) {
        this.destroy();
    }

    fn on_destroy(&self, state: &mut InterruptState) {
        if state.status != InterruptStatus::Destroyed {
            self.controller.mask(self.vector);
            if let Err(e) = self.controller.register_handler(self.vector, None) {
                log::warn!("interrupt vector {}: unregister failed: {}", self.vector, e);
            }
        }
    }
}

pub type InterruptEventDispatcher = SoloDispatcher<InterruptKind>;

fn trigger_for(mode: u32) -> Result<Option<(TriggerMode, Polarity)>> {
    Ok(match mode {
        MODE_DEFAULT => None,
        MODE_EDGE_LOW => Some((TriggerMode::Edge, Polarity::ActiveLow)),
        MODE_EDGE_HIGH => Some((TriggerMode::Edge, Polarity::ActiveHigh)),
        MODE_LEVEL_LOW => Some((TriggerMode::Level, Polarity::ActiveLow)),
        MODE_LEVEL_HIGH => Some((TriggerMode::Level, Polarity::ActiveHigh)),
        _ => return Err(ObjectError::InvalidArgs),
    })
}

fn simple_handler(irq: Weak<InterruptEventDispatcher>) -> IrqHandler {
    Arc::new(move || {
        if let Some(irq) = KernelRef::upgrade(&irq) {
            irq.on_interrupt();
        }
        IrqEoi::Deactivate
    })
}

fn vcpu_handler(irq: Weak<InterruptEventDispatcher>) -> IrqHandler {
    Arc::new(move || {
        if let Some(irq) = KernelRef::upgrade(&irq) {
            irq.on_vcpu_interrupt();
        }
        // The guest deactivates the line itself.
        IrqEoi::PriorityDrop
    })
}

impl SoloDispatcher<InterruptKind> {
    /// Bind hardware `vector` to a new interrupt event
    ///
    /// # Arguments
    /// * `controller` - Controller that owns the vector
    /// * `vector` - Vector to bind, remapped first with [`REMAP_IRQ`]
    /// * `options` - [`REMAP_IRQ`] and one of the `MODE_*` values
    ///
    /// # Errors
    /// `InvalidArgs` for bad options or an invalid vector, `AlreadyBound`
    /// if something else owns the vector.
    pub fn create(
        controller: Arc<dyn InterruptController>,
        vector: u32,
        options: u32,
    ) -> Result<(KernelRef<InterruptEventDispatcher>, Rights)> {
        if options & VIRTUAL != 0 || options & !(REMAP_IRQ | MODE_MASK) != 0 {
            return Err(ObjectError::InvalidArgs);
        }
        let trigger = trigger_for(options & MODE_MASK)?;
        let vector = if options & REMAP_IRQ != 0 {
            controller.remap(vector)
        } else {
            vector
        };
        if !controller.is_valid(vector) {
            return Err(ObjectError::InvalidArgs);
        }
        if let Some((mode, polarity)) = trigger {
            controller.configure(vector, mode, polarity)?;
        }

        let kind = InterruptKind {
            controller,
            vector,
            level: matches!(trigger, Some((TriggerMode::Level, _))),
        };
        let state = InterruptState {
            status: InterruptStatus::Waiting,
            vcpus: Vec::new(),
            this: Weak::new(),
        };
        let irq = SoloDispatcher::publish(kind, state, Signals::empty());
        let weak = KernelRef::downgrade(&irq);
        irq.lock().inner.this = weak.clone();

        let controller = &irq.kind().controller;
        if let Err(e) = controller.register_handler(vector, Some(simple_handler(weak))) {
            // Not ours to unregister on the way out.
            irq.lock().inner.status = InterruptStatus::Destroyed;
            return Err(match e {
                PlatformError::VectorBound { .. } => ObjectError::AlreadyBound,
                other => other.into(),
            });
        }
        controller.unmask(vector);
        log::debug!("interrupt {} bound to vector {}", irq.get_koid(), vector);
        Ok((irq, InterruptKind::DEFAULT_RIGHTS))
    }

    pub fn vector(&self) -> u32 {
        self.kind().vector
    }

    pub fn state(&self) -> InterruptStatus {
        self.lock().inner.status
    }

    fn on_interrupt(&self) {
        let kind = self.kind();
        let mut deferred = Deferred::new();
        let mut locked = self.lock();
        if locked.inner.status == InterruptStatus::Destroyed
            || locked.inner.status == InterruptStatus::VcpuBound
        {
            return;
        }
        if kind.level {
            kind.controller.mask(kind.vector);
        }
        locked.inner.status = InterruptStatus::Triggered;
        locked
            .state
            .update_state_locked(Signals::empty(), Signals::SIGNALED, &mut deferred);
    }

    fn on_vcpu_interrupt(&self) {
        let kind = self.kind();
        let mask: CpuMask = {
            let locked = self.lock();
            if locked.inner.status != InterruptStatus::VcpuBound {
                return;
            }
            locked
                .inner
                .vcpus
                .iter()
                .fold(0, |mask, vcpu| mask | vcpu.physical_interrupt(kind.vector))
        };
        if mask != 0 {
            kind.controller.send_ipi(mask);
        }
    }

    /// Acknowledge a delivered interrupt and re-arm the vector
    ///
    /// # Errors
    /// `Canceled` after destroy, `BadState` while vCPUs are bound.
    pub fn ack(&self) -> Result<()> {
        let kind = self.kind();
        let mut deferred = Deferred::new();
        let mut locked = self.lock();
        match locked.inner.status {
            InterruptStatus::Destroyed => return Err(ObjectError::Canceled),
            InterruptStatus::VcpuBound => return Err(ObjectError::BadState),
            InterruptStatus::Waiting | InterruptStatus::Triggered => {}
        }
        let was_triggered = locked.inner.status == InterruptStatus::Triggered;
        locked.inner.status = InterruptStatus::Waiting;
        locked
            .state
            .update_state_locked(Signals::SIGNALED, Signals::empty(), &mut deferred);
        if kind.level && was_triggered {
            kind.controller.unmask(kind.vector);
        }
        Ok(())
    }

    /// Release the vector for good
    ///
    /// Idempotent. Bound vCPUs are dropped once the lock is released.
    pub fn destroy(&self) {
        let kind = self.kind();
        let mut deferred = Deferred::new();
        let mut locked = self.lock();
        if locked.inner.status == InterruptStatus::Destroyed {
            return;
        }
        kind.controller.mask(kind.vector);
        if let Err(e) = kind.controller.register_handler(kind.vector, None) {
            log::warn!("interrupt vector {}: unregister failed: {}", kind.vector, e);
        }
        locked.inner.status = InterruptStatus::Destroyed;
        deferred.defer_drop(core::mem::take(&mut locked.inner.vcpus));
        locked
            .state
            .update_state_locked(Signals::SIGNALED, Signals::empty(), &mut deferred);
        log::debug!("interrupt {} destroyed", self.get_koid());
    }

    /// Forward this vector to `vcpu`
    ///
    /// All bound vCPUs must belong to the same guest. The first binding
    /// replaces the signalling handler with the forwarding one.
    ///
    /// # Errors
    /// `Canceled` after destroy, `BadState` while an interrupt awaits ack,
    /// `InvalidArgs` for a vCPU of another guest.
    pub fn bind_vcpu(&self, vcpu: &KernelRef<VcpuDispatcher>) -> Result<()> {
        let kind = self.kind();
        let mut locked = self.lock();
        match locked.inner.status {
            InterruptStatus::Destroyed => return Err(ObjectError::Canceled),
            InterruptStatus::Triggered => return Err(ObjectError::BadState),
            InterruptStatus::Waiting | InterruptStatus::VcpuBound => {}
        }
        let inner = &mut locked.inner;
        if inner.vcpus.iter().any(|bound| KernelRef::ptr_eq(bound, vcpu)) {
            return Ok(());
        }
        if let Some(first) = inner.vcpus.first() {
            if first.guest_koid() != vcpu.guest_koid() {
                return Err(ObjectError::InvalidArgs);
            }
        }
        inner
            .vcpus
            .try_reserve(1)
            .map_err(|_| ObjectError::NoMemory)?;

        if inner.vcpus.is_empty() {
            kind.controller.mask(kind.vector);
            // While the simple handler is still installed there is nothing
            // to restore; after removing it, put it back on failure.
            let swapped = kind
                .controller
                .register_handler(kind.vector, None)
                .and_then(|()| {
                    kind.controller
                        .register_handler(kind.vector, Some(vcpu_handler(inner.this.clone())))
                        .inspect_err(|_| {
                            let restored = kind.controller.register_handler(
                                kind.vector,
                                Some(simple_handler(inner.this.clone())),
                            );
                            if restored.is_err() {
                                log::warn!(
                                    "interrupt vector {}: handler lost during bind",
                                    kind.vector
                                );
                            }
                        })
                });
            kind.controller.unmask(kind.vector);
            swapped?;
            log::debug!(
                "interrupt {} forwarding vector {} to guest {}",
                self.get_koid(),
                kind.vector,
                vcpu.guest_koid()
            );
        }
        inner.vcpus.push(vcpu.clone());
        inner.status = InterruptStatus::VcpuBound;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vcpu::GuestDispatcher;
    use kobject_platform::mock::MockInterruptController;

    fn controller() -> Arc<MockInterruptController> {
        Arc::new(MockInterruptController::new())
    }

    #[test]
    fn test_create_validates_options() {
        let ctl = controller();
        for options in [VIRTUAL, 0x20, MODE_MASK] {
            assert_eq!(
                InterruptEventDispatcher::create(ctl.clone(), 10, options).err(),
                Some(ObjectError::InvalidArgs)
            );
        }
        assert_eq!(
            InterruptEventDispatcher::create(ctl.clone(), 5000, 0).err(),
            Some(ObjectError::InvalidArgs)
        );
        assert!(!ctl.has_handler(10));
    }

    #[test]
    fn test_vector_is_exclusive() {
        let ctl = controller();
        let (_irq, _) = InterruptEventDispatcher::create(ctl.clone(), 12, 0).unwrap();
        assert_eq!(
            InterruptEventDispatcher::create(ctl.clone(), 12, 0).err(),
            Some(ObjectError::AlreadyBound)
        );
        // The failed attempt must not have removed the first handler
        assert!(ctl.has_handler(12));
    }

    #[test]
    fn test_level_interrupt_masks_until_ack() {
        let ctl = controller();
        let (irq, _) =
            InterruptEventDispatcher::create(ctl.clone(), 20, MODE_LEVEL_HIGH).unwrap();
        assert_eq!(
            ctl.config_of(20),
            Some((TriggerMode::Level, Polarity::ActiveHigh))
        );
        assert!(!ctl.is_masked(20));

        assert_eq!(ctl.fire(20), Some(IrqEoi::Deactivate));
        assert_eq!(irq.state(), InterruptStatus::Triggered);
        assert!(irq.signals().contains(Signals::SIGNALED));
        assert!(ctl.is_masked(20));

        irq.ack().unwrap();
        assert_eq!(irq.state(), InterruptStatus::Waiting);
        assert!(!irq.signals().contains(Signals::SIGNALED));
        assert!(!ctl.is_masked(20));
    }

    #[test]
    fn test_destroy_is_terminal() {
        let ctl = controller();
        let (irq, _) = InterruptEventDispatcher::create(ctl.clone(), 30, 0).unwrap();
        irq.destroy();
        irq.destroy();
        assert_eq!(irq.state(), InterruptStatus::Destroyed);
        assert!(!ctl.has_handler(30));
        assert_eq!(irq.ack(), Err(ObjectError::Canceled));

        let (guest, _) = GuestDispatcher::create(0).unwrap();
        let (vcpu, _) = VcpuDispatcher::create(&guest).unwrap();
        assert_eq!(irq.bind_vcpu(&vcpu), Err(ObjectError::Canceled));
    }

    #[test]
    fn test_dropping_unregisters() {
        let ctl = controller();
        let (irq, _) = InterruptEventDispatcher::create(ctl.clone(), 31, 0).unwrap();
        drop(irq);
        assert!(!ctl.has_handler(31));
        assert!(ctl.is_masked(31));
    }

    #[test]
    fn test_bind_vcpu_rules() {
        let ctl = controller();
        let (irq, _) = InterruptEventDispatcher::create(ctl.clone(), 40, 0).unwrap();
        let (guest_a, _) = GuestDispatcher::create(0).unwrap();
        let (guest_b, _) = GuestDispatcher::create(0).unwrap();
        let (vcpu_a, _) = VcpuDispatcher::create(&guest_a).unwrap();
        let (vcpu_a2, _) = VcpuDispatcher::create(&guest_a).unwrap();
        let (vcpu_b, _) = VcpuDispatcher::create(&guest_b).unwrap();

        irq.bind_vcpu(&vcpu_a).unwrap();
        irq.bind_vcpu(&vcpu_a).unwrap();
        irq.bind_vcpu(&vcpu_a2).unwrap();
        assert_eq!(irq.bind_vcpu(&vcpu_b), Err(ObjectError::InvalidArgs));
        assert_eq!(irq.state(), InterruptStatus::VcpuBound);
        assert_eq!(irq.ack(), Err(ObjectError::BadState));

        vcpu_a.set_running_cpu(Some(1)).unwrap();
        vcpu_a2.set_running_cpu(Some(4)).unwrap();
        assert_eq!(ctl.fire(40), Some(IrqEoi::PriorityDrop));
        assert_eq!(ctl.ipis(), vec![(1 << 1) | (1 << 4)]);
        assert_eq!(vcpu_a.take_pending(), vec![40]);
        assert!(!irq.signals().contains(Signals::SIGNALED));
    }

    #[test]
    fn test_failed_handler_swap_keeps_vector_live() {
        let ctl = controller();
        let (irq, _) = InterruptEventDispatcher::create(ctl.clone(), 42, 0).unwrap();
        let (guest, _) = GuestDispatcher::create(0).unwrap();
        let (vcpu, _) = VcpuDispatcher::create(&guest).unwrap();

        ctl.refuse_unregister(42);
        assert!(matches!(
            irq.bind_vcpu(&vcpu),
            Err(ObjectError::Platform(_))
        ));
        assert_eq!(irq.state(), InterruptStatus::Waiting);
        assert!(!ctl.is_masked(42));
        assert!(ctl.has_handler(42));

        // Still delivering through the simple handler
        assert_eq!(ctl.fire(42), Some(IrqEoi::Deactivate));
        assert!(irq.signals().contains(Signals::SIGNALED));
        assert_eq!(vcpu.take_pending(), Vec::<u32>::new());
    }

    #[test]
    fn test_bind_rejected_while_triggered() {
        let ctl = controller();
        let (irq, _) = InterruptEventDispatcher::create(ctl.clone(), 41, 0).unwrap();
        let (guest, _) = GuestDispatcher::create(0).unwrap();
        let (vcpu, _) = VcpuDispatcher::create(&guest).unwrap();
        ctl.fire(41);
        assert_eq!(irq.bind_vcpu(&vcpu), Err(ObjectError::BadState));
    }
}
