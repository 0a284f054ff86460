//! Platform-Level Interrupt Controller.
//!
//! Fans the external interrupt line of a hart out to up to `N - 1` platform
//! sources (source 0 means "nothing pending"). Each delivery claims one
//! source, runs its handler and completes it.

use core::cell::RefCell;

use critical_section::Mutex;

use super::{Command, Dispatch, InterruptController};
use crate::cause::EXTERNAL_CODE;
use crate::error::{Error, Result};
use crate::table::{InterruptHandler, InterruptTable};

const PRIORITY_BASE: usize = 0x0000;
const ENABLE_BASE: usize = 0x2000;
const ENABLE_STRIDE: usize = 0x80;
const CONTEXT_BASE: usize = 0x20_0000;
const CONTEXT_STRIDE: usize = 0x1000;

/// PLIC register access for one target context.
pub trait PlicRegs: Sync {
    fn set_threshold(&self, threshold: u32);

    fn set_priority(&self, source: usize, priority: u32);

    fn set_enabled(&self, source: usize, enabled: bool);

    /// Claim the highest-priority pending source, `0` if none.
    fn claim(&self) -> usize;

    fn complete(&self, source: usize);
}

impl<T: PlicRegs + ?Sized> PlicRegs for &T {
    fn set_threshold(&self, threshold: u32) {
        (**self).set_threshold(threshold)
    }

    fn set_priority(&self, source: usize, priority: u32) {
        (**self).set_priority(source, priority)
    }

    fn set_enabled(&self, source: usize, enabled: bool) {
        (**self).set_enabled(source, enabled)
    }

    fn claim(&self) -> usize {
        (**self).claim()
    }

    fn complete(&self, source: usize) {
        (**self).complete(source)
    }
}

/// Memory-mapped PLIC with the SiFive layout.
#[derive(Debug, Clone, Copy)]
pub struct PlicMmio {
    base: usize,
    context: usize,
}

impl PlicMmio {
    /// # Safety
    ///
    /// `base` must be the base of a PLIC register block that stays mapped,
    /// and `context` a target context wired to this hart.
    pub const unsafe fn new(base: usize, context: usize) -> Self {
        PlicMmio { base, context }
    }

    fn reg(&self, offset: usize) -> *mut u32 {
        (self.base + offset) as *mut u32
    }

    fn claim_complete(&self) -> *mut u32 {
        self.reg(CONTEXT_BASE + self.context * CONTEXT_STRIDE + 4)
    }
}

impl PlicRegs for PlicMmio {
    fn set_threshold(&self, threshold: u32) {
        let reg = self.reg(CONTEXT_BASE + self.context * CONTEXT_STRIDE);
        // SAFETY: offsets inside the block given to `new`.
        unsafe { core::ptr::write_volatile(reg, threshold) }
    }

    fn set_priority(&self, source: usize, priority: u32) {
        // SAFETY: offsets inside the block given to `new`.
        unsafe { core::ptr::write_volatile(self.reg(PRIORITY_BASE + source * 4), priority) }
    }

    fn set_enabled(&self, source: usize, enabled: bool) {
        let reg = self.reg(ENABLE_BASE + self.context * ENABLE_STRIDE + (source / 32) * 4);
        let bit = 1u32 << (source % 32);
        // SAFETY: offsets inside the block given to `new`. Enable words of
        // one context are only written by the hart owning that context.
        unsafe {
            let word = core::ptr::read_volatile(reg);
            let word = if enabled { word | bit } else { word & !bit };
            core::ptr::write_volatile(reg, word);
        }
    }

    fn claim(&self) -> usize {
        // SAFETY: offsets inside the block given to `new`.
        unsafe { core::ptr::read_volatile(self.claim_complete()) as usize }
    }

    fn complete(&self, source: usize) {
        // SAFETY: offsets inside the block given to `new`.
        unsafe { core::ptr::write_volatile(self.claim_complete(), source as u32) }
    }
}

#[cfg(all(feature = "andes", any(target_arch = "riscv32", target_arch = "riscv64")))]
pub use self::andes::{AndesPlic, PLIC_BASE as ANDES_PLIC_BASE};

#[cfg(all(feature = "andes", any(target_arch = "riscv32", target_arch = "riscv64")))]
mod andes {
    use andes_riscv::plic::{Plic, PlicExt};

    use super::{PlicRegs, PRIORITY_BASE};

    /// HPMicro PLIC base address (same for all series)
    pub const PLIC_BASE: usize = 0xE400_0000;

    /// Andes PLIC, target 0, driven through `andes-riscv`.
    pub struct AndesPlic {
        base: usize,
        plic: Plic,
    }

    // SAFETY: the register block is MMIO; per-target registers are only
    // touched from the owning hart.
    unsafe impl Sync for AndesPlic {}

    impl AndesPlic {
        /// # Safety
        ///
        /// `base` must be the Andes PLIC register block.
        pub unsafe fn new(base: usize) -> Self {
            AndesPlic {
                base,
                plic: Plic::from_ptr(base as *mut ()),
            }
        }

        /// Switch the PLIC into Andes vectored mode.
        pub fn set_vectored(&self, vectored: bool) {
            self.plic.feature().modify(|w| w.set_vectored(vectored));
        }
    }

    impl PlicRegs for AndesPlic {
        fn set_threshold(&self, threshold: u32) {
            self.plic.set_threshold(threshold as _);
        }

        fn set_priority(&self, source: usize, priority: u32) {
            // Priorities follow the common PLIC layout.
            let reg = (self.base + PRIORITY_BASE + source * 4) as *mut u32;
            // SAFETY: inside the block given to `new`.
            unsafe { core::ptr::write_volatile(reg, priority) }
        }

        fn set_enabled(&self, source: usize, enabled: bool) {
            let bit = 1u32 << (source % 32);
            self.plic.targetint(0).inten(source / 32).modify(|w| {
                if enabled {
                    w.0 |= bit
                } else {
                    w.0 &= !bit
                }
            });
        }

        fn claim(&self) -> usize {
            self.plic.targetconfig(0).claim().read().interrupt_id() as usize
        }

        fn complete(&self, source: usize) {
            self.plic
                .targetconfig(0)
                .claim()
                .modify(|w| w.set_interrupt_id(source as u16));
        }
    }
}

struct PlicState<const N: usize> {
    initialized: bool,
    table: InterruptTable<N>,
}

/// PLIC chained beneath the external entry of a top-level controller.
pub struct PlicController<R, const N: usize = 128> {
    regs: R,
    parent: &'static dyn InterruptController,
    parent_id: usize,
    state: Mutex<RefCell<PlicState<N>>>,
}

impl<R: PlicRegs, const N: usize> PlicController<R, N> {
    /// A PLIC feeding the machine external interrupt of `parent`.
    pub const fn new(regs: R, parent: &'static dyn InterruptController) -> Self {
        Self::with_parent_id(regs, parent, EXTERNAL_CODE)
    }

    /// A PLIC feeding an arbitrary parent source, e.g. a CLIC input.
    pub const fn with_parent_id(
        regs: R,
        parent: &'static dyn InterruptController,
        parent_id: usize,
    ) -> Self {
        PlicController {
            regs,
            parent,
            parent_id,
            state: Mutex::new(RefCell::new(PlicState {
                initialized: false,
                table: InterruptTable::new(),
            })),
        }
    }

    pub fn regs(&self) -> &R {
        &self.regs
    }

    fn validate(id: usize) -> Result<usize> {
        if id > 0 && id < N {
            Ok(id)
        } else {
            Err(Error::InvalidId(id))
        }
    }

    pub fn set_priority(&self, id: usize, priority: u32) -> Result<()> {
        let id = Self::validate(id)?;
        self.regs.set_priority(id, priority);
        Ok(())
    }
}

impl<R: PlicRegs, const N: usize> InterruptController for PlicController<R, N> {
    fn init(&self) {
        let first = critical_section::with(|cs| {
            let mut state = self.state.borrow_ref_mut(cs);
            let first = !state.initialized;
            if first {
                state.table.clear();
                state.initialized = true;
            }
            first
        });
        if !first {
            return;
        }
        self.regs.set_threshold(0);
        for source in 1..N {
            self.regs.set_enabled(source, false);
            self.regs.set_priority(source, 1);
        }
        // Drain anything claimed before we took over.
        for source in 1..N {
            self.regs.complete(source);
        }
        log::debug!("plic ready, {} sources on parent line {}", N - 1, self.parent_id);
    }

    fn register(&self, id: usize, handler: InterruptHandler, context: usize) -> Result<()> {
        let id = Self::validate(id)?;
        critical_section::with(|cs| {
            self.state
                .borrow_ref_mut(cs)
                .table
                .register(id, handler, context)
        })?;
        Ok(())
    }

    fn enable(&self, id: usize) -> Result<()> {
        let id = Self::validate(id)?;
        critical_section::with(|cs| {
            self.state.borrow_ref_mut(cs).table.enable(id)?;
            self.regs.set_enabled(id, true);
            Ok::<(), Error>(())
        })?;
        self.parent.enable(self.parent_id)
    }

    fn disable(&self, id: usize) -> Result<()> {
        let id = Self::validate(id)?;
        critical_section::with(|cs| {
            self.state.borrow_ref_mut(cs).table.disable(id)?;
            self.regs.set_enabled(id, false);
            Ok(())
        })
    }

    fn command(&self, cmd: Command) -> Result<u64> {
        match cmd {
            Command::MaxInterruptGet => Ok((N - 1) as u64),
            Command::IndexInterruptGet(index) if index + 1 < N => Ok((index + 1) as u64),
            Command::IndexInterruptGet(index) => Err(Error::InvalidId(index)),
            _ => Err(Error::Unsupported),
        }
    }

    fn handle(&self, _id: usize) -> Dispatch {
        let source = self.regs.claim();
        if source == 0 {
            log::debug!("plic: claim returned no source");
            return Dispatch::Spurious;
        }
        let entry = critical_section::with(|cs| self.state.borrow_ref(cs).table.lookup(source));
        let outcome = match entry {
            Ok(entry) => entry.dispatch(source),
            Err(_) => Dispatch::Unhandled,
        };
        self.regs.complete(source);
        if outcome == Dispatch::Disabled {
            log::warn!("plic: source {} claimed while disabled", source);
        }
        outcome
    }
}
