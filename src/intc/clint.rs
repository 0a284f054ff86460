//! Core Local Interruptor: machine timer and software interrupts.
//!
//! One `Clint` value exists per hart, all of them over the same register
//! block. It sits beneath the software and timer entries of the hart's
//! top-level controller and forwards enables to it.

use core::cell::RefCell;
use core::sync::atomic::{AtomicU32, Ordering};

use critical_section::Mutex;

use super::{Command, Dispatch, InterruptController};
use crate::cause::{SOFTWARE_CODE, TIMER_CODE};
use crate::error::{Error, Result};
use crate::table::{InterruptHandler, InterruptTable};

/// SiFive-compatible CLINT base on most parts.
pub const CLINT_BASE: usize = 0x0200_0000;

const MSIP_OFFSET: usize = 0x0000;
const MTIMECMP_OFFSET: usize = 0x4000;
const MTIME_OFFSET: usize = 0xBFF8;

/// CLINT register access.
pub trait ClintRegs: Sync {
    fn mtime(&self) -> u64;

    fn set_mtimecmp(&self, hart: usize, value: u64);

    /// The MSIP word of `hart`, for atomic read-modify-write.
    fn msip(&self, hart: usize) -> &AtomicU32;
}

impl<T: ClintRegs + ?Sized> ClintRegs for &T {
    fn mtime(&self) -> u64 {
        (**self).mtime()
    }

    fn set_mtimecmp(&self, hart: usize, value: u64) {
        (**self).set_mtimecmp(hart, value)
    }

    fn msip(&self, hart: usize) -> &AtomicU32 {
        (**self).msip(hart)
    }
}

/// Memory-mapped CLINT.
#[derive(Debug, Clone, Copy)]
pub struct ClintMmio {
    base: usize,
}

impl ClintMmio {
    /// # Safety
    ///
    /// `base` must be the base of a CLINT register block that stays mapped.
    pub const unsafe fn new(base: usize) -> Self {
        ClintMmio { base }
    }

    fn reg32(&self, offset: usize) -> *mut u32 {
        (self.base + offset) as *mut u32
    }
}

impl ClintRegs for ClintMmio {
    fn mtime(&self) -> u64 {
        let lo = self.reg32(MTIME_OFFSET);
        let hi = self.reg32(MTIME_OFFSET + 4);
        // SAFETY: offsets inside the block given to `new`.
        unsafe {
            loop {
                let before = core::ptr::read_volatile(hi);
                let low = core::ptr::read_volatile(lo);
                if core::ptr::read_volatile(hi) == before {
                    return ((before as u64) << 32) | low as u64;
                }
            }
        }
    }

    fn set_mtimecmp(&self, hart: usize, value: u64) {
        let lo = self.reg32(MTIMECMP_OFFSET + hart * 8);
        let hi = self.reg32(MTIMECMP_OFFSET + hart * 8 + 4);
        // SAFETY: offsets inside the block given to `new`. The high word is
        // parked at its maximum first so no spurious match fires mid-update.
        unsafe {
            core::ptr::write_volatile(hi, u32::MAX);
            core::ptr::write_volatile(lo, value as u32);
            core::ptr::write_volatile(hi, (value >> 32) as u32);
        }
    }

    fn msip(&self, hart: usize) -> &AtomicU32 {
        // SAFETY: MSIP words are naturally aligned 32-bit registers inside
        // the block given to `new`.
        unsafe { AtomicU32::from_ptr(self.reg32(MSIP_OFFSET + hart * 4)) }
    }
}

struct ClintState {
    initialized: bool,
    table: InterruptTable,
}

/// CLINT as seen from one hart.
pub struct Clint<R> {
    regs: R,
    hart: usize,
    hart_count: usize,
    parent: &'static dyn InterruptController,
    state: Mutex<RefCell<ClintState>>,
}

impl<R: ClintRegs> Clint<R> {
    pub const fn new(
        regs: R,
        hart: usize,
        hart_count: usize,
        parent: &'static dyn InterruptController,
    ) -> Self {
        Clint {
            regs,
            hart,
            hart_count,
            parent,
            state: Mutex::new(RefCell::new(ClintState {
                initialized: false,
                table: InterruptTable::new(),
            })),
        }
    }

    pub fn regs(&self) -> &R {
        &self.regs
    }

    fn validate(id: usize) -> Result<usize> {
        match id {
            SOFTWARE_CODE | TIMER_CODE => Ok(id),
            _ => Err(Error::InvalidId(id)),
        }
    }

    fn validate_hart(&self, hart: usize) -> Result<usize> {
        if hart < self.hart_count {
            Ok(hart)
        } else {
            Err(Error::InvalidId(hart))
        }
    }
}

impl<R: ClintRegs> InterruptController for Clint<R> {
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
        self.regs.set_mtimecmp(self.hart, u64::MAX);
        self.regs.msip(self.hart).fetch_and(!1, Ordering::AcqRel);
        log::debug!("hart {}: clint ready", self.hart);
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
        critical_section::with(|cs| self.state.borrow_ref_mut(cs).table.enable(id))?;
        self.parent.enable(id)
    }

    fn disable(&self, id: usize) -> Result<()> {
        let id = Self::validate(id)?;
        critical_section::with(|cs| self.state.borrow_ref_mut(cs).table.disable(id))?;
        self.parent.disable(id)
    }

    fn command(&self, cmd: Command) -> Result<u64> {
        match cmd {
            Command::MtimeGet => Ok(self.regs.mtime()),
            Command::MtimecmpSet(value) => {
                self.regs.set_mtimecmp(self.hart, value);
                Ok(0)
            }
            Command::SoftwareIpiSet(hart) => {
                let hart = self.validate_hart(hart)?;
                self.regs.msip(hart).fetch_or(1, Ordering::AcqRel);
                log::trace!("hart {}: ipi raised on hart {}", self.hart, hart);
                Ok(0)
            }
            Command::SoftwareIpiClear(hart) => {
                let hart = self.validate_hart(hart)?;
                self.regs.msip(hart).fetch_and(!1, Ordering::AcqRel);
                Ok(0)
            }
            Command::MsipGet(hart) => {
                let hart = self.validate_hart(hart)?;
                Ok((self.regs.msip(hart).load(Ordering::Acquire) & 1) as u64)
            }
            Command::MaxInterruptGet => Ok(TIMER_CODE as u64),
            Command::IndexInterruptGet(0) => Ok(SOFTWARE_CODE as u64),
            Command::IndexInterruptGet(1) => Ok(TIMER_CODE as u64),
            Command::IndexInterruptGet(index) => Err(Error::InvalidId(index)),
        }
    }

    fn handle(&self, id: usize) -> Dispatch {
        if Self::validate(id).is_err() {
            return Dispatch::Unhandled;
        }
        let entry = critical_section::with(|cs| self.state.borrow_ref(cs).table.lookup(id));
        match entry {
            Ok(entry) => entry.dispatch(id),
            Err(_) => Dispatch::Unhandled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intc::{CoreLocalController, TrapMode};
    use crate::mock::{counter, count_hits, leak, MockClint, MockHart};
    use core::sync::atomic::Ordering;

    fn setup() -> (
        &'static CoreLocalController<MockHart>,
        &'static Clint<&'static MockClint>,
    ) {
        let regs = leak(MockClint::new());
        let intc = leak(CoreLocalController::new(MockHart::new(0), TrapMode::Direct));
        intc.init();
        let clint = leak(Clint::new(regs, 0, 2, intc));
        clint.init();
        intc.chain(SOFTWARE_CODE, clint).unwrap();
        intc.chain(TIMER_CODE, clint).unwrap();
        (intc, clint)
    }

    #[test]
    fn only_software_and_timer_are_managed() {
        let (_, clint) = setup();
        fn noop(_: usize, _: usize) {}
        assert_eq!(clint.register(11, noop, 0), Err(Error::InvalidId(11)));
        assert!(clint.register(TIMER_CODE, noop, 0).is_ok());
        assert_eq!(clint.command(Command::IndexInterruptGet(2)), Err(Error::InvalidId(2)));
    }

    #[test]
    fn enable_reaches_the_parent_mie() {
        let (intc, clint) = setup();
        let (_, ctx) = counter();
        clint.register(TIMER_CODE, count_hits, ctx).unwrap();
        clint.enable(TIMER_CODE).unwrap();
        assert_eq!(intc.hart().mie(), 1 << TIMER_CODE);
        clint.disable(TIMER_CODE).unwrap();
        assert_eq!(intc.hart().mie(), 0);
    }

    #[test]
    fn parent_delivers_to_chained_clint_first() {
        let (intc, clint) = setup();
        let (hits, ctx) = counter();
        clint.register(TIMER_CODE, count_hits, ctx).unwrap();
        clint.enable(TIMER_CODE).unwrap();
        assert_eq!(intc.handle(TIMER_CODE), Dispatch::Handled);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn parent_handler_is_fallback_when_clint_has_none() {
        let (intc, _) = setup();
        let (hits, ctx) = counter();
        intc.register(SOFTWARE_CODE, count_hits, ctx).unwrap();
        intc.enable(SOFTWARE_CODE).unwrap();
        assert_eq!(intc.handle(SOFTWARE_CODE), Dispatch::Handled);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn timer_commands_arrive_through_the_parent() {
        let (intc, clint) = setup();
        clint.regs().advance(500);
        assert_eq!(intc.command(Command::MtimeGet), Ok(500));
        intc.command(Command::MtimecmpSet(800)).unwrap();
        assert_eq!(clint.regs().mtimecmp(0), 800);
    }

    #[test]
    fn ipi_bits_are_per_hart() {
        let (intc, _) = setup();
        intc.command(Command::SoftwareIpiSet(1)).unwrap();
        assert_eq!(intc.command(Command::MsipGet(1)), Ok(1));
        assert_eq!(intc.command(Command::MsipGet(0)), Ok(0));
        intc.command(Command::SoftwareIpiClear(1)).unwrap();
        assert_eq!(intc.command(Command::MsipGet(1)), Ok(0));
        assert_eq!(intc.command(Command::SoftwareIpiSet(2)), Err(Error::InvalidId(2)));
    }

    #[test]
    fn init_parks_the_comparator() {
        let (_, clint) = setup();
        assert_eq!(clint.regs().mtimecmp(0), u64::MAX);
    }
}
