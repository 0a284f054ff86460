//! Core-Local Interrupt Controller (CLIC).
//!
//! Sources are gated by per-source enable bytes instead of `mie`, and each
//! one can ask for hardware vectoring through the raw vector table that
//! `mtvt` points at.

use core::cell::RefCell;

use critical_section::Mutex;

use super::{
    forward_timer_command, is_selective_vectored, Command, Dispatch, InterruptController,
    TrapMode, VectorMode,
};
use crate::cause::{is_assignable, ExceptionCode, MAX_INTERRUPTS};
use crate::error::{Error, Result};
use crate::hart::Hart;
use crate::table::{
    ExceptionHandler, ExceptionTable, InterruptHandler, InterruptTable, VectorTable,
};

const CLICINT_OFFSET: usize = 0x1000;
const CLICINTIP: usize = 0;
const CLICINTIE: usize = 1;
const CLICINTATTR: usize = 2;
const CLICINTCTL: usize = 3;

/// `clicintattr.shv`
const ATTR_SHV: u8 = 0x01;

/// Per-source CLIC registers.
pub trait ClicRegs: Sync {
    fn set_enabled(&self, id: usize, enabled: bool);

    fn set_pending(&self, id: usize, pending: bool);

    fn is_pending(&self, id: usize) -> bool;

    fn set_hardware_vectored(&self, id: usize, vectored: bool);

    fn set_level(&self, id: usize, level: u8);
}

impl<T: ClicRegs + ?Sized> ClicRegs for &T {
    fn set_enabled(&self, id: usize, enabled: bool) {
        (**self).set_enabled(id, enabled)
    }

    fn set_pending(&self, id: usize, pending: bool) {
        (**self).set_pending(id, pending)
    }

    fn is_pending(&self, id: usize) -> bool {
        (**self).is_pending(id)
    }

    fn set_hardware_vectored(&self, id: usize, vectored: bool) {
        (**self).set_hardware_vectored(id, vectored)
    }

    fn set_level(&self, id: usize, level: u8) {
        (**self).set_level(id, level)
    }
}

/// Memory-mapped CLIC with the four-byte `clicint[i]` layout.
#[derive(Debug, Clone, Copy)]
pub struct ClicMmio {
    base: usize,
}

impl ClicMmio {
    /// # Safety
    ///
    /// `base` must be the base of a CLIC register block that stays mapped.
    pub const unsafe fn new(base: usize) -> Self {
        ClicMmio { base }
    }

    fn byte(&self, id: usize, field: usize) -> *mut u8 {
        (self.base + CLICINT_OFFSET + id * 4 + field) as *mut u8
    }

    fn read(&self, id: usize, field: usize) -> u8 {
        // SAFETY: offsets inside the block given to `new`.
        unsafe { core::ptr::read_volatile(self.byte(id, field)) }
    }

    fn write(&self, id: usize, field: usize, value: u8) {
        // SAFETY: offsets inside the block given to `new`.
        unsafe { core::ptr::write_volatile(self.byte(id, field), value) }
    }
}

impl ClicRegs for ClicMmio {
    fn set_enabled(&self, id: usize, enabled: bool) {
        self.write(id, CLICINTIE, enabled as u8);
    }

    fn set_pending(&self, id: usize, pending: bool) {
        self.write(id, CLICINTIP, pending as u8);
    }

    fn is_pending(&self, id: usize) -> bool {
        self.read(id, CLICINTIP) & 1 != 0
    }

    fn set_hardware_vectored(&self, id: usize, vectored: bool) {
        let attr = self.read(id, CLICINTATTR);
        let attr = if vectored { attr | ATTR_SHV } else { attr & !ATTR_SHV };
        self.write(id, CLICINTATTR, attr);
    }

    fn set_level(&self, id: usize, level: u8) {
        self.write(id, CLICINTCTL, level);
    }
}

struct ClicState<const N: usize> {
    initialized: bool,
    interrupts: InterruptTable<N>,
    exceptions: ExceptionTable,
}

/// CLIC-mode top-level controller for one hart, managing `N` sources.
pub struct ClicController<H, R, const N: usize = MAX_INTERRUPTS> {
    hart: H,
    regs: R,
    vectored: bool,
    state: Mutex<RefCell<ClicState<N>>>,
    vectors: Mutex<RefCell<VectorTable<N>>>,
}

impl<H: Hart, R: ClicRegs, const N: usize> ClicController<H, R, N> {
    /// A controller in [`TrapMode::Clic`], where each source picks its own
    /// vectoring.
    ///
    /// `init` records the address of the vector table, so call it once the
    /// controller sits at its final location.
    pub const fn new(hart: H, regs: R) -> Self {
        ClicController {
            hart,
            regs,
            vectored: false,
            state: Mutex::new(RefCell::new(ClicState {
                initialized: false,
                interrupts: InterruptTable::new(),
                exceptions: ExceptionTable::new(),
            })),
            vectors: Mutex::new(RefCell::new(VectorTable::new())),
        }
    }

    /// Switch to [`TrapMode::ClicVectored`]: every source is hardware
    /// vectored.
    pub const fn hardware_vectored(mut self) -> Self {
        self.vectored = true;
        self
    }

    pub fn hart(&self) -> &H {
        &self.hart
    }

    pub fn regs(&self) -> &R {
        &self.regs
    }

    pub fn trap_mode(&self) -> TrapMode {
        if self.vectored {
            TrapMode::ClicVectored
        } else {
            TrapMode::Clic
        }
    }

    fn validate(id: usize) -> Result<usize> {
        if id < N && is_assignable(id) {
            Ok(id)
        } else {
            Err(Error::InvalidId(id))
        }
    }

    /// Raw vector slot currently recorded for `id`.
    pub fn vector_slot(&self, id: usize) -> Result<usize> {
        critical_section::with(|cs| self.vectors.borrow_ref(cs).get(id))
    }

    /// Set the interrupt level/priority byte of `id`.
    pub fn set_level(&self, id: usize, level: u8) -> Result<()> {
        let id = Self::validate(id)?;
        self.regs.set_level(id, level);
        Ok(())
    }

    pub fn chain(&self, id: usize, sub: &'static dyn InterruptController) -> Result<()> {
        let id = Self::validate(id)?;
        critical_section::with(|cs| self.state.borrow_ref_mut(cs).interrupts.chain(id, sub))?;
        log::trace!("hart {}: chained sub-controller on clic source {}", self.hart.id(), id);
        Ok(())
    }
}

impl<H: Hart, R: ClicRegs, const N: usize> InterruptController for ClicController<H, R, N> {
    fn init(&self) {
        let first = critical_section::with(|cs| {
            let mut state = self.state.borrow_ref_mut(cs);
            let first = !state.initialized;
            if first {
                state.interrupts.clear();
                state.exceptions.clear();
                state.initialized = true;
            }
            first
        });
        if !first {
            return;
        }
        let entry = self.hart.trap_entry();
        let base = critical_section::with(|cs| {
            let mut vectors = self.vectors.borrow_ref_mut(cs);
            vectors.fill(entry);
            vectors.base()
        });
        for id in 0..N {
            self.regs.set_enabled(id, false);
            self.regs.set_pending(id, false);
            self.regs.set_hardware_vectored(id, false);
        }
        self.hart.set_vector_table_base(base);
        self.hart.set_trap_vector(entry | self.trap_mode().bits());
        log::debug!(
            "hart {}: clic ready, {} sources, {:?} mode",
            self.hart.id(),
            N,
            self.trap_mode()
        );
    }

    fn register(&self, id: usize, handler: InterruptHandler, context: usize) -> Result<()> {
        let id = Self::validate(id)?;
        critical_section::with(|cs| {
            self.state
                .borrow_ref_mut(cs)
                .interrupts
                .register(id, handler, context)
        })?;
        Ok(())
    }

    fn enable(&self, id: usize) -> Result<()> {
        let id = Self::validate(id)?;
        critical_section::with(|cs| {
            self.state.borrow_ref_mut(cs).interrupts.enable(id)?;
            self.regs.set_enabled(id, true);
            Ok(())
        })
    }

    fn disable(&self, id: usize) -> Result<()> {
        let id = Self::validate(id)?;
        critical_section::with(|cs| {
            self.state.borrow_ref_mut(cs).interrupts.disable(id)?;
            self.regs.set_enabled(id, false);
            Ok(())
        })
    }

    fn enable_vector(&self, id: usize, mode: VectorMode) -> Result<()> {
        let id = Self::validate(id)?;
        let hardware = match mode {
            VectorMode::SelectiveVector | VectorMode::HardwareVector => true,
            VectorMode::SelectiveNonVector | VectorMode::Direct => false,
            VectorMode::Vector => return Err(Error::Unsupported),
        };
        // Selective modes only make sense while mtvec leaves the choice to
        // each source.
        let selective = is_selective_vectored(self.hart.trap_vector());
        if matches!(mode, VectorMode::SelectiveVector | VectorMode::SelectiveNonVector)
            && !selective
        {
            return Err(Error::Unsupported);
        }
        let target = if hardware {
            self.hart.vector_stub(id)
        } else {
            self.hart.trap_entry()
        };
        critical_section::with(|cs| {
            self.vectors.borrow_ref_mut(cs).set(id, target)?;
            self.regs.set_hardware_vectored(id, hardware);
            Ok(())
        })
    }

    fn disable_vector(&self, id: usize) -> Result<()> {
        let id = Self::validate(id)?;
        let entry = self.hart.trap_entry();
        critical_section::with(|cs| {
            self.vectors.borrow_ref_mut(cs).set(id, entry)?;
            self.regs.set_hardware_vectored(id, false);
            Ok(())
        })
    }

    fn command(&self, cmd: Command) -> Result<u64> {
        match cmd {
            Command::MaxInterruptGet => Ok((N - 1) as u64),
            Command::IndexInterruptGet(index) => (0..N)
                .filter(|&id| is_assignable(id))
                .nth(index)
                .map(|id| id as u64)
                .ok_or(Error::InvalidId(index)),
            cmd => forward_timer_command(self, cmd),
        }
    }

    fn is_pending(&self, id: usize) -> Result<bool> {
        let id = Self::validate(id)?;
        Ok(self.regs.is_pending(id))
    }

    fn sub_controller(&self, id: usize) -> Option<&'static dyn InterruptController> {
        critical_section::with(|cs| self.state.borrow_ref(cs).interrupts.lookup(id))
            .ok()?
            .sub_controller()
    }

    fn handle(&self, id: usize) -> Dispatch {
        let entry = critical_section::with(|cs| self.state.borrow_ref(cs).interrupts.lookup(id));
        match entry {
            Ok(entry) => entry.dispatch(id),
            Err(_) => Dispatch::Unhandled,
        }
    }

    fn exception_register(&self, code: ExceptionCode, handler: ExceptionHandler) -> Result<()> {
        critical_section::with(|cs| {
            self.state.borrow_ref_mut(cs).exceptions.register(code, handler);
        });
        Ok(())
    }

    fn handle_exception(&self, code: ExceptionCode, trap_value: usize) -> Dispatch {
        let handler = critical_section::with(|cs| self.state.borrow_ref(cs).exceptions.lookup(code));
        match handler {
            Some(handler) => {
                handler(code, trap_value);
                Dispatch::Handled
            }
            None => Dispatch::Unhandled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{counter, count_hits, leak, MockClic, MockHart, TRAP_ENTRY, VECTOR_STUBS};
    use core::sync::atomic::Ordering;

    type Clic = ClicController<MockHart, &'static MockClic, 64>;

    fn controller(mode: TrapMode) -> &'static Clic {
        let regs = leak(MockClic::new());
        let clic = Clic::new(MockHart::new(0), regs);
        let clic = leak(match mode {
            TrapMode::ClicVectored => clic.hardware_vectored(),
            _ => clic,
        });
        clic.init();
        clic
    }

    #[test]
    fn init_points_mtvec_and_mtvt() {
        let clic = controller(TrapMode::Clic);
        assert_eq!(clic.hart().trap_vector(), TRAP_ENTRY | 0x2);
        assert_ne!(clic.hart().mtvt(), 0);
        assert_eq!(clic.hart().mtvt() % 64, 0);
        assert_eq!(clic.vector_slot(20), Ok(TRAP_ENTRY));
    }

    #[test]
    fn enable_uses_clicintie_not_mie() {
        let clic = controller(TrapMode::Clic);
        fn noop(_: usize, _: usize) {}
        clic.register(40, noop, 0).unwrap();
        clic.enable(40).unwrap();
        assert!(clic.regs().enabled(40));
        assert_eq!(clic.hart().mie(), 0);
        clic.disable(40).unwrap();
        assert!(!clic.regs().enabled(40));
    }

    #[test]
    fn range_follows_source_count() {
        let clic = controller(TrapMode::Clic);
        fn noop(_: usize, _: usize) {}
        assert!(clic.register(63, noop, 0).is_ok());
        assert_eq!(clic.register(64, noop, 0), Err(Error::InvalidId(64)));
        assert_eq!(clic.register(5, noop, 0), Err(Error::InvalidId(5)));
        assert_eq!(clic.command(Command::MaxInterruptGet), Ok(63));
        assert_eq!(clic.command(Command::IndexInterruptGet(3)), Ok(16));
    }

    #[test]
    fn selective_vectoring_fills_the_raw_slot() {
        let clic = controller(TrapMode::Clic);
        clic.enable_vector(17, VectorMode::SelectiveVector).unwrap();
        assert_eq!(clic.vector_slot(17), Ok(VECTOR_STUBS + 17 * 16));
        assert!(clic.regs().hardware_vectored(17));

        clic.disable_vector(17).unwrap();
        assert_eq!(clic.vector_slot(17), Ok(TRAP_ENTRY));
        assert!(!clic.regs().hardware_vectored(17));
    }

    #[test]
    fn selective_modes_need_selective_mtvec() {
        let clic = controller(TrapMode::ClicVectored);
        assert_eq!(
            clic.enable_vector(17, VectorMode::SelectiveVector),
            Err(Error::Unsupported)
        );
        assert!(clic.enable_vector(17, VectorMode::HardwareVector).is_ok());
        assert_eq!(clic.enable_vector(17, VectorMode::Vector), Err(Error::Unsupported));
        assert_eq!(
            clic.enable_vector(64, VectorMode::HardwareVector),
            Err(Error::InvalidId(64))
        );
    }

    #[test]
    fn delivery_respects_enable_state() {
        let clic = controller(TrapMode::Clic);
        let (hits, ctx) = counter();
        clic.register(33, count_hits, ctx).unwrap();
        assert_eq!(clic.enable(2), Err(Error::InvalidId(2)));
        assert_eq!(clic.handle(33), Dispatch::Disabled);
        clic.enable(33).unwrap();
        assert_eq!(clic.handle(33), Dispatch::Handled);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(clic.handle(34), Dispatch::Unhandled);
    }

    #[test]
    fn levels_are_written_through() {
        let clic = controller(TrapMode::Clic);
        clic.set_level(20, 0xc0).unwrap();
        assert_eq!(clic.regs().level(20), 0xc0);
    }
}
