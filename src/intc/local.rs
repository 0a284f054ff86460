//! Core-local interrupt controller: `mtvec` in direct or classic vectored
//! mode, sources gated by `mie`.

use core::cell::RefCell;

use critical_section::Mutex;

use super::{forward_timer_command, Command, Dispatch, InterruptController, TrapMode};
use crate::cause::{
    interrupt_mask, is_assignable, ExceptionCode, EXTERNAL_CODE, LOCAL_BASE, MAX_INTERRUPTS,
    SOFTWARE_CODE, TIMER_CODE,
};
use crate::error::{Error, Result};
use crate::hart::Hart;
use crate::table::{ExceptionHandler, ExceptionTable, InterruptHandler, InterruptTable};

/// Every `mie` bit this controller may own.
const LOCAL_SOURCES: usize = {
    let mut mask = 0;
    let mut code = 0;
    while code < MAX_INTERRUPTS {
        if is_assignable(code) {
            mask |= interrupt_mask(code);
        }
        code += 1;
    }
    mask
};

/// Managed ids in index order.
const MANAGED: usize = 3 + (MAX_INTERRUPTS - LOCAL_BASE);

struct LocalState {
    initialized: bool,
    mode: TrapMode,
    interrupts: InterruptTable,
    exceptions: ExceptionTable,
}

/// The per-hart controller built into every RISC-V core.
pub struct CoreLocalController<H> {
    hart: H,
    state: Mutex<RefCell<LocalState>>,
}

impl<H: Hart> CoreLocalController<H> {
    /// `mode` must be [`TrapMode::Direct`] or [`TrapMode::Vectored`].
    pub const fn new(hart: H, mode: TrapMode) -> Self {
        CoreLocalController {
            hart,
            state: Mutex::new(RefCell::new(LocalState {
                initialized: false,
                mode,
                interrupts: InterruptTable::new(),
                exceptions: ExceptionTable::new(),
            })),
        }
    }

    pub fn hart(&self) -> &H {
        &self.hart
    }

    fn validate(id: usize) -> Result<usize> {
        if id < MAX_INTERRUPTS && is_assignable(id) {
            Ok(id)
        } else {
            Err(Error::InvalidId(id))
        }
    }

    fn try_init(&self) -> Result<TrapMode> {
        critical_section::with(|cs| {
            let mut state = self.state.borrow_ref_mut(cs);
            if state.initialized {
                return Err(Error::AlreadyInitialized);
            }
            state.interrupts.clear();
            state.exceptions.clear();
            state.initialized = true;
            Ok(state.mode)
        })
    }

    fn program_trap_vector(&self, mode: TrapMode) {
        let base = match mode {
            TrapMode::Vectored => self.hart.vector_table(),
            _ => self.hart.trap_entry(),
        };
        self.hart.set_trap_vector(base | mode.bits());
    }

    /// Switch between direct and vectored delivery.
    ///
    /// Refused with [`Error::ModeInUse`] once any source is enabled.
    pub fn set_trap_mode(&self, mode: TrapMode) -> Result<()> {
        if !matches!(mode, TrapMode::Direct | TrapMode::Vectored) {
            return Err(Error::Unsupported);
        }
        critical_section::with(|cs| {
            let mut state = self.state.borrow_ref_mut(cs);
            if state.interrupts.any_enabled() {
                return Err(Error::ModeInUse);
            }
            state.mode = mode;
            if state.initialized {
                self.program_trap_vector(mode);
            }
            Ok(())
        })
    }

    pub fn trap_mode(&self) -> TrapMode {
        critical_section::with(|cs| self.state.borrow_ref(cs).mode)
    }

    /// Chain `sub` beneath `id`. The parent keeps a reference only.
    pub fn chain(&self, id: usize, sub: &'static dyn InterruptController) -> Result<()> {
        let id = Self::validate(id)?;
        critical_section::with(|cs| self.state.borrow_ref_mut(cs).interrupts.chain(id, sub))?;
        log::trace!("hart {}: chained sub-controller on interrupt {}", self.hart.id(), id);
        Ok(())
    }

    pub fn unchain(&self, id: usize) -> Result<()> {
        let id = Self::validate(id)?;
        critical_section::with(|cs| self.state.borrow_ref_mut(cs).interrupts.unchain(id))?;
        Ok(())
    }
}

impl<H: Hart> InterruptController for CoreLocalController<H> {
    fn init(&self) {
        let mode = match self.try_init() {
            Ok(mode) => mode,
            Err(_) => return,
        };
        self.hart.disable_local(LOCAL_SOURCES);
        self.program_trap_vector(mode);
        log::debug!("hart {}: core-local controller ready, {:?} mode", self.hart.id(), mode);
    }

    fn register(&self, id: usize, handler: InterruptHandler, context: usize) -> Result<()> {
        let id = Self::validate(id)?;
        critical_section::with(|cs| {
            self.state
                .borrow_ref_mut(cs)
                .interrupts
                .register(id, handler, context)
        })?;
        log::trace!("hart {}: handler bound to interrupt {}", self.hart.id(), id);
        Ok(())
    }

    fn enable(&self, id: usize) -> Result<()> {
        let id = Self::validate(id)?;
        critical_section::with(|cs| {
            self.state.borrow_ref_mut(cs).interrupts.enable(id)?;
            self.hart.enable_local(interrupt_mask(id));
            Ok(())
        })
    }

    fn disable(&self, id: usize) -> Result<()> {
        let id = Self::validate(id)?;
        critical_section::with(|cs| {
            self.state.borrow_ref_mut(cs).interrupts.disable(id)?;
            self.hart.disable_local(interrupt_mask(id));
            Ok(())
        })
    }

    fn command(&self, cmd: Command) -> Result<u64> {
        match cmd {
            Command::MaxInterruptGet => Ok((MAX_INTERRUPTS - 1) as u64),
            Command::IndexInterruptGet(index) => match index {
                0 => Ok(SOFTWARE_CODE as u64),
                1 => Ok(TIMER_CODE as u64),
                2 => Ok(EXTERNAL_CODE as u64),
                n if n < MANAGED => Ok((LOCAL_BASE + n - 3) as u64),
                n => Err(Error::InvalidId(n)),
            },
            cmd => forward_timer_command(self, cmd),
        }
    }

    fn is_pending(&self, id: usize) -> Result<bool> {
        let id = Self::validate(id)?;
        Ok(self.hart.pending() & interrupt_mask(id) != 0)
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
        log::trace!("hart {}: handler bound to exception {:?}", self.hart.id(), code);
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
    use crate::cause::MCAUSE_INTR;
    use crate::mock::{counter, count_hits, leak, MockHart, TRAP_ENTRY, VECTOR_TABLE};
    use core::sync::atomic::Ordering;

    fn noop(_id: usize, _context: usize) {}

    fn controller(mode: TrapMode) -> &'static CoreLocalController<MockHart> {
        let intc = leak(CoreLocalController::new(MockHart::new(0), mode));
        intc.init();
        intc
    }

    #[test]
    fn init_programs_mtvec_once() {
        let intc = controller(TrapMode::Direct);
        assert_eq!(intc.hart().trap_vector(), TRAP_ENTRY);

        intc.register(7, noop, 0).unwrap();
        intc.init();
        // a second init must not wipe the table
        assert!(intc.enable(7).is_ok());

        let vectored = controller(TrapMode::Vectored);
        assert_eq!(vectored.hart().trap_vector(), VECTOR_TABLE | 1);
    }

    #[test]
    fn boundary_ids() {
        let intc = controller(TrapMode::Direct);
        assert_eq!(intc.register(32, noop, 0), Err(Error::InvalidId(32)));
        assert_eq!(intc.enable(32), Err(Error::InvalidId(32)));
        assert_eq!(intc.command(Command::IndexInterruptGet(32)), Err(Error::InvalidId(32)));
        assert!(intc.register(31, noop, 0).is_ok());
        assert!(intc.enable(31).is_ok());
        assert_eq!(intc.command(Command::IndexInterruptGet(18)), Ok(31));
        assert_eq!(intc.command(Command::MaxInterruptGet), Ok(31));
    }

    #[test]
    fn reserved_codes_never_take_a_handler() {
        let intc = controller(TrapMode::Direct);
        for code in [0, 1, 2, 4, 5, 6, 8, 9, 10, 12, 15] {
            assert_eq!(intc.register(code, noop, 0), Err(Error::InvalidId(code)));
        }
    }

    #[test]
    fn enable_sets_and_disable_clears_mie() {
        let intc = controller(TrapMode::Direct);
        assert_eq!(intc.enable(16), Err(Error::Unregistered(16)));
        intc.register(16, noop, 0).unwrap();
        intc.enable(16).unwrap();
        assert_eq!(intc.hart().mie(), 1 << 16);
        intc.disable(16).unwrap();
        assert_eq!(intc.hart().mie(), 0);
    }

    #[test]
    fn software_trap_runs_handler_once() {
        let intc = controller(TrapMode::Direct);
        let (hits, ctx) = counter();
        intc.register(SOFTWARE_CODE, count_hits, ctx).unwrap();
        intc.enable(SOFTWARE_CODE).unwrap();
        intc.hart().raise(MCAUSE_INTR | SOFTWARE_CODE);
        assert_eq!(intc.handle(SOFTWARE_CODE), Dispatch::Handled);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn disable_enable_round_trip_keeps_handler() {
        let intc = controller(TrapMode::Direct);
        let (hits, ctx) = counter();
        intc.register(TIMER_CODE, count_hits, ctx).unwrap();
        intc.enable(TIMER_CODE).unwrap();
        intc.disable(TIMER_CODE).unwrap();
        assert_eq!(intc.handle(TIMER_CODE), Dispatch::Disabled);
        intc.enable(TIMER_CODE).unwrap();
        assert_eq!(intc.handle(TIMER_CODE), Dispatch::Handled);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn mode_switch_refused_while_enabled() {
        let intc = controller(TrapMode::Direct);
        intc.set_trap_mode(TrapMode::Vectored).unwrap();
        assert_eq!(intc.hart().trap_vector(), VECTOR_TABLE | 1);
        intc.register(EXTERNAL_CODE, noop, 0).unwrap();
        intc.enable(EXTERNAL_CODE).unwrap();
        assert_eq!(intc.set_trap_mode(TrapMode::Direct), Err(Error::ModeInUse));
        assert_eq!(intc.set_trap_mode(TrapMode::Clic), Err(Error::Unsupported));
        assert_eq!(intc.trap_mode(), TrapMode::Vectored);
    }

    #[test]
    fn vectoring_is_not_per_source_here() {
        let intc = controller(TrapMode::Vectored);
        assert_eq!(
            intc.enable_vector(TIMER_CODE, super::super::VectorMode::SelectiveVector),
            Err(Error::Unsupported)
        );
        assert_eq!(intc.disable_vector(TIMER_CODE), Err(Error::Unsupported));
    }

    #[test]
    fn timer_commands_need_a_chained_timer() {
        let intc = controller(TrapMode::Direct);
        assert_eq!(intc.command(Command::MtimeGet), Err(Error::Unsupported));
        assert_eq!(intc.command(Command::SoftwareIpiSet(0)), Err(Error::Unsupported));
    }

    #[test]
    fn exceptions_dispatch_through_their_own_table() {
        fn on_breakpoint(code: ExceptionCode, tval: usize) {
            assert_eq!(code, ExceptionCode::Breakpoint);
            assert_eq!(tval, 0xdead);
        }
        let intc = controller(TrapMode::Direct);
        assert_eq!(
            intc.handle_exception(ExceptionCode::Breakpoint, 0xdead),
            Dispatch::Unhandled
        );
        intc.exception_register(ExceptionCode::Breakpoint, on_breakpoint).unwrap();
        assert_eq!(
            intc.handle_exception(ExceptionCode::Breakpoint, 0xdead),
            Dispatch::Handled
        );
    }
}
