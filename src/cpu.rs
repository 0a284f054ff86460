//! CPU facade: one per hart.
//!
//! Binds the hart's register access, its top-level controller and the
//! controllers servicing the machine timer and software interrupts, and
//! exposes the timer and IPI command surface on top of them. Unless set
//! explicitly, the timer and software controllers are whatever is chained
//! on those ids of the top-level controller at the time of the call.

use core::ptr;
use core::sync::atomic::{AtomicPtr, Ordering};

use crate::cause::{ExceptionCode, SOFTWARE_CODE, TIMER_CODE};
use crate::error::{Error, Result};
use crate::hart::{probe_instruction_length, Hart};
use crate::intc::{self, Command, InterruptController};
use crate::table::ExceptionHandler;
use crate::{DEFAULT_TIMEBASE, MAX_HARTS};

/// Per-hart settings fixed when the CPU is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuConfig {
    /// Frequency of `mtime`, in Hz.
    pub timebase: u64,
    /// Interrupt id of the machine timer.
    pub timer_id: usize,
    /// Interrupt id of the machine software interrupt.
    pub software_id: usize,
}

impl CpuConfig {
    pub const DEFAULT: CpuConfig = CpuConfig {
        timebase: DEFAULT_TIMEBASE,
        timer_id: TIMER_CODE,
        software_id: SOFTWARE_CODE,
    };

    pub const fn timebase(mut self, hz: u64) -> Self {
        self.timebase = hz;
        self
    }
}

impl Default for CpuConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

pub struct Cpu {
    hart: &'static dyn Hart,
    controller: &'static dyn InterruptController,
    timer: Option<&'static dyn InterruptController>,
    software: Option<&'static dyn InterruptController>,
    config: CpuConfig,
}

#[allow(clippy::declare_interior_mutable_const)]
const VACANT: AtomicPtr<Cpu> = AtomicPtr::new(ptr::null_mut());

static CPUS: [AtomicPtr<Cpu>; MAX_HARTS] = [VACANT; MAX_HARTS];

/// The CPU installed on `hart`, if any.
pub fn current(hart: usize) -> Option<&'static Cpu> {
    let cpu = CPUS.get(hart)?.load(Ordering::Acquire);
    // SAFETY: only `Cpu::install` stores here, and it takes `&'static self`.
    unsafe { cpu.as_ref() }
}

impl Cpu {
    /// A CPU whose timer and software interrupts are reached through the
    /// top-level controller and whatever it chains on their ids.
    pub const fn new(hart: &'static dyn Hart, controller: &'static dyn InterruptController) -> Self {
        Self::with_config(hart, controller, CpuConfig::DEFAULT)
    }

    pub const fn with_config(
        hart: &'static dyn Hart,
        controller: &'static dyn InterruptController,
        config: CpuConfig,
    ) -> Self {
        Cpu {
            hart,
            controller,
            timer: None,
            software: None,
            config,
        }
    }

    /// Send timer commands straight to `timer` instead of the top-level
    /// controller.
    pub const fn with_timer_controller(mut self, timer: &'static dyn InterruptController) -> Self {
        self.timer = Some(timer);
        self
    }

    pub const fn with_sw_controller(mut self, software: &'static dyn InterruptController) -> Self {
        self.software = Some(software);
        self
    }

    /// Make this CPU the one the trap entry uses on its hart.
    pub fn install(&'static self) -> Result<()> {
        let id = self.hart.id();
        let slot = CPUS.get(id).ok_or(Error::InvalidId(id))?;
        slot.store(self as *const Cpu as *mut Cpu, Ordering::Release);
        log::debug!("hart {}: cpu installed", id);
        Ok(())
    }

    pub fn id(&self) -> usize {
        self.hart.id()
    }

    pub fn hart(&self) -> &'static dyn Hart {
        self.hart
    }

    pub fn config(&self) -> CpuConfig {
        self.config
    }

    /// Service the trap currently latched on this hart.
    pub fn handle_trap(&self) -> Result<()> {
        crate::trap::handle_trap(self.hart, self.controller)
    }

    /// Cycle counter.
    pub fn timer_get(&self) -> u64 {
        self.hart.cycle()
    }

    pub fn timebase_get(&self) -> u64 {
        self.config.timebase
    }

    pub fn mtime_get(&self) -> Result<u64> {
        self.timer_controller().command(Command::MtimeGet)
    }

    /// Arm this hart's timer comparator.
    pub fn mtimecmp_set(&self, time: u64) -> Result<()> {
        self.timer_controller()
            .command(Command::MtimecmpSet(time))
            .map(drop)
    }

    /// The controller servicing the machine timer: the one set with
    /// [`with_timer_controller`](Self::with_timer_controller), else the one
    /// chained on the timer id, else the top-level controller.
    pub fn timer_controller(&self) -> &'static dyn InterruptController {
        self.resolve(self.timer, self.config.timer_id)
    }

    pub fn timer_interrupt_id(&self) -> usize {
        self.config.timer_id
    }

    pub fn sw_controller(&self) -> &'static dyn InterruptController {
        self.resolve(self.software, self.config.software_id)
    }

    pub fn sw_interrupt_id(&self) -> usize {
        self.config.software_id
    }

    /// Raise a software interrupt on `hart`.
    pub fn set_sw_ipi(&self, hart: usize) -> Result<()> {
        self.sw_controller()
            .command(Command::SoftwareIpiSet(hart))
            .map(drop)
    }

    pub fn clear_sw_ipi(&self, hart: usize) -> Result<()> {
        self.sw_controller()
            .command(Command::SoftwareIpiClear(hart))
            .map(drop)
    }

    /// Whether a software interrupt is pending for `hart`.
    pub fn get_msip(&self, hart: usize) -> Result<bool> {
        self.sw_controller()
            .command(Command::MsipGet(hart))
            .map(|bit| bit != 0)
    }

    /// The hart's top-level controller.
    pub fn controller_interrupt(&self) -> &'static dyn InterruptController {
        self.controller
    }

    /// Whether `id` is pending, as the top-level controller sees it: `mip`
    /// for core-local interrupts, the per-source pending bit under a CLIC.
    pub fn interrupt_pending(&self, id: usize) -> Result<bool> {
        self.controller.is_pending(id)
    }

    pub fn interrupt_global_enable(&self) {
        intc::interrupt_global_enable(self.hart);
    }

    pub fn interrupt_global_disable(&self) {
        intc::interrupt_global_disable(self.hart);
    }

    /// Bind `handler` to exception `code` on the top-level controller.
    pub fn exception_register(&self, code: usize, handler: ExceptionHandler) -> Result<()> {
        let code = ExceptionCode::from_code(code)?;
        self.controller.exception_register(code, handler)
    }

    /// Length of the instruction at `epc`, 2 or 4 bytes.
    pub fn instruction_length(&self, epc: usize) -> usize {
        probe_instruction_length(self.hart, epc)
    }

    pub fn get_epc(&self) -> usize {
        self.hart.epc()
    }

    pub fn set_epc(&self, epc: usize) {
        self.hart.set_epc(epc);
    }

    fn resolve(
        &self,
        explicit: Option<&'static dyn InterruptController>,
        id: usize,
    ) -> &'static dyn InterruptController {
        explicit
            .or_else(|| self.controller.sub_controller(id))
            .unwrap_or(self.controller)
    }
}
