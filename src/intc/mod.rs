//! Interrupt controller contract and its variants.
//!
//! A hart owns one top-level controller ([`CoreLocalController`] or
//! [`ClicController`]). Nested controllers ([`Clint`], [`PlicController`])
//! hang off entries of the top-level table and are reached through it.

mod clic;
mod clint;
mod local;
mod plic;

pub use clic::{ClicController, ClicMmio, ClicRegs};
pub use clint::{Clint, ClintMmio, ClintRegs};
pub use local::CoreLocalController;
pub use plic::{PlicController, PlicMmio, PlicRegs};

#[cfg(all(feature = "andes", any(target_arch = "riscv32", target_arch = "riscv64")))]
pub use plic::{AndesPlic, ANDES_PLIC_BASE};

use crate::cause::{
    ExceptionCode, MTVEC_CLIC, MTVEC_CLIC_VECTORED, MTVEC_DIRECT, MTVEC_VECTORED,
    SOFTWARE_CODE, TIMER_CODE,
};
use crate::error::{Error, Result};
use crate::hart::Hart;
use crate::table::{ExceptionHandler, InterruptHandler};

/// Outcome of delivering one trap to a controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum Dispatch {
    /// A handler ran.
    Handled,
    /// The source is bound but disabled; nothing ran.
    Disabled,
    /// Nothing is bound for the source.
    Unhandled,
    /// The controller found nothing to service, e.g. a PLIC claim of `0`
    /// after another context took the source. Nothing ran.
    Spurious,
}

/// Mode field of `mtvec`, selected when a controller is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrapMode {
    /// Every trap enters at one address.
    Direct,
    /// Interrupts enter at `base + 4 * code`.
    Vectored,
    /// CLIC, sources choose hardware vectoring individually.
    Clic,
    /// CLIC, all sources hardware vectored.
    ClicVectored,
}

impl TrapMode {
    #[must_use]
    pub const fn bits(self) -> usize {
        match self {
            TrapMode::Direct => MTVEC_DIRECT,
            TrapMode::Vectored => MTVEC_VECTORED,
            TrapMode::Clic => MTVEC_CLIC,
            TrapMode::ClicVectored => MTVEC_CLIC_VECTORED,
        }
    }

    /// Mode currently programmed in an `mtvec` value.
    #[must_use]
    pub const fn from_mtvec(mtvec: usize) -> Self {
        match mtvec & MTVEC_CLIC_VECTORED {
            MTVEC_DIRECT => TrapMode::Direct,
            MTVEC_VECTORED => TrapMode::Vectored,
            MTVEC_CLIC => TrapMode::Clic,
            _ => TrapMode::ClicVectored,
        }
    }
}

/// Whether `mtvec` selects CLIC with per-source vectoring.
#[inline]
#[must_use]
pub const fn is_selective_vectored(mtvec: usize) -> bool {
    mtvec & MTVEC_CLIC_VECTORED == MTVEC_CLIC
}

/// Vectoring requested for one source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VectorMode {
    Direct,
    Vector,
    SelectiveNonVector,
    SelectiveVector,
    HardwareVector,
}

/// Controller-specific operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Read `mtime`.
    MtimeGet,
    /// Arm this hart's `mtimecmp`.
    MtimecmpSet(u64),
    /// Clear the software interrupt pending bit of a hart.
    SoftwareIpiClear(usize),
    /// Raise a software interrupt on a hart.
    SoftwareIpiSet(usize),
    /// Read the software interrupt pending bit of a hart.
    MsipGet(usize),
    /// Highest id the controller manages.
    MaxInterruptGet,
    /// Interrupt id of the n-th managed source.
    IndexInterruptGet(usize),
}

impl Command {
    #[must_use]
    pub const fn opcode(&self) -> u32 {
        match self {
            Command::MtimeGet => 1,
            Command::MtimecmpSet(_) => 2,
            Command::SoftwareIpiClear(_) => 3,
            Command::SoftwareIpiSet(_) => 4,
            Command::MsipGet(_) => 5,
            Command::MaxInterruptGet => 6,
            Command::IndexInterruptGet(_) => 7,
        }
    }

    /// Build a command from an opcode and its data word.
    pub const fn from_raw(opcode: u32, data: u64) -> Result<Self> {
        Ok(match opcode {
            1 => Command::MtimeGet,
            2 => Command::MtimecmpSet(data),
            3 => Command::SoftwareIpiClear(data as usize),
            4 => Command::SoftwareIpiSet(data as usize),
            5 => Command::MsipGet(data as usize),
            6 => Command::MaxInterruptGet,
            7 => Command::IndexInterruptGet(data as usize),
            _ => return Err(Error::Unsupported),
        })
    }

    /// Timer and IPI commands are served by whatever owns those sources.
    #[must_use]
    pub const fn is_timer_or_ipi(&self) -> bool {
        matches!(
            self,
            Command::MtimeGet
                | Command::MtimecmpSet(_)
                | Command::SoftwareIpiClear(_)
                | Command::SoftwareIpiSet(_)
                | Command::MsipGet(_)
        )
    }
}

/// The polymorphic controller contract.
///
/// All methods take `&self`; implementations keep their tables behind a
/// critical section so they can be shared by reference between a CPU, a
/// parent controller and trap context.
pub trait InterruptController: Sync {
    /// One-time setup. Later calls do nothing.
    fn init(&self);

    /// Bind `handler` to `id`, replacing any previous binding.
    fn register(&self, id: usize, handler: InterruptHandler, context: usize) -> Result<()>;

    fn enable(&self, id: usize) -> Result<()>;

    fn disable(&self, id: usize) -> Result<()>;

    fn enable_vector(&self, id: usize, mode: VectorMode) -> Result<()> {
        let _ = (id, mode);
        Err(Error::Unsupported)
    }

    fn disable_vector(&self, id: usize) -> Result<()> {
        let _ = id;
        Err(Error::Unsupported)
    }

    /// Run a controller-specific command. Values are returned widened to
    /// `u64`; commands without a value return `0`.
    fn command(&self, cmd: Command) -> Result<u64>;

    /// Whether `id` is pending at this controller.
    fn is_pending(&self, id: usize) -> Result<bool> {
        let _ = id;
        Err(Error::Unsupported)
    }

    /// Controller chained beneath `id`, if any.
    fn sub_controller(&self, id: usize) -> Option<&'static dyn InterruptController> {
        let _ = id;
        None
    }

    /// Service a delivered interrupt. `id` is the code the parent (or the
    /// trap entry) saw.
    fn handle(&self, id: usize) -> Dispatch;

    /// Bind a synchronous exception handler. Only top-level controllers own
    /// an exception table.
    fn exception_register(&self, code: ExceptionCode, handler: ExceptionHandler) -> Result<()> {
        let _ = (code, handler);
        Err(Error::Unsupported)
    }

    /// Service a synchronous exception.
    fn handle_exception(&self, code: ExceptionCode, trap_value: usize) -> Dispatch {
        let _ = (code, trap_value);
        Dispatch::Unhandled
    }
}

/// Globally enable trap delivery on `hart`.
///
/// Not nest-safe; callers that need nesting save [`Hart::is_global_enabled`]
/// and restore it themselves.
pub fn interrupt_global_enable(hart: &dyn Hart) {
    hart.global_enable();
}

/// Globally disable trap delivery on `hart`.
pub fn interrupt_global_disable(hart: &dyn Hart) {
    hart.global_disable();
}

/// Top-level entry whose sub-controller serves a timer or IPI command.
const fn command_owner(cmd: &Command) -> usize {
    match cmd {
        Command::MtimeGet | Command::MtimecmpSet(_) => TIMER_CODE,
        _ => SOFTWARE_CODE,
    }
}

/// Hand a timer or IPI command to the controller chained on the timer or
/// software entry of `top`.
fn forward_timer_command(top: &dyn InterruptController, cmd: Command) -> Result<u64> {
    match top.sub_controller(command_owner(&cmd)) {
        Some(sub) => sub.command(cmd),
        None => Err(Error::Unsupported),
    }
}
