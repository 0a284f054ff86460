//! RISC-V interrupt and exception dispatch
//!
//! This crate lets bare-metal firmware bind handlers to interrupt sources and
//! exception causes on each hart, enable and disable them selectively, and
//! routes every trap to the right handler, whether the hart runs with a
//! classic direct/vectored `mtvec` or a CLIC.
//!
//! ## Usage
//!
//! Build one top-level controller and one [`Cpu`] per hart, chain nested
//! controllers beneath it, and install the CPU so the trap entry finds it:
//!
//! ```ignore
//! use riscv_intc::{
//!     cause::{SOFTWARE_CODE, TIMER_CODE},
//!     hart::Machine,
//!     intc::{Clint, ClintMmio, CoreLocalController, InterruptController, TrapMode},
//!     Cpu,
//! };
//!
//! static INTC: CoreLocalController<Machine> = CoreLocalController::new(Machine, TrapMode::Direct);
//! static CLINT: Clint<ClintMmio> =
//!     Clint::new(unsafe { ClintMmio::new(0x0200_0000) }, 0, 1, &INTC);
//! static CPU: Cpu = Cpu::new(&Machine, &INTC);
//!
//! fn tick(_id: usize, _context: usize) {
//!     CPU.mtimecmp_set(CPU.mtime_get().unwrap() + CPU.timebase_get()).ok();
//! }
//!
//! fn main() -> ! {
//!     INTC.init();
//!     CLINT.init();
//!     INTC.chain(SOFTWARE_CODE, &CLINT).unwrap();
//!     INTC.chain(TIMER_CODE, &CLINT).unwrap();
//!     CPU.install().unwrap();
//!
//!     CLINT.register(TIMER_CODE, tick, 0).unwrap();
//!     CLINT.enable(TIMER_CODE).unwrap();
//!     CPU.mtimecmp_set(CPU.timebase_get()).unwrap();
//!     CPU.interrupt_global_enable();
//!     loop {}
//! }
//! ```
//!
//! Handlers run in trap context with global interrupts disabled unless they
//! re-enable them.

#![cfg_attr(not(test), no_std)]

pub mod cause;
pub mod cpu;
pub mod error;
pub mod hart;
pub mod intc;
pub mod table;
pub mod trap;

#[cfg(test)]
mod mock;

pub use cause::{Cause, ExceptionCode, InterruptId, PrivilegeMode};
pub use cpu::{Cpu, CpuConfig};
pub use error::{Error, Result};
pub use intc::{Command, Dispatch, InterruptController, TrapMode, VectorMode};
pub use table::{ExceptionHandler, InterruptHandler};
pub use trap::TrapFrame;

/// Harts the trap entry can route to.
pub const MAX_HARTS: usize = 8;

/// `mtime` frequency assumed when none is configured.
pub const DEFAULT_TIMEBASE: u64 = 32768;
