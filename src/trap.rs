//! Trap entry.
//!
//! Every trap lands either at the common entry, which saves the caller-saved
//! registers into a [`TrapFrame`] and calls [`handle_trap`] for the CPU
//! installed on the current hart, or, when the hardware vectors, at a
//! per-source stub that already knows the interrupt id and calls
//! [`handle_vectored`].
//!
//! The return address and status word are snapshotted before dispatch and
//! written back afterwards, so a handler may re-enable global interrupts for
//! nesting and still return to the right place. A handler that writes `mepc`
//! itself redirects the return, unless a nested trap has since overwritten
//! it. Each completed trap bumps `mscratch` so the outer level can tell.

use crate::cause::{Cause, ExceptionCode, MCAUSE_INTR};
use crate::error::{Error, Result};
use crate::hart::{probe_instruction_length, Hart};
use crate::intc::{Dispatch, InterruptController};

/// Caller-saved registers as `_metal_trap_entry` lays them out on the
/// stack, one XLEN word each.
///
/// The entry and the vector stubs store `a0` first, since the stubs load the
/// interrupt id into it before the rest of the frame is written.
#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct TrapFrame {
    pub ra: usize,
    pub t0: usize,
    pub t1: usize,
    pub t2: usize,
    pub t3: usize,
    pub t4: usize,
    pub t5: usize,
    pub t6: usize,
    pub a0: usize,
    pub a1: usize,
    pub a2: usize,
    pub a3: usize,
    pub a4: usize,
    pub a5: usize,
    pub a6: usize,
    pub a7: usize,
}

/// Words the entry assembly reserves on the stack for a [`TrapFrame`].
pub const TRAP_FRAME_WORDS: usize = 16;

/// Machine state needed to resume the interrupted code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SavedState {
    epc: usize,
    status: usize,
    completed: usize,
}

impl SavedState {
    pub fn capture(hart: &dyn Hart) -> Self {
        SavedState {
            epc: hart.epc(),
            status: hart.status(),
            completed: hart.scratch(),
        }
    }

    #[must_use]
    pub fn epc(&self) -> usize {
        self.epc
    }

    #[must_use]
    pub fn status(&self) -> usize {
        self.status
    }

    /// Resume past the trapping instruction instead of re-executing it.
    pub fn skip_instruction(&mut self, hart: &dyn Hart) {
        self.epc = self.epc.wrapping_add(probe_instruction_length(hart, self.epc));
    }

    /// Keep a return address the handler wrote to `mepc`.
    ///
    /// Returns `false` when `mepc` is unchanged, or when a nested trap ran
    /// since [`capture`](Self::capture) and the value is its leftover.
    pub fn adopt_epc(&mut self, hart: &dyn Hart) -> bool {
        let epc = hart.epc();
        if epc == self.epc || hart.scratch() != self.completed {
            return false;
        }
        self.epc = epc;
        true
    }

    pub fn restore(&self, hart: &dyn Hart) {
        hart.set_status(self.status);
        hart.set_epc(self.epc);
        hart.set_scratch(hart.scratch().wrapping_add(1));
    }
}

fn deliver(hart: &dyn Hart, controller: &dyn InterruptController, id: usize, raw: usize) -> Result<()> {
    match controller.handle(id) {
        Dispatch::Handled => Ok(()),
        Dispatch::Disabled => {
            log::warn!("hart {}: interrupt {} arrived while disabled, dropped", hart.id(), id);
            Ok(())
        }
        Dispatch::Spurious => {
            log::debug!("hart {}: spurious interrupt {}", hart.id(), id);
            Ok(())
        }
        Dispatch::Unhandled => Err(Error::UnhandledTrap(raw)),
    }
}

/// Service the trap latched in `hart`'s cause register.
///
/// Interrupts go to the controller's interrupt table, exceptions to its
/// exception table. A handled exception resumes after the faulting
/// instruction unless its handler wrote a new `mepc`. Returns [`Error::UnhandledTrap`] with the raw cause when
/// nothing could service it; the caller decides how to escalate.
pub fn handle_trap(hart: &dyn Hart, controller: &dyn InterruptController) -> Result<()> {
    let mut saved = SavedState::capture(hart);
    let raw = hart.cause();
    let cause = Cause::from_raw(raw);

    let result = if cause.is_interrupt {
        let result = deliver(hart, controller, cause.code, raw);
        saved.adopt_epc(hart);
        result
    } else {
        let code = ExceptionCode::from_code(cause.code).map_err(|_| Error::UnhandledTrap(raw))?;
        let outcome = controller.handle_exception(code, hart.trap_value());
        let redirected = saved.adopt_epc(hart);
        match outcome {
            Dispatch::Handled => {
                if !redirected {
                    saved.skip_instruction(hart);
                }
                Ok(())
            }
            _ => Err(Error::UnhandledTrap(raw)),
        }
    };

    saved.restore(hart);
    result
}

/// Service interrupt `id` entered through its hardware-vectored stub.
pub fn handle_vectored(hart: &dyn Hart, controller: &dyn InterruptController, id: usize) -> Result<()> {
    let mut saved = SavedState::capture(hart);
    let result = deliver(hart, controller, id, MCAUSE_INTR | id);
    saved.adopt_epc(hart);
    saved.restore(hart);
    result
}

/// Terminal path for a trap nothing could service: log it and park the hart.
pub fn escalate(hart: usize, error: Error) -> ! {
    log::error!("hart {}: {}, parking", hart, error);
    loop {
        core::hint::spin_loop();
    }
}

#[cfg(any(target_arch = "riscv32", target_arch = "riscv64"))]
mod entry {
    use core::arch::global_asm;

    use super::{escalate, handle_vectored, TrapFrame};
    use crate::error::Error;
    use crate::hart::{Hart, Machine};

    #[no_mangle]
    unsafe extern "C" fn _metal_trap_rust(_frame: *const TrapFrame) {
        let hart = Machine;
        let id = hart.id();
        let result = match crate::cpu::current(id) {
            Some(cpu) => cpu.handle_trap(),
            None => Err(Error::UnhandledTrap(hart.cause())),
        };
        if let Err(err) = result {
            escalate(id, err);
        }
    }

    #[no_mangle]
    unsafe extern "C" fn _metal_vectored_rust(source: usize) {
        let hart = Machine;
        let id = hart.id();
        let result = match crate::cpu::current(id) {
            Some(cpu) => handle_vectored(cpu.hart(), cpu.controller_interrupt(), source),
            None => Err(Error::UnhandledTrap(source)),
        };
        if let Err(err) = result {
            escalate(id, err);
        }
    }

    macro_rules! trap_asm {
        ($store:literal, $load:literal, $regbytes:literal, $ptr:literal) => {
            global_asm!(concat!(
                ".equ REGBYTES, ", $regbytes, "\n",
                ".macro SAVE reg, slot\n    ", $store, " \\reg, \\slot*REGBYTES(sp)\n.endm\n",
                ".macro LOAD reg, slot\n    ", $load, " \\reg, \\slot*REGBYTES(sp)\n.endm\n",
                ".macro PTR sym\n    ", $ptr, " \\sym\n.endm\n",
                r#"
    .macro SAVE_FRAME_TAIL
    SAVE ra, 0
    SAVE t0, 1
    SAVE t1, 2
    SAVE t2, 3
    SAVE t3, 4
    SAVE t4, 5
    SAVE t5, 6
    SAVE t6, 7
    SAVE a1, 9
    SAVE a2, 10
    SAVE a3, 11
    SAVE a4, 12
    SAVE a5, 13
    SAVE a6, 14
    SAVE a7, 15
    .endm

    .macro RESTORE_FRAME
    LOAD ra, 0
    LOAD t0, 1
    LOAD t1, 2
    LOAD t2, 3
    LOAD t3, 4
    LOAD t4, 5
    LOAD t5, 6
    LOAD t6, 7
    LOAD a0, 8
    LOAD a1, 9
    LOAD a2, 10
    LOAD a3, 11
    LOAD a4, 12
    LOAD a5, 13
    LOAD a6, 14
    LOAD a7, 15
    addi sp, sp, 16*REGBYTES
    .endm

    .section .text.metal_trap, "ax"
    .global _metal_trap_entry
    .type _metal_trap_entry, @function
    .balign 64
_metal_trap_entry:
    addi sp, sp, -16*REGBYTES
    SAVE a0, 8
    SAVE_FRAME_TAIL
    mv a0, sp
    call _metal_trap_rust
    RESTORE_FRAME
    mret
    .size _metal_trap_entry, . - _metal_trap_entry

    .irp n, 0,1,2,3,4,5,6,7,8,9,10,11,12,13,14,15,16,17,18,19,20,21,22,23,24,25,26,27,28,29,30,31
    .balign 16
_metal_vector_stub_\n:
    addi sp, sp, -16*REGBYTES
    SAVE a0, 8
    li a0, \n
    j _metal_vector_common
    .endr

_metal_vector_common:
    SAVE_FRAME_TAIL
    call _metal_vectored_rust
    RESTORE_FRAME
    mret

    .balign 256
    .global _metal_vector_table
_metal_vector_table:
    .option push
    .option norvc
    j _metal_trap_entry
    .irp n, 1,2,3,4,5,6,7,8,9,10,11,12,13,14,15,16,17,18,19,20,21,22,23,24,25,26,27,28,29,30,31
    j _metal_vector_stub_\n
    .endr
    .option pop

    .section .rodata.metal_trap, "a"
    .balign REGBYTES
    .global _metal_vector_stubs
_metal_vector_stubs:
    .irp n, 0,1,2,3,4,5,6,7,8,9,10,11,12,13,14,15,16,17,18,19,20,21,22,23,24,25,26,27,28,29,30,31
    PTR _metal_vector_stub_\n
    .endr
"#
            ));
        };
    }

    #[cfg(target_arch = "riscv32")]
    trap_asm!("sw", "lw", "4", ".word");

    #[cfg(target_arch = "riscv64")]
    trap_asm!("sd", "ld", "8", ".dword");
}
