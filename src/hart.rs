//! Narrow hardware-access layer.
//!
//! Everything the dispatch logic needs from the CPU goes through [`Hart`]:
//! trap CSRs, local enables, the trap vector and the instruction probe.
//! [`Machine`] implements it with real CSR accesses on RISC-V targets.

use crate::cause::MSTATUS_MIE;

/// Primitive register access for one hart.
pub trait Hart: Sync {
    /// `mhartid`.
    fn id(&self) -> usize;

    /// `mcause`.
    fn cause(&self) -> usize;

    /// `mtval`.
    fn trap_value(&self) -> usize;

    /// `mepc`.
    fn epc(&self) -> usize;

    fn set_epc(&self, epc: usize);

    /// `mstatus`.
    fn status(&self) -> usize;

    fn set_status(&self, status: usize);

    /// `mscratch`. The trap entry keeps a count of completed traps here.
    fn scratch(&self) -> usize;

    fn set_scratch(&self, value: usize);

    /// `mtvec`, base and mode bits.
    fn trap_vector(&self) -> usize;

    fn set_trap_vector(&self, value: usize);

    /// `mtvt`, the CLIC vector table base.
    fn set_vector_table_base(&self, base: usize);

    /// Set bits in `mie`.
    fn enable_local(&self, mask: usize);

    /// Clear bits in `mie`.
    fn disable_local(&self, mask: usize);

    /// `mip`.
    fn pending(&self) -> usize;

    /// `mcycle`.
    fn cycle(&self) -> u64;

    /// First 16-bit parcel of the instruction at `addr`.
    ///
    /// # Safety
    ///
    /// `addr` must be a readable instruction address.
    unsafe fn instruction_parcel(&self, addr: usize) -> u16;

    /// Address of the common trap entry.
    fn trap_entry(&self) -> usize;

    /// Address of the classic vectored-mode jump table.
    fn vector_table(&self) -> usize;

    /// Address of the per-id entry stub used for hardware vectoring.
    fn vector_stub(&self, id: usize) -> usize;

    fn global_enable(&self) {
        self.set_status(self.status() | MSTATUS_MIE);
    }

    fn global_disable(&self) {
        self.set_status(self.status() & !MSTATUS_MIE);
    }

    fn is_global_enabled(&self) -> bool {
        self.status() & MSTATUS_MIE != 0
    }
}

/// Length in bytes of the instruction whose first parcel is `parcel`.
///
/// Compressed instructions have a low two-bit field other than `0b11`.
#[inline]
#[must_use]
pub const fn instruction_length(parcel: u16) -> usize {
    if parcel & 0b11 == 0b11 {
        4
    } else {
        2
    }
}

/// Probe the length of the instruction at `epc`.
pub fn probe_instruction_length<H: Hart + ?Sized>(hart: &H, epc: usize) -> usize {
    // SAFETY: `epc` was captured from a trap and points at the trapping
    // instruction.
    instruction_length(unsafe { hart.instruction_parcel(epc) })
}

#[cfg(any(target_arch = "riscv32", target_arch = "riscv64"))]
pub use self::machine::Machine;

#[cfg(any(target_arch = "riscv32", target_arch = "riscv64"))]
mod machine {
    use core::arch::asm;

    use riscv::register::{mcause, mcycle, mepc, mhartid, mip, mscratch, mstatus, mtval};

    use super::Hart;
    use crate::cause::MAX_INTERRUPTS;

    extern "C" {
        fn _metal_trap_entry();
        fn _metal_vector_table();
        static _metal_vector_stubs: [usize; MAX_INTERRUPTS];
    }

    /// The machine-mode view of the hart this code runs on.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct Machine;

    impl Hart for Machine {
        #[inline]
        fn id(&self) -> usize {
            mhartid::read()
        }

        #[inline]
        fn cause(&self) -> usize {
            mcause::read().bits()
        }

        #[inline]
        fn trap_value(&self) -> usize {
            mtval::read()
        }

        #[inline]
        fn epc(&self) -> usize {
            mepc::read()
        }

        #[inline]
        #[allow(unused_unsafe)]
        fn set_epc(&self, epc: usize) {
            unsafe { mepc::write(epc) }
        }

        #[inline]
        fn status(&self) -> usize {
            mstatus::read().bits()
        }

        #[inline]
        #[allow(unused_unsafe)]
        fn set_status(&self, status: usize) {
            unsafe { mstatus::write(mstatus::Mstatus::from_bits(status)) }
        }

        #[inline]
        fn scratch(&self) -> usize {
            mscratch::read()
        }

        #[inline]
        #[allow(unused_unsafe)]
        fn set_scratch(&self, value: usize) {
            unsafe { mscratch::write(value) }
        }

        #[inline]
        fn trap_vector(&self) -> usize {
            let bits: usize;
            unsafe { asm!("csrr {0}, mtvec", out(reg) bits) };
            bits
        }

        #[inline]
        fn set_trap_vector(&self, value: usize) {
            // CLIC mode bits are not expressible through `Mtvec`.
            unsafe { asm!("csrw mtvec, {0}", in(reg) value) };
        }

        #[inline]
        fn set_vector_table_base(&self, base: usize) {
            // mtvt
            unsafe { asm!("csrw 0x307, {0}", in(reg) base) };
        }

        #[inline]
        fn enable_local(&self, mask: usize) {
            unsafe { asm!("csrs mie, {0}", in(reg) mask) };
        }

        #[inline]
        fn disable_local(&self, mask: usize) {
            unsafe { asm!("csrc mie, {0}", in(reg) mask) };
        }

        #[inline]
        fn pending(&self) -> usize {
            mip::read().bits()
        }

        #[inline]
        fn cycle(&self) -> u64 {
            mcycle::read64()
        }

        #[inline]
        unsafe fn instruction_parcel(&self, addr: usize) -> u16 {
            core::ptr::read_volatile(addr as *const u16)
        }

        fn trap_entry(&self) -> usize {
            _metal_trap_entry as usize
        }

        fn vector_table(&self) -> usize {
            _metal_vector_table as usize
        }

        fn vector_stub(&self, id: usize) -> usize {
            // SAFETY: the stub table is emitted alongside the trap entry and
            // never written.
            let stubs = unsafe { &*core::ptr::addr_of!(_metal_vector_stubs) };
            stubs.get(id).copied().unwrap_or_else(|| self.trap_entry())
        }

        #[inline]
        #[allow(unused_unsafe)]
        fn global_enable(&self) {
            unsafe { mstatus::set_mie() }
        }

        #[inline]
        #[allow(unused_unsafe)]
        fn global_disable(&self) {
            unsafe { mstatus::clear_mie() }
        }
    }
}
