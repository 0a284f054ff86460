//! Host-side stand-ins for the hart and the memory-mapped controllers.

use std::boxed::Box;
use std::sync::Mutex;
use std::vec::Vec;

use core::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, AtomicUsize, Ordering};

use crate::cause::{interrupt_mask, SOFTWARE_CODE, TIMER_CODE};
use crate::hart::Hart;
use crate::intc::{ClicRegs, ClintRegs, PlicRegs};

pub const TRAP_ENTRY: usize = 0x8000_0100;
pub const VECTOR_TABLE: usize = 0x8000_0400;
pub const VECTOR_STUBS: usize = 0x8000_0800;

pub const MOCK_HARTS: usize = 8;

pub fn leak<T>(value: T) -> &'static T {
    Box::leak(Box::new(value))
}

/// A leaked hit counter and the context word that points at it.
pub fn counter() -> (&'static AtomicUsize, usize) {
    let hits = leak(AtomicUsize::new(0));
    (hits, hits as *const AtomicUsize as usize)
}

/// Interrupt handler bumping the counter passed as context.
pub fn count_hits(_id: usize, context: usize) {
    // SAFETY: contexts come from `counter`.
    let hits = unsafe { &*(context as *const AtomicUsize) };
    hits.fetch_add(1, Ordering::SeqCst);
}

pub struct MockHart {
    id: usize,
    cause: AtomicUsize,
    trap_value: AtomicUsize,
    epc: AtomicUsize,
    status: AtomicUsize,
    scratch: AtomicUsize,
    mtvec: AtomicUsize,
    mtvt: AtomicUsize,
    mie: AtomicUsize,
    mip: AtomicUsize,
    cycle: AtomicU64,
    code: Mutex<Vec<(usize, u16)>>,
    clint: Option<&'static MockClint>,
}

impl MockHart {
    pub fn new(id: usize) -> Self {
        MockHart {
            id,
            cause: AtomicUsize::new(0),
            trap_value: AtomicUsize::new(0),
            epc: AtomicUsize::new(0),
            status: AtomicUsize::new(0),
            scratch: AtomicUsize::new(0),
            mtvec: AtomicUsize::new(0),
            mtvt: AtomicUsize::new(0),
            mie: AtomicUsize::new(0),
            mip: AtomicUsize::new(0),
            cycle: AtomicU64::new(0),
            code: Mutex::new(Vec::new()),
            clint: None,
        }
    }

    /// Derive MTIP and MSIP from a shared CLINT.
    pub fn with_clint(mut self, clint: &'static MockClint) -> Self {
        self.clint = Some(clint);
        self
    }

    pub fn set_instruction(&self, addr: usize, parcel: u16) {
        let mut code = self.code.lock().unwrap();
        code.retain(|&(a, _)| a != addr);
        code.push((addr, parcel));
    }

    /// Latch a trap: `mcause`, `mepc` and `mtval` as hardware would.
    pub fn trap(&self, cause: usize, epc: usize, trap_value: usize) {
        self.cause.store(cause, Ordering::SeqCst);
        self.epc.store(epc, Ordering::SeqCst);
        self.trap_value.store(trap_value, Ordering::SeqCst);
    }

    pub fn raise(&self, cause: usize) {
        self.cause.store(cause, Ordering::SeqCst);
    }

    pub fn set_pending(&self, bits: usize) {
        self.mip.store(bits, Ordering::SeqCst);
    }

    pub fn tick(&self, cycles: u64) {
        self.cycle.fetch_add(cycles, Ordering::SeqCst);
    }

    pub fn mie(&self) -> usize {
        self.mie.load(Ordering::SeqCst)
    }

    pub fn mtvt(&self) -> usize {
        self.mtvt.load(Ordering::SeqCst)
    }
}

impl Hart for MockHart {
    fn id(&self) -> usize {
        self.id
    }

    fn cause(&self) -> usize {
        self.cause.load(Ordering::SeqCst)
    }

    fn trap_value(&self) -> usize {
        self.trap_value.load(Ordering::SeqCst)
    }

    fn epc(&self) -> usize {
        self.epc.load(Ordering::SeqCst)
    }

    fn set_epc(&self, epc: usize) {
        self.epc.store(epc, Ordering::SeqCst);
    }

    fn status(&self) -> usize {
        self.status.load(Ordering::SeqCst)
    }

    fn set_status(&self, status: usize) {
        self.status.store(status, Ordering::SeqCst);
    }

    fn scratch(&self) -> usize {
        self.scratch.load(Ordering::SeqCst)
    }

    fn set_scratch(&self, value: usize) {
        self.scratch.store(value, Ordering::SeqCst);
    }

    fn trap_vector(&self) -> usize {
        self.mtvec.load(Ordering::SeqCst)
    }

    fn set_trap_vector(&self, value: usize) {
        self.mtvec.store(value, Ordering::SeqCst);
    }

    fn set_vector_table_base(&self, base: usize) {
        self.mtvt.store(base, Ordering::SeqCst);
    }

    fn enable_local(&self, mask: usize) {
        self.mie.fetch_or(mask, Ordering::SeqCst);
    }

    fn disable_local(&self, mask: usize) {
        self.mie.fetch_and(!mask, Ordering::SeqCst);
    }

    fn pending(&self) -> usize {
        let mut bits = self.mip.load(Ordering::SeqCst);
        if let Some(clint) = self.clint {
            if clint.mtime() >= clint.mtimecmp(self.id) {
                bits |= interrupt_mask(TIMER_CODE);
            }
            if clint.msip(self.id).load(Ordering::SeqCst) & 1 != 0 {
                bits |= interrupt_mask(SOFTWARE_CODE);
            }
        }
        bits
    }

    fn cycle(&self) -> u64 {
        self.cycle.load(Ordering::SeqCst)
    }

    unsafe fn instruction_parcel(&self, addr: usize) -> u16 {
        let code = self.code.lock().unwrap();
        code.iter()
            .find(|&&(a, _)| a == addr)
            .map(|&(_, parcel)| parcel)
            .unwrap_or(0x0013)
    }

    fn trap_entry(&self) -> usize {
        TRAP_ENTRY
    }

    fn vector_table(&self) -> usize {
        VECTOR_TABLE
    }

    fn vector_stub(&self, id: usize) -> usize {
        VECTOR_STUBS + id * 16
    }
}

pub struct MockClint {
    mtime: AtomicU64,
    mtimecmp: [AtomicU64; MOCK_HARTS],
    msip: [AtomicU32; MOCK_HARTS],
}

impl MockClint {
    pub fn new() -> Self {
        MockClint {
            mtime: AtomicU64::new(0),
            mtimecmp: core::array::from_fn(|_| AtomicU64::new(u64::MAX)),
            msip: core::array::from_fn(|_| AtomicU32::new(0)),
        }
    }

    pub fn advance(&self, ticks: u64) {
        self.mtime.fetch_add(ticks, Ordering::SeqCst);
    }

    pub fn mtimecmp(&self, hart: usize) -> u64 {
        self.mtimecmp[hart].load(Ordering::SeqCst)
    }
}

impl ClintRegs for MockClint {
    fn mtime(&self) -> u64 {
        self.mtime.load(Ordering::SeqCst)
    }

    fn set_mtimecmp(&self, hart: usize, value: u64) {
        self.mtimecmp[hart].store(value, Ordering::SeqCst);
    }

    fn msip(&self, hart: usize) -> &AtomicU32 {
        &self.msip[hart]
    }
}

const MOCK_CLIC_SOURCES: usize = 64;

pub struct MockClic {
    ie: [AtomicBool; MOCK_CLIC_SOURCES],
    ip: [AtomicBool; MOCK_CLIC_SOURCES],
    shv: [AtomicBool; MOCK_CLIC_SOURCES],
    ctl: [AtomicU8; MOCK_CLIC_SOURCES],
}

impl MockClic {
    pub fn new() -> Self {
        MockClic {
            ie: core::array::from_fn(|_| AtomicBool::new(false)),
            ip: core::array::from_fn(|_| AtomicBool::new(false)),
            shv: core::array::from_fn(|_| AtomicBool::new(false)),
            ctl: core::array::from_fn(|_| AtomicU8::new(0)),
        }
    }

    pub fn enabled(&self, id: usize) -> bool {
        self.ie[id].load(Ordering::SeqCst)
    }

    pub fn hardware_vectored(&self, id: usize) -> bool {
        self.shv[id].load(Ordering::SeqCst)
    }

    pub fn level(&self, id: usize) -> u8 {
        self.ctl[id].load(Ordering::SeqCst)
    }
}

impl ClicRegs for MockClic {
    fn set_enabled(&self, id: usize, enabled: bool) {
        self.ie[id].store(enabled, Ordering::SeqCst);
    }

    fn set_pending(&self, id: usize, pending: bool) {
        self.ip[id].store(pending, Ordering::SeqCst);
    }

    fn is_pending(&self, id: usize) -> bool {
        self.ip[id].load(Ordering::SeqCst)
    }

    fn set_hardware_vectored(&self, id: usize, vectored: bool) {
        self.shv[id].store(vectored, Ordering::SeqCst);
    }

    fn set_level(&self, id: usize, level: u8) {
        self.ctl[id].store(level, Ordering::SeqCst);
    }
}

const MOCK_PLIC_SOURCES: usize = 128;

pub struct MockPlic {
    threshold: AtomicU32,
    enabled: [AtomicBool; MOCK_PLIC_SOURCES],
    priority: [AtomicU32; MOCK_PLIC_SOURCES],
    pending: AtomicUsize,
    completed: AtomicUsize,
}

impl MockPlic {
    pub fn new() -> Self {
        MockPlic {
            threshold: AtomicU32::new(u32::MAX),
            enabled: core::array::from_fn(|_| AtomicBool::new(false)),
            priority: core::array::from_fn(|_| AtomicU32::new(0)),
            pending: AtomicUsize::new(0),
            completed: AtomicUsize::new(0),
        }
    }

    /// Make `source` the next claim.
    pub fn raise(&self, source: usize) {
        self.pending.store(source, Ordering::SeqCst);
    }

    pub fn enabled(&self, source: usize) -> bool {
        self.enabled[source].load(Ordering::SeqCst)
    }

    pub fn priority(&self, source: usize) -> u32 {
        self.priority[source].load(Ordering::SeqCst)
    }

    pub fn threshold(&self) -> u32 {
        self.threshold.load(Ordering::SeqCst)
    }

    /// Last completed source.
    pub fn completed(&self) -> Option<usize> {
        match self.completed.load(Ordering::SeqCst) {
            0 => None,
            source => Some(source),
        }
    }
}

impl PlicRegs for MockPlic {
    fn set_threshold(&self, threshold: u32) {
        self.threshold.store(threshold, Ordering::SeqCst);
    }

    fn set_priority(&self, source: usize, priority: u32) {
        self.priority[source].store(priority, Ordering::SeqCst);
    }

    fn set_enabled(&self, source: usize, enabled: bool) {
        self.enabled[source].store(enabled, Ordering::SeqCst);
    }

    fn claim(&self) -> usize {
        self.pending.swap(0, Ordering::SeqCst)
    }

    fn complete(&self, source: usize) {
        self.completed.store(source, Ordering::SeqCst);
    }
}
