//! Trap cause codec.
//!
//! Maps raw `mcause` values to `(is_interrupt, code)` pairs and logical
//! interrupt identifiers to the numeric codes the hardware reports. Bit
//! layouts follow the RISC-V privileged specification and the CLIC draft.

use crate::error::{Error, Result};

/// Interrupt flag: the top bit of the machine word.
pub const MCAUSE_INTR: usize = 1 << (usize::BITS - 1);
/// Cause code field.
pub const MCAUSE_CAUSE: usize = 0x0000_03FF;
/// CLIC: trap taken while fetching a hardware vector.
pub const MCAUSE_MINHV: usize = 0x4000_0000;
/// CLIC: previous privilege mode.
pub const MCAUSE_MPP: usize = 0x3000_0000;
/// CLIC: previous interrupt enable.
pub const MCAUSE_MPIE: usize = 0x0800_0000;
/// CLIC: previous interrupt level.
pub const MCAUSE_MPIL: usize = 0x00FF_0000;

pub const MSTATUS_MIE: usize = 0x0000_0008;
pub const MSTATUS_MPIE: usize = 0x0000_0080;
pub const MSTATUS_MPP: usize = 0x0000_1800;
pub const MSTATUS_MPRV: usize = 0x0002_0000;
pub const MSTATUS_MXR: usize = 0x0008_0000;

pub const MINTSTATUS_MIL: usize = 0xFF00_0000;
pub const MINTSTATUS_SIL: usize = 0x0000_FF00;
pub const MINTSTATUS_UIL: usize = 0x0000_00FF;

/// Trap-vector mode field of `mtvec`.
pub const MTVEC_MASK: usize = 0x3F;
pub const MTVEC_DIRECT: usize = 0x00;
pub const MTVEC_VECTORED: usize = 0x01;
pub const MTVEC_CLIC: usize = 0x02;
pub const MTVEC_CLIC_VECTORED: usize = 0x03;
pub const MTVEC_CLIC_RESERVED: usize = 0x3C;

/// Interrupt codes 32+ are reserved by the ISA for the core-local range.
pub const MAX_INTERRUPTS: usize = 32;
/// Exception codes 12+ are outside the handled range.
pub const MAX_EXCEPTIONS: usize = 12;
/// First local interrupt code.
pub const LOCAL_BASE: usize = 16;
/// Number of local interrupt slots.
pub const LOCAL_COUNT: usize = 16;
/// First global (platform) interrupt code.
pub const GLOBAL_BASE: usize = LOCAL_BASE + LOCAL_COUNT;
/// One past the last encodable interrupt code.
pub const GLOBAL_LIMIT: usize = MCAUSE_CAUSE + 1;

pub const SOFTWARE_CODE: usize = 3;
pub const TIMER_CODE: usize = 7;
pub const EXTERNAL_CODE: usize = 11;

/// `mie`/`mip` bit for an interrupt code in the core-local range.
#[inline]
#[must_use]
pub const fn interrupt_mask(code: usize) -> usize {
    if code < MAX_INTERRUPTS && code < usize::BITS as usize {
        1 << code
    } else {
        0
    }
}

/// Whether `code` may carry a handler.
///
/// Below the local range only software, timer and external are defined;
/// the other low codes are placeholders.
#[inline]
#[must_use]
pub const fn is_assignable(code: usize) -> bool {
    if code < LOCAL_BASE {
        matches!(code, SOFTWARE_CODE | TIMER_CODE | EXTERNAL_CODE)
    } else {
        code < GLOBAL_LIMIT
    }
}

/// Privilege level a trap was taken from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrivilegeMode {
    Machine,
    Supervisor,
    User,
}

impl PrivilegeMode {
    /// Decode a two-bit privilege field. `0b10` is reserved.
    #[must_use]
    pub const fn from_bits(bits: usize) -> Option<Self> {
        match bits & 0b11 {
            0b11 => Some(PrivilegeMode::Machine),
            0b01 => Some(PrivilegeMode::Supervisor),
            0b00 => Some(PrivilegeMode::User),
            _ => None,
        }
    }

    #[must_use]
    pub const fn bits(self) -> usize {
        match self {
            PrivilegeMode::Machine => 0b11,
            PrivilegeMode::Supervisor => 0b01,
            PrivilegeMode::User => 0b00,
        }
    }

    /// Previous privilege mode recorded in `mstatus.MPP`.
    #[must_use]
    pub const fn from_mstatus(mstatus: usize) -> Option<Self> {
        Self::from_bits((mstatus & MSTATUS_MPP) >> MSTATUS_MPP.trailing_zeros())
    }
}

/// Decoded trap cause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cause {
    pub is_interrupt: bool,
    pub code: usize,
}

impl Cause {
    /// Split a raw `mcause`. CLIC history bits are masked off.
    #[inline]
    #[must_use]
    pub const fn from_raw(raw: usize) -> Self {
        Cause {
            is_interrupt: raw & MCAUSE_INTR != 0,
            code: raw & MCAUSE_CAUSE,
        }
    }

    #[must_use]
    pub const fn interrupt(code: usize) -> Self {
        Cause { is_interrupt: true, code }
    }

    #[must_use]
    pub const fn exception(code: usize) -> Self {
        Cause { is_interrupt: false, code }
    }

    /// Raw `mcause` value this cause would be reported as.
    #[must_use]
    pub const fn to_raw(self) -> usize {
        let code = self.code & MCAUSE_CAUSE;
        if self.is_interrupt {
            MCAUSE_INTR | code
        } else {
            code
        }
    }
}

/// `decode(raw_cause) -> (is_interrupt, code)`.
#[inline]
#[must_use]
pub const fn decode(raw: usize) -> (bool, usize) {
    let cause = Cause::from_raw(raw);
    (cause.is_interrupt, cause.code)
}

/// Interrupt state CLIC mode stacks into `mcause`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClicTrapState {
    pub inhv: bool,
    pub previous_mode: Option<PrivilegeMode>,
    pub previous_enable: bool,
    pub previous_level: u8,
}

impl ClicTrapState {
    #[must_use]
    pub const fn from_mcause(raw: usize) -> Self {
        ClicTrapState {
            inhv: raw & MCAUSE_MINHV != 0,
            previous_mode: PrivilegeMode::from_bits(
                (raw & MCAUSE_MPP) >> MCAUSE_MPP.trailing_zeros(),
            ),
            previous_enable: raw & MCAUSE_MPIE != 0,
            previous_level: ((raw & MCAUSE_MPIL) >> MCAUSE_MPIL.trailing_zeros()) as u8,
        }
    }
}

/// Logical interrupt identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InterruptId {
    Software,
    Timer,
    External,
    /// Core-local source, slot 0..=15.
    Local(u8),
    /// Platform source beyond the local slots.
    Global(u16),
}

impl InterruptId {
    /// Numeric cause code for this id.
    pub const fn code(self) -> Result<usize> {
        match self {
            InterruptId::Software => Ok(SOFTWARE_CODE),
            InterruptId::Timer => Ok(TIMER_CODE),
            InterruptId::External => Ok(EXTERNAL_CODE),
            InterruptId::Local(n) if (n as usize) < LOCAL_COUNT => Ok(LOCAL_BASE + n as usize),
            InterruptId::Local(n) => Err(Error::InvalidId(LOCAL_BASE + n as usize)),
            InterruptId::Global(n) if GLOBAL_BASE + (n as usize) < GLOBAL_LIMIT => {
                Ok(GLOBAL_BASE + n as usize)
            }
            InterruptId::Global(n) => Err(Error::InvalidId(GLOBAL_BASE + n as usize)),
        }
    }

    /// Inverse of [`InterruptId::code`]. Reserved codes are rejected.
    pub const fn from_code(code: usize) -> Result<Self> {
        match code {
            SOFTWARE_CODE => Ok(InterruptId::Software),
            TIMER_CODE => Ok(InterruptId::Timer),
            EXTERNAL_CODE => Ok(InterruptId::External),
            LOCAL_BASE..=31 => Ok(InterruptId::Local((code - LOCAL_BASE) as u8)),
            GLOBAL_BASE..=MCAUSE_CAUSE => Ok(InterruptId::Global((code - GLOBAL_BASE) as u16)),
            _ => Err(Error::InvalidId(code)),
        }
    }

    /// `mie` bit, for ids in the core-local range.
    #[must_use]
    pub const fn enable_mask(self) -> usize {
        match self.code() {
            Ok(code) => interrupt_mask(code),
            Err(_) => 0,
        }
    }
}

/// `encode_interrupt(id) -> code`.
pub const fn encode_interrupt(id: InterruptId) -> Result<usize> {
    id.code()
}

/// Synchronous exception causes handled by the dispatch tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(usize)]
pub enum ExceptionCode {
    InstructionMisaligned = 0,
    InstructionFault = 1,
    IllegalInstruction = 2,
    Breakpoint = 3,
    LoadMisaligned = 4,
    LoadFault = 5,
    StoreMisaligned = 6,
    StoreFault = 7,
    UserEnvCall = 8,
    SupervisorEnvCall = 9,
    Reserved10 = 10,
    MachineEnvCall = 11,
}

impl ExceptionCode {
    const ALL: [ExceptionCode; MAX_EXCEPTIONS] = [
        ExceptionCode::InstructionMisaligned,
        ExceptionCode::InstructionFault,
        ExceptionCode::IllegalInstruction,
        ExceptionCode::Breakpoint,
        ExceptionCode::LoadMisaligned,
        ExceptionCode::LoadFault,
        ExceptionCode::StoreMisaligned,
        ExceptionCode::StoreFault,
        ExceptionCode::UserEnvCall,
        ExceptionCode::SupervisorEnvCall,
        ExceptionCode::Reserved10,
        ExceptionCode::MachineEnvCall,
    ];

    pub const fn from_code(code: usize) -> Result<Self> {
        if code < MAX_EXCEPTIONS {
            Ok(Self::ALL[code])
        } else {
            Err(Error::InvalidId(code))
        }
    }

    #[must_use]
    pub const fn code(self) -> usize {
        self as usize
    }

    /// Privilege level an environment call came from.
    #[must_use]
    pub const fn env_call_mode(self) -> Option<PrivilegeMode> {
        match self {
            ExceptionCode::UserEnvCall => Some(PrivilegeMode::User),
            ExceptionCode::SupervisorEnvCall => Some(PrivilegeMode::Supervisor),
            ExceptionCode::MachineEnvCall => Some(PrivilegeMode::Machine),
            _ => None,
        }
    }
}

/// `encode_exception(code) -> code`.
#[must_use]
pub const fn encode_exception(code: ExceptionCode) -> usize {
    code.code()
}
