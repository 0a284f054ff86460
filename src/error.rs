//! Error type shared by controllers, tables and the CPU facade.

use core::fmt;

/// Result alias used throughout the crate.
pub type Result<T> = core::result::Result<T, Error>;

/// Configuration and dispatch errors.
///
/// These are returned as values; nothing in this crate unwinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Interrupt id or exception code outside the managed range, or a
    /// reserved code.
    InvalidId(usize),
    /// The operation needs a bound handler (or chained sub-controller) and
    /// there is none.
    Unregistered(usize),
    /// The controller variant does not implement the operation.
    Unsupported,
    /// `init` already ran. Swallowed by `init` itself.
    AlreadyInitialized,
    /// Trap mode change refused while sources are enabled.
    ModeInUse,
    /// A trap fired with no handler to run. Carries the raw cause.
    UnhandledTrap(usize),
}

impl Error {
    /// C-style status code, `0` being success.
    #[must_use]
    pub const fn code(&self) -> i32 {
        match self {
            Error::InvalidId(_) => -1,
            Error::Unregistered(_) => -2,
            Error::Unsupported => -3,
            Error::AlreadyInitialized => -4,
            Error::ModeInUse => -5,
            Error::UnhandledTrap(_) => -6,
        }
    }
}

/// Collapse a result into a C-style status code.
#[must_use]
pub fn status<T>(result: &Result<T>) -> i32 {
    match result {
        Ok(_) => 0,
        Err(err) => err.code(),
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidId(id) => write!(f, "invalid interrupt id or exception code {id}"),
            Error::Unregistered(id) => write!(f, "no handler registered for {id}"),
            Error::Unsupported => f.write_str("operation not supported by this controller"),
            Error::AlreadyInitialized => f.write_str("controller already initialized"),
            Error::ModeInUse => f.write_str("trap mode cannot change while sources are enabled"),
            Error::UnhandledTrap(cause) => write!(f, "unhandled trap, mcause={cause:#x}"),
        }
    }
}
