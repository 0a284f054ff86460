//! Per-hart dispatch tables.
//!
//! Fixed-capacity arrays indexed by interrupt id or exception code. The
//! tables do no locking of their own; owning controllers keep them behind a
//! `critical_section::Mutex`.

use crate::cause::{ExceptionCode, MAX_EXCEPTIONS, MAX_INTERRUPTS};
use crate::error::{Error, Result};
use crate::intc::{Dispatch, InterruptController};

/// Interrupt handler: receives the interrupt id and the context word given
/// at registration.
pub type InterruptHandler = fn(id: usize, context: usize);

/// Exception handler: receives the exception code and `mtval`.
pub type ExceptionHandler = fn(code: ExceptionCode, trap_value: usize);

/// One interrupt table slot.
#[derive(Clone, Copy)]
pub struct InterruptEntry {
    handler: Option<InterruptHandler>,
    context: usize,
    sub_controller: Option<&'static dyn InterruptController>,
    enabled: bool,
}

impl InterruptEntry {
    pub const EMPTY: InterruptEntry = InterruptEntry {
        handler: None,
        context: 0,
        sub_controller: None,
        enabled: false,
    };

    #[must_use]
    pub fn handler(&self) -> Option<InterruptHandler> {
        self.handler
    }

    #[must_use]
    pub fn context(&self) -> usize {
        self.context
    }

    #[must_use]
    pub fn sub_controller(&self) -> Option<&'static dyn InterruptController> {
        self.sub_controller
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Something can service this slot: a handler or a chained controller.
    #[must_use]
    pub fn is_bound(&self) -> bool {
        self.handler.is_some() || self.sub_controller.is_some()
    }

    /// Run this slot for a delivered interrupt.
    ///
    /// A chained sub-controller gets the first chance; the slot's own
    /// handler is the fallback unless the sub-controller reports the
    /// delivery as spurious.
    pub fn dispatch(&self, id: usize) -> Dispatch {
        if !self.is_bound() {
            return Dispatch::Unhandled;
        }
        if !self.enabled {
            return Dispatch::Disabled;
        }
        let mut outcome = Dispatch::Unhandled;
        if let Some(sub) = self.sub_controller {
            outcome = sub.handle(id);
            if matches!(outcome, Dispatch::Handled | Dispatch::Spurious) {
                return outcome;
            }
        }
        match self.handler {
            Some(handler) => {
                handler(id, self.context);
                Dispatch::Handled
            }
            None => outcome,
        }
    }
}

/// Interrupt handlers, contexts and sub-controller links.
#[derive(Clone, Copy)]
pub struct InterruptTable<const N: usize = MAX_INTERRUPTS> {
    entries: [InterruptEntry; N],
}

impl<const N: usize> InterruptTable<N> {
    pub const fn new() -> Self {
        InterruptTable {
            entries: [InterruptEntry::EMPTY; N],
        }
    }

    pub const fn capacity(&self) -> usize {
        N
    }

    pub fn clear(&mut self) {
        self.entries = [InterruptEntry::EMPTY; N];
    }

    fn slot_mut(&mut self, id: usize) -> Result<&mut InterruptEntry> {
        self.entries.get_mut(id).ok_or(Error::InvalidId(id))
    }

    /// Bind `handler` to `id`, returning the handler it replaces.
    pub fn register(
        &mut self,
        id: usize,
        handler: InterruptHandler,
        context: usize,
    ) -> Result<Option<InterruptHandler>> {
        let slot = self.slot_mut(id)?;
        let previous = slot.handler.replace(handler);
        slot.context = context;
        Ok(previous)
    }

    /// Remove the handler bound to `id`. The enable flag is left alone.
    pub fn unregister(&mut self, id: usize) -> Result<Option<InterruptHandler>> {
        let slot = self.slot_mut(id)?;
        slot.context = 0;
        Ok(slot.handler.take())
    }

    /// Link `id` to a subordinate controller.
    pub fn chain(
        &mut self,
        id: usize,
        sub: &'static dyn InterruptController,
    ) -> Result<Option<&'static dyn InterruptController>> {
        Ok(self.slot_mut(id)?.sub_controller.replace(sub))
    }

    pub fn unchain(&mut self, id: usize) -> Result<Option<&'static dyn InterruptController>> {
        Ok(self.slot_mut(id)?.sub_controller.take())
    }

    /// Mark `id` active. The handler is kept.
    pub fn enable(&mut self, id: usize) -> Result<()> {
        self.set_enabled(id, true)
    }

    /// Mark `id` inactive. The handler is kept.
    pub fn disable(&mut self, id: usize) -> Result<()> {
        self.set_enabled(id, false)
    }

    fn set_enabled(&mut self, id: usize, enabled: bool) -> Result<()> {
        let slot = self.slot_mut(id)?;
        if !slot.is_bound() {
            return Err(Error::Unregistered(id));
        }
        slot.enabled = enabled;
        Ok(())
    }

    pub fn lookup(&self, id: usize) -> Result<InterruptEntry> {
        self.entries.get(id).copied().ok_or(Error::InvalidId(id))
    }

    #[must_use]
    pub fn any_enabled(&self) -> bool {
        self.entries.iter().any(|e| e.enabled)
    }
}

impl<const N: usize> Default for InterruptTable<N> {
    fn default() -> Self {
        Self::new()
    }
}

/// Exception handlers by exception code.
#[derive(Clone, Copy, Default)]
pub struct ExceptionTable {
    handlers: [Option<ExceptionHandler>; MAX_EXCEPTIONS],
}

impl ExceptionTable {
    pub const fn new() -> Self {
        ExceptionTable {
            handlers: [None; MAX_EXCEPTIONS],
        }
    }

    pub fn clear(&mut self) {
        self.handlers = [None; MAX_EXCEPTIONS];
    }

    pub fn register(
        &mut self,
        code: ExceptionCode,
        handler: ExceptionHandler,
    ) -> Option<ExceptionHandler> {
        self.handlers[code.code()].replace(handler)
    }

    pub fn unregister(&mut self, code: ExceptionCode) -> Option<ExceptionHandler> {
        self.handlers[code.code()].take()
    }

    #[must_use]
    pub fn lookup(&self, code: ExceptionCode) -> Option<ExceptionHandler> {
        self.handlers[code.code()]
    }
}

/// Raw vector slots: the address hardware jumps to for each id when it
/// vectors in CLIC mode. Written to `mtvt`, hence the alignment.
#[derive(Clone, Copy)]
#[repr(C, align(64))]
pub struct VectorTable<const N: usize = MAX_INTERRUPTS> {
    slots: [usize; N],
}

impl<const N: usize> VectorTable<N> {
    pub const fn new() -> Self {
        VectorTable { slots: [0; N] }
    }

    /// Point every slot at `entry`.
    pub fn fill(&mut self, entry: usize) {
        self.slots = [entry; N];
    }

    pub fn set(&mut self, id: usize, address: usize) -> Result<()> {
        *self.slots.get_mut(id).ok_or(Error::InvalidId(id))? = address;
        Ok(())
    }

    pub fn get(&self, id: usize) -> Result<usize> {
        self.slots.get(id).copied().ok_or(Error::InvalidId(id))
    }

    /// Base address of the slot array.
    #[must_use]
    pub fn base(&self) -> usize {
        self.slots.as_ptr() as usize
    }
}

impl<const N: usize> Default for VectorTable<N> {
    fn default() -> Self {
        Self::new()
    }
}
