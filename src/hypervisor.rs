use crate::diagnostics::{ErrorCode, Fault};
use crate::memory::{MemoryError, DEFAULT_MEMORY_SIZE};
use crate::runtime::{Registers, RunState};

/// Privileged VM-management operations. Values match the low nibble of the `VM*` opcodes.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Hypercall {
    Exit = 0,
    Restart = 1,
    GetMemSize = 2,
    Malloc = 5,
    Free = 6,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum HypercallOutcome {
    /// Stop the machine with this exit code.
    Exit(u8),
    Done,
    /// Resize result; `true` on success.
    Status(bool),
}

impl RunState {
    /// Handle one privileged call with its 16-bit operand.
    ///
    /// Only a host allocation failure while growing is fatal.
    pub fn hypercall(&mut self, call: Hypercall, operand: u16) -> Result<HypercallOutcome, Fault> {
        match call {
            Hypercall::Exit => return Ok(HypercallOutcome::Exit(operand as u8)),
            Hypercall::Restart => self.restart(),
            Hypercall::GetMemSize => self.regs.r[0] = self.mem.size(),
            Hypercall::Malloc => return self.grow(operand),
            Hypercall::Free => return Ok(self.shrink(operand)),
        }
        Ok(HypercallOutcome::Done)
    }

    /// Back to power-on state: default memory size, everything zeroed.
    fn restart(&mut self) {
        self.mem.reset(DEFAULT_MEMORY_SIZE);
        self.regs = Registers::new(self.mem.size());
        if self.config.restart_reload {
            // The image fit at load time and the default size is the load-time size
            let _ = self.mem.load(&self.program);
        }
    }

    fn grow(&mut self, delta: u16) -> Result<HypercallOutcome, Fault> {
        match self.mem.grow(delta) {
            Ok(()) => Ok(HypercallOutcome::Status(true)),
            Err(e @ MemoryError::Alloc { .. }) => Err(self.fatal(ErrorCode::Alloc, e.to_string())),
            Err(e) => {
                self.warn(ErrorCode::Alloc, e.to_string());
                Ok(HypercallOutcome::Status(false))
            }
        }
    }

    fn shrink(&mut self, delta: u16) -> HypercallOutcome {
        match self.mem.shrink(delta) {
            Ok(()) => {
                self.regs.sp = self.regs.sp.min(self.mem.size());
                HypercallOutcome::Status(true)
            }
            Err(e) => {
                self.warn(ErrorCode::Free, e.to_string());
                HypercallOutcome::Status(false)
            }
        }
    }
}
