use std::{collections::VecDeque, error::Error, fmt};

use crate::output::Output;
use crate::runtime::Registers;

/// Fault codes. The numeric value doubles as the process exit status for fatal faults.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum ErrorCode {
    NoError = 0,
    /// Base-relative memory operand outside the region
    OffsetOutOfBounds = -1,
    /// Register-indirect memory operand outside the region
    RegisterOutOfBounds = -2,
    StackOverflow = -3,
    StackUnderflow = -4,
    InvalidOpcode = -5,
    PcOutOfBounds = -6,
    Alloc = -7,
    Free = -8,
    DivisionByZero = -9,
    NullDestination = -10,
    InvalidAlu = -11,
    Display = -12,
}

impl ErrorCode {
    pub fn code(self) -> i32 {
        self as i32
    }

    fn index(self) -> usize {
        -(self as i32) as usize
    }

    pub fn description(self) -> &'static str {
        match self {
            Self::NoError => "No error",
            Self::OffsetOutOfBounds => "Offset out of bounds",
            Self::RegisterOutOfBounds => "Register indirect address out of bounds",
            Self::StackOverflow => "Stack overflow",
            Self::StackUnderflow => "Stack underflow",
            Self::InvalidOpcode => "Unknown opcode",
            Self::PcOutOfBounds => "Program counter out of bounds",
            Self::Alloc => "Memory allocation failed",
            Self::Free => "Memory free failed",
            Self::DivisionByZero => "Division by zero",
            Self::NullDestination => "Null destination",
            Self::InvalidAlu => "Invalid ALU operation",
            Self::Display => "Display error",
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Severity {
    /// Reported, then the machine stops.
    Severe,
    /// Reported, execution continues with the next instruction.
    Warning,
}

/// A reported runtime fault.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Fault {
    pub code: ErrorCode,
    pub severity: Severity,
    /// Program counter at the time of the report.
    pub pc: u16,
    pub context: String,
}

impl Error for Fault {}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (code {}) at PC 0x{:04x}",
            self.code.description(),
            self.code.code(),
            self.pc
        )?;
        if !self.context.is_empty() {
            write!(f, ": {}", self.context)?;
        }
        Ok(())
    }
}

/// Most recent faults kept by [`Diagnostics::log`].
pub const LOG_CAPACITY: usize = 64;

/// Collects and prints faults for one machine.
///
/// Per-code counters cover every report; only the last [`LOG_CAPACITY`] faults are kept.
#[derive(Debug, Default)]
pub struct Diagnostics {
    output: Output,
    log: VecDeque<Fault>,
    counts: [usize; 13],
    dropped: usize,
}

impl Diagnostics {
    pub fn new(output: Output) -> Self {
        Diagnostics {
            output,
            log: VecDeque::with_capacity(LOG_CAPACITY),
            counts: [0; 13],
            dropped: 0,
        }
    }

    /// Report a fault against the current machine state.
    ///
    /// A WARNING is logged and returns `Ok` so the instruction handler can carry on.
    /// A SEVERE fault is logged and returned as `Err` for the driving loop to act on.
    /// [`ErrorCode::NoError`] is always ignored.
    pub fn report(
        &mut self,
        code: ErrorCode,
        severity: Severity,
        regs: &Registers,
        context: impl Into<String>,
    ) -> Result<(), Fault> {
        if code == ErrorCode::NoError {
            return Ok(());
        }
        let fault = Fault {
            code,
            severity,
            pc: regs.pc,
            context: context.into(),
        };
        self.output.print_fault(&fault, regs);
        self.counts[code.index()] += 1;
        if self.log.len() == LOG_CAPACITY {
            self.log.pop_front();
            self.dropped += 1;
        }
        self.log.push_back(fault.clone());
        match severity {
            Severity::Warning => Ok(()),
            Severity::Severe => Err(fault),
        }
    }

    /// Recent faults, oldest first.
    pub fn log(&self) -> &VecDeque<Fault> {
        &self.log
    }

    /// How many faults fell out of [`Self::log`].
    pub fn dropped(&self) -> usize {
        self.dropped
    }

    /// How many times `code` has been reported.
    pub fn count(&self, code: ErrorCode) -> usize {
        self.counts[code.index()]
    }

    pub fn output(&self) -> Output {
        self.output
    }
}
