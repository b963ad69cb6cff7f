// Machine
pub mod alu;
pub mod diagnostics;
pub mod flags;
pub mod hypervisor;
pub mod isa;
pub mod memory;
pub mod operand;
pub mod runtime;
pub use runtime::{ExitReason, RunConfig, RunEnvironment, RunExit, RunState};

// Host collaborators
pub mod display;
pub mod io;
pub mod loader;

// Parsing
mod parser;
pub use parser::AsmParser;
mod air;
pub use air::Air;
mod error;
mod lexer;
mod symbol;
pub use symbol::{LabelTable, MAX_LABELS};

pub mod env;
pub mod output;

/// Amount of lines to show as context, each side of focus line (line containing span).
pub const DIAGNOSTIC_CONTEXT_LINES: usize = 8;

/// Parse and assemble source text into a program image.
pub fn assemble(src: &str) -> miette::Result<(Air, Vec<u8>)> {
    let mut air = AsmParser::new(src)?.parse()?;
    let image = air.assemble()?;
    Ok((air, image))
}
