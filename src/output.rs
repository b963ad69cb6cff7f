use std::fmt::Write as _;
use std::path::Path;
use std::str::Chars;

use colored::{ColoredString, Colorize};

use crate::diagnostics::{Fault, Severity};
use crate::isa::Opcode;
use crate::runtime::Registers;

/// Where decorated status and diagnostic text goes.
///
/// Program output (`OUT`, `PRINTS`) never passes through here; it goes to the
/// [`Console`](crate::io::Console) untouched.
#[derive(Clone, Copy, Debug, Default)]
pub struct Output {
    /// Strip colour and box drawing, suited for blackbox tests.
    minimal: bool,
    /// Drop everything. Used by library tests.
    silent: bool,
}

#[allow(unused)]
#[derive(Clone, Copy, Debug)]
pub enum MsgColor {
    Green,
    Cyan,
    Red,
    Yellow,
}

struct Decolored<'a> {
    chars: Chars<'a>,
}

impl Output {
    pub fn new(minimal: bool) -> Self {
        Output {
            minimal,
            silent: false,
        }
    }

    pub fn silent() -> Self {
        Output {
            minimal: true,
            silent: true,
        }
    }

    pub fn is_minimal(&self) -> bool {
        self.minimal
    }

    /// Right-aligned coloured status line on stdout, eg. `  Assembling target hw.lasm`.
    pub fn message(&self, color: MsgColor, left: &str, right: &str) {
        if self.silent {
            return;
        }
        if self.minimal {
            println!("{left:>12} {right}");
            return;
        }
        let left = match color {
            MsgColor::Green => left.green(),
            MsgColor::Cyan => left.cyan(),
            MsgColor::Red => left.red(),
            MsgColor::Yellow => left.yellow(),
        };
        println!("{left:>12} {right}");
    }

    pub fn file_message(&self, color: MsgColor, left: &str, right: &Path) {
        let right = format!("target {}", right.display());
        self.message(color, left, &right);
    }

    /// Debug text on stderr.
    pub fn print_str(&self, string: &str) {
        if self.silent {
            return;
        }
        if self.minimal {
            eprint_colorless(string);
        } else {
            eprint!("{}", ColoredString::from(string).blue());
        }
    }

    pub fn print_registers(&self, regs: &Registers) {
        self.print_str(&self.format_registers(regs));
    }

    pub fn format_registers(&self, regs: &Registers) -> String {
        let mut out = String::new();
        if self.minimal {
            for (i, val) in regs.r.iter().enumerate() {
                let _ = writeln!(out, "R{i} {val}");
            }
            let _ = writeln!(out, "SP {}\nBP {}\nPC {}", regs.sp, regs.bp, regs.pc);
            let _ = writeln!(out, "F {}", regs.flags);
            return out;
        }

        out.push_str("\x1b[2m┌────────────────────────────────────┐\x1b[0m\n");
        out.push_str("\x1b[2m│        \x1b[3mhex     int    uint    char\x1b[0m\x1b[2m │\x1b[0m\n");
        for (i, val) in regs.r.iter().enumerate() {
            let _ = write!(out, "\x1b[2m│\x1b[0m \x1b[1mR{i}\x1b[0m  ");
            integer(&mut out, *val);
            out.push_str(" \x1b[2m│\x1b[0m\n");
        }
        for (name, val) in [("SP", regs.sp), ("BP", regs.bp), ("IV", regs.iv)] {
            let _ = write!(out, "\x1b[2m│\x1b[0m \x1b[1m{name}\x1b[0m  ");
            integer(&mut out, val);
            out.push_str(" \x1b[2m│\x1b[0m\n");
        }
        let _ = write!(out, "\x1b[2m│\x1b[0m \x1b[1mPC\x1b[0m  0x{:04x}", regs.pc);
        let _ = write!(out, "            \x1b[1mF\x1b[0m  {}", regs.flags);
        out.push_str(" \x1b[2m│\x1b[0m\n");
        out.push_str("\x1b[2m└────────────────────────────────────┘\x1b[0m\n");
        out
    }

    pub fn print_fault(&self, fault: &Fault, regs: &Registers) {
        if self.silent {
            return;
        }
        let title = format!(
            "VM runtime {}: code {} at PC 0x{:04x}",
            match fault.severity {
                Severity::Severe => "exception",
                Severity::Warning => "warning",
            },
            fault.code.code(),
            fault.pc
        );
        if self.minimal {
            eprintln!("{title}");
        } else {
            match fault.severity {
                Severity::Severe => eprintln!("{}", title.red().bold()),
                Severity::Warning => eprintln!("{}", title.yellow().bold()),
            }
        }
        let mut body = format!("{}\n", fault.code.description());
        if !fault.context.is_empty() {
            let _ = writeln!(body, "{}", fault.context);
        }
        self.print_str(&body);
        self.print_registers(regs);
    }

    /// One line per executed instruction.
    pub fn trace(&self, pc: u16, opcode: Result<Opcode, u8>, regs: &Registers) {
        if self.silent {
            return;
        }
        let op = match opcode {
            Ok(op) => op.to_string(),
            Err(byte) => format!("?{byte:02x}"),
        };
        let line = format!(
            "{pc:04x}  {op:<12} r0={:04x} r1={:04x} r2={:04x} r3={:04x} r4={:04x} sp={:04x} bp={:04x} f={}",
            regs.r[0], regs.r[1], regs.r[2], regs.r[3], regs.r[4], regs.sp, regs.bp, regs.flags
        );
        if self.minimal {
            eprintln!("{line}");
        } else {
            eprintln!("{}", line.dimmed());
        }
    }
}

fn integer(out: &mut String, value: u16) {
    let _ = write!(out, "0x{:04x}  {:-6}  {:-6}", value, value as i16, value);
    out.push_str("   ");
    // Always 3 characters wide
    match value {
        0x00 => out.push_str("NUL"),
        0x09 => out.push_str("HT "),
        0x0a => out.push_str("LF "),
        0x0d => out.push_str("CR "),
        0x1b => out.push_str("ESC"),
        0x7f => out.push_str("DEL"),
        0x20 => out.push_str("[_]"),
        0x21..=0x7e => {
            let _ = write!(out, "{:<3}", value as u8 as char);
        }
        0x00..=0x7f => out.push_str("\x1b[2m───\x1b[0m"),
        0x0080.. => out.push_str("\x1b[2m┄┄┄\x1b[0m"),
    }
}

impl<'a> Decolored<'a> {
    pub fn new(string: &'a str) -> Self {
        Self {
            chars: string.chars(),
        }
    }
}

impl<'a> Iterator for Decolored<'a> {
    type Item = char;
    fn next(&mut self) -> Option<Self::Item> {
        while let Some(ch) = self.chars.next() {
            // Skip everything between '\x1b' and 'm' (inclusive)
            if ch == '\x1b' {
                while self.chars.next().is_some_and(|ch| ch != 'm') {}
                continue;
            }
            return Some(ch);
        }
        None
    }
}

fn eprint_colorless(string: &str) {
    eprint!("{}", Decolored::new(string).collect::<String>());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decolored() {
        assert_eq!(Decolored::new("abcdef").collect::<String>(), "abcdef");
        assert_eq!(
            Decolored::new("abc\x1b[0;2mdef\x1b[0m").collect::<String>(),
            "abcdef"
        );
        assert_eq!(Decolored::new("abc\x1b[0xyz").collect::<String>(), "abc");
    }

    #[test]
    fn minimal_register_dump() {
        let mut regs = Registers::new(1024);
        regs.r[0] = 8;
        regs.pc = 7;
        let dump = Output::new(true).format_registers(&regs);
        assert!(dump.starts_with("R0 8\nR1 0\n"));
        assert!(dump.contains("SP 1024\n"));
        assert!(dump.contains("PC 7\n"));
        assert!(dump.ends_with("F 00000000\n"));
    }

    #[test]
    fn decorated_dump_has_every_register() {
        let regs = Registers::new(1024);
        let dump = Output::new(false).format_registers(&regs);
        let plain = Decolored::new(&dump).collect::<String>();
        for name in ["R0", "R4", "SP", "BP", "IV", "PC"] {
            assert!(plain.contains(name), "{name}");
        }
        assert!(plain.contains("0x0400"));
    }
}
