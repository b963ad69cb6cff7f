use std::fmt;

use miette::{Report, Result};

use crate::error;
use crate::isa::{Descriptor, Form, Instruction, Location, Register};
use crate::symbol::{LabelError, LabelTable, Span};

/// Assembly intermediate representation: parsed statements plus the label table filled by
/// the first pass.
pub struct Air {
    src: String,
    stmts: Vec<AirStmt>,
    labels: LabelTable,
    /// Recoverable problems found while parsing
    warnings: Vec<Report>,
}

/// Single assembler statement.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum AirStmt {
    /// `name:`, bound to the address of the next emitted byte
    Label { name: String, span: Span },
    Instr(AirInstr),
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct AirInstr {
    pub ins: &'static Instruction,
    pub operands: Vec<Operand>,
    /// Mnemonic and operands
    pub span: Span,
    /// Emission address, assigned by the first pass
    pub addr: u16,
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub enum Operand {
    /// Register or memory operand encoded as one descriptor field. `offset` only matters
    /// for base-relative forms.
    Loc {
        loc: Location,
        offset: i8,
        span: Span,
    },
    /// Literal as written, range checked once the instruction shape is known.
    Imm { value: i32, span: Span },
    Label { name: String, span: Span },
}

impl Operand {
    pub fn span(&self) -> Span {
        match self {
            Operand::Loc { span, .. } | Operand::Imm { span, .. } | Operand::Label { span, .. } => {
                *span
            }
        }
    }
}

impl Air {
    pub fn new(src: &str) -> Self {
        Air {
            src: src.to_owned(),
            stmts: Vec::new(),
            labels: LabelTable::new(),
            warnings: Vec::new(),
        }
    }

    pub fn add_stmt(&mut self, stmt: AirStmt) {
        self.stmts.push(stmt)
    }

    pub fn add_warning(&mut self, warning: Report) {
        self.warnings.push(warning)
    }

    pub fn warnings(&self) -> &[Report] {
        &self.warnings
    }

    pub fn labels(&self) -> &LabelTable {
        &self.labels
    }

    pub fn stmts(&self) -> &[AirStmt] {
        &self.stmts
    }

    pub fn instrs(&self) -> impl Iterator<Item = &AirInstr> {
        self.stmts.iter().filter_map(|stmt| match stmt {
            AirStmt::Instr(instr) => Some(instr),
            AirStmt::Label { .. } => None,
        })
    }

    pub fn src(&self) -> &str {
        &self.src
    }

    /// Run both passes and return the program image.
    ///
    /// Pass 1 binds labels to emission addresses, pass 2 encodes with labels resolved.
    /// Both passes size instructions with the same encoder.
    pub fn assemble(&mut self) -> Result<Vec<u8>> {
        self.labels.clear();
        let mut addr: u32 = 0;
        for stmt in self.stmts.iter_mut() {
            match stmt {
                AirStmt::Label { name, span } => {
                    if addr > u16::MAX as u32 {
                        return Err(error::asm_address_overflow(*span, &self.src));
                    }
                    match self.labels.insert(name, addr as u16) {
                        Ok(()) => {}
                        Err(LabelError::Duplicate) => {
                            return Err(error::asm_duplicate_label(*span, &self.src))
                        }
                        Err(LabelError::Full) => {
                            return Err(error::asm_too_many_labels(*span, &self.src))
                        }
                    }
                }
                AirStmt::Instr(instr) => {
                    let size = instr.encode(None, &self.src)?.len() as u32;
                    if addr + size > u16::MAX as u32 + 1 {
                        return Err(error::asm_address_overflow(instr.span, &self.src));
                    }
                    instr.addr = addr as u16;
                    addr += size;
                }
            }
        }

        let mut image = Vec::with_capacity(addr as usize);
        for instr in self.instrs() {
            image.extend(instr.encode(Some(&self.labels), &self.src)?);
        }
        Ok(image)
    }

    /// Address and text of every instruction, valid after [`Air::assemble`].
    pub fn listing(&self) -> impl Iterator<Item = String> + '_ {
        self.instrs()
            .map(|instr| format!("{:04x}  {instr}", instr.addr))
    }
}

impl AirInstr {
    pub fn new(ins: &'static Instruction, operands: Vec<Operand>, span: Span) -> Self {
        AirInstr {
            ins,
            operands,
            span,
            addr: 0,
        }
    }

    /// Encode into bytes. Without a label table every label resolves to 0, which is
    /// enough to know the size.
    pub fn encode(&self, labels: Option<&LabelTable>, src: &str) -> Result<Vec<u8>> {
        let op = self.ins.opcode as u8;
        let mut out = Vec::with_capacity(5);
        match self.ins.form {
            Form::Bare => {
                self.expect_operands(0, src)?;
                out.push(op);
            }
            Form::DestSrc => {
                self.expect_operands(2, src)?;
                let dest = self.location(0, src)?;
                match &self.operands[1] {
                    Operand::Loc {
                        loc: src_loc,
                        offset: src_offset,
                        ..
                    } => {
                        out.push(op);
                        out.push(Descriptor::pack(dest.0.encode(), src_loc.encode()));
                        push_offset(&mut out, dest);
                        push_offset(&mut out, (*src_loc, *src_offset));
                    }
                    _ => {
                        let Some(imm) = self.ins.opcode.immediate_form() else {
                            return Err(error::asm_unexpected_operand(
                                self.operands[1].span(),
                                src,
                                "a register or memory operand",
                            ));
                        };
                        let value = self.word(1, labels, src)?;
                        out.push(imm as u8);
                        out.push(Descriptor::pack(dest.0.encode(), 0));
                        push_offset(&mut out, dest);
                        out.extend(value.to_le_bytes());
                    }
                }
            }
            Form::Dest => {
                self.expect_operands(1, src)?;
                let dest = self.location(0, src)?;
                out.push(op);
                out.push(Descriptor::pack(dest.0.encode(), 0));
                push_offset(&mut out, dest);
            }
            Form::Src => {
                self.expect_operands(1, src)?;
                match &self.operands[0] {
                    Operand::Loc { loc, offset, .. } => {
                        out.push(op);
                        out.push(Descriptor::pack(0, loc.encode()));
                        push_offset(&mut out, (*loc, *offset));
                    }
                    other => {
                        let Some(imm) = self.ins.opcode.immediate_form() else {
                            return Err(error::asm_unexpected_operand(
                                other.span(),
                                src,
                                "a register or memory operand",
                            ));
                        };
                        let value = self.word(0, labels, src)?;
                        out.push(imm as u8);
                        out.extend(value.to_le_bytes());
                    }
                }
            }
            Form::Addr | Form::Imm16 => {
                self.expect_operands(1, src)?;
                let value = self.word(0, labels, src)?;
                out.push(op);
                out.extend(value.to_le_bytes());
            }
            Form::Imm8 => {
                self.expect_operands(1, src)?;
                let value = self.byte(0, src)?;
                out.extend([op, value]);
            }
            Form::BpOffset => {
                self.expect_operands(2, src)?;
                let dest = self.location(0, src)?;
                let offset = match &self.operands[1] {
                    Operand::Loc {
                        loc: Location::BpOffset,
                        offset,
                        ..
                    } => *offset,
                    other => {
                        return Err(error::asm_unexpected_operand(other.span(), src, "[bp+N]"))
                    }
                };
                out.push(op);
                out.push(Descriptor::pack(dest.0.encode(), Location::BpOffset.encode()));
                push_offset(&mut out, dest);
                out.push(offset as u8);
            }
        }
        Ok(out)
    }

    fn expect_operands(&self, count: usize, src: &str) -> Result<()> {
        if self.operands.len() == count {
            return Ok(());
        }
        Err(error::asm_operand_count(
            self.span,
            src,
            self.ins.mnemonic,
            count,
        ))
    }

    fn location(&self, idx: usize, src: &str) -> Result<(Location, i8)> {
        match &self.operands[idx] {
            Operand::Loc { loc, offset, .. } => Ok((*loc, *offset)),
            other => Err(error::asm_unexpected_operand(
                other.span(),
                src,
                "a register or memory operand",
            )),
        }
    }

    /// 16-bit immediate or label address.
    fn word(&self, idx: usize, labels: Option<&LabelTable>, src: &str) -> Result<u16> {
        match &self.operands[idx] {
            Operand::Imm { value, span } => {
                if !(i16::MIN as i32..=u16::MAX as i32).contains(value) {
                    return Err(error::parse_bad_lit(*span, src, "-32768 to 65535"));
                }
                // Negative values wrap to two's complement
                Ok(*value as u16)
            }
            Operand::Label { name, span } => match labels {
                None => Ok(0),
                Some(table) => table
                    .get(name)
                    .ok_or_else(|| error::asm_undefined_label(*span, src)),
            },
            other => Err(error::asm_unexpected_operand(
                other.span(),
                src,
                "a literal or label",
            )),
        }
    }

    fn byte(&self, idx: usize, src: &str) -> Result<u8> {
        match &self.operands[idx] {
            Operand::Imm { value, span } => u8::try_from(*value)
                .map_err(|_| error::parse_bad_lit(*span, src, "0 to 255")),
            other => Err(error::asm_unexpected_operand(other.span(), src, "a literal")),
        }
    }
}

fn push_offset(out: &mut Vec<u8>, (loc, offset): (Location, i8)) {
    if loc.has_offset() {
        out.push(offset as u8);
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Loc { loc, offset, .. } => match loc {
                Location::Reg(reg) => write!(f, "{reg}"),
                Location::BpOffset => write!(f, "[bp{offset:+}]"),
                Location::SpOffset => write!(f, "[sp{offset:+}]"),
                Location::R3Indirect => write!(f, "[{}]", Register::R3),
                Location::R4Indirect => write!(f, "[{}]", Register::R4),
            },
            Operand::Imm { value, .. } => write!(f, "{value}"),
            Operand::Label { name, .. } => f.write_str(name),
        }
    }
}

impl fmt::Display for AirInstr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.ins.mnemonic)?;
        for (i, operand) in self.operands.iter().enumerate() {
            let sep = if i == 0 { " " } else { ", " };
            write!(f, "{sep}{operand}")?;
        }
        Ok(())
    }
}
