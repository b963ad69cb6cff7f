use std::fmt;

/// Every opcode the machine decodes. Values are the bytes found in a program image.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
#[repr(u8)]
pub enum Opcode {
    Nop = 0x00,

    Ld = 0x01,
    LdImm = 0x02,

    Push = 0x03,
    PushImm = 0x04,
    Pop = 0x05,

    Add = 0x06,
    AddImm = 0x07,
    Sub = 0x08,
    SubImm = 0x09,
    And = 0x0a,
    AndImm = 0x0b,
    Or = 0x0c,
    OrImm = 0x0d,
    Xor = 0x0e,
    XorImm = 0x0f,
    Cmp = 0x10,
    CmpImm = 0x11,
    Mul = 0x12,
    MulImm = 0x13,
    Div = 0x14,
    DivImm = 0x15,
    Not = 0x16,
    Inc = 0x17,
    Dec = 0x18,

    Jmp = 0x20,
    Jz = 0x21,
    Jnz = 0x22,
    Jc = 0x23,
    Jnc = 0x24,
    Jle = 0x25,
    Jge = 0x26,
    Jl = 0x27,
    Jg = 0x28,
    Call = 0x29,
    Ret = 0x2a,
    Reti = 0x2b,
    Int = 0x2c,
    Ei = 0x2d,
    Di = 0x2e,
    ChkInt = 0x2f,
    Pushf = 0x30,
    Popf = 0x31,

    Setz = 0x32,
    Setnz = 0x33,
    Setl = 0x34,
    Setle = 0x35,
    Setg = 0x36,
    Setge = 0x37,
    Setb = 0x38,
    Setbe = 0x39,
    Seta = 0x3a,
    Setae = 0x3b,

    VmExit = 0xd0,
    VmRestart = 0xd1,
    VmGetMemSize = 0xd2,
    VmState = 0xd3,
    VmMalloc = 0xd5,
    VmFree = 0xd6,

    GlInit = 0xe0,
    GlClear = 0xe1,
    GlColor = 0xe2,
    GlPlot = 0xe3,
    GlLine = 0xe4,
    GlRect = 0xe5,

    In = 0xf0,
    Out = 0xf1,
    Gets = 0xf2,
    Prints = 0xf3,

    Lea = 0xfb,
    Liv = 0xfd,
    Halt = 0xfe,
}

impl Opcode {
    const ALL: [Opcode; 72] = {
        use Opcode::*;
        [
            Nop, Ld, LdImm, Push, PushImm, Pop, Add, AddImm, Sub, SubImm, And, AndImm, Or, OrImm,
            Xor, XorImm, Cmp, CmpImm, Mul, MulImm, Div, DivImm, Not, Inc, Dec, Jmp, Jz, Jnz, Jc,
            Jnc, Jle, Jge, Jl, Jg, Call, Ret, Reti, Int, Ei, Di, ChkInt, Pushf, Popf, Setz, Setnz,
            Setl, Setle, Setg, Setge, Setb, Setbe, Seta, Setae, VmExit, VmRestart, VmGetMemSize,
            VmState, VmMalloc, VmFree, GlInit, GlClear, GlColor, GlPlot, GlLine, GlRect, In, Out,
            Gets, Prints, Lea, Liv, Halt,
        ]
    };

    /// Immediate variant of a register/memory opcode, if the instruction has one.
    ///
    /// For the ALU family the immediate form is always the next opcode up.
    pub fn immediate_form(self) -> Option<Opcode> {
        use Opcode::*;
        let imm = match self {
            Ld => LdImm,
            Push => PushImm,
            Add | Sub | And | Or | Xor | Cmp | Mul | Div => {
                return Opcode::try_from(self as u8 + 1).ok();
            }
            _ => return None,
        };
        Some(imm)
    }
}

impl TryFrom<u8> for Opcode {
    type Error = u8;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        Opcode::ALL
            .iter()
            .copied()
            .find(|op| *op as u8 == byte)
            .ok_or(byte)
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match INSTRUCTIONS.iter().find(|ins| ins.opcode == *self) {
            Some(ins) => f.write_str(ins.mnemonic),
            None => write!(f, "{:?}", self),
        }
    }
}

/// Operand shapes an assembler mnemonic accepts.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Form {
    /// No operands.
    Bare,
    /// `dest, src` or `dest, imm16`.
    DestSrc,
    /// `dest`.
    Dest,
    /// `src` or `imm16`.
    Src,
    /// `label`, emitted as a 16-bit address.
    Addr,
    /// `imm8`.
    Imm8,
    /// `imm16`.
    Imm16,
    /// `dest, [bp+N]`.
    BpOffset,
}

/// Entry of the mnemonic table. Encoded sizes depend on the operands and come from the
/// encoder.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Instruction {
    pub mnemonic: &'static str,
    pub opcode: Opcode,
    pub form: Form,
}

const fn ins(mnemonic: &'static str, opcode: Opcode, form: Form) -> Instruction {
    Instruction {
        mnemonic,
        opcode,
        form,
    }
}

#[rustfmt::skip]
pub const INSTRUCTIONS: &[Instruction] = &[
    ins("NOP", Opcode::Nop, Form::Bare),
    ins("LD", Opcode::Ld, Form::DestSrc),
    ins("PUSH", Opcode::Push, Form::Src),
    ins("POP", Opcode::Pop, Form::Dest),
    ins("ADD", Opcode::Add, Form::DestSrc),
    ins("SUB", Opcode::Sub, Form::DestSrc),
    ins("AND", Opcode::And, Form::DestSrc),
    ins("OR", Opcode::Or, Form::DestSrc),
    ins("XOR", Opcode::Xor, Form::DestSrc),
    ins("CMP", Opcode::Cmp, Form::DestSrc),
    ins("MUL", Opcode::Mul, Form::DestSrc),
    ins("DIV", Opcode::Div, Form::DestSrc),
    ins("NOT", Opcode::Not, Form::Dest),
    ins("INC", Opcode::Inc, Form::Dest),
    ins("DEC", Opcode::Dec, Form::Dest),
    ins("JMP", Opcode::Jmp, Form::Addr),
    ins("JZ", Opcode::Jz, Form::Addr),
    ins("JNZ", Opcode::Jnz, Form::Addr),
    ins("JC", Opcode::Jc, Form::Addr),
    ins("JNC", Opcode::Jnc, Form::Addr),
    ins("JLE", Opcode::Jle, Form::Addr),
    ins("JGE", Opcode::Jge, Form::Addr),
    ins("JL", Opcode::Jl, Form::Addr),
    ins("JG", Opcode::Jg, Form::Addr),
    ins("CALL", Opcode::Call, Form::Addr),
    ins("RET", Opcode::Ret, Form::Bare),
    ins("RETI", Opcode::Reti, Form::Bare),
    ins("INT", Opcode::Int, Form::Bare),
    ins("EI", Opcode::Ei, Form::Bare),
    ins("DI", Opcode::Di, Form::Bare),
    ins("CHK", Opcode::ChkInt, Form::Bare),
    ins("HLT", Opcode::Halt, Form::Bare),
    ins("PUSHF", Opcode::Pushf, Form::Bare),
    ins("POPF", Opcode::Popf, Form::Bare),
    ins("IN", Opcode::In, Form::Dest),
    ins("OUT", Opcode::Out, Form::Src),
    ins("GETS", Opcode::Gets, Form::Bare),
    ins("PRINTS", Opcode::Prints, Form::Bare),
    ins("SETZ", Opcode::Setz, Form::Dest),
    ins("SETNZ", Opcode::Setnz, Form::Dest),
    ins("SETL", Opcode::Setl, Form::Dest),
    ins("SETLE", Opcode::Setle, Form::Dest),
    ins("SETG", Opcode::Setg, Form::Dest),
    ins("SETGE", Opcode::Setge, Form::Dest),
    ins("SETB", Opcode::Setb, Form::Dest),
    ins("SETBE", Opcode::Setbe, Form::Dest),
    ins("SETA", Opcode::Seta, Form::Dest),
    ins("SETAE", Opcode::Setae, Form::Dest),
    ins("VMEXIT", Opcode::VmExit, Form::Imm8),
    ins("VMRESTART", Opcode::VmRestart, Form::Bare),
    ins("VMGETMEMSIZE", Opcode::VmGetMemSize, Form::Bare),
    ins("VMSTATE", Opcode::VmState, Form::Bare),
    ins("VMMALLOC", Opcode::VmMalloc, Form::Imm16),
    ins("VMFREE", Opcode::VmFree, Form::Imm16),
    ins("GLINIT", Opcode::GlInit, Form::Bare),
    ins("GLCLEAR", Opcode::GlClear, Form::Bare),
    ins("GLCOLOR", Opcode::GlColor, Form::Bare),
    ins("GLPLOT", Opcode::GlPlot, Form::Bare),
    ins("GLLINE", Opcode::GlLine, Form::Bare),
    ins("GLRECT", Opcode::GlRect, Form::Bare),
    ins("LIV", Opcode::Liv, Form::Addr),
    ins("LEA", Opcode::Lea, Form::BpOffset),
];

/// Case-insensitive mnemonic lookup.
pub fn lookup(mnemonic: &str) -> Option<&'static Instruction> {
    INSTRUCTIONS
        .iter()
        .find(|ins| ins.mnemonic.eq_ignore_ascii_case(mnemonic))
}

/// Register that can be named directly by an operand field.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub enum Register {
    R0 = 0,
    R1,
    R2,
    /// Indirect address register for `[r3]`.
    R3,
    /// Indirect address register for `[r4]`.
    R4,
    Bp,
    Sp,
}

impl Register {
    pub fn from_name(name: &str) -> Option<Register> {
        let reg = match name.to_ascii_lowercase().as_str() {
            "r0" => Register::R0,
            "r1" => Register::R1,
            "r2" => Register::R2,
            "r3" => Register::R3,
            "r4" => Register::R4,
            "bp" => Register::Bp,
            "sp" => Register::Sp,
            _ => return None,
        };
        Some(reg)
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Register::Bp => f.write_str("bp"),
            Register::Sp => f.write_str("sp"),
            gp => write!(f, "r{}", *gp as u8),
        }
    }
}

/// One 4-bit field of a descriptor byte.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Location {
    Reg(Register),
    /// `[bp+off8]`, offset byte follows in the instruction stream.
    BpOffset,
    /// `[sp+off8]`, offset byte follows in the instruction stream.
    SpOffset,
    /// `[r3]`
    R3Indirect,
    /// `[r4]`
    R4Indirect,
}

impl Location {
    pub fn encode(self) -> u8 {
        match self {
            Location::Reg(reg) => reg as u8,
            Location::BpOffset => 7,
            Location::SpOffset => 8,
            Location::R3Indirect => 9,
            Location::R4Indirect => 10,
        }
    }

    /// Decode a nibble. Values 11-15 have no meaning.
    pub fn decode(field: u8) -> Option<Location> {
        let loc = match field & 0x0f {
            0 => Location::Reg(Register::R0),
            1 => Location::Reg(Register::R1),
            2 => Location::Reg(Register::R2),
            3 => Location::Reg(Register::R3),
            4 => Location::Reg(Register::R4),
            5 => Location::Reg(Register::Bp),
            6 => Location::Reg(Register::Sp),
            7 => Location::BpOffset,
            8 => Location::SpOffset,
            9 => Location::R3Indirect,
            10 => Location::R4Indirect,
            _ => return None,
        };
        Some(loc)
    }

    /// Whether resolving this field consumes an offset byte.
    pub fn has_offset(self) -> bool {
        matches!(self, Location::BpOffset | Location::SpOffset)
    }
}

/// Descriptor byte: destination in the high nibble, source in the low nibble.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Descriptor {
    pub dest: u8,
    pub src: u8,
}

impl Descriptor {
    pub fn pack(dest: u8, src: u8) -> u8 {
        (dest & 0x0f) << 4 | (src & 0x0f)
    }
}

impl From<u8> for Descriptor {
    fn from(byte: u8) -> Self {
        Descriptor {
            dest: (byte & 0xf0) >> 4,
            src: byte & 0x0f,
        }
    }
}
