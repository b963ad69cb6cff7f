use crate::flags::{Flag, Flags};
use crate::isa::Opcode;

/// Arithmetic/logic operations. Binary operations share the register/memory opcode number.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum AluOp {
    Add,
    Sub,
    And,
    Or,
    Xor,
    Cmp,
    Mul,
    Div,
    Not,
    Inc,
    Dec,
}

impl TryFrom<Opcode> for AluOp {
    type Error = Opcode;

    /// Both the register/memory and the immediate opcode map onto the same operation.
    fn try_from(opcode: Opcode) -> Result<Self, Self::Error> {
        use Opcode::*;
        let op = match opcode {
            Add | AddImm => AluOp::Add,
            Sub | SubImm => AluOp::Sub,
            And | AndImm => AluOp::And,
            Or | OrImm => AluOp::Or,
            Xor | XorImm => AluOp::Xor,
            Cmp | CmpImm => AluOp::Cmp,
            Mul | MulImm => AluOp::Mul,
            Div | DivImm => AluOp::Div,
            Not => AluOp::Not,
            Inc => AluOp::Inc,
            Dec => AluOp::Dec,
            other => return Err(other),
        };
        Ok(op)
    }
}

/// How carry and overflow are derived.
#[derive(Clone, Copy, PartialEq, Eq, Default, Debug)]
pub enum FlagMode {
    /// Compute in a 32-bit intermediate so carry and overflow reflect the untruncated result.
    #[default]
    Widened,
    /// Derive every flag from the already truncated 16-bit result. Arithmetic never sets
    /// carry or overflow in this mode.
    Truncated,
}

/// Condition flags produced by one operation.
#[derive(Clone, Copy, PartialEq, Eq, Default, Debug)]
pub struct Conditions {
    pub carry: bool,
    pub zero: bool,
    pub overflow: bool,
    pub sign: bool,
}

impl Conditions {
    /// Overwrite the four condition flags, leaving status flags untouched.
    pub fn apply(self, flags: &mut Flags) {
        flags.set(Flag::Carry, self.carry);
        flags.set(Flag::Zero, self.zero);
        flags.set(Flag::Overflow, self.overflow);
        flags.set(Flag::Sign, self.sign);
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct AluOutput {
    /// New destination value. `None` for `CMP`, which only updates flags.
    pub value: Option<u16>,
    pub conditions: Conditions,
}

/// The only failure the ALU itself can produce.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct DivisionByZero;

/// Compute `dest <op> src`. Unary operations ignore `src`.
pub fn compute(
    op: AluOp,
    dest: u16,
    src: u16,
    mode: FlagMode,
) -> Result<AluOutput, DivisionByZero> {
    let (a, b) = (dest as u32, src as u32);
    let (sa, sb) = (dest as i16 as i32, src as i16 as i32);

    // (unsigned wide result, signed wide result)
    let (wide, signed) = match op {
        AluOp::Add => (a + b, sa + sb),
        AluOp::Sub | AluOp::Cmp => (a.wrapping_sub(b), sa - sb),
        AluOp::Mul => (a * b, sa * sb),
        AluOp::Inc => (a + 1, sa + 1),
        AluOp::Dec => (a.wrapping_sub(1), sa - 1),
        AluOp::Div => {
            if src == 0 {
                return Err(DivisionByZero);
            }
            logical(a / b)
        }
        AluOp::And => logical(a & b),
        AluOp::Or => logical(a | b),
        AluOp::Xor => logical(a ^ b),
        AluOp::Not => logical(!a & 0xffff),
    };
    let result = wide as u16;

    let (carry, overflow) = match mode {
        // Bit 16 catches add carries and sub borrows, products can land anywhere above it
        FlagMode::Widened => (
            wide & 0x1_0000 != 0 || (op == AluOp::Mul && wide > 0xffff),
            !(i16::MIN as i32..=i16::MAX as i32).contains(&signed),
        ),
        FlagMode::Truncated => (false, false),
    };

    let conditions = Conditions {
        carry,
        zero: result == 0,
        overflow,
        sign: result & 0x8000 != 0,
    };
    let value = if op == AluOp::Cmp { None } else { Some(result) };
    Ok(AluOutput { value, conditions })
}

// Logical and quotient results never carry or overflow.
fn logical(result: u32) -> (u32, i32) {
    (result, result as u16 as i16 as i32)
}
