use std::fmt;

/// Index of each flag inside [`Flags`] and bit position inside the packed flag byte.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Flag {
    Carry = 0,
    Zero = 1,
    Overflow = 2,
    Sign = 3,
    Halt = 4,
    InterruptEnable = 5,
    InterruptActive = 6,
    /// Only ever round-tripped by `PUSHF`/`POPF`.
    Reserved = 7,
}

/// The 8 independent condition/status flags.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct Flags([bool; 8]);

impl Flags {
    pub fn get(&self, flag: Flag) -> bool {
        self.0[flag as usize]
    }

    pub fn set(&mut self, flag: Flag, value: bool) {
        self.0[flag as usize] = value;
    }

    pub fn pack(&self) -> u8 {
        self.0
            .iter()
            .enumerate()
            .fold(0, |byte, (bit, set)| byte | (*set as u8) << bit)
    }

    pub fn unpack(byte: u8) -> Self {
        let mut flags = [false; 8];
        for (bit, flag) in flags.iter_mut().enumerate() {
            *flag = byte & (1 << bit) != 0;
        }
        Flags(flags)
    }

    pub fn carry(&self) -> bool {
        self.get(Flag::Carry)
    }
    pub fn zero(&self) -> bool {
        self.get(Flag::Zero)
    }
    pub fn overflow(&self) -> bool {
        self.get(Flag::Overflow)
    }
    pub fn sign(&self) -> bool {
        self.get(Flag::Sign)
    }
    pub fn halted(&self) -> bool {
        self.get(Flag::Halt)
    }

    // Relational predicates shared by the conditional jumps and the SET family.
    // JLE and JG keep their historical definitions; see DESIGN.md.

    /// `JL`, `SETL`
    pub fn less(&self) -> bool {
        self.sign() != self.overflow()
    }

    /// `JGE`, `SETGE`
    pub fn greater_equal(&self) -> bool {
        self.sign() == self.overflow()
    }

    /// `JLE`
    pub fn jump_less_equal(&self) -> bool {
        self.overflow() || self.sign() != self.zero()
    }

    /// `JG`, `SETG`
    pub fn greater(&self) -> bool {
        self.zero() && self.sign() == self.overflow()
    }

    /// `SETLE`
    pub fn less_equal(&self) -> bool {
        self.zero() || self.less()
    }

    /// `SETBE`
    pub fn below_equal(&self) -> bool {
        self.carry() || self.zero()
    }

    /// `SETA`
    pub fn above(&self) -> bool {
        !self.carry() && !self.zero()
    }
}

impl fmt::Debug for Flags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Flags({:08b})", self.pack())
    }
}

/// Printed highest bit first, matching the packed byte.
impl fmt::Display for Flags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08b}", self.pack())
    }
}
