use crate::diagnostics::{ErrorCode, Fault};
use crate::isa::{Location, Register};
use crate::runtime::RunState;

/// Resolved storage for one operand.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Place {
    Reg(Register),
    /// Address of the low byte of a 16-bit word, already bounds checked.
    Mem(u16),
}

impl RunState {
    /// Resolve a descriptor field to a [`Place`].
    ///
    /// Base-relative fields consume their offset byte even when the resulting address is
    /// rejected, so the fetch stream stays aligned. `Ok(None)` means the operand could not
    /// be used; an out-of-bounds warning has been reported where applicable.
    pub(crate) fn resolve(&mut self, field: u8) -> Result<Option<Place>, Fault> {
        let Some(loc) = Location::decode(field) else {
            return Ok(None);
        };
        let place = match loc {
            Location::Reg(reg) => Some(Place::Reg(reg)),
            Location::BpOffset => {
                let offset = self.fetch_byte()? as i8;
                self.offset_place(Register::Bp, offset)
            }
            Location::SpOffset => {
                let offset = self.fetch_byte()? as i8;
                self.offset_place(Register::Sp, offset)
            }
            Location::R3Indirect => self.indirect_place(Register::R3),
            Location::R4Indirect => self.indirect_place(Register::R4),
        };
        Ok(place)
    }

    pub(crate) fn destination(&mut self, field: u8) -> Result<Option<Place>, Fault> {
        self.resolve(field)
    }

    /// Resolve and read a source operand.
    pub(crate) fn source(&mut self, field: u8) -> Result<Option<u16>, Fault> {
        if Location::decode(field).is_none() {
            self.warn(
                ErrorCode::NullDestination,
                format!("Undefined source field {field}"),
            );
            return Ok(None);
        }
        Ok(self.resolve(field)?.and_then(|place| self.load(place)))
    }

    fn offset_place(&mut self, base: Register, offset: i8) -> Option<Place> {
        let base_value = self.regs.get(base);
        let addr = base_value as i32 + offset as i32;
        if self.word_in_bounds(addr) {
            return Some(Place::Mem(addr as u16));
        }
        let size = self.mem.size();
        self.warn(
            ErrorCode::OffsetOutOfBounds,
            format!(
                "{base}: 0x{base_value:04x}\nOffset: {offset}\n{base}+Offset: {addr}\nValid address range: 0x0000 - 0x{:04x}",
                size.saturating_sub(1)
            ),
        );
        None
    }

    fn indirect_place(&mut self, reg: Register) -> Option<Place> {
        let addr = self.regs.get(reg);
        if self.word_in_bounds(addr as i32) {
            return Some(Place::Mem(addr));
        }
        let size = self.mem.size();
        self.warn(
            ErrorCode::RegisterOutOfBounds,
            format!(
                "{reg}: 0x{addr:04x}\nValid address range: 0x0000 - 0x{:04x}",
                size.saturating_sub(1)
            ),
        );
        None
    }

    /// Both bytes of a word at `addr` fall inside memory.
    fn word_in_bounds(&self, addr: i32) -> bool {
        addr >= 0 && addr + 2 <= self.mem.size() as i32
    }

    pub(crate) fn load(&mut self, place: Place) -> Option<u16> {
        match place {
            Place::Reg(reg) => Some(self.regs.get(reg)),
            Place::Mem(addr) => match self.mem.read_word(addr) {
                Ok(value) => Some(value),
                Err(e) => {
                    self.warn(ErrorCode::RegisterOutOfBounds, e.to_string());
                    None
                }
            },
        }
    }

    pub(crate) fn store(&mut self, place: Place, value: u16) {
        match place {
            Place::Reg(reg) => self.regs.set(reg, value),
            Place::Mem(addr) => {
                if let Err(e) = self.mem.write_word(addr, value) {
                    self.warn(ErrorCode::RegisterOutOfBounds, e.to_string());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::Output;
    use crate::runtime::RunConfig;

    fn machine(program: &[u8]) -> RunState {
        let config = RunConfig {
            output: Output::silent(),
            ..RunConfig::default()
        };
        RunState::new(program, config).unwrap()
    }

    #[test]
    fn registers_resolve_directly() {
        let mut state = machine(&[]);
        assert_eq!(state.resolve(0), Ok(Some(Place::Reg(Register::R0))));
        assert_eq!(state.resolve(5), Ok(Some(Place::Reg(Register::Bp))));
        assert_eq!(state.resolve(6), Ok(Some(Place::Reg(Register::Sp))));
        assert_eq!(state.pc(), 0);
    }

    #[test]
    fn undefined_fields() {
        let mut state = machine(&[]);
        for field in 11..=15 {
            assert_eq!(state.resolve(field), Ok(None));
        }
        assert_eq!(state.source(12), Ok(None));
        assert_eq!(state.diagnostics().count(ErrorCode::NullDestination), 1);
    }

    #[test]
    fn base_relative_consumes_offset() {
        // Offsets +4 and -1
        let mut state = machine(&[4, 0xff]);
        state.regs_mut().bp = 10;
        assert_eq!(state.resolve(7), Ok(Some(Place::Mem(14))));
        assert_eq!(state.pc(), 1);
        // bp-1 with bp=0 is rejected, offset still consumed
        state.regs_mut().bp = 0;
        assert_eq!(state.resolve(7), Ok(None));
        assert_eq!(state.pc(), 2);
        assert_eq!(state.diagnostics().count(ErrorCode::OffsetOutOfBounds), 1);
    }

    #[test]
    fn last_word_of_memory() {
        let mut state = machine(&[0xfe, 0xff]);
        // sp = size; [sp-2] is the top word, [sp-1] straddles the end
        assert!(state.resolve(8).unwrap().is_some());
        assert_eq!(state.resolve(8), Ok(None));
    }

    #[test]
    fn indirect_addresses() {
        let mut state = machine(&[]);
        state.regs_mut().r[3] = 0x20;
        state.regs_mut().r[4] = 0xffff;
        assert_eq!(state.resolve(9), Ok(Some(Place::Mem(0x20))));
        assert_eq!(state.resolve(10), Ok(None));
        assert_eq!(state.diagnostics().count(ErrorCode::RegisterOutOfBounds), 1);
    }

    #[test]
    fn store_then_load() {
        let mut state = machine(&[]);
        state.store(Place::Mem(0x30), 0xabcd);
        assert_eq!(state.memory().read_byte(0x30), Ok(0xcd));
        assert_eq!(state.load(Place::Mem(0x30)), Some(0xabcd));
        state.store(Place::Reg(Register::R2), 9);
        assert_eq!(state.regs().r[2], 9);
    }
}
