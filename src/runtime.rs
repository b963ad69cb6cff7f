use crate::alu::{self, AluOp, DivisionByZero, FlagMode};
use crate::diagnostics::{Diagnostics, ErrorCode, Fault, Severity};
use crate::display::{DisplayBackend, Framebuffer};
use crate::flags::{Flag, Flags};
use crate::hypervisor::{Hypercall, HypercallOutcome};
use crate::io::Console;
use crate::isa::{Descriptor, Opcode, Register};
use crate::memory::{Memory, MemoryError, DEFAULT_MEMORY_SIZE};
use crate::operand::Place;
use crate::output::Output;

/// Program-visible registers, flags included.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Registers {
    /// Address of the next byte to fetch
    pub pc: u16,
    /// Interrupt vector, target of `INT`
    pub iv: u16,
    /// r0 is the accumulator, r3/r4 double as indirect address registers
    pub r: [u16; 5],
    /// Grows down from the top of memory
    pub sp: u16,
    pub bp: u16,
    pub flags: Flags,
}

impl Registers {
    pub fn new(mem_size: u16) -> Self {
        Registers {
            pc: 0,
            iv: 0,
            r: [0; 5],
            sp: mem_size,
            bp: 0,
            flags: Flags::default(),
        }
    }

    pub fn get(&self, reg: Register) -> u16 {
        match reg {
            Register::Bp => self.bp,
            Register::Sp => self.sp,
            gp => self.r[gp as usize],
        }
    }

    pub fn set(&mut self, reg: Register, value: u16) {
        match reg {
            Register::Bp => self.bp = value,
            Register::Sp => self.sp = value,
            gp => self.r[gp as usize] = value,
        }
    }
}

/// Knobs threaded into a machine at construction.
#[derive(Clone, Copy, Debug)]
pub struct RunConfig {
    pub flag_mode: FlagMode,
    /// Print every instruction before it executes.
    pub trace: bool,
    /// Stop the driving loop when a step hits an invalid opcode.
    pub halt_on_invalid: bool,
    /// `VMRESTART` copies the program image back after zeroing memory.
    pub restart_reload: bool,
    pub output: Output,
}

impl Default for RunConfig {
    fn default() -> Self {
        RunConfig {
            flag_mode: FlagMode::default(),
            trace: false,
            halt_on_invalid: true,
            restart_reload: true,
            output: Output::default(),
        }
    }
}

/// Result of one fetch-decode-execute step that did not fault fatally.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Step {
    Continue,
    /// The opcode was not recognized.
    Failed,
    /// `VMEXIT` with the given code.
    Exit(u8),
}

/// Represents complete machine state during runtime.
pub struct RunState {
    pub(crate) regs: Registers,
    pub(crate) mem: Memory,
    /// Image copied to address 0 at load, kept for restarts.
    pub(crate) program: Vec<u8>,
    pub(crate) config: RunConfig,
    pub(crate) diag: Diagnostics,
    pub(crate) framebuffer: Option<Framebuffer>,
}

impl RunState {
    pub fn new(program: impl Into<Vec<u8>>, config: RunConfig) -> Result<RunState, MemoryError> {
        let program = program.into();
        let mut mem = Memory::new(DEFAULT_MEMORY_SIZE);
        mem.load(&program)?;
        Ok(RunState {
            regs: Registers::new(mem.size()),
            mem,
            program,
            config,
            diag: Diagnostics::new(config.output),
            framebuffer: None,
        })
    }

    pub fn regs(&self) -> &Registers {
        &self.regs
    }

    pub fn regs_mut(&mut self) -> &mut Registers {
        &mut self.regs
    }

    pub fn pc(&self) -> u16 {
        self.regs.pc
    }

    pub fn flags(&self) -> Flags {
        self.regs.flags
    }

    pub fn halted(&self) -> bool {
        self.regs.flags.halted()
    }

    pub fn memory(&self) -> &Memory {
        &self.mem
    }

    pub fn memory_mut(&mut self) -> &mut Memory {
        &mut self.mem
    }

    pub fn program_len(&self) -> usize {
        self.program.len()
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diag
    }

    pub fn framebuffer(&self) -> Option<&Framebuffer> {
        self.framebuffer.as_ref()
    }

    pub(crate) fn warn(&mut self, code: ErrorCode, context: impl Into<String>) {
        // Warnings always hand control back
        let _ = self
            .diag
            .report(code, Severity::Warning, &self.regs, context);
    }

    pub(crate) fn fatal(&mut self, code: ErrorCode, context: impl Into<String>) -> Fault {
        let context = context.into();
        match self
            .diag
            .report(code, Severity::Severe, &self.regs, context.clone())
        {
            Err(fault) => fault,
            // `NoError` is never raised as fatal
            Ok(()) => Fault {
                code,
                severity: Severity::Severe,
                pc: self.regs.pc,
                context,
            },
        }
    }

    pub(crate) fn fetch_byte(&mut self) -> Result<u8, Fault> {
        match self.mem.read_byte(self.regs.pc) {
            Ok(byte) => {
                self.regs.pc = self.regs.pc.wrapping_add(1);
                Ok(byte)
            }
            Err(e) => Err(self.fatal(ErrorCode::PcOutOfBounds, e.to_string())),
        }
    }

    /// Little-endian, low byte first.
    pub(crate) fn fetch_word(&mut self) -> Result<u16, Fault> {
        let lo = self.fetch_byte()?;
        let hi = self.fetch_byte()?;
        Ok(u16::from_le_bytes([lo, hi]))
    }

    fn descriptor(&mut self) -> Result<Descriptor, Fault> {
        Ok(Descriptor::from(self.fetch_byte()?))
    }

    pub(crate) fn push_word(&mut self, value: u16) -> Result<(), Fault> {
        let sp = self.regs.sp;
        if sp < 2 || sp > self.mem.size() {
            return Err(self.fatal(ErrorCode::StackOverflow, format!("SP: 0x{sp:04x}")));
        }
        self.regs.sp = sp - 2;
        self.mem
            .write_word(self.regs.sp, value)
            .map_err(|e| self.fatal(ErrorCode::StackOverflow, e.to_string()))
    }

    pub(crate) fn pop_word(&mut self) -> Result<u16, Fault> {
        let sp = self.regs.sp;
        if sp as u32 + 2 > self.mem.size() as u32 {
            return Err(self.fatal(ErrorCode::StackUnderflow, format!("SP: 0x{sp:04x}")));
        }
        let value = self
            .mem
            .read_word(sp)
            .map_err(|e| self.fatal(ErrorCode::StackUnderflow, e.to_string()))?;
        self.regs.sp = sp + 2;
        Ok(value)
    }

    fn push_byte(&mut self, value: u8) -> Result<(), Fault> {
        let sp = self.regs.sp;
        if sp == 0 || sp > self.mem.size() {
            return Err(self.fatal(ErrorCode::StackOverflow, format!("SP: 0x{sp:04x}")));
        }
        self.regs.sp = sp - 1;
        self.mem
            .write_byte(self.regs.sp, value)
            .map_err(|e| self.fatal(ErrorCode::StackOverflow, e.to_string()))
    }

    fn pop_byte(&mut self) -> Result<u8, Fault> {
        let sp = self.regs.sp;
        if sp >= self.mem.size() {
            return Err(self.fatal(ErrorCode::StackUnderflow, format!("SP: 0x{sp:04x}")));
        }
        let value = self
            .mem
            .read_byte(sp)
            .map_err(|e| self.fatal(ErrorCode::StackUnderflow, e.to_string()))?;
        self.regs.sp = sp + 1;
        Ok(value)
    }

    /// Execute one instruction.
    ///
    /// `Err` is a SEVERE fault; the machine must not be stepped again.
    pub fn step(
        &mut self,
        console: &mut dyn Console,
        display: &mut dyn DisplayBackend,
    ) -> Result<Step, Fault> {
        let at = self.regs.pc;
        let byte = self.fetch_byte()?;
        let opcode = Opcode::try_from(byte);
        if self.config.trace {
            self.diag.output().trace(at, opcode, &self.regs);
        }
        let Ok(opcode) = opcode else {
            self.warn(ErrorCode::InvalidOpcode, format!("Opcode: 0x{byte:02x}"));
            return Ok(Step::Failed);
        };

        use Opcode::*;
        match opcode {
            Nop => {}

            Ld => {
                let ds = self.descriptor()?;
                let dest = self.destination(ds.dest)?;
                let src = self.source(ds.src)?;
                self.assign(dest, src, opcode);
            }
            LdImm => {
                let ds = self.descriptor()?;
                let dest = self.destination(ds.dest)?;
                let imm = self.fetch_word()?;
                self.assign(dest, Some(imm), opcode);
            }

            Push => {
                let ds = self.descriptor()?;
                if let Some(value) = self.source(ds.src)? {
                    self.push_word(value)?;
                }
            }
            PushImm => {
                let value = self.fetch_word()?;
                self.push_word(value)?;
            }
            Pop => {
                let ds = self.descriptor()?;
                match self.destination(ds.dest)? {
                    Some(place) => {
                        let value = self.pop_word()?;
                        self.store(place, value);
                    }
                    None => self.null_destination(opcode),
                }
            }

            Add | Sub | And | Or | Xor | Cmp | Mul | Div => {
                let ds = self.descriptor()?;
                let dest = self.destination(ds.dest)?;
                if let Some(src) = self.source(ds.src)? {
                    self.alu(opcode, dest, src);
                }
            }
            AddImm | SubImm | AndImm | OrImm | XorImm | CmpImm | MulImm | DivImm => {
                let ds = self.descriptor()?;
                let dest = self.destination(ds.dest)?;
                let imm = self.fetch_word()?;
                self.alu(opcode, dest, imm);
            }
            Not | Inc | Dec => {
                let ds = self.descriptor()?;
                let dest = self.destination(ds.dest)?;
                self.alu(opcode, dest, 0);
            }

            Jmp => self.regs.pc = self.fetch_word()?,
            Jz | Jnz | Jc | Jnc | Jle | Jge | Jl | Jg => {
                // Operand is always consumed, taken or not
                let target = self.fetch_word()?;
                if jump_taken(opcode, &self.regs.flags) {
                    self.regs.pc = target;
                }
            }
            Call => {
                let target = self.fetch_word()?;
                self.push_word(self.regs.pc)?;
                self.regs.pc = target;
            }
            Ret => self.regs.pc = self.pop_word()?,
            Reti => {
                self.regs.pc = self.pop_word()?;
                self.regs.flags.set(Flag::InterruptActive, false);
            }
            Int => {
                if self.regs.flags.get(Flag::InterruptEnable) {
                    self.push_word(self.regs.pc)?;
                    self.regs.pc = self.regs.iv;
                    self.regs.flags.set(Flag::InterruptActive, true);
                }
            }
            Ei => self.regs.flags.set(Flag::InterruptEnable, true),
            Di => self.regs.flags.set(Flag::InterruptEnable, false),
            ChkInt => {
                let active = self.regs.flags.get(Flag::InterruptActive);
                self.regs.flags.set(Flag::Zero, !active);
            }
            Pushf => self.push_byte(self.regs.flags.pack())?,
            Popf => self.regs.flags = Flags::unpack(self.pop_byte()?),

            Setz | Setnz | Setl | Setle | Setg | Setge | Setb | Setbe | Seta | Setae => {
                let ds = self.descriptor()?;
                let dest = self.destination(ds.dest)?;
                let value = set_condition(opcode, &self.regs.flags) as u16;
                self.assign(dest, Some(value), opcode);
            }

            In => {
                let ds = self.descriptor()?;
                match self.destination(ds.dest)? {
                    Some(place) => {
                        // End of input reads as 0xFFFF
                        let value = console.read_byte().map_or(0xffff, u16::from);
                        self.store(place, value);
                    }
                    None => self.null_destination(opcode),
                }
            }
            Out => {
                let ds = self.descriptor()?;
                if let Some(value) = self.source(ds.src)? {
                    console.write_byte(value as u8);
                    console.flush();
                }
            }
            Gets => self.gets(console),
            Prints => self.prints(console),

            VmExit => {
                let code = self.fetch_byte()?;
                return self.hypervisor_step(Hypercall::Exit, code as u16);
            }
            VmRestart => return self.hypervisor_step(Hypercall::Restart, 0),
            VmGetMemSize => return self.hypervisor_step(Hypercall::GetMemSize, 0),
            VmState => self.diag.output().print_registers(&self.regs),
            VmMalloc => {
                let size = self.fetch_word()?;
                return self.hypervisor_step(Hypercall::Malloc, size);
            }
            VmFree => {
                let size = self.fetch_word()?;
                return self.hypervisor_step(Hypercall::Free, size);
            }

            GlInit => {
                let (width, height) = (self.regs.r[1], self.regs.r[2]);
                let surface = display
                    .init(width, height)
                    .and_then(|()| Framebuffer::new(width, height));
                match surface {
                    Ok(fb) => self.framebuffer = Some(fb),
                    Err(e) => return Err(self.fatal(ErrorCode::Display, e.to_string())),
                }
            }
            GlClear => self.draw(|fb, _| fb.clear()),
            GlColor => self.draw(|fb, r| fb.set_color(r[1] as u8)),
            GlPlot => self.draw(|fb, r| fb.plot(r[1] as i32, r[2] as i32)),
            GlLine => {
                self.draw(|fb, r| fb.line(r[1] as i32, r[2] as i32, r[3] as i32, r[4] as i32))
            }
            GlRect => {
                self.draw(|fb, r| fb.rect(r[1] as i32, r[2] as i32, r[3] as i32, r[4] as i32))
            }

            Lea => {
                let ds = self.descriptor()?;
                let dest = self.destination(ds.dest)?;
                let offset = self.fetch_byte()? as i8;
                let addr = self.regs.bp.wrapping_add_signed(offset as i16);
                self.assign(dest, Some(addr), opcode);
            }
            Liv => self.regs.iv = self.fetch_word()?,
            Halt => self.regs.flags.set(Flag::Halt, true),
        }
        Ok(Step::Continue)
    }

    fn hypervisor_step(&mut self, call: Hypercall, operand: u16) -> Result<Step, Fault> {
        match self.hypercall(call, operand)? {
            HypercallOutcome::Exit(code) => Ok(Step::Exit(code)),
            HypercallOutcome::Done => Ok(Step::Continue),
            // Zero flag is the status: clear on success, set on failure
            HypercallOutcome::Status(ok) => {
                self.regs.flags.set(Flag::Zero, !ok);
                Ok(Step::Continue)
            }
        }
    }

    fn null_destination(&mut self, opcode: Opcode) {
        self.warn(
            ErrorCode::NullDestination,
            format!("Null destination passed to {opcode}"),
        );
    }

    /// Write `value` to `dest`. Either being unresolved aborts the instruction.
    fn assign(&mut self, dest: Option<Place>, value: Option<u16>, opcode: Opcode) {
        match (dest, value) {
            (None, _) => self.null_destination(opcode),
            (Some(place), Some(value)) => self.store(place, value),
            (Some(_), None) => {}
        }
    }

    fn alu(&mut self, opcode: Opcode, dest: Option<Place>, src: u16) {
        let op = match AluOp::try_from(opcode) {
            Ok(op) => op,
            Err(other) => {
                self.warn(ErrorCode::InvalidAlu, format!("Opcode: {other}"));
                return;
            }
        };
        let Some(place) = dest else {
            self.warn(ErrorCode::NullDestination, "Null destination passed to ALU");
            return;
        };
        let Some(value) = self.load(place) else {
            return;
        };
        match alu::compute(op, value, src, self.config.flag_mode) {
            Ok(out) => {
                out.conditions.apply(&mut self.regs.flags);
                if let Some(result) = out.value {
                    self.store(place, result);
                }
            }
            Err(DivisionByZero) => self.warn(ErrorCode::DivisionByZero, ""),
        }
    }

    /// Read a line into `[r4]`, advancing r4 per byte, terminated by a zero byte.
    fn gets(&mut self, console: &mut dyn Console) {
        loop {
            let byte = match console.read_byte() {
                Some(b'\n') | None => 0,
                Some(byte) => byte,
            };
            let addr = self.regs.r[4];
            if self.mem.write_byte(addr, byte).is_err() {
                self.warn(
                    ErrorCode::RegisterOutOfBounds,
                    format!("Indirect address: 0x{addr:04x}"),
                );
                return;
            }
            if byte == 0 {
                return;
            }
            self.regs.r[4] = addr.wrapping_add(1);
        }
    }

    /// Print the zero-terminated string at `[r3]`, advancing r3 per byte.
    fn prints(&mut self, console: &mut dyn Console) {
        loop {
            let addr = self.regs.r[3];
            match self.mem.read_byte(addr) {
                Ok(0) => break,
                Ok(byte) => {
                    console.write_byte(byte);
                    self.regs.r[3] = addr.wrapping_add(1);
                }
                Err(_) => {
                    self.warn(
                        ErrorCode::RegisterOutOfBounds,
                        format!("Indirect address: 0x{addr:04x}"),
                    );
                    break;
                }
            }
        }
        console.flush();
    }

    fn draw(&mut self, f: impl FnOnce(&mut Framebuffer, &[u16; 5])) {
        match self.framebuffer.as_mut() {
            Some(fb) => f(fb, &self.regs.r),
            None => self.warn(ErrorCode::Display, "Drawing before GLINIT"),
        }
    }
}

/// Whether a conditional jump opcode is taken.
pub fn jump_taken(opcode: Opcode, flags: &Flags) -> bool {
    match opcode {
        Opcode::Jz => flags.zero(),
        Opcode::Jnz => !flags.zero(),
        Opcode::Jc => flags.carry(),
        Opcode::Jnc => !flags.carry(),
        Opcode::Jle => flags.jump_less_equal(),
        Opcode::Jge => flags.greater_equal(),
        Opcode::Jl => flags.less(),
        Opcode::Jg => flags.greater(),
        _ => false,
    }
}

/// Value a `SETcc` opcode writes.
pub fn set_condition(opcode: Opcode, flags: &Flags) -> bool {
    match opcode {
        Opcode::Setz => flags.zero(),
        Opcode::Setnz => !flags.zero(),
        Opcode::Setl => flags.less(),
        Opcode::Setle => flags.less_equal(),
        Opcode::Setg => flags.greater(),
        Opcode::Setge => flags.greater_equal(),
        Opcode::Setb => flags.carry(),
        Opcode::Setbe => flags.below_equal(),
        Opcode::Seta => flags.above(),
        Opcode::Setae => !flags.carry(),
        _ => false,
    }
}

/// Why the driving loop stopped.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum ExitReason {
    Halted,
    /// `VMEXIT`
    Exited,
    /// Program counter reached the end of the program image without halting.
    RanOffProgram,
    InvalidOpcode,
    /// The display backend asked to close.
    DisplayClosed,
    Fault(Fault),
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct RunExit {
    /// Process exit status.
    pub code: i32,
    pub reason: ExitReason,
}

/// A machine wired to its host collaborators, plus the loop that drives it.
pub struct RunEnvironment<C: Console, D: DisplayBackend> {
    state: RunState,
    console: C,
    display: D,
}

impl<C: Console, D: DisplayBackend> RunEnvironment<C, D> {
    pub fn new(state: RunState, console: C, display: D) -> Self {
        RunEnvironment {
            state,
            console,
            display,
        }
    }

    pub fn from_image(
        image: impl Into<Vec<u8>>,
        config: RunConfig,
        console: C,
        display: D,
    ) -> Result<Self, MemoryError> {
        Ok(Self::new(RunState::new(image, config)?, console, display))
    }

    pub fn state(&self) -> &RunState {
        &self.state
    }

    pub fn console(&self) -> &C {
        &self.console
    }

    pub fn display(&self) -> &D {
        &self.display
    }

    /// Run until halt, exit, fault, or the end of the program image.
    pub fn run(&mut self) -> RunExit {
        let exit = self.run_loop();
        if let Err(e) = self.display.teardown() {
            self.state
                .diag
                .output()
                .print_str(&format!("Display teardown failed: {e}\n"));
        }
        exit
    }

    fn run_loop(&mut self) -> RunExit {
        while !self.state.halted() {
            if self.state.pc() as usize >= self.state.program_len() {
                return RunExit {
                    code: 1,
                    reason: ExitReason::RanOffProgram,
                };
            }
            match self.state.step(&mut self.console, &mut self.display) {
                Ok(Step::Continue) => {}
                Ok(Step::Failed) => {
                    if self.state.config.halt_on_invalid {
                        return RunExit {
                            code: ErrorCode::InvalidOpcode.code(),
                            reason: ExitReason::InvalidOpcode,
                        };
                    }
                }
                Ok(Step::Exit(code)) => {
                    return RunExit {
                        code: code as i32,
                        reason: ExitReason::Exited,
                    }
                }
                Err(fault) => {
                    return RunExit {
                        code: fault.code.code(),
                        reason: ExitReason::Fault(fault),
                    }
                }
            }
            if let Some(fb) = self.state.framebuffer() {
                if self.display.should_close() {
                    return RunExit {
                        code: 0,
                        reason: ExitReason::DisplayClosed,
                    };
                }
                self.display.present(fb);
                self.display.poll_events();
            }
        }
        RunExit {
            code: 0,
            reason: ExitReason::Halted,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::display::{DisplayError, Headless};
    use crate::io::BufferConsole;
    use crate::isa::Descriptor as D;

    fn config() -> RunConfig {
        RunConfig {
            output: Output::silent(),
            ..RunConfig::default()
        }
    }

    fn machine(program: &[u8]) -> RunState {
        RunState::new(program, config()).unwrap()
    }

    fn step(state: &mut RunState) -> Result<Step, Fault> {
        state.step(&mut BufferConsole::default(), &mut Headless::new())
    }

    fn run(program: &[u8]) -> RunEnvironment<BufferConsole, Headless> {
        run_with_input(program, "")
    }

    fn run_with_input(program: &[u8], input: &str) -> RunEnvironment<BufferConsole, Headless> {
        let mut env =
            RunEnvironment::from_image(program, config(), BufferConsole::new(input), Headless::new())
                .unwrap();
        env.run();
        env
    }

    const LD_IMM: u8 = Opcode::LdImm as u8;
    const HLT: u8 = Opcode::Halt as u8;

    #[test]
    fn load_add_halt() {
        let program = [
            LD_IMM, D::pack(0, 0), 5, 0,
            LD_IMM, D::pack(1, 0), 3, 0,
            Opcode::Add as u8, D::pack(0, 1),
            HLT,
        ];
        let env = run(&program);
        let regs = env.state().regs();
        assert_eq!(regs.r[0], 8);
        assert!(!regs.flags.zero());
        assert!(regs.flags.halted());
        assert!(env.state().diagnostics().log().is_empty());
    }

    #[test]
    fn push_imm_pop() {
        let program = [Opcode::PushImm as u8, 10, 0, Opcode::Pop as u8, D::pack(2, 0), HLT];
        let mut state = machine(&program);
        let sp = state.regs().sp;
        step(&mut state).unwrap();
        assert_eq!(state.regs().sp, sp - 2);
        // Top of stack is addressable as a little-endian word
        assert_eq!(state.memory().read_word(sp - 2), Ok(10));
        step(&mut state).unwrap();
        assert_eq!(state.regs().r[2], 10);
        assert_eq!(state.regs().sp, sp);
    }

    #[test]
    fn push_pop_roundtrip_values() {
        for value in [0u16, 1, 0x7fff, 0x8000, 0xffff] {
            let [lo, hi] = value.to_le_bytes();
            let program = [Opcode::PushImm as u8, lo, hi, Opcode::Pop as u8, D::pack(1, 0), HLT];
            let env = run(&program);
            assert_eq!(env.state().regs().r[1], value);
            assert_eq!(env.state().regs().sp, DEFAULT_MEMORY_SIZE);
        }
    }

    #[test]
    fn call_and_return() {
        // 0: CALL 6; 3: HLT; 4: NOP NOP; 6: LD r0, 7; 10: RET
        let program = [
            Opcode::Call as u8, 6, 0,
            HLT,
            Opcode::Nop as u8, Opcode::Nop as u8,
            LD_IMM, D::pack(0, 0), 7, 0,
            Opcode::Ret as u8,
        ];
        let mut state = machine(&program);
        let sp = state.regs().sp;
        step(&mut state).unwrap();
        assert_eq!(state.pc(), 6);
        // Return address is the byte after the operand
        assert_eq!(state.memory().read_word(sp - 2), Ok(3));
        step(&mut state).unwrap();
        step(&mut state).unwrap();
        assert_eq!(state.pc(), 3);
        assert_eq!(state.regs().sp, sp);
        step(&mut state).unwrap();
        assert!(state.halted());
        assert_eq!(state.regs().r[0], 7);
    }

    #[test]
    fn invalid_opcode_fails_step() {
        let mut state = machine(&[0xcf, HLT]);
        let before = *state.regs();
        assert_eq!(step(&mut state), Ok(Step::Failed));
        assert_eq!(state.regs().r, before.r);
        assert_eq!(state.regs().sp, before.sp);
        assert_eq!(state.regs().flags, before.flags);
        assert_eq!(state.diagnostics().count(ErrorCode::InvalidOpcode), 1);

        let env = run(&[0xcf, HLT]);
        assert_eq!(env.state().diagnostics().count(ErrorCode::InvalidOpcode), 1);
        assert!(!env.state().halted());
    }

    #[test]
    fn keep_going_skips_invalid_opcode() {
        let cfg = RunConfig {
            halt_on_invalid: false,
            ..config()
        };
        let mut env =
            RunEnvironment::from_image([0xcf, HLT], cfg, BufferConsole::default(), Headless::new())
                .unwrap();
        let exit = env.run();
        assert_eq!(exit.reason, ExitReason::Halted);
        assert_eq!(exit.code, 0);
    }

    #[test]
    fn division_by_zero_leaves_destination() {
        let program = [
            LD_IMM, D::pack(0, 0), 9, 0,
            Opcode::DivImm as u8, D::pack(0, 0), 0, 0,
            HLT,
        ];
        let env = run(&program);
        assert_eq!(env.state().regs().r[0], 9);
        assert_eq!(env.state().diagnostics().count(ErrorCode::DivisionByZero), 1);
        assert!(env.state().halted());
    }

    #[test]
    fn memory_operands_are_words() {
        // LD [bp+4], 0x1234 ; LD r1, [bp+4] ; HLT
        let program = [
            LD_IMM, D::pack(7, 0), 100, 0x34, 0x12,
            Opcode::Ld as u8, D::pack(1, 7), 100,
            HLT,
        ];
        let env = run(&program);
        assert_eq!(env.state().memory().read_word(100), Ok(0x1234));
        assert_eq!(env.state().regs().r[1], 0x1234);
    }

    #[test]
    fn out_of_bounds_destination_keeps_alignment() {
        // LD [sp+4], 0xBEEF with sp at the top of memory, then LD r0, 1
        let program = [
            LD_IMM, D::pack(8, 0), 4, 0xef, 0xbe,
            LD_IMM, D::pack(0, 0), 1, 0,
            HLT,
        ];
        let env = run(&program);
        let diag = env.state().diagnostics();
        assert_eq!(diag.count(ErrorCode::OffsetOutOfBounds), 1);
        assert_eq!(diag.count(ErrorCode::NullDestination), 1);
        assert_eq!(env.state().regs().r[0], 1);
        assert!(env.state().halted());
    }

    #[test]
    fn indirect_out_of_bounds_is_warning() {
        let program = [
            LD_IMM, D::pack(3, 0), 0xff, 0xff,
            Opcode::Ld as u8, D::pack(0, 9),
            HLT,
        ];
        let env = run(&program);
        assert_eq!(env.state().diagnostics().count(ErrorCode::RegisterOutOfBounds), 1);
        assert_eq!(env.state().regs().r[0], 0);
        assert!(env.state().halted());
    }

    #[test]
    fn pop_on_empty_stack_is_severe() {
        let mut env = RunEnvironment::from_image(
            [Opcode::Pop as u8, D::pack(0, 0), HLT],
            config(),
            BufferConsole::default(),
            Headless::new(),
        )
        .unwrap();
        let exit = env.run();
        assert_eq!(exit.code, ErrorCode::StackUnderflow.code());
        assert!(matches!(exit.reason, ExitReason::Fault(_)));
    }

    #[test]
    fn push_past_bottom_is_severe() {
        let program = [
            LD_IMM, D::pack(6, 0), 1, 0,
            Opcode::PushImm as u8, 1, 0,
            HLT,
        ];
        let mut env =
            RunEnvironment::from_image(program, config(), BufferConsole::default(), Headless::new())
                .unwrap();
        assert_eq!(env.run().code, ErrorCode::StackOverflow.code());
    }

    #[test]
    fn conditional_jump_skips_operand() {
        // CMP r0, 1 ; JZ 0 (not taken) ; HLT
        let program = [
            Opcode::CmpImm as u8, D::pack(0, 0), 1, 0,
            Opcode::Jz as u8, 0, 0,
            HLT,
        ];
        let env = run(&program);
        assert!(env.state().halted());
        assert_eq!(env.state().pc(), 8);
    }

    #[test]
    fn compare_sets_flags_only() {
        let program = [
            LD_IMM, D::pack(0, 0), 3, 0,
            Opcode::CmpImm as u8, D::pack(0, 0), 3, 0,
            HLT,
        ];
        let env = run(&program);
        assert_eq!(env.state().regs().r[0], 3);
        assert!(env.state().flags().zero());
    }

    #[test]
    fn interrupts() {
        // 0: LIV 9 ; 3: INT (disabled) ; 4: EI ; 5: INT ; 6: CHK ; 7: HLT ; 8: NOP ; 9: CHK ; 10: RETI
        let program = [
            Opcode::Liv as u8, 9, 0,
            Opcode::Int as u8,
            Opcode::Ei as u8,
            Opcode::Int as u8,
            Opcode::ChkInt as u8,
            HLT,
            Opcode::Nop as u8,
            Opcode::ChkInt as u8,
            Opcode::Reti as u8,
        ];
        let mut state = machine(&program);
        step(&mut state).unwrap();
        step(&mut state).unwrap();
        assert_eq!(state.pc(), 4);
        step(&mut state).unwrap();
        step(&mut state).unwrap();
        assert_eq!(state.pc(), 9);
        assert!(state.flags().get(Flag::InterruptActive));
        step(&mut state).unwrap();
        assert!(!state.flags().zero());
        step(&mut state).unwrap();
        assert_eq!(state.pc(), 6);
        assert!(!state.flags().get(Flag::InterruptActive));
        step(&mut state).unwrap();
        assert!(state.flags().zero());
    }

    #[test]
    fn flags_roundtrip_through_stack() {
        let program = [
            Opcode::Pushf as u8,
            Opcode::Popf as u8,
            HLT,
        ];
        let mut state = machine(&program);
        state.regs_mut().flags = Flags::unpack(0b1010_0101);
        let sp = state.regs().sp;
        step(&mut state).unwrap();
        assert_eq!(state.regs().sp, sp - 1);
        state.regs_mut().flags = Flags::default();
        step(&mut state).unwrap();
        assert_eq!(state.flags().pack(), 0b1010_0101);
        assert_eq!(state.regs().sp, sp);
    }

    #[test]
    fn set_family_writes_condition() {
        let program = [
            Opcode::CmpImm as u8, D::pack(0, 0), 0, 0,
            Opcode::Setz as u8, D::pack(1, 0),
            Opcode::Setnz as u8, D::pack(2, 0),
            HLT,
        ];
        let env = run(&program);
        assert_eq!(env.state().regs().r[1], 1);
        assert_eq!(env.state().regs().r[2], 0);
    }

    #[test]
    fn console_io() {
        // IN r0 ; OUT r0 ; IN r1 (eof) ; HLT
        let program = [
            Opcode::In as u8, D::pack(0, 0),
            Opcode::Out as u8, D::pack(0, 0),
            Opcode::In as u8, D::pack(1, 0),
            HLT,
        ];
        let env = run_with_input(&program, "x");
        assert_eq!(env.console().output_string(), "x");
        assert_eq!(env.state().regs().r[0], b'x' as u16);
        assert_eq!(env.state().regs().r[1], 0xffff);
    }

    #[test]
    fn string_io_shares_cursor_register() {
        // LD r4, 200 ; GETS ; LD r3, 200 ; PRINTS ; HLT
        let program = [
            LD_IMM, D::pack(4, 0), 200, 0,
            Opcode::Gets as u8,
            LD_IMM, D::pack(3, 0), 200, 0,
            Opcode::Prints as u8,
            HLT,
        ];
        let env = run_with_input(&program, "hey\nrest");
        assert_eq!(env.console().output_string(), "hey");
        let regs = env.state().regs();
        assert_eq!(regs.r[4], 203);
        assert_eq!(regs.r[3], 203);
        assert_eq!(env.state().memory().read_byte(203), Ok(0));
    }

    #[test]
    fn lea_adds_signed_offset() {
        let program = [
            LD_IMM, D::pack(5, 0), 0x10, 0,
            Opcode::Lea as u8, D::pack(0, 7), 0xfe,
            HLT,
        ];
        let env = run(&program);
        assert_eq!(env.state().regs().r[0], 0x0e);
    }

    #[test]
    fn running_off_program_exits_with_one() {
        let mut env = RunEnvironment::from_image(
            [Opcode::Nop as u8],
            config(),
            BufferConsole::default(),
            Headless::new(),
        )
        .unwrap();
        let exit = env.run();
        assert_eq!(exit.code, 1);
        assert_eq!(exit.reason, ExitReason::RanOffProgram);
    }

    #[test]
    fn drawing() {
        // LD r1, 4 ; LD r2, 4 ; GLINIT ; LD r1, 0xF0 ; GLCOLOR ; LD r1, 1 ; LD r2, 2 ; GLPLOT ; HLT
        let program = [
            LD_IMM, D::pack(1, 0), 4, 0,
            LD_IMM, D::pack(2, 0), 4, 0,
            Opcode::GlInit as u8,
            LD_IMM, D::pack(1, 0), 0xf0, 0,
            Opcode::GlColor as u8,
            LD_IMM, D::pack(1, 0), 1, 0,
            LD_IMM, D::pack(2, 0), 2, 0,
            Opcode::GlPlot as u8,
            HLT,
        ];
        let env = run(&program);
        let fb = env.state().framebuffer().unwrap();
        assert_eq!(fb.pixel(1, 2), Some(0xffff_00ff));
        assert_eq!(env.display().size(), Some((4, 4)));
        assert!(env.display().frames() > 0);
        assert_eq!(env.display().last_frame()[2 * 4 + 1], 0xffff_00ff);
    }

    #[test]
    fn drawing_before_init_warns() {
        let env = run(&[Opcode::GlClear as u8, HLT]);
        assert_eq!(env.state().diagnostics().count(ErrorCode::Display), 1);
        assert!(env.state().halted());
    }

    #[derive(Default)]
    struct NoWindow {
        torn_down: bool,
    }

    impl DisplayBackend for NoWindow {
        fn init(&mut self, _width: u16, _height: u16) -> Result<(), DisplayError> {
            Err(DisplayError("no window available".into()))
        }
        fn present(&mut self, _frame: &Framebuffer) {}
        fn should_close(&self) -> bool {
            false
        }
        fn poll_events(&mut self) {}
        fn teardown(&mut self) -> Result<(), DisplayError> {
            self.torn_down = true;
            Ok(())
        }
    }

    #[test]
    fn display_init_failure_is_severe() {
        let program = [
            LD_IMM, D::pack(1, 0), 4, 0,
            LD_IMM, D::pack(2, 0), 4, 0,
            Opcode::GlInit as u8,
            HLT,
        ];
        let mut env =
            RunEnvironment::from_image(program, config(), BufferConsole::default(), NoWindow::default())
                .unwrap();
        let exit = env.run();
        assert_eq!(exit.code, ErrorCode::Display.code());
        match exit.reason {
            ExitReason::Fault(fault) => {
                assert_eq!(fault.code, ErrorCode::Display);
                assert_eq!(fault.severity, Severity::Severe);
                assert_eq!(fault.context, "no window available");
            }
            other => panic!("unexpected exit {other:?}"),
        }
        assert!(env.display().torn_down);
        assert!(env.state().framebuffer().is_none());
        assert!(!env.state().halted());
    }

    #[test]
    fn jump_predicates_by_opcode() {
        let mut flags = Flags::default();
        assert!(jump_taken(Opcode::Jnz, &flags));
        assert!(jump_taken(Opcode::Jge, &flags));
        assert!(!jump_taken(Opcode::Jl, &flags));
        flags.set(Flag::Carry, true);
        assert!(jump_taken(Opcode::Jc, &flags));
        assert!(!set_condition(Opcode::Setae, &flags));
        assert!(!jump_taken(Opcode::Jmp, &flags));
    }
}
