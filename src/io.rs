use std::collections::VecDeque;
use std::io::{stdin, stdout, IsTerminal, Read, Write};

use console::Term;

/// Host character stream used by `IN`, `OUT`, `GETS` and `PRINTS`.
pub trait Console {
    /// Blocking read of one byte. `None` once input is exhausted.
    fn read_byte(&mut self) -> Option<u8>;
    fn write_byte(&mut self, byte: u8);
    fn flush(&mut self) {}
}

/// Process stdin/stdout. Reads unbuffered keypresses when attached to a terminal.
#[derive(Debug, Default)]
pub struct StdConsole {
    /// Remaining UTF-8 bytes of the last keypress.
    pending: VecDeque<u8>,
}

impl StdConsole {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Console for StdConsole {
    fn read_byte(&mut self) -> Option<u8> {
        if let Some(byte) = self.pending.pop_front() {
            return Some(byte);
        }
        if stdin().is_terminal() {
            let ch = match Term::stdout().read_char().ok()? {
                '\r' => '\n',
                ch => ch,
            };
            let mut buf = [0; 4];
            self.pending.extend(ch.encode_utf8(&mut buf).bytes());
            // Echo, since the terminal is unbuffered
            print!("{ch}");
            let _ = stdout().flush();
            self.pending.pop_front()
        } else {
            let mut buf = [0; 1];
            stdin().read_exact(&mut buf).ok()?;
            Some(buf[0])
        }
    }

    fn write_byte(&mut self, byte: u8) {
        let _ = stdout().write_all(&[byte]);
    }

    fn flush(&mut self) {
        let _ = stdout().flush();
    }
}

/// In-memory console for tests and embedding.
#[derive(Debug, Default)]
pub struct BufferConsole {
    input: VecDeque<u8>,
    output: Vec<u8>,
}

impl BufferConsole {
    pub fn new(input: impl AsRef<[u8]>) -> Self {
        BufferConsole {
            input: input.as_ref().iter().copied().collect(),
            output: Vec::new(),
        }
    }

    pub fn output(&self) -> &[u8] {
        &self.output
    }

    pub fn output_string(&self) -> String {
        String::from_utf8_lossy(&self.output).into_owned()
    }
}

impl Console for BufferConsole {
    fn read_byte(&mut self) -> Option<u8> {
        self.input.pop_front()
    }

    fn write_byte(&mut self, byte: u8) {
        self.output.push(byte);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_console() {
        let mut cons = BufferConsole::new("ab");
        assert_eq!(cons.read_byte(), Some(b'a'));
        assert_eq!(cons.read_byte(), Some(b'b'));
        assert_eq!(cons.read_byte(), None);
        cons.write_byte(b'h');
        cons.write_byte(b'i');
        assert_eq!(cons.output_string(), "hi");
    }
}
