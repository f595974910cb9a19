//! The machine's console: where print opcodes emit and the input opcode
//! reads. Both ends are injectable so tests can capture output and script
//! input.

use std::io::{BufRead, Write};

pub struct Console {
    output: Box<dyn Write>,
    input: Box<dyn BufRead>,
}

impl Console {
    pub fn new(output: Box<dyn Write>, input: Box<dyn BufRead>) -> Console {
        Console { output, input }
    }

    /// A console wired to the host's stdin and stdout.
    pub fn stdio() -> Console {
        Console::new(
            Box::new(std::io::stdout()),
            Box::new(std::io::BufReader::new(std::io::stdin())),
        )
    }

    /// Emit one value on its own line.
    pub fn emit(&mut self, value: u32) {
        let _ = writeln!(self.output, "{value}");
    }

    /// Emit a free-form diagnostic line. Used by the dump toggles only.
    pub fn diagnostic(&mut self, line: &str) {
        let _ = writeln!(self.output, "{line}");
    }

    /// Read one line and parse it as an unsigned 32-bit integer.
    /// A line that does not parse (or end of input) yields 0.
    pub fn read_u32(&mut self) -> u32 {
        let mut line = String::new();
        match self.input.read_line(&mut line) {
            Ok(_) => line.trim().parse().unwrap_or(0),
            Err(_) => 0,
        }
    }

    /// Block until the user presses enter.
    pub fn wait_for_line(&mut self) {
        let mut line = String::new();
        let _ = self.input.read_line(&mut line);
    }
}
