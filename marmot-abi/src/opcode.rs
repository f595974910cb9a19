//! The instruction set: opcode numbering and operand arity.

use core::fmt;

/// One opcode of the register machine.
///
/// The discriminant is the opcode byte as it appears in a program's
/// memory image. Operands follow the opcode byte as 4-byte little-endian
/// values; how many, and whether each names a register or carries a
/// constant, is fixed per opcode.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Noop = 0,
    Incr = 1,
    Addi = 2,
    Addr = 3,
    Pushr = 4,
    Pushi = 5,
    Movi = 6,
    Movr = 7,
    Movmr = 8,
    Movrm = 9,
    Movmm = 10,
    Printr = 11,
    Printm = 12,
    Jmp = 13,
    Cmpi = 14,
    Cmpr = 15,
    Jlt = 16,
    Jgt = 17,
    Je = 18,
    Call = 19,
    Callm = 20,
    Ret = 21,
    Alloc = 22,
    AcquireLock = 23,
    ReleaseLock = 24,
    Sleep = 25,
    SetPriority = 26,
    Exit = 27,
    FreeMemory = 28,
    MapSharedMem = 29,
    SignalEvent = 30,
    WaitEvent = 31,
    Input = 32,
    MemoryClear = 33,
    TerminateProcess = 34,
    Popr = 35,
    Popm = 36,
}

impl Opcode {
    /// Decode an opcode byte. Returns `None` for bytes outside the
    /// instruction set.
    pub fn from_byte(byte: u8) -> Option<Self> {
        use Opcode::*;
        Some(match byte {
            0 => Noop,
            1 => Incr,
            2 => Addi,
            3 => Addr,
            4 => Pushr,
            5 => Pushi,
            6 => Movi,
            7 => Movr,
            8 => Movmr,
            9 => Movrm,
            10 => Movmm,
            11 => Printr,
            12 => Printm,
            13 => Jmp,
            14 => Cmpi,
            15 => Cmpr,
            16 => Jlt,
            17 => Jgt,
            18 => Je,
            19 => Call,
            20 => Callm,
            21 => Ret,
            22 => Alloc,
            23 => AcquireLock,
            24 => ReleaseLock,
            25 => Sleep,
            26 => SetPriority,
            27 => Exit,
            28 => FreeMemory,
            29 => MapSharedMem,
            30 => SignalEvent,
            31 => WaitEvent,
            32 => Input,
            33 => MemoryClear,
            34 => TerminateProcess,
            35 => Popr,
            36 => Popm,
            _ => return None,
        })
    }

    /// Number of 4-byte operands that follow the opcode byte.
    pub fn operand_count(self) -> usize {
        use Opcode::*;
        match self {
            Noop | Ret | Exit => 0,
            Incr | Pushr | Pushi | Printr | Printm | Jmp | Jlt | Jgt | Je | Call | Callm
            | AcquireLock | ReleaseLock | Sleep | SetPriority | FreeMemory | SignalEvent
            | WaitEvent | Input | TerminateProcess | Popr | Popm => 1,
            Addi | Addr | Movi | Movr | Movmr | Movrm | Movmm | Cmpi | Cmpr | Alloc
            | MapSharedMem | MemoryClear => 2,
        }
    }

    pub fn mnemonic(self) -> &'static str {
        use Opcode::*;
        match self {
            Noop => "noop",
            Incr => "incr",
            Addi => "addi",
            Addr => "addr",
            Pushr => "pushr",
            Pushi => "pushi",
            Movi => "movi",
            Movr => "movr",
            Movmr => "movmr",
            Movrm => "movrm",
            Movmm => "movmm",
            Printr => "printr",
            Printm => "printm",
            Jmp => "jmp",
            Cmpi => "cmpi",
            Cmpr => "cmpr",
            Jlt => "jlt",
            Jgt => "jgt",
            Je => "je",
            Call => "call",
            Callm => "callm",
            Ret => "ret",
            Alloc => "alloc",
            AcquireLock => "acquirelock",
            ReleaseLock => "releaselock",
            Sleep => "sleep",
            SetPriority => "setpriority",
            Exit => "exit",
            FreeMemory => "freememory",
            MapSharedMem => "mapsharedmem",
            SignalEvent => "signalevent",
            WaitEvent => "waitevent",
            Input => "input",
            MemoryClear => "memoryclear",
            TerminateProcess => "terminateprocess",
            Popr => "popr",
            Popm => "popm",
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}
