//! Process-fatal faults.
//!
//! A fault terminates only the offending process. The interpreter returns
//! faults as values; the dispatch loop catches them between opcodes, marks
//! the process terminated, and lets the next reap release its resources.

use thiserror::Error;

use crate::memory::MemoryError;
use crate::process::Pid;

#[derive(Debug, Error)]
pub enum Fault {
    /// The process touched an offset outside every page it owns or shares.
    #[error("pid {pid}: access to unmapped address {address:#x}")]
    Memory { pid: Pid, address: usize },

    /// A push would have crossed below the stack floor.
    #[error("pid {pid}: stack overflow by {overflow} bytes")]
    Stack { pid: Pid, overflow: usize },

    /// No contiguous run of free heap pages covers the request.
    #[error("pid {pid}: heap allocation of {requested} bytes failed")]
    Heap { pid: Pid, requested: usize },

    /// The byte at IP is not an opcode.
    #[error("pid {pid}: illegal opcode byte {byte:#04x}")]
    IllegalOpcode { pid: Pid, byte: u8 },

    /// A register operand named a register outside R1..=R11.
    #[error("pid {pid}: register operand r{index} out of range")]
    IllegalRegister { pid: Pid, index: u32 },

    /// Swap I/O failed underneath a memory access.
    #[error("pid {pid}: swap i/o failed for page {page_number}: {source}")]
    Swap {
        pid: Pid,
        page_number: usize,
        source: std::io::Error,
    },
}

impl Fault {
    /// Attribute a memory-manager error to the faulting process.
    pub fn from_memory(pid: Pid, error: MemoryError) -> Fault {
        match error {
            MemoryError::Unmapped { pid, address } => Fault::Memory { pid, address },
            MemoryError::Swap {
                page_number,
                source,
            } => Fault::Swap {
                pid,
                page_number,
                source,
            },
        }
    }
}
