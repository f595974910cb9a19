//! Process management.
//!
//! This module contains all process-related functionality:
//! - pid allocation
//! - the process control block and its layout fields
//! - the process table the scheduler works over
//! - the program-file loader

pub mod loader;
mod state;

pub use state::ProcessState;

use core::fmt;

use marmot_abi::{DATA_REGISTER, DEFAULT_PRIORITY, MAX_PRIORITY, REGISTER_SLOTS, SP_REGISTER};

/// Unique process identifier. Pid 0 is reserved for the OS itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Pid(u32);

impl Pid {
    /// The OS's own pid; pages owned by it are free for assignment.
    pub const OS: Pid = Pid(0);

    pub fn from_u32(raw: u32) -> Pid {
        Pid(raw)
    }

    pub fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Hands out pids monotonically, starting after the OS's.
#[derive(Debug)]
pub struct PidAllocator {
    next: u32,
}

impl PidAllocator {
    pub fn new() -> PidAllocator {
        PidAllocator { next: 1 }
    }

    pub fn allocate(&mut self) -> Pid {
        let pid = Pid(self.next);
        self.next += 1;
        pid
    }
}

impl Default for PidAllocator {
    fn default() -> Self {
        PidAllocator::new()
    }
}

/// A process: its control block and saved context.
#[derive(Debug)]
pub struct Process {
    pid: Pid,
    memory_size: usize,
    /// Saved register file, indexed by register number; slot 0 unused.
    pub registers: [u32; REGISTER_SLOTS],
    pub sign_flag: bool,
    pub zero_flag: bool,
    state: ProcessState,
    priority: u32,
    /// Opcodes executed across all dispatches.
    pub clock_cycles: u64,
    pub context_switches: u64,
    /// Remaining sleep, decremented once per wake scan. Zero while
    /// sleeping means sleep forever.
    pub sleep_counter: u32,
    /// Lock id this process is blocked on, or 0.
    pub waiting_lock: u32,
    /// Event id this process is blocked on, or 0.
    pub waiting_event: u32,
    /// Page-table indices of the pages backing the heap segment.
    heap_pages: Vec<usize>,
    code_size: usize,
    data_size: usize,
    stack_size: usize,
}

impl Process {
    /// Lay out a fresh process over `memory_size` bytes of address space:
    /// code from 0, data after it, heap up to the stack, stack at the
    /// top. SP starts at the last byte, R9 points at the data segment,
    /// and IP at 0.
    pub fn new(
        pid: Pid,
        memory_size: usize,
        code_size: usize,
        data_size: usize,
        stack_size: usize,
    ) -> Process {
        let mut registers = [0u32; REGISTER_SLOTS];
        registers[SP_REGISTER] = (memory_size - 1) as u32;
        registers[DATA_REGISTER] = code_size as u32;
        Process {
            pid,
            memory_size,
            registers,
            sign_flag: false,
            zero_flag: false,
            state: ProcessState::New,
            priority: DEFAULT_PRIORITY,
            clock_cycles: 0,
            context_switches: 0,
            sleep_counter: 0,
            waiting_lock: 0,
            waiting_event: 0,
            heap_pages: Vec::new(),
            code_size,
            data_size,
            stack_size,
        }
    }

    pub fn id(&self) -> Pid {
        self.pid
    }

    pub fn state(&self) -> ProcessState {
        self.state
    }

    pub fn set_state(&mut self, state: ProcessState) {
        self.state = state;
    }

    pub fn priority(&self) -> u32 {
        self.priority
    }

    /// Priorities are clamped to the valid range on every change.
    pub fn set_priority(&mut self, priority: u32) {
        self.priority = priority.min(MAX_PRIORITY);
    }

    pub fn memory_size(&self) -> usize {
        self.memory_size
    }

    pub fn code_size(&self) -> usize {
        self.code_size
    }

    pub fn data_size(&self) -> usize {
        self.data_size
    }

    pub fn stack_size(&self) -> usize {
        self.stack_size
    }

    /// First byte of the heap segment.
    pub fn heap_start(&self) -> usize {
        (self.code_size + self.data_size).min(self.memory_size)
    }

    /// One past the last byte of the heap segment.
    pub fn heap_end(&self) -> usize {
        self.memory_size.saturating_sub(self.stack_size)
    }

    /// Lowest address the stack pointer may reach.
    pub fn stack_floor(&self) -> usize {
        (self.memory_size - 1).saturating_sub(self.stack_size)
    }

    pub fn heap_pages(&self) -> &[usize] {
        &self.heap_pages
    }

    pub fn set_heap_pages(&mut self, pages: Vec<usize>) {
        self.heap_pages = pages;
    }

    pub fn clear_heap_pages(&mut self) {
        self.heap_pages.clear();
    }
}

/// The process table: every live process, in dispatch order.
#[derive(Debug, Default)]
pub struct ProcessTable {
    processes: Vec<Process>,
}

impl ProcessTable {
    pub fn new() -> ProcessTable {
        ProcessTable {
            processes: Vec::new(),
        }
    }

    pub fn push(&mut self, process: Process) {
        self.processes.push(process);
    }

    pub fn get(&self, pid: Pid) -> Option<&Process> {
        self.processes.iter().find(|p| p.id() == pid)
    }

    pub fn get_mut(&mut self, pid: Pid) -> Option<&mut Process> {
        self.processes.iter_mut().find(|p| p.id() == pid)
    }

    pub fn remove(&mut self, pid: Pid) -> Option<Process> {
        let index = self.processes.iter().position(|p| p.id() == pid)?;
        Some(self.processes.remove(index))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Process> {
        self.processes.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Process> {
        self.processes.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.processes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processes.is_empty()
    }

    /// Order for the dispatch pass: priority descending, then executed
    /// cycles ascending so starved processes move up among equals. The
    /// sort is stable beyond that key.
    pub fn sort_for_dispatch(&mut self) {
        self.processes.sort_by(|a, b| {
            b.priority()
                .cmp(&a.priority())
                .then(a.clock_cycles.cmp(&b.clock_cycles))
        });
    }
}
