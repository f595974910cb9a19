//! The scheduler and master execution loop.
//!
//! The scheduler owns everything: the CPU state, the memory manager, the
//! lock and event tables, the console, and the process table. Each outer
//! iteration reaps terminated processes, sorts the table, and dispatches
//! every eligible process once; each dispatch runs opcodes until the
//! process leaves `Running`, its time quantum elapses, or a wake-up
//! preempts it.

use std::io;
use std::path::PathBuf;

use log::{info, warn};
use marmot_abi::TIME_QUANTUM;
use thiserror::Error;

use crate::config::Config;
use crate::console::Console;
use crate::cpu::CpuState;
use crate::interpreter::{self, ExecContext};
use crate::memory::{MemoryManager, OutOfMemoryError, round_to_page};
use crate::process::{Pid, PidAllocator, Process, ProcessState, ProcessTable};
use crate::sync::{EventTable, LockTable};

#[derive(Debug, Error)]
pub enum SpawnError {
    #[error(transparent)]
    OutOfMemory(#[from] OutOfMemoryError),

    #[error("program of {program_bytes} bytes does not fit in {memory_size} bytes of process memory")]
    ProgramTooLarge {
        program_bytes: usize,
        memory_size: usize,
    },
}

pub struct Scheduler {
    config: Config,
    cpu: CpuState,
    memory: MemoryManager,
    locks: LockTable,
    events: EventTable,
    processes: ProcessTable,
    pids: PidAllocator,
    console: Console,
}

impl Scheduler {
    /// Bring up a machine: build the memory manager over `virtual_bytes`
    /// of address space, with swap files in `swap_dir`.
    pub fn new(
        config: Config,
        virtual_bytes: usize,
        console: Console,
        swap_dir: impl Into<PathBuf>,
    ) -> io::Result<Scheduler> {
        let memory = MemoryManager::new(&config, virtual_bytes, swap_dir)?;
        Ok(Scheduler {
            config,
            cpu: CpuState::new(),
            memory,
            locks: LockTable::new(),
            events: EventTable::new(),
            processes: ProcessTable::new(),
            pids: PidAllocator::new(),
            console,
        })
    }

    /// Create a process from an encoded program image.
    ///
    /// Maps `memory_size` bytes of address space (rounded up to pages),
    /// copies the image to process-virtual address 0, lays out the
    /// code/data/heap/stack segments, and appends the process to the
    /// table in state `New`.
    pub fn create_process(
        &mut self,
        image: &[u8],
        memory_size: usize,
    ) -> Result<Pid, SpawnError> {
        let page_size = self.memory.page_size();
        // At least one page, so the stack pointer has somewhere to live.
        let memory_size = round_to_page(memory_size.max(1), page_size);
        let code_size = round_to_page(image.len(), page_size);
        let data_size = round_to_page(self.config.data_size, page_size);
        let stack_size = round_to_page(self.config.stack_size, page_size);
        if code_size > memory_size {
            return Err(SpawnError::ProgramTooLarge {
                program_bytes: image.len(),
                memory_size,
            });
        }

        let pid = self.pids.allocate();
        self.memory.map_process(memory_size, pid)?;
        for (offset, &byte) in image.iter().enumerate() {
            self.memory
                .write(pid, offset, byte)
                .expect("program image fits the pages just mapped");
        }

        let mut process = Process::new(pid, memory_size, code_size, data_size, stack_size);
        let heap_pages = self
            .memory
            .pages_in_range(pid, process.heap_start(), process.heap_end());
        process.set_heap_pages(heap_pages);
        info!(
            "created pid {pid}: {memory_size} bytes (code {code_size}, data {data_size}, \
             heap {}, stack {stack_size})",
            process.heap_end().saturating_sub(process.heap_start())
        );
        self.processes.push(process);
        Ok(pid)
    }

    /// Run until the process table empties.
    pub fn run(&mut self) {
        info!("scheduler starting with {} processes", self.processes.len());
        while self.tick() {}
        info!("no processes remain; scheduler exiting");
        if self.config.dump_physical_memory {
            self.dump_physical_memory();
        }
        if self.config.pause_on_exit {
            self.console.wait_for_line();
        }
    }

    /// One outer iteration: reap, sort, and make one dispatch pass.
    /// Returns false once the table is empty.
    ///
    /// When nothing was dispatchable the wake scan still runs once, so an
    /// all-waiting table keeps making progress: sleepers tick down and
    /// lock or event waiters can claim what has been released.
    pub fn tick(&mut self) -> bool {
        self.reap();
        self.processes.sort_for_dispatch();
        if self.processes.is_empty() {
            return false;
        }
        let order: Vec<Pid> = self.processes.iter().map(|p| p.id()).collect();
        let mut dispatched = false;
        for pid in order {
            let eligible = self
                .processes
                .get(pid)
                .is_some_and(|p| p.state().is_dispatchable());
            if eligible {
                self.dispatch(pid);
                dispatched = true;
            }
        }
        if !dispatched {
            self.wake_pass();
        }
        true
    }

    /// Run one process until it yields: load its context, execute opcodes
    /// with a wake scan after each, and save the context back.
    fn dispatch(&mut self, pid: Pid) {
        {
            let process = self
                .processes
                .get_mut(pid)
                .expect("dispatched pid is in the table");
            self.cpu.load(process);
            process.set_state(ProcessState::Running);
        }

        let mut preempt = false;
        loop {
            let result = {
                let mut ctx = ExecContext {
                    cpu: &mut self.cpu,
                    memory: &mut self.memory,
                    locks: &mut self.locks,
                    events: &mut self.events,
                    processes: &mut self.processes,
                    console: &mut self.console,
                    current: pid,
                    dump_instruction: self.config.dump_instruction,
                };
                interpreter::step(&mut ctx)
            };
            if let Err(fault) = result {
                warn!("{fault}");
                self.processes
                    .get_mut(pid)
                    .expect("current process is in the table")
                    .set_state(ProcessState::Terminated);
                break;
            }

            self.processes
                .get_mut(pid)
                .expect("current process is in the table")
                .clock_cycles += 1;
            if self.config.dump_registers {
                let dump = self.cpu.dump();
                self.console.diagnostic(&dump);
            }

            preempt |= self.wake_pass();

            let (state, cycles) = {
                let process = self
                    .processes
                    .get(pid)
                    .expect("current process is in the table");
                (process.state(), process.clock_cycles)
            };
            if state != ProcessState::Running || preempt {
                break;
            }
            if cycles != 0 && cycles % TIME_QUANTUM == 0 {
                break;
            }
        }

        let final_state = {
            let process = self
                .processes
                .get_mut(pid)
                .expect("current process is in the table");
            if process.state() != ProcessState::Terminated && !process.state().is_waiting() {
                process.set_state(ProcessState::Ready);
            }
            process.context_switches += 1;
            self.cpu.store(process);
            process.state()
        };
        self.cpu.clear();
        if self.config.dump_context_switch {
            self.console
                .diagnostic(&format!("context switch: pid {pid} now {final_state}"));
        }
    }

    /// Scan the whole table once, waking whatever can wake:
    /// - sleepers tick down and wake at zero (a zero counter on entry
    ///   means sleep forever)
    /// - event waiters consume a signaled event
    /// - lock waiters claim a freed lock, becoming its recorded holder
    ///
    /// Returns whether anything woke, which preempts the running process.
    fn wake_pass(&mut self) -> bool {
        let mut woke = false;
        for process in self.processes.iter_mut() {
            match process.state() {
                ProcessState::Sleeping => {
                    if process.sleep_counter != 0 {
                        process.sleep_counter -= 1;
                        if process.sleep_counter == 0 {
                            process.set_state(ProcessState::Ready);
                            woke = true;
                        }
                    }
                }
                ProcessState::WaitingOnEvent => {
                    if self.events.consume_if_signaled(process.waiting_event) {
                        process.waiting_event = 0;
                        process.set_state(ProcessState::Ready);
                        woke = true;
                    }
                }
                ProcessState::WaitingOnLock => {
                    if self.locks.holder(process.waiting_lock).is_none() {
                        self.locks.claim(process.waiting_lock, process.id());
                        process.waiting_lock = 0;
                        process.set_state(ProcessState::Ready);
                        woke = true;
                    }
                }
                _ => {}
            }
        }
        woke
    }

    /// Remove terminated processes and release what they held.
    fn reap(&mut self) {
        let dead: Vec<Pid> = self
            .processes
            .iter()
            .filter(|p| p.state() == ProcessState::Terminated)
            .map(|p| p.id())
            .collect();
        for pid in dead {
            let page_faults = self.memory.page_faults_for_process(pid);
            {
                let process = self
                    .processes
                    .get_mut(pid)
                    .expect("terminated pid is in the table");
                info!(
                    "pid {pid} done: {} cycles, {} context switches, {page_faults} page faults",
                    process.clock_cycles, process.context_switches
                );
                self.memory.release_process(pid);
                process.clear_heap_pages();
            }
            self.locks.release_all(pid);
            self.processes.remove(pid);
        }
    }

    fn dump_physical_memory(&mut self) {
        let physical = self.memory.physical();
        for base in (0..physical.len()).step_by(16) {
            let row: Vec<String> = (base..(base + 16).min(physical.len()))
                .map(|offset| format!("{:02x}", physical.byte(offset)))
                .collect();
            self.console
                .diagnostic(&format!("{base:#06x}: {}", row.join(" ")));
        }
    }

    // -------------------------------------------------------------------
    // Introspection
    // -------------------------------------------------------------------

    pub fn process(&self, pid: Pid) -> Option<&Process> {
        self.processes.get(pid)
    }

    pub fn process_count(&self) -> usize {
        self.processes.len()
    }

    pub fn memory(&self) -> &MemoryManager {
        &self.memory
    }

    pub fn locks(&self) -> &LockTable {
        &self.locks
    }

    pub fn events(&self) -> &EventTable {
        &self.events
    }
}
