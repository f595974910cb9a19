#![allow(dead_code)]

use std::io::Cursor;
use std::sync::{Arc, Mutex};

use tempfile::TempDir;

use marmot_kernel::config::Config;
use marmot_kernel::console::Console;
use marmot_kernel::scheduler::Scheduler;

/// A console sink tests can read back after a run.
#[derive(Clone, Default)]
pub struct Captured(Arc<Mutex<Vec<u8>>>);

impl Captured {
    pub fn contents(&self) -> String {
        String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
    }

    /// Lines the machine emitted, in order.
    pub fn lines(&self) -> Vec<String> {
        self.contents().lines().map(str::to_string).collect()
    }
}

impl std::io::Write for Captured {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// A small machine: 16-byte pages, 64 frames, two 2-page shared regions.
pub fn test_config() -> Config {
    Config {
        physical_memory: 1024,
        memory_page_size: 16,
        process_memory: 256,
        stack_size: 64,
        data_size: 32,
        shared_memory_region_size: 32,
        num_of_shared_memory_regions: 2,
        ..Config::default()
    }
}

pub struct Machine {
    pub scheduler: Scheduler,
    pub output: Captured,
    swap: TempDir,
}

impl Machine {
    pub fn swap_dir(&self) -> &std::path::Path {
        self.swap.path()
    }
}

pub fn machine(config: Config, virtual_bytes: usize) -> Machine {
    machine_with_input(config, virtual_bytes, "")
}

pub fn machine_with_input(config: Config, virtual_bytes: usize, input: &str) -> Machine {
    let swap = tempfile::tempdir().unwrap();
    let output = Captured::default();
    let console = Console::new(
        Box::new(output.clone()),
        Box::new(Cursor::new(input.as_bytes().to_vec())),
    );
    let scheduler = Scheduler::new(config, virtual_bytes, console, swap.path()).unwrap();
    Machine {
        scheduler,
        output,
        swap,
    }
}

/// Assemble program text into a memory image.
pub fn assemble(source: &str) -> Vec<u8> {
    let instructions = marmot_kernel::process::loader::parse_source(source).unwrap();
    marmot_abi::encode_program(&instructions)
}
