//! Machine configuration.

use std::fs;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed config file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("MemoryPageSize must be a nonzero multiple of 4, got {0}")]
    BadPageSize(usize),
}

/// Machine configuration, loaded from `machine.json` in the working
/// directory when present. Keys are spelled exactly as they appear on
/// disk; any missing key takes its default.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Config {
    /// Bytes of physical memory, rounded up to the page size.
    pub physical_memory: usize,
    /// The page size. Must be a nonzero multiple of 4.
    pub memory_page_size: usize,
    /// Default per-process memory budget in bytes.
    pub process_memory: usize,
    /// Bytes reserved at the top of each process for its stack.
    pub stack_size: usize,
    /// Bytes reserved after the code segment for data.
    pub data_size: usize,
    /// Bytes per shared memory region.
    pub shared_memory_region_size: usize,
    /// How many shared memory regions to reserve at boot.
    pub num_of_shared_memory_regions: usize,
    /// Diagnostic toggles. None of these affect semantics.
    pub dump_physical_memory: bool,
    pub dump_registers: bool,
    pub dump_instruction: bool,
    pub dump_context_switch: bool,
    pub dump_program: bool,
    /// Wait for a line of input before the scheduler returns.
    pub pause_on_exit: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            physical_memory: 1024,
            memory_page_size: 16,
            process_memory: 384,
            stack_size: 64,
            data_size: 64,
            shared_memory_region_size: 64,
            num_of_shared_memory_regions: 2,
            dump_physical_memory: false,
            dump_registers: false,
            dump_instruction: false,
            dump_context_switch: false,
            dump_program: false,
            pause_on_exit: false,
        }
    }
}

impl Config {
    /// Read a config file, falling back to defaults when it does not
    /// exist. A present-but-malformed file is an error, not a fallback.
    pub fn load(path: &Path) -> Result<Config, ConfigError> {
        let config = if path.exists() {
            serde_json::from_str::<Config>(&fs::read_to_string(path)?)?
        } else {
            Config::default()
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.memory_page_size == 0 || self.memory_page_size % 4 != 0 {
            return Err(ConfigError::BadPageSize(self.memory_page_size));
        }
        Ok(())
    }
}
