use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Parser;
use log::warn;

use marmot_kernel::config::Config;
use marmot_kernel::console::Console;
use marmot_kernel::process::loader;
use marmot_kernel::scheduler::Scheduler;

/// A pedagogical virtual operating system: loads each program file as a
/// process and runs them to completion under a priority scheduler.
#[derive(Parser)]
#[command(name = "marmot-os", version)]
struct Args {
    /// Bytes of virtual address space for this run.
    virtual_memory: usize,

    /// Program files to load; each becomes one process.
    #[arg(required = true)]
    programs: Vec<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    marmot_kernel::init();
    let args = Args::parse();

    let config = Config::load(Path::new("machine.json")).context("loading machine.json")?;
    let swap_dir = std::env::current_dir().context("resolving working directory")?;
    let mut scheduler = Scheduler::new(config.clone(), args.virtual_memory, Console::stdio(), swap_dir)
        .context("bringing up the machine")?;

    for path in &args.programs {
        if !path.exists() {
            warn!("skipping {}: no such file", path.display());
            continue;
        }
        let image = match loader::load_program(path) {
            Ok(image) => image,
            Err(e) => {
                warn!("skipping {}: {e}", path.display());
                continue;
            }
        };
        if config.dump_program {
            dump_program(path, &image);
        }
        scheduler
            .create_process(&image, config.process_memory)
            .with_context(|| format!("creating a process for {}", path.display()))?;
    }

    scheduler.run();
    Ok(())
}

fn dump_program(path: &Path, image: &[u8]) {
    println!("program {} ({} bytes):", path.display(), image.len());
    for base in (0..image.len()).step_by(16) {
        let row: Vec<String> = image[base..(base + 16).min(image.len())]
            .iter()
            .map(|byte| format!("{byte:02x}"))
            .collect();
        println!("  {base:#06x}: {}", row.join(" "));
    }
}
