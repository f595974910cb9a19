//! The instruction interpreter.
//!
//! One call to [`step`] fetches, decodes, and executes exactly one opcode
//! for the current process. Everything an opcode may touch is borrowed
//! into an [`ExecContext`] for the duration of the step; faults come back
//! as values and are handled by the dispatch loop, never unwound.

mod syscalls;

use log::trace;
use marmot_abi::{NUM_REGISTERS, Opcode};

use crate::console::Console;
use crate::cpu::CpuState;
use crate::fault::Fault;
use crate::memory::MemoryManager;
use crate::process::{Pid, ProcessTable};
use crate::sync::{EventTable, LockTable};

/// Everything the current opcode may read or write.
pub struct ExecContext<'a> {
    pub cpu: &'a mut CpuState,
    pub memory: &'a mut MemoryManager,
    pub locks: &'a mut LockTable,
    pub events: &'a mut EventTable,
    pub processes: &'a mut ProcessTable,
    pub console: &'a mut Console,
    pub current: Pid,
    /// The DumpInstruction diagnostic toggle.
    pub dump_instruction: bool,
}

/// Execute one opcode for the current process.
pub fn step(ctx: &mut ExecContext) -> Result<(), Fault> {
    let pid = ctx.current;
    let ip = ctx.cpu.ip();
    let byte = ctx
        .memory
        .read(pid, ip as usize)
        .map_err(|e| Fault::from_memory(pid, e))?;
    let opcode = Opcode::from_byte(byte).ok_or(Fault::IllegalOpcode { pid, byte })?;
    ctx.cpu.set_ip(ip.wrapping_add(1));

    let count = opcode.operand_count();
    let param1 = if count >= 1 {
        Some(fetch_operand(ctx)?)
    } else {
        None
    };
    let param2 = if count >= 2 {
        Some(fetch_operand(ctx)?)
    } else {
        None
    };

    if ctx.dump_instruction {
        let params: Vec<String> = [param1, param2]
            .into_iter()
            .flatten()
            .map(|p| p.to_string())
            .collect();
        ctx.console
            .diagnostic(&format!("[{pid}@{ip}] {opcode} {}", params.join(" ")));
    }
    trace!("pid {pid} ip {ip}: {opcode} {param1:?} {param2:?}");

    execute(ctx, opcode, param1, param2)
}

/// Read one 4-byte little-endian operand at IP and advance past it.
fn fetch_operand(ctx: &mut ExecContext) -> Result<u32, Fault> {
    let ip = ctx.cpu.ip();
    let value = ctx
        .memory
        .read_u32(ctx.current, ip as usize)
        .map_err(|e| Fault::from_memory(ctx.current, e))?;
    ctx.cpu.set_ip(ip.wrapping_add(4));
    Ok(value)
}

/// Validate a register operand.
fn reg(ctx: &ExecContext, operand: Option<u32>) -> Result<usize, Fault> {
    let index = operand.expect("opcode arity guarantees the operand");
    if (1..=NUM_REGISTERS as u32).contains(&index) {
        Ok(index as usize)
    } else {
        Err(Fault::IllegalRegister {
            pid: ctx.current,
            index,
        })
    }
}

fn constant(operand: Option<u32>) -> u32 {
    operand.expect("opcode arity guarantees the operand")
}

/// Displacements are signed and relative to the IP after operand fetch.
fn jump(cpu: &mut CpuState, displacement: u32) {
    let ip = cpu.ip();
    cpu.set_ip(ip.wrapping_add_signed(displacement as i32));
}

/// Push four bytes, growing the stack downward. Crossing below the stack
/// floor is a fault.
fn push(ctx: &mut ExecContext, value: u32) -> Result<(), Fault> {
    let pid = ctx.current;
    let floor = ctx
        .processes
        .get(pid)
        .expect("current process is in the table")
        .stack_floor();
    let new_sp = ctx.cpu.sp() as i64 - 4;
    if new_sp < floor as i64 {
        return Err(Fault::Stack {
            pid,
            overflow: (floor as i64 - new_sp) as usize,
        });
    }
    ctx.memory
        .write_u32(pid, new_sp as usize, value)
        .map_err(|e| Fault::from_memory(pid, e))?;
    ctx.cpu.set_sp(new_sp as u32);
    Ok(())
}

/// Pop four bytes: read them, zero them, shrink the stack.
fn pop(ctx: &mut ExecContext) -> Result<u32, Fault> {
    let pid = ctx.current;
    let sp = ctx.cpu.sp() as usize;
    let value = ctx
        .memory
        .read_u32(pid, sp)
        .map_err(|e| Fault::from_memory(pid, e))?;
    ctx.memory
        .set_range(pid, sp, 4, 0)
        .map_err(|e| Fault::from_memory(pid, e))?;
    ctx.cpu.set_sp((sp + 4) as u32);
    Ok(value)
}

fn execute(
    ctx: &mut ExecContext,
    opcode: Opcode,
    param1: Option<u32>,
    param2: Option<u32>,
) -> Result<(), Fault> {
    let pid = ctx.current;
    match opcode {
        Opcode::Noop => {}

        Opcode::Incr => {
            let r = reg(ctx, param1)?;
            ctx.cpu.set_reg(r, ctx.cpu.reg(r).wrapping_add(1));
        }
        Opcode::Addi => {
            let r = reg(ctx, param1)?;
            let k = constant(param2);
            ctx.cpu.set_reg(r, ctx.cpu.reg(r).wrapping_add(k));
        }
        Opcode::Addr => {
            let a = reg(ctx, param1)?;
            let b = reg(ctx, param2)?;
            ctx.cpu.set_reg(a, ctx.cpu.reg(a).wrapping_add(ctx.cpu.reg(b)));
        }

        Opcode::Pushr => {
            let r = reg(ctx, param1)?;
            let value = ctx.cpu.reg(r);
            push(ctx, value)?;
        }
        Opcode::Pushi => {
            let value = constant(param1);
            push(ctx, value)?;
        }
        Opcode::Popr => {
            let r = reg(ctx, param1)?;
            let value = pop(ctx)?;
            ctx.cpu.set_reg(r, value);
        }
        Opcode::Popm => {
            let r = reg(ctx, param1)?;
            let address = ctx.cpu.reg(r) as usize;
            let value = pop(ctx)?;
            ctx.memory
                .write_u32(pid, address, value)
                .map_err(|e| Fault::from_memory(pid, e))?;
        }

        Opcode::Movi => {
            let r = reg(ctx, param1)?;
            ctx.cpu.set_reg(r, constant(param2));
        }
        Opcode::Movr => {
            let a = reg(ctx, param1)?;
            let b = reg(ctx, param2)?;
            ctx.cpu.set_reg(a, ctx.cpu.reg(b));
        }
        Opcode::Movmr => {
            let a = reg(ctx, param1)?;
            let b = reg(ctx, param2)?;
            let value = ctx
                .memory
                .read_u32(pid, ctx.cpu.reg(b) as usize)
                .map_err(|e| Fault::from_memory(pid, e))?;
            ctx.cpu.set_reg(a, value);
        }
        Opcode::Movrm => {
            let a = reg(ctx, param1)?;
            let b = reg(ctx, param2)?;
            ctx.memory
                .write_u32(pid, ctx.cpu.reg(a) as usize, ctx.cpu.reg(b))
                .map_err(|e| Fault::from_memory(pid, e))?;
        }
        Opcode::Movmm => {
            let a = reg(ctx, param1)?;
            let b = reg(ctx, param2)?;
            let value = ctx
                .memory
                .read_u32(pid, ctx.cpu.reg(b) as usize)
                .map_err(|e| Fault::from_memory(pid, e))?;
            ctx.memory
                .write_u32(pid, ctx.cpu.reg(a) as usize, value)
                .map_err(|e| Fault::from_memory(pid, e))?;
        }

        Opcode::Printr => {
            let r = reg(ctx, param1)?;
            let value = ctx.cpu.reg(r);
            ctx.console.emit(value);
        }
        Opcode::Printm => {
            let r = reg(ctx, param1)?;
            let byte = ctx
                .memory
                .read(pid, ctx.cpu.reg(r) as usize)
                .map_err(|e| Fault::from_memory(pid, e))?;
            ctx.console.emit(byte as u32);
        }
        Opcode::Input => {
            let r = reg(ctx, param1)?;
            let value = ctx.console.read_u32();
            ctx.cpu.set_reg(r, value);
        }

        Opcode::Jmp => {
            let r = reg(ctx, param1)?;
            let displacement = ctx.cpu.reg(r);
            jump(ctx.cpu, displacement);
        }
        Opcode::Cmpi => {
            let r = reg(ctx, param1)?;
            ctx.cpu.compare(ctx.cpu.reg(r), constant(param2));
        }
        Opcode::Cmpr => {
            let a = reg(ctx, param1)?;
            let b = reg(ctx, param2)?;
            ctx.cpu.compare(ctx.cpu.reg(a), ctx.cpu.reg(b));
        }
        Opcode::Jlt => {
            let r = reg(ctx, param1)?;
            if ctx.cpu.sign_flag() {
                let displacement = ctx.cpu.reg(r);
                jump(ctx.cpu, displacement);
            }
        }
        Opcode::Jgt => {
            let r = reg(ctx, param1)?;
            if !ctx.cpu.sign_flag() {
                let displacement = ctx.cpu.reg(r);
                jump(ctx.cpu, displacement);
            }
        }
        Opcode::Je => {
            let r = reg(ctx, param1)?;
            if ctx.cpu.zero_flag() {
                let displacement = ctx.cpu.reg(r);
                jump(ctx.cpu, displacement);
            }
        }

        Opcode::Call => {
            let r = reg(ctx, param1)?;
            let displacement = ctx.cpu.reg(r);
            let return_ip = ctx.cpu.ip();
            push(ctx, return_ip)?;
            jump(ctx.cpu, displacement);
        }
        Opcode::Callm => {
            let r = reg(ctx, param1)?;
            let displacement = ctx
                .memory
                .read(pid, ctx.cpu.reg(r) as usize)
                .map_err(|e| Fault::from_memory(pid, e))?;
            let return_ip = ctx.cpu.ip();
            push(ctx, return_ip)?;
            jump(ctx.cpu, displacement as u32);
        }
        Opcode::Ret => {
            let target = pop(ctx)?;
            ctx.cpu.set_ip(target);
        }

        Opcode::MemoryClear => {
            let a = reg(ctx, param1)?;
            let b = reg(ctx, param2)?;
            let start = ctx.cpu.reg(a) as usize;
            let len = ctx.cpu.reg(b) as usize;
            ctx.memory
                .set_range(pid, start, len, 0)
                .map_err(|e| Fault::from_memory(pid, e))?;
        }

        Opcode::Alloc => syscalls::alloc(ctx, param1, param2)?,
        Opcode::FreeMemory => syscalls::free_memory(ctx, param1)?,
        Opcode::MapSharedMem => syscalls::map_shared_mem(ctx, param1, param2)?,
        Opcode::AcquireLock => syscalls::acquire_lock(ctx, param1)?,
        Opcode::ReleaseLock => syscalls::release_lock(ctx, param1)?,
        Opcode::SignalEvent => syscalls::signal_event(ctx, param1)?,
        Opcode::WaitEvent => syscalls::wait_event(ctx, param1)?,
        Opcode::Sleep => syscalls::sleep(ctx, param1)?,
        Opcode::SetPriority => syscalls::set_priority(ctx, param1)?,
        Opcode::Exit => syscalls::exit(ctx),
        Opcode::TerminateProcess => syscalls::terminate_process(ctx, param1)?,
    }
    Ok(())
}
