//! The opcodes that reach into the operating system: heap, shared
//! memory, locks, events, sleep, priority, and termination.
//!
//! Lock and event opcodes accept ids 1 through 10 only; anything else is
//! a silent no-op, as is releasing a lock the caller does not hold or
//! re-acquiring one it does.

use log::debug;

use crate::fault::Fault;
use crate::process::{Pid, ProcessState};
use crate::sync::{EventTable, LockTable};

use super::{ExecContext, reg};

pub(super) fn alloc(
    ctx: &mut ExecContext,
    param1: Option<u32>,
    param2: Option<u32>,
) -> Result<(), Fault> {
    let size_reg = reg(ctx, param1)?;
    let dest_reg = reg(ctx, param2)?;
    let bytes = ctx.cpu.reg(size_reg) as usize;
    let process = ctx
        .processes
        .get(ctx.current)
        .expect("current process is in the table");
    match ctx.memory.heap_alloc(process, bytes) {
        Some(start) => {
            ctx.cpu.set_reg(dest_reg, start as u32);
            Ok(())
        }
        None => Err(Fault::Heap {
            pid: ctx.current,
            requested: bytes,
        }),
    }
}

pub(super) fn free_memory(ctx: &mut ExecContext, param1: Option<u32>) -> Result<(), Fault> {
    let r = reg(ctx, param1)?;
    let start = ctx.cpu.reg(r) as usize;
    let process = ctx
        .processes
        .get(ctx.current)
        .expect("current process is in the table");
    ctx.memory.heap_free(process, start);
    Ok(())
}

pub(super) fn map_shared_mem(
    ctx: &mut ExecContext,
    param1: Option<u32>,
    param2: Option<u32>,
) -> Result<(), Fault> {
    let region_reg = reg(ctx, param1)?;
    let dest_reg = reg(ctx, param2)?;
    let region = ctx.cpu.reg(region_reg);
    if !(1..=10).contains(&region) {
        return Ok(());
    }
    if let Some(start) = ctx.memory.map_shared_to_process(region, ctx.current) {
        ctx.cpu.set_reg(dest_reg, start as u32);
    }
    Ok(())
}

pub(super) fn acquire_lock(ctx: &mut ExecContext, param1: Option<u32>) -> Result<(), Fault> {
    let r = reg(ctx, param1)?;
    let lock = ctx.cpu.reg(r);
    if !LockTable::valid_id(lock) {
        return Ok(());
    }
    let pid = ctx.current;
    match ctx.locks.holder(lock) {
        None => {
            ctx.locks.claim(lock, pid);
            debug!("pid {pid} acquired lock {lock}");
        }
        Some(holder) if holder == pid => {
            // Re-entrant acquire: already held, nothing to do.
        }
        Some(_) => {
            let process = current_mut(ctx);
            process.waiting_lock = lock;
            process.set_state(ProcessState::WaitingOnLock);
            debug!("pid {pid} blocked on lock {lock}");
        }
    }
    Ok(())
}

pub(super) fn release_lock(ctx: &mut ExecContext, param1: Option<u32>) -> Result<(), Fault> {
    let r = reg(ctx, param1)?;
    let lock = ctx.cpu.reg(r);
    if LockTable::valid_id(lock) && ctx.locks.holder(lock) == Some(ctx.current) {
        ctx.locks.release(lock);
        debug!("pid {} released lock {lock}", ctx.current);
    }
    Ok(())
}

pub(super) fn signal_event(ctx: &mut ExecContext, param1: Option<u32>) -> Result<(), Fault> {
    let r = reg(ctx, param1)?;
    let event = ctx.cpu.reg(r);
    if EventTable::valid_id(event) {
        ctx.events.signal(event);
        debug!("pid {} signaled event {event}", ctx.current);
    }
    Ok(())
}

pub(super) fn wait_event(ctx: &mut ExecContext, param1: Option<u32>) -> Result<(), Fault> {
    let r = reg(ctx, param1)?;
    let event = ctx.cpu.reg(r);
    if EventTable::valid_id(event) {
        let process = current_mut(ctx);
        process.waiting_event = event;
        process.set_state(ProcessState::WaitingOnEvent);
    }
    Ok(())
}

pub(super) fn sleep(ctx: &mut ExecContext, param1: Option<u32>) -> Result<(), Fault> {
    let r = reg(ctx, param1)?;
    let cycles = ctx.cpu.reg(r);
    let process = current_mut(ctx);
    process.sleep_counter = cycles;
    process.set_state(ProcessState::Sleeping);
    Ok(())
}

pub(super) fn set_priority(ctx: &mut ExecContext, param1: Option<u32>) -> Result<(), Fault> {
    let r = reg(ctx, param1)?;
    let priority = ctx.cpu.reg(r);
    current_mut(ctx).set_priority(priority);
    Ok(())
}

pub(super) fn exit(ctx: &mut ExecContext) {
    current_mut(ctx).set_state(ProcessState::Terminated);
    debug!("pid {} exited", ctx.current);
}

/// Mark the named process terminated. A pid that names nobody is a no-op.
pub(super) fn terminate_process(ctx: &mut ExecContext, param1: Option<u32>) -> Result<(), Fault> {
    let r = reg(ctx, param1)?;
    let target = Pid::from_u32(ctx.cpu.reg(r));
    if let Some(process) = ctx.processes.get_mut(target) {
        process.set_state(ProcessState::Terminated);
        debug!("pid {} terminated pid {target}", ctx.current);
    }
    Ok(())
}

fn current_mut<'c>(ctx: &'c mut ExecContext) -> &'c mut crate::process::Process {
    let pid = ctx.current;
    ctx.processes
        .get_mut(pid)
        .expect("current process is in the table")
}
