//! Process synchronization objects: locks and events.
//!
//! Both tables are indexed 1 through 10; index 0 is unused and ids outside
//! the valid range are rejected by the accessors so the opcodes can treat
//! them as no-ops.

use marmot_abi::{EVENT_COUNT, LOCK_COUNT};

use crate::process::Pid;

/// Mutex-like locks, each held by at most one process.
#[derive(Debug)]
pub struct LockTable {
    /// Slot i holds the owning pid of lock i, or `None` when free.
    holders: [Option<Pid>; LOCK_COUNT + 1],
}

impl LockTable {
    pub fn new() -> LockTable {
        LockTable {
            holders: [None; LOCK_COUNT + 1],
        }
    }

    pub fn valid_id(id: u32) -> bool {
        (1..=LOCK_COUNT as u32).contains(&id)
    }

    pub fn holder(&self, id: u32) -> Option<Pid> {
        self.holders[id as usize]
    }

    pub fn claim(&mut self, id: u32, pid: Pid) {
        self.holders[id as usize] = Some(pid);
    }

    pub fn release(&mut self, id: u32) {
        self.holders[id as usize] = None;
    }

    /// Free every lock held by `pid`. Used when reaping.
    pub fn release_all(&mut self, pid: Pid) {
        for holder in &mut self.holders {
            if *holder == Some(pid) {
                *holder = None;
            }
        }
    }

    /// How many locks `pid` currently holds.
    pub fn held_by(&self, pid: Pid) -> usize {
        self.holders.iter().filter(|h| **h == Some(pid)).count()
    }
}

impl Default for LockTable {
    fn default() -> Self {
        LockTable::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventState {
    NonSignaled,
    Signaled,
}

/// Binary events, consumed by the first waiter to wake.
#[derive(Debug)]
pub struct EventTable {
    states: [EventState; EVENT_COUNT + 1],
}

impl EventTable {
    pub fn new() -> EventTable {
        EventTable {
            states: [EventState::NonSignaled; EVENT_COUNT + 1],
        }
    }

    pub fn valid_id(id: u32) -> bool {
        (1..=EVENT_COUNT as u32).contains(&id)
    }

    pub fn signal(&mut self, id: u32) {
        self.states[id as usize] = EventState::Signaled;
    }

    pub fn is_signaled(&self, id: u32) -> bool {
        self.states[id as usize] == EventState::Signaled
    }

    /// Consume the event if it is signaled, returning whether it was.
    /// Clearing on consumption is what makes events edge-triggered: later
    /// waiters stay blocked until the next signal.
    pub fn consume_if_signaled(&mut self, id: u32) -> bool {
        if self.states[id as usize] == EventState::Signaled {
            self.states[id as usize] = EventState::NonSignaled;
            true
        } else {
            false
        }
    }
}

impl Default for EventTable {
    fn default() -> Self {
        EventTable::new()
    }
}
