//! Process execution states.

use core::fmt;

/// Where a process is in its lifecycle.
///
/// A process is dispatchable only in `New` or `Ready`; the waiting states
/// leave it untouched until the wake scan moves it back to `Ready`, and
/// `Terminated` holds it for the next reap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    New,
    Ready,
    Running,
    Sleeping,
    WaitingOnLock,
    WaitingOnEvent,
    Terminated,
}

impl ProcessState {
    /// Whether the scheduler may dispatch a process in this state.
    pub fn is_dispatchable(self) -> bool {
        matches!(self, ProcessState::New | ProcessState::Ready)
    }

    /// Whether the process is parked waiting for something external.
    pub fn is_waiting(self) -> bool {
        matches!(
            self,
            ProcessState::Sleeping | ProcessState::WaitingOnLock | ProcessState::WaitingOnEvent
        )
    }
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProcessState::New => "new",
            ProcessState::Ready => "ready",
            ProcessState::Running => "running",
            ProcessState::Sleeping => "sleeping",
            ProcessState::WaitingOnLock => "waiting-on-lock",
            ProcessState::WaitingOnEvent => "waiting-on-event",
            ProcessState::Terminated => "terminated",
        };
        f.write_str(name)
    }
}
