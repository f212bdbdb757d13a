//! Event definitions for the session event loop.
//!
//! Every task that talks to the UI loop (supervisor workers, output readers, the
//! input listener, file watchers and the signal listener) does so by sending an
//! `Event` over the single session channel.

use crossterm::event::{KeyEvent, MouseEvent};

use crate::process::Role;
use crate::supervisor::ShutdownReport;

/// The graceful signal sent to a process group, or the forced kill after it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessSignal {
    SigInt,
    SigTerm,
    SigKill,
}

impl ProcessSignal {
    pub fn label(self) -> &'static str {
        match self {
            ProcessSignal::SigInt => "SIGINT",
            ProcessSignal::SigTerm => "SIGTERM",
            ProcessSignal::SigKill => "SIGKILL",
        }
    }
}

/// Why a process instance is considered failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The command could not be spawned.
    Spawn,
    /// Waiting on the child returned an error.
    Wait,
}

/// Represents an event in the session's main event loop.
#[derive(Debug, Clone)]
pub enum Event {
    /// A restart cycle began for a role.
    ProcessRestarting { role: Role },
    /// A new instance is about to be spawned.
    ProcessStarting { role: Role, generation: u64, command: String },
    /// The instance spawned successfully.
    ProcessStarted { role: Role, generation: u64, pid: u32 },
    /// A line of merged stdout/stderr output.
    ProcessOutput { role: Role, generation: u64, line: String },
    /// A signal was delivered to the instance's process group.
    ProcessSignalled { role: Role, generation: u64, signal: ProcessSignal },
    /// The instance was stopped on request and has been reaped.
    ProcessStopped { role: Role, generation: u64, code: Option<i32>, forced: bool },
    /// The instance exited without being asked to.
    ProcessExited { role: Role, generation: u64, code: Option<i32> },
    /// The instance could not be spawned or waited on.
    ProcessFailed { role: Role, generation: u64, kind: FailureKind, error: String },
    /// Reading the instance's output failed.
    OutputError { role: Role, generation: u64, error: String },
    /// A watched path changed.
    Restart { role: Role },
    /// An OS signal asked the whole program to stop.
    Shutdown { signal: &'static str },
    /// Both roles have been stopped.
    ShutdownComplete(ShutdownReport),
    /// A clipboard copy finished, with the number of lines copied.
    CopyFinished { role: Role, result: Result<usize, String> },
    /// A keyboard event received from the user.
    Key(KeyEvent),
    /// A mouse event received from the user.
    Mouse(MouseEvent),
    /// The terminal window was resized.
    Resize { width: u16, height: u16 },
}
