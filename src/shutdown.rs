//! End-of-session bookkeeping.
//!
//! Quit key, `:quit` and OS signals all funnel into `ShutdownCoordinator::trigger`.
//! Only the first trigger starts stopping the processes; later ones are ignored.
//! The coordinator also decides the process exit code.

use std::process::ExitCode;

use tracing::info;

use crate::supervisor::ShutdownReport;

/// Shutdown progress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownState {
    Running,
    ShuttingDown,
    Terminated(ShutdownReport),
}

#[derive(Debug)]
pub struct ShutdownCoordinator {
    state: ShutdownState,
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self {
            state: ShutdownState::Running,
        }
    }

    #[cfg(test)]
    pub fn state(&self) -> &ShutdownState {
        &self.state
    }

    /// Requests shutdown. Returns `true` only for the request that starts it.
    pub fn trigger(&mut self, reason: &str) -> bool {
        if self.state != ShutdownState::Running {
            info!(reason, "shutdown already in progress");
            return false;
        }
        info!(reason, "shutting down");
        self.state = ShutdownState::ShuttingDown;
        true
    }

    /// Records that both roles have been stopped.
    pub fn complete(&mut self, report: ShutdownReport) {
        self.state = ShutdownState::Terminated(report);
    }

    pub fn is_terminated(&self) -> bool {
        matches!(self.state, ShutdownState::Terminated(_))
    }

    /// Exit status for the session: 3 when a role could not be spawned at
    /// start-up, 2 when shutdown had to kill something, 0 otherwise.
    pub fn exit_code(&self, initial_spawn_failed: bool) -> ExitCode {
        ExitCode::from(self.exit_status(initial_spawn_failed))
    }

    pub(crate) fn exit_status(&self, initial_spawn_failed: bool) -> u8 {
        if initial_spawn_failed {
            return 3;
        }
        match &self.state {
            ShutdownState::Terminated(report) if report.forced_kill() => 2,
            _ => 0,
        }
    }
}
