//! Data structures for the two managed processes.
//!
//! This module defines the fixed set of roles (`Role`), a role-indexed container
//! (`RoleMap`), the launch specification for a role (`ProcessSpec`) and the
//! lifecycle state the UI tracks for it (`ProcessStatus`, `ProcessState`).

use std::collections::HashMap;
use std::fmt;
use std::ops::{Index, IndexMut};
use std::time::Instant;

/// Identifies which long-running component a process represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Server,
    Client,
}

impl Role {
    pub const ALL: [Role; 2] = [Role::Server, Role::Client];

    pub fn name(self) -> &'static str {
        match self {
            Role::Server => "server",
            Role::Client => "client",
        }
    }

    /// The other role.
    pub fn other(self) -> Role {
        match self {
            Role::Server => Role::Client,
            Role::Client => Role::Server,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One value per role.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoleMap<T> {
    pub server: T,
    pub client: T,
}

impl<T> RoleMap<T> {
    pub fn new(server: T, client: T) -> Self {
        Self { server, client }
    }

    pub fn iter(&self) -> impl Iterator<Item = (Role, &T)> {
        [(Role::Server, &self.server), (Role::Client, &self.client)].into_iter()
    }

    pub fn map<U>(self, mut f: impl FnMut(Role, T) -> U) -> RoleMap<U> {
        RoleMap {
            server: f(Role::Server, self.server),
            client: f(Role::Client, self.client),
        }
    }
}

impl<T> Index<Role> for RoleMap<T> {
    type Output = T;

    fn index(&self, role: Role) -> &T {
        match role {
            Role::Server => &self.server,
            Role::Client => &self.client,
        }
    }
}

impl<T> IndexMut<Role> for RoleMap<T> {
    fn index_mut(&mut self, role: Role) -> &mut T {
        match role {
            Role::Server => &mut self.server,
            Role::Client => &mut self.client,
        }
    }
}

/// Specification for a role's long-running command.
#[derive(Debug, Clone)]
pub struct ProcessSpec {
    pub role: Role,
    /// The command executable.
    pub cmd: String,
    /// Arguments for the command.
    pub args: Vec<String>,
    /// Working directory.
    pub cwd: Option<String>,
    /// Extra environment variables.
    pub env: HashMap<String, String>,
    /// Paths whose changes trigger a restart.
    pub watch_paths: Vec<String>,
    /// Patterns to ignore when watching.
    pub watch_ignore: Vec<String>,
    /// Skip `.gitignore` rules when watching.
    pub watch_ignore_gitignore: bool,
    /// Debounce time for watch events.
    pub watch_debounce_ms: u64,
}

impl ProcessSpec {
    /// The full command line, quoted for display.
    pub fn command_line(&self) -> String {
        let mut parts = Vec::with_capacity(1 + self.args.len());
        parts.push(self.cmd.clone());
        parts.extend(self.args.iter().cloned());
        shell_words::join(parts)
    }
}

/// The lifecycle status of a managed process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessStatus {
    /// Not launched yet.
    NotStarted,
    /// Actively running.
    Running,
    /// Being stopped so it can be started again.
    Restarting,
    /// Stopped on request.
    Stopped { code: Option<i32> },
    /// Could not be spawned, exited on its own or lost its output stream.
    Failed { reason: String },
}

impl ProcessStatus {
    pub fn label(&self) -> String {
        match self {
            ProcessStatus::NotStarted => "not started".to_string(),
            ProcessStatus::Running => "running".to_string(),
            ProcessStatus::Restarting => "restarting".to_string(),
            ProcessStatus::Stopped { code: Some(code) } => format!("stopped ({})", code),
            ProcessStatus::Stopped { code: None } => "stopped".to_string(),
            ProcessStatus::Failed { reason } => format!("failed ({})", reason),
        }
    }
}

/// Runtime state of one role as seen by the UI.
#[derive(Debug, Clone)]
pub struct ProcessState {
    pub status: ProcessStatus,
    /// Generation of the instance whose output is currently accepted.
    pub generation: u64,
    pub pid: Option<u32>,
    pub started_at: Option<Instant>,
    pub exit_code: Option<i32>,
    pub restarts: u32,
}

impl ProcessState {
    pub fn new() -> Self {
        Self {
            status: ProcessStatus::NotStarted,
            generation: 0,
            pid: None,
            started_at: None,
            exit_code: None,
            restarts: 0,
        }
    }
}

impl Default for ProcessState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_map_indexes_by_role() {
        let mut map = RoleMap::new(1, 2);
        map[Role::Client] += 10;
        assert_eq!(map[Role::Server], 1);
        assert_eq!(map[Role::Client], 12);
        let names = map.iter().map(|(role, _)| role.name()).collect::<Vec<_>>();
        assert_eq!(names, vec!["server", "client"]);
    }

    #[test]
    fn command_line_quotes_arguments() {
        let spec = ProcessSpec {
            role: Role::Client,
            cmd: "npm".into(),
            args: vec!["run".into(), "watch mode".into()],
            cwd: None,
            env: HashMap::new(),
            watch_paths: Vec::new(),
            watch_ignore: Vec::new(),
            watch_ignore_gitignore: false,
            watch_debounce_ms: 200,
        };
        assert_eq!(spec.command_line(), "npm run 'watch mode'");
    }

    #[test]
    fn other_role_flips() {
        assert_eq!(Role::Server.other(), Role::Client);
        assert_eq!(Role::Client.other(), Role::Server);
    }
}
