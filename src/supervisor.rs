//! Process supervision for the server and client roles.
//!
//! Each role is driven by its own worker task which exclusively owns the child
//! handle and processes that role's commands one at a time, so start and stop
//! for one role never overlap while the two roles proceed independently. The
//! `Supervisor` handle only sends commands; everything the workers observe is
//! reported to the session loop as `Event`s.

use std::io;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader, Split};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::events::{Event, FailureKind, ProcessSignal};
use crate::process::{ProcessSpec, Role, RoleMap};

/// Grace period used when none is configured.
pub const DEFAULT_GRACE_MS: u64 = 5_000;

/// How long a stopped instance's reader may keep draining before it is aborted.
const READER_DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

/// Poll interval while waiting for the rest of a process group to exit.
const GROUP_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// How a role is asked to stop.
#[derive(Debug, Clone, Copy)]
pub struct StopConfig {
    grace: Duration,
    signal: ProcessSignal,
}

impl StopConfig {
    pub fn new(grace_ms: u64, signal: ProcessSignal) -> Self {
        Self {
            grace: Duration::from_millis(grace_ms),
            signal,
        }
    }
}

impl Default for StopConfig {
    fn default() -> Self {
        Self::new(DEFAULT_GRACE_MS, ProcessSignal::SigTerm)
    }
}

/// What caused a restart request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartTrigger {
    /// Key press or command line.
    Manual,
    /// A watched path changed.
    Watch,
}

/// Result of stopping one role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    NotRunning,
    Graceful { code: Option<i32> },
    Forced,
}

/// Result of stopping both roles at the end of a session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Roles that ignored the graceful signal and had to be killed.
    pub forced: Vec<Role>,
}

impl ShutdownReport {
    pub fn forced_kill(&self) -> bool {
        !self.forced.is_empty()
    }
}

/// The lifecycle operations the session dispatches to.
pub trait ProcessControl {
    fn start(&self, role: Role);
    fn restart(&self, role: Role, trigger: RestartTrigger);
}

enum WorkerCommand {
    Start,
    Stop { reply: oneshot::Sender<StopOutcome> },
    Restart { trigger: RestartTrigger },
    Shutdown { reply: oneshot::Sender<StopOutcome> },
}

/// Handle to the per-role workers. Clones share the same workers.
#[derive(Debug, Clone)]
pub struct Supervisor {
    commands: RoleMap<mpsc::UnboundedSender<WorkerCommand>>,
}

impl std::fmt::Debug for WorkerCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            WorkerCommand::Start => "Start",
            WorkerCommand::Stop { .. } => "Stop",
            WorkerCommand::Restart { .. } => "Restart",
            WorkerCommand::Shutdown { .. } => "Shutdown",
        };
        f.write_str(name)
    }
}

impl Supervisor {
    /// Spawns one worker per role. Nothing is started until `start` is called.
    pub fn spawn(
        specs: RoleMap<ProcessSpec>,
        config: StopConfig,
        event_tx: mpsc::Sender<Event>,
    ) -> Self {
        let commands = specs.map(|role, spec| {
            let (tx, rx) = mpsc::unbounded_channel();
            let worker = Worker {
                spec,
                config,
                event_tx: event_tx.clone(),
                child: None,
                reader: None,
                group: None,
                generation: 0,
                spawn_failed: false,
            };
            debug!(role = %role, "spawning supervisor worker");
            tokio::spawn(worker.run(rx));
            tx
        });
        Self { commands }
    }

    /// Stops one role and waits until its process has been reaped.
    pub async fn stop(&self, role: Role) -> StopOutcome {
        let (reply, rx) = oneshot::channel();
        self.send(role, WorkerCommand::Stop { reply });
        rx.await.unwrap_or(StopOutcome::NotRunning)
    }

    /// Stops both roles concurrently and retires their workers.
    pub async fn shutdown(&self) -> ShutdownReport {
        let (server_reply, server_rx) = oneshot::channel();
        let (client_reply, client_rx) = oneshot::channel();
        self.send(Role::Server, WorkerCommand::Shutdown { reply: server_reply });
        self.send(Role::Client, WorkerCommand::Shutdown { reply: client_reply });
        let (server, client) = tokio::join!(server_rx, client_rx);

        let mut report = ShutdownReport::default();
        for (role, outcome) in [(Role::Server, server), (Role::Client, client)] {
            let outcome = outcome.unwrap_or(StopOutcome::NotRunning);
            debug!(role = %role, ?outcome, "role stopped for shutdown");
            if outcome == StopOutcome::Forced {
                report.forced.push(role);
            }
        }
        info!(forced = report.forced.len(), "all processes stopped");
        report
    }

    fn send(&self, role: Role, command: WorkerCommand) {
        if let Err(err) = self.commands[role].send(command) {
            debug!(role = %role, command = ?err.0, "worker already finished");
        }
    }
}

impl ProcessControl for Supervisor {
    fn start(&self, role: Role) {
        self.send(role, WorkerCommand::Start);
    }

    fn restart(&self, role: Role, trigger: RestartTrigger) {
        self.send(role, WorkerCommand::Restart { trigger });
    }
}

struct Worker {
    spec: ProcessSpec,
    config: StopConfig,
    event_tx: mpsc::Sender<Event>,
    child: Option<Child>,
    reader: Option<JoinHandle<()>>,
    generation: u64,
    /// Process group of the latest instance, kept until the group is gone.
    group: Option<u32>,
    spawn_failed: bool,
}

impl Worker {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<WorkerCommand>) {
        loop {
            tokio::select! {
                command = commands.recv() => {
                    let Some(command) = command else {
                        self.stop().await;
                        break;
                    };
                    match command {
                        WorkerCommand::Start => self.start().await,
                        WorkerCommand::Stop { reply } => {
                            let outcome = self.stop().await;
                            let _ = reply.send(outcome);
                        }
                        WorkerCommand::Restart { trigger } => self.restart(trigger).await,
                        WorkerCommand::Shutdown { reply } => {
                            let outcome = self.stop().await;
                            let _ = reply.send(outcome);
                            break;
                        }
                    }
                }
                status = wait_running(&mut self.child) => self.on_exit(status).await,
            }
        }
        debug!(role = %self.spec.role, "supervisor worker finished");
    }

    async fn start(&mut self) {
        let role = self.spec.role;
        if self.child.is_some() {
            debug!(role = %role, "start ignored, already running");
            return;
        }
        self.generation += 1;
        let generation = self.generation;
        self.emit(Event::ProcessStarting {
            role,
            generation,
            command: self.spec.command_line(),
        })
        .await;

        let mut command = Command::new(&self.spec.cmd);
        command.args(&self.spec.args);
        if let Some(cwd) = &self.spec.cwd {
            command.current_dir(cwd);
        }
        if !self.spec.env.is_empty() {
            command.envs(&self.spec.env);
        }
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        command.kill_on_drop(true);

        #[cfg(windows)]
        {
            const CREATE_NEW_PROCESS_GROUP: u32 = 0x00000200;
            command.creation_flags(CREATE_NEW_PROCESS_GROUP);
        }

        #[cfg(unix)]
        unsafe {
            command.pre_exec(|| {
                let _ = libc::setpgid(0, 0);
                Ok(())
            });
        }

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(err) => {
                self.spawn_failed = true;
                warn!(role = %role, generation, error = %err, "failed to spawn");
                self.emit(Event::ProcessFailed {
                    role,
                    generation,
                    kind: FailureKind::Spawn,
                    error: format!("failed to spawn {}: {}", self.spec.cmd, err),
                })
                .await;
                return;
            }
        };
        self.spawn_failed = false;

        let pid = child.id().unwrap_or(0);
        info!(role = %role, pid, generation, "process started");
        self.emit(Event::ProcessStarted {
            role,
            generation,
            pid,
        })
        .await;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let tx = self.event_tx.clone();
        self.reader = Some(tokio::spawn(read_output(
            role, generation, stdout, stderr, tx,
        )));
        self.group = Some(pid).filter(|pid| *pid != 0);
        self.child = Some(child);
    }

    async fn stop(&mut self) -> StopOutcome {
        let group = self.group.take();
        let Some(mut child) = self.child.take() else {
            return match group {
                Some(pgid) if group_alive(pgid) => self.stop_leftovers(pgid).await,
                _ => StopOutcome::NotRunning,
            };
        };
        let role = self.spec.role;
        let generation = self.generation;
        let deadline = Instant::now() + self.config.grace;

        if let Some(pid) = child.id() {
            self.signal(pid, self.config.signal).await;
        }
        let mut forced = false;
        let status = match wait_for_exit(&mut child, self.config.grace).await {
            Ok(Some(status)) => Some(status),
            Ok(None) => {
                forced = true;
                warn!(
                    role = %role,
                    grace_ms = self.config.grace.as_millis() as u64,
                    "process ignored {}, killing",
                    self.config.signal.label()
                );
                self.kill(&mut child).await
            }
            Err(err) => {
                warn!(role = %role, error = %err, "waiting for process failed, killing");
                self.kill(&mut child).await
            }
        };
        if let Some(pgid) = group {
            // the leader is gone but the rest of its group may not be
            if self.settle_group(pgid, deadline).await {
                forced = true;
            }
        }
        self.drain_reader().await;

        let code = status.and_then(|status| status.code());
        info!(role = %role, generation, ?code, forced, "process stopped");
        self.emit(Event::ProcessStopped {
            role,
            generation,
            code,
            forced,
        })
        .await;
        if forced {
            StopOutcome::Forced
        } else {
            StopOutcome::Graceful { code }
        }
    }

    /// Stops what is left of a group whose leader already exited on its own.
    async fn stop_leftovers(&mut self, pgid: u32) -> StopOutcome {
        info!(role = %self.spec.role, pgid, "stopping processes left behind by the last instance");
        let deadline = Instant::now() + self.config.grace;
        self.signal(pgid, self.config.signal).await;
        let forced = self.settle_group(pgid, deadline).await;
        self.drain_reader().await;
        if forced {
            StopOutcome::Forced
        } else {
            StopOutcome::Graceful { code: None }
        }
    }

    /// Waits until no live process remains in the group, killing the group at
    /// `deadline`. Returns whether the kill was needed.
    async fn settle_group(&self, pgid: u32, deadline: Instant) -> bool {
        while group_alive(pgid) {
            if Instant::now() >= deadline {
                warn!(role = %self.spec.role, pgid, "process group outlived the grace period, killing");
                self.signal(pgid, ProcessSignal::SigKill).await;
                return true;
            }
            tokio::time::sleep(GROUP_POLL_INTERVAL).await;
        }
        false
    }

    async fn restart(&mut self, trigger: RestartTrigger) {
        let role = self.spec.role;
        if trigger == RestartTrigger::Watch && self.spawn_failed {
            debug!(role = %role, "ignoring file change until a manual restart succeeds");
            return;
        }
        info!(role = %role, ?trigger, "restarting");
        self.emit(Event::ProcessRestarting { role }).await;
        self.stop().await;
        self.start().await;
    }

    async fn on_exit(&mut self, status: io::Result<ExitStatus>) {
        self.child = None;
        self.drain_reader().await;
        let role = self.spec.role;
        let generation = self.generation;
        match status {
            Ok(status) => {
                let code = status.code();
                warn!(role = %role, generation, ?code, "process exited unexpectedly");
                self.emit(Event::ProcessExited {
                    role,
                    generation,
                    code,
                })
                .await;
            }
            Err(err) => {
                warn!(role = %role, generation, error = %err, "failed to wait on process");
                self.emit(Event::ProcessFailed {
                    role,
                    generation,
                    kind: FailureKind::Wait,
                    error: err.to_string(),
                })
                .await;
            }
        }
    }

    async fn kill(&self, child: &mut Child) -> Option<ExitStatus> {
        if let Some(pid) = child.id() {
            self.signal(pid, ProcessSignal::SigKill).await;
        }
        let _ = child.start_kill();
        child.wait().await.ok()
    }

    // Lines already read from the old instance are flushed before the next one
    // starts; a grandchild holding the pipe open must not stall the worker.
    async fn drain_reader(&mut self) {
        if let Some(mut reader) = self.reader.take() {
            if tokio::time::timeout(READER_DRAIN_TIMEOUT, &mut reader)
                .await
                .is_err()
            {
                debug!(role = %self.spec.role, "output still open after exit, aborting reader");
                reader.abort();
            }
        }
    }

    async fn signal(&self, pid: u32, signal: ProcessSignal) {
        debug!(role = %self.spec.role, pid, signal = signal.label(), "signalling process group");
        self.emit(Event::ProcessSignalled {
            role: self.spec.role,
            generation: self.generation,
            signal,
        })
        .await;
        send_os_signal(pid, signal);
    }

    async fn emit(&self, event: Event) {
        let _ = self.event_tx.send(event).await;
    }
}

async fn wait_running(child: &mut Option<Child>) -> io::Result<ExitStatus> {
    match child.as_mut() {
        Some(child) => child.wait().await,
        None => std::future::pending().await,
    }
}

async fn wait_for_exit(child: &mut Child, timeout: Duration) -> io::Result<Option<ExitStatus>> {
    if timeout.is_zero() {
        return Ok(None);
    }
    match tokio::time::timeout(timeout, child.wait()).await {
        Ok(Ok(status)) => Ok(Some(status)),
        Ok(Err(err)) => Err(err),
        Err(_) => Ok(None),
    }
}

#[cfg(unix)]
fn send_os_signal(pid: u32, signal: ProcessSignal) {
    let sig = match signal {
        ProcessSignal::SigInt => libc::SIGINT,
        ProcessSignal::SigTerm => libc::SIGTERM,
        ProcessSignal::SigKill => libc::SIGKILL,
    };
    let pid = pid as i32;
    unsafe {
        let _ = libc::kill(-pid, sig);
        let _ = libc::kill(pid, sig);
    }
}

#[cfg(windows)]
fn send_os_signal(pid: u32, signal: ProcessSignal) {
    use windows_sys::Win32::System::Console::GenerateConsoleCtrlEvent;
    use windows_sys::Win32::System::Console::CTRL_BREAK_EVENT;
    // the forced kill goes through `Child::start_kill`
    if signal == ProcessSignal::SigKill {
        return;
    }
    unsafe {
        let _ = GenerateConsoleCtrlEvent(CTRL_BREAK_EVENT, pid);
    }
}

#[cfg(all(not(unix), not(windows)))]
fn send_os_signal(_pid: u32, _signal: ProcessSignal) {}

/// Whether any non-zombie process is left in the process group `pgid`.
#[cfg(unix)]
fn group_alive(pgid: u32) -> bool {
    let exists = unsafe { libc::kill(-(pgid as i32), 0) == 0 };
    if !exists {
        return false;
    }
    live_group_member(pgid).unwrap_or(true)
}

#[cfg(not(unix))]
fn group_alive(_pgid: u32) -> bool {
    false
}

// Exited members of a reaped leader are reparented and may linger as zombies
// until init collects them; those must not count as running.
#[cfg(target_os = "linux")]
fn live_group_member(pgid: u32) -> Option<bool> {
    let entries = std::fs::read_dir("/proc").ok()?;
    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if !name.bytes().all(|b| b.is_ascii_digit()) {
            continue;
        }
        let Ok(stat) = std::fs::read_to_string(entry.path().join("stat")) else {
            continue;
        };
        if let Some((state, group)) = parse_stat(&stat) {
            if group == pgid && state != 'Z' && state != 'X' {
                return Some(true);
            }
        }
    }
    Some(false)
}

#[cfg(all(unix, not(target_os = "linux")))]
fn live_group_member(_pgid: u32) -> Option<bool> {
    None
}

/// State and process group from a `/proc/<pid>/stat` line.
#[cfg(target_os = "linux")]
fn parse_stat(stat: &str) -> Option<(char, u32)> {
    // the command name is parenthesised and may itself contain spaces or ')'
    let rest = &stat[stat.rfind(')')? + 1..];
    let mut fields = rest.split_whitespace();
    let state = fields.next()?.chars().next()?;
    let _ppid = fields.next()?;
    let pgrp = fields.next()?.parse().ok()?;
    Some((state, pgrp))
}

type LineSplit<R> = Split<BufReader<R>>;

/// Drains stdout and stderr of one instance as a single merged line stream.
async fn read_output(
    role: Role,
    generation: u64,
    stdout: Option<ChildStdout>,
    stderr: Option<ChildStderr>,
    tx: mpsc::Sender<Event>,
) {
    let mut stdout = stdout.map(|out| BufReader::new(out).split(b'\n'));
    let mut stderr = stderr.map(|err| BufReader::new(err).split(b'\n'));
    while stdout.is_some() || stderr.is_some() {
        let (result, from_stdout) = tokio::select! {
            result = next_segment(&mut stdout) => (result, true),
            result = next_segment(&mut stderr) => (result, false),
        };
        match result {
            Ok(Some(bytes)) => {
                let line = String::from_utf8_lossy(&bytes).into_owned();
                let event = Event::ProcessOutput {
                    role,
                    generation,
                    line,
                };
                if tx.send(event).await.is_err() {
                    return;
                }
            }
            Ok(None) => {
                if from_stdout {
                    stdout = None;
                } else {
                    stderr = None;
                }
            }
            Err(err) => {
                debug!(role = %role, generation, error = %err, "output stream failed");
                let _ = tx
                    .send(Event::OutputError {
                        role,
                        generation,
                        error: err.to_string(),
                    })
                    .await;
                if from_stdout {
                    stdout = None;
                } else {
                    stderr = None;
                }
            }
        }
    }
}

async fn next_segment<R>(split: &mut Option<LineSplit<R>>) -> io::Result<Option<Vec<u8>>>
where
    R: tokio::io::AsyncRead + Unpin,
{
    match split.as_mut() {
        Some(split) => split.next_segment().await,
        None => std::future::pending().await,
    }
}
