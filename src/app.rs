//! Session state and input handling.
//!
//! `App` owns everything the UI shows: one pane per role (process state plus its
//! output buffer), focus, layout, the command line and the help overlay. It is
//! mutated only by the session loop. Output lines enter through
//! `on_process_output`, keyboard and mouse input through `handle_key` and
//! `handle_mouse`, which return the `AppAction` the loop should carry out.

use std::time::{Duration, Instant};

use crossterm::event::{KeyCode, KeyEvent, KeyEventKind, KeyModifiers, MouseButton, MouseEvent, MouseEventKind};
use ratatui::layout::Rect;
use serde::Deserialize;

use crate::command::Command;
use crate::events::{FailureKind, ProcessSignal};
use crate::output::{sanitize_line, OutputBuffer};
use crate::process::{ProcessState, ProcessStatus, Role, RoleMap};
use crate::tui;

/// Lines moved by one mouse wheel notch.
const WHEEL_STEP: usize = 3;

/// Modes of keyboard interaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputMode {
    /// Single keys act on panes and processes.
    Navigation,
    /// Keys build a command line.
    CommandEntry,
}

/// How the two panes share the screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum PaneLayout {
    /// Full width, split height.
    Stacked,
    /// Half width, full height.
    SideBySide,
}

impl PaneLayout {
    pub fn toggled(self) -> Self {
        match self {
            PaneLayout::Stacked => PaneLayout::SideBySide,
            PaneLayout::SideBySide => PaneLayout::Stacked,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            PaneLayout::Stacked => "stacked",
            PaneLayout::SideBySide => "side-by-side",
        }
    }
}

/// Actions resulting from user interaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppAction {
    /// No action required.
    None,
    /// Stop both processes and exit.
    Quit,
    /// Restart one role's process.
    Restart(Role),
    /// Copy a pane's buffer to the clipboard.
    Copy(Role),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusLevel {
    Info,
    Warning,
}

#[derive(Debug, Clone)]
struct StatusMessage {
    text: String,
    at: Instant,
    ttl: Option<Duration>,
    level: StatusLevel,
}

/// One role's view: process state, output and the area it is drawn in.
#[derive(Debug, Clone)]
pub struct Pane {
    pub process: ProcessState,
    pub output: OutputBuffer,
    /// Command line of the role, shown in the pane title.
    pub command: String,
    area: Rect,
}

impl Pane {
    fn new(command: String, max_lines: usize) -> Self {
        Self {
            process: ProcessState::new(),
            output: OutputBuffer::new(max_lines),
            command,
            area: Rect::default(),
        }
    }

    pub fn area(&self) -> Rect {
        self.area
    }

    /// Rows available for output inside the pane border.
    pub fn view_height(&self) -> usize {
        self.area.height.saturating_sub(2) as usize
    }
}

/// The session's UI state.
#[derive(Debug)]
pub struct App {
    pub panes: RoleMap<Pane>,
    pub focused: Role,
    pub layout: PaneLayout,
    pub input_mode: InputMode,
    /// Text typed after `:`.
    pub input: String,
    pub show_help: bool,
    pub use_symbols: bool,
    /// Lines moved by page-up/page-down.
    pub scroll_step: usize,
    /// Set once the shutdown coordinator has taken over.
    pub shutting_down: bool,
    /// Whether either role failed to spawn on its first start.
    pub initial_spawn_failed: bool,
    screen: Rect,
    status_message: Option<StatusMessage>,
    /// Clock reading used for everything time-dependent on screen.
    now: Instant,
}

impl App {
    pub fn new(
        commands: RoleMap<String>,
        max_lines: usize,
        layout: PaneLayout,
        scroll_step: usize,
        use_symbols: bool,
    ) -> Self {
        Self {
            panes: commands.map(|_, command| Pane::new(command, max_lines)),
            focused: Role::Server,
            layout,
            input_mode: InputMode::Navigation,
            input: String::new(),
            show_help: false,
            use_symbols,
            scroll_step: scroll_step.max(1),
            shutting_down: false,
            initial_spawn_failed: false,
            screen: Rect::default(),
            status_message: None,
            now: Instant::now(),
        }
    }

    pub fn pane(&self, role: Role) -> &Pane {
        &self.panes[role]
    }

    pub fn focused_pane(&self) -> &Pane {
        &self.panes[self.focused]
    }

    /// Recomputes pane geometry for a new terminal size.
    pub fn resize(&mut self, width: u16, height: u16) {
        self.screen = Rect::new(0, 0, width, height);
        self.apply_layout();
    }

    pub fn set_layout(&mut self, layout: PaneLayout) {
        self.layout = layout;
        self.apply_layout();
    }

    fn apply_layout(&mut self) {
        let (main, _) = tui::screen_chunks(self.screen);
        let rects = tui::pane_rects(main, self.layout);
        for role in Role::ALL {
            let pane = &mut self.panes[role];
            pane.area = rects[role];
            let view = pane.view_height();
            pane.output.clamp(view);
        }
    }

    /// Advances the clock the next frame is drawn with.
    pub fn tick(&mut self, now: Instant) {
        self.now = now;
    }

    pub fn focus(&mut self, role: Role) {
        self.focused = role;
    }

    pub fn on_process_restarting(&mut self, role: Role) {
        let pane = &mut self.panes[role];
        pane.process.status = ProcessStatus::Restarting;
        pane.process.restarts += 1;
        self.set_status_message(format!("restarting {}", role));
    }

    pub fn on_process_starting(&mut self, role: Role, generation: u64, command: &str) {
        let pane = &mut self.panes[role];
        pane.process.generation = generation;
        pane.process.pid = None;
        pane.process.exit_code = None;
        pane.command = command.to_string();
        self.push_tool_line(role, format!("starting: {}", command));
    }

    pub fn on_process_started(&mut self, role: Role, generation: u64, pid: u32) {
        let process = &mut self.panes[role].process;
        if process.generation != generation {
            return;
        }
        process.status = ProcessStatus::Running;
        process.pid = Some(pid);
        process.started_at = Some(Instant::now());
    }

    /// Appends a captured line to the role's pane.
    ///
    /// Lines from an instance other than the current one are discarded. Returns
    /// whether the line was accepted.
    pub fn on_process_output(&mut self, role: Role, generation: u64, line: &str) -> bool {
        let pane = &mut self.panes[role];
        if pane.process.generation != generation {
            return false;
        }
        let view = pane.view_height();
        pane.output.push(sanitize_line(line), view);
        true
    }

    pub fn on_process_signalled(&mut self, role: Role, generation: u64, signal: ProcessSignal) {
        if self.panes[role].process.generation != generation {
            return;
        }
        self.push_tool_line(role, format!("sent {}", signal.label()));
    }

    pub fn on_process_stopped(&mut self, role: Role, generation: u64, code: Option<i32>, forced: bool) {
        let process = &mut self.panes[role].process;
        if generation < process.generation {
            return;
        }
        if process.status != ProcessStatus::Restarting {
            process.status = ProcessStatus::Stopped { code };
        }
        process.pid = None;
        process.exit_code = code;
        let line = if forced {
            "killed after grace period".to_string()
        } else {
            match code {
                Some(code) => format!("stopped (code {})", code),
                None => "stopped".to_string(),
            }
        };
        self.push_tool_line(role, line);
    }

    pub fn on_process_exited(&mut self, role: Role, generation: u64, code: Option<i32>) {
        let process = &mut self.panes[role].process;
        if generation < process.generation {
            return;
        }
        let reason = match code {
            Some(code) => format!("exited with code {}", code),
            None => "terminated by signal".to_string(),
        };
        process.status = ProcessStatus::Failed {
            reason: reason.clone(),
        };
        process.pid = None;
        process.exit_code = code;
        self.push_tool_line(role, format!("process {}", reason));
        self.set_status_warning(format!("{} {}", role, reason));
    }

    pub fn on_process_failed(&mut self, role: Role, generation: u64, kind: FailureKind, error: &str) {
        let process = &mut self.panes[role].process;
        if generation < process.generation {
            return;
        }
        process.status = ProcessStatus::Failed {
            reason: match kind {
                FailureKind::Spawn => "spawn failed".to_string(),
                FailureKind::Wait => "lost track of process".to_string(),
            },
        };
        process.pid = None;
        if kind == FailureKind::Spawn && generation == 1 {
            self.initial_spawn_failed = true;
        }
        self.push_tool_line(role, format!("error: {}", error));
        self.set_status_warning(format!("{} failed: {}", role, error));
    }

    pub fn on_output_error(&mut self, role: Role, generation: u64, error: &str) {
        let process = &mut self.panes[role].process;
        if process.generation != generation {
            return;
        }
        process.status = ProcessStatus::Failed {
            reason: "output stream error".to_string(),
        };
        self.push_tool_line(role, format!("output stream error: {}", error));
    }

    pub fn on_copy_finished(&mut self, role: Role, result: Result<usize, String>) {
        match result {
            Ok(lines) => self.set_status_message(format!("copied {} lines from {}", lines, role)),
            Err(err) => self.set_status_warning(format!("copy failed: {}", err)),
        }
    }

    /// Notes that the shutdown coordinator has started stopping both roles.
    pub fn on_shutdown_started(&mut self, reason: &str) {
        self.shutting_down = true;
        self.show_help = false;
        self.input_mode = InputMode::Navigation;
        self.input.clear();
        self.set_status_warning_persistent(format!("{}, stopping processes...", reason));
    }

    pub fn handle_key(&mut self, key: KeyEvent) -> AppAction {
        if key.kind == KeyEventKind::Release {
            return AppAction::None;
        }
        if key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
            return AppAction::Quit;
        }
        if self.show_help {
            self.show_help = false;
            return AppAction::None;
        }
        match self.input_mode {
            InputMode::Navigation => self.handle_navigation_key(key),
            InputMode::CommandEntry => self.handle_command_key(key),
        }
    }

    fn handle_navigation_key(&mut self, key: KeyEvent) -> AppAction {
        match key.code {
            KeyCode::Char('q') => AppAction::Quit,
            KeyCode::Tab | KeyCode::BackTab => {
                self.focus(self.focused.other());
                AppAction::None
            }
            KeyCode::Char('s') | KeyCode::Char('h') | KeyCode::Char('v') => {
                self.set_layout(self.layout.toggled());
                AppAction::None
            }
            KeyCode::Char('?') => {
                self.show_help = true;
                AppAction::None
            }
            KeyCode::Char('r') => AppAction::Restart(self.focused),
            KeyCode::Char(':') => {
                self.input_mode = InputMode::CommandEntry;
                self.input.clear();
                AppAction::None
            }
            KeyCode::Char('c') => {
                self.panes[self.focused].output.clear();
                self.set_status_message(format!("cleared {} output", self.focused));
                AppAction::None
            }
            KeyCode::Char('y') => AppAction::Copy(self.focused),
            KeyCode::PageUp => {
                self.scroll_up(self.focused, self.scroll_step);
                AppAction::None
            }
            KeyCode::PageDown => {
                self.scroll_down(self.focused, self.scroll_step);
                AppAction::None
            }
            KeyCode::Up => {
                self.scroll_up(self.focused, 1);
                AppAction::None
            }
            KeyCode::Down => {
                self.scroll_down(self.focused, 1);
                AppAction::None
            }
            KeyCode::Home => {
                let pane = &mut self.panes[self.focused];
                let view = pane.view_height();
                pane.output.scroll_to_top(view);
                AppAction::None
            }
            KeyCode::End => {
                let pane = &mut self.panes[self.focused];
                let view = pane.view_height();
                pane.output.scroll_to_bottom(view);
                AppAction::None
            }
            _ => AppAction::None,
        }
    }

    fn handle_command_key(&mut self, key: KeyEvent) -> AppAction {
        match key.code {
            KeyCode::Esc => {
                self.input_mode = InputMode::Navigation;
                self.input.clear();
                AppAction::None
            }
            KeyCode::Enter => {
                let text = std::mem::take(&mut self.input);
                self.input_mode = InputMode::Navigation;
                if text.trim().is_empty() {
                    return AppAction::None;
                }
                match Command::parse(&text) {
                    Command::Quit => AppAction::Quit,
                    Command::Restart(role) => AppAction::Restart(role),
                    Command::Unknown(word) => {
                        self.set_status_warning(format!("unknown command: {}", word));
                        AppAction::None
                    }
                }
            }
            KeyCode::Backspace => {
                self.input.pop();
                AppAction::None
            }
            KeyCode::Char(c) => {
                if !key.modifiers.contains(KeyModifiers::CONTROL) {
                    self.input.push(c);
                }
                AppAction::None
            }
            _ => AppAction::None,
        }
    }

    pub fn handle_mouse(&mut self, mouse: MouseEvent) -> AppAction {
        let target = self.pane_at(mouse.column, mouse.row);
        match mouse.kind {
            MouseEventKind::Down(MouseButton::Left) => {
                if let Some(role) = target {
                    self.focus(role);
                }
            }
            MouseEventKind::ScrollUp => self.scroll_up(target.unwrap_or(self.focused), WHEEL_STEP),
            MouseEventKind::ScrollDown => {
                self.scroll_down(target.unwrap_or(self.focused), WHEEL_STEP)
            }
            _ => {}
        }
        AppAction::None
    }

    pub fn pane_at(&self, column: u16, row: u16) -> Option<Role> {
        Role::ALL.into_iter().find(|role| {
            let area = self.panes[*role].area;
            column >= area.x
                && column < area.x + area.width
                && row >= area.y
                && row < area.y + area.height
        })
    }

    pub fn scroll_up(&mut self, role: Role, amount: usize) {
        let pane = &mut self.panes[role];
        let view = pane.view_height();
        pane.output.scroll_up(amount, view);
    }

    pub fn scroll_down(&mut self, role: Role, amount: usize) {
        let pane = &mut self.panes[role];
        let view = pane.view_height();
        pane.output.scroll_down(amount, view);
    }

    /// Text of a pane's buffer, one line per entry.
    pub fn pane_text(&self, role: Role) -> Option<String> {
        let output = &self.panes[role].output;
        if output.is_empty() {
            return None;
        }
        Some(output.iter().map(String::as_str).collect::<Vec<_>>().join("\n"))
    }

    pub fn status_line(&self) -> String {
        let pane = self.focused_pane();
        let process = &pane.process;
        let pid = process
            .pid
            .map(|p| p.to_string())
            .unwrap_or_else(|| "-".into());
        let elapsed = match (&process.status, process.started_at) {
            (ProcessStatus::Running, Some(at)) => {
                format_duration(self.now.saturating_duration_since(at))
            }
            _ => "-".into(),
        };
        format!(
            "{} | status: {} | pid: {} | lines: {}/{} | elapsed: {} | restarts: {} | follow: {} | layout: {}",
            self.focused,
            process.status.label(),
            pid,
            pane.output.len(),
            pane.output.capacity(),
            elapsed,
            process.restarts,
            if pane.output.is_following() { "on" } else { "off" },
            self.layout.label()
        )
    }

    pub fn status_message(&self) -> Option<(&str, StatusLevel)> {
        let message = self.status_message.as_ref()?;
        let visible = match message.ttl {
            Some(ttl) => self.now.saturating_duration_since(message.at) < ttl,
            None => true,
        };
        visible.then_some((message.text.as_str(), message.level))
    }

    pub fn set_status_message(&mut self, message: impl Into<String>) {
        self.set_status(message, StatusLevel::Info, Some(Duration::from_secs(3)));
    }

    pub fn set_status_warning(&mut self, message: impl Into<String>) {
        self.set_status(message, StatusLevel::Warning, Some(Duration::from_secs(5)));
    }

    pub fn set_status_warning_persistent(&mut self, message: impl Into<String>) {
        self.set_status(message, StatusLevel::Warning, None);
    }

    fn set_status(&mut self, message: impl Into<String>, level: StatusLevel, ttl: Option<Duration>) {
        // shutdown progress stays on screen until the session ends
        if self.shutting_down && ttl.is_some() {
            return;
        }
        self.status_message = Some(StatusMessage {
            text: message.into(),
            at: Instant::now(),
            ttl,
            level,
        });
    }

    fn push_tool_line(&mut self, role: Role, text: String) {
        let line = if self.use_symbols {
            format!("◆ devpane: {}", text)
        } else {
            format!("[devpane] {}", text)
        };
        let pane = &mut self.panes[role];
        let view = pane.view_height();
        pane.output.push(line, view);
    }
}

fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    let hours = secs / 3600;
    let minutes = (secs % 3600) / 60;
    let seconds = secs % 60;
    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{:02}:{:02}", minutes, seconds)
    }
}
