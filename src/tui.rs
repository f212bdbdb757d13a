//! Terminal User Interface (TUI) rendering and management.
//!
//! `TerminalSession` owns the raw-mode terminal and puts it back on drop or
//! panic. `render` is a pure function of `App`; it never mutates state.

use std::io::{self, Stdout};

use crossterm::cursor::Show;
use crossterm::event::{DisableMouseCapture, EnableMouseCapture};
use crossterm::execute;
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen, SetTitle,
};
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span, Text};
use ratatui::widgets::{Block, BorderType, Borders, Clear, Paragraph};
use ratatui::{Frame, Terminal};

use crate::app::{App, InputMode, Pane, PaneLayout, StatusLevel};
use crate::command::COMMAND_HELP;
use crate::process::{ProcessStatus, Role, RoleMap};

/// Rows below the panes: status line and message/prompt line.
const FOOTER_HEIGHT: u16 = 2;

pub type TuiTerminal = Terminal<CrosstermBackend<Stdout>>;

/// The terminal while the session owns it.
///
/// Entering enables raw mode, the alternate screen and mouse capture. The
/// terminal is restored exactly once, either by `restore` or on drop.
pub struct TerminalSession {
    terminal: TuiTerminal,
    restored: bool,
}

impl TerminalSession {
    pub fn enter() -> io::Result<Self> {
        enable_raw_mode()?;
        let mut stdout = io::stdout();
        if let Err(err) = execute!(stdout, EnterAlternateScreen, EnableMouseCapture) {
            let _ = disable_raw_mode();
            return Err(err);
        }
        let terminal = Terminal::new(CrosstermBackend::new(stdout))?;
        Ok(Self {
            terminal,
            restored: false,
        })
    }

    pub fn size(&self) -> io::Result<Rect> {
        self.terminal.size()
    }

    pub fn draw(&mut self, app: &App) -> io::Result<()> {
        execute!(self.terminal.backend_mut(), SetTitle(window_title(app)))?;
        self.terminal.draw(|frame| render(app, frame))?;
        Ok(())
    }

    pub fn restore(&mut self) -> io::Result<()> {
        if self.restored {
            return Ok(());
        }
        self.restored = true;
        disable_raw_mode()?;
        execute!(
            self.terminal.backend_mut(),
            LeaveAlternateScreen,
            DisableMouseCapture
        )?;
        self.terminal.show_cursor()?;
        Ok(())
    }
}

impl Drop for TerminalSession {
    fn drop(&mut self) {
        let _ = self.restore();
    }
}

/// Restores the terminal before the default panic output is printed.
pub fn install_panic_hook() {
    let original = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let _ = disable_raw_mode();
        let _ = execute!(io::stdout(), LeaveAlternateScreen, DisableMouseCapture, Show);
        original(info);
    }));
}

/// Splits the screen into the pane region and the footer.
pub fn screen_chunks(area: Rect) -> (Rect, Rect) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(0), Constraint::Length(FOOTER_HEIGHT)])
        .split(area);
    (chunks[0], chunks[1])
}

/// Outer rectangles of the two panes for a layout.
pub fn pane_rects(area: Rect, layout: PaneLayout) -> RoleMap<Rect> {
    let direction = match layout {
        PaneLayout::Stacked => Direction::Vertical,
        PaneLayout::SideBySide => Direction::Horizontal,
    };
    let chunks = Layout::default()
        .direction(direction)
        .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
        .split(area);
    RoleMap::new(chunks[0], chunks[1])
}

/// Draws the whole UI from `app`.
pub fn render(app: &App, frame: &mut Frame) {
    let area = frame.size();
    let (main, footer) = screen_chunks(area);
    let rects = pane_rects(main, app.layout);

    for role in Role::ALL {
        render_pane(app, role, rects[role], frame);
    }
    render_footer(app, footer, frame);

    if app.show_help {
        render_help(centered_rect(60, 70, area), frame);
    }
}

fn render_pane(app: &App, role: Role, area: Rect, frame: &mut Frame) {
    let pane = app.pane(role);
    let focused = app.focused == role;
    let border_style = if focused {
        Style::default().fg(Color::Cyan)
    } else {
        Style::default().fg(Color::DarkGray)
    };
    let block = Block::default()
        .title(pane_title(app, role, pane))
        .borders(Borders::ALL)
        .border_type(BorderType::Rounded)
        .border_style(border_style);
    let inner = block.inner(area);
    frame.render_widget(block, area);

    if pane.output.is_empty() {
        let empty = Paragraph::new("No output yet").style(Style::default().fg(Color::DarkGray));
        frame.render_widget(empty, inner);
        return;
    }

    let width = inner.width as usize;
    let lines = pane
        .output
        .visible(inner.height as usize)
        .map(|line| Line::from(truncate(line, width)))
        .collect::<Vec<_>>();
    frame.render_widget(Paragraph::new(Text::from(lines)), inner);
}

fn pane_title(app: &App, role: Role, pane: &Pane) -> Line<'static> {
    let divider = if app.use_symbols { " · " } else { " - " };
    let marker = match (app.focused == role, app.use_symbols) {
        (true, true) => "▶ ",
        (true, false) => "> ",
        (false, _) => "",
    };
    let mut name_style = Style::default().add_modifier(Modifier::BOLD);
    if app.focused == role {
        name_style = name_style.fg(Color::Cyan);
    }
    let mut spans = vec![
        Span::raw(" "),
        Span::styled(format!("{}{}", marker, role), name_style),
        Span::raw(divider.to_string()),
        Span::styled(
            pane.process.status.label(),
            status_style(&pane.process.status),
        ),
    ];
    if !pane.command.is_empty() {
        let room = (pane.area().width as usize).saturating_sub(30);
        spans.push(Span::raw(divider.to_string()));
        spans.push(Span::styled(
            truncate(&pane.command, room),
            Style::default().fg(Color::Gray),
        ));
    }
    if !pane.output.is_following() {
        spans.push(Span::styled(" [paused]", Style::default().fg(Color::Yellow)));
    }
    spans.push(Span::raw(" "));
    Line::from(spans)
}

fn render_footer(app: &App, area: Rect, frame: &mut Frame) {
    let width = area.width as usize;
    let status = Line::from(Span::styled(
        truncate(&app.status_line(), width),
        Style::default().fg(Color::White),
    ));

    let second = if app.input_mode == InputMode::CommandEntry {
        Line::from(vec![
            Span::styled(":", Style::default().fg(Color::Cyan)),
            Span::raw(truncate(&app.input, width.saturating_sub(1))),
        ])
    } else if let Some((message, level)) = app.status_message() {
        let style = match level {
            StatusLevel::Info => Style::default().fg(Color::Green),
            StatusLevel::Warning => Style::default().fg(Color::Yellow),
        };
        Line::from(Span::styled(truncate(message, width), style))
    } else {
        Line::from(Span::styled(
            truncate(default_help(app.use_symbols), width),
            Style::default().fg(Color::DarkGray),
        ))
    };

    frame.render_widget(Paragraph::new(Text::from(vec![status, second])), area);

    if app.input_mode == InputMode::CommandEntry && area.height > 1 {
        let x = area.x + (1 + app.input.chars().count()).min(width.saturating_sub(1)) as u16;
        frame.set_cursor(x, area.y + 1);
    }
}

fn default_help(use_symbols: bool) -> &'static str {
    if use_symbols {
        "Tab focus · PgUp/PgDn scroll · r restart · s layout · : command · y copy · c clear · ? help · q quit"
    } else {
        "Tab focus | PgUp/PgDn scroll | r restart | s layout | : command | y copy | c clear | ? help | q quit"
    }
}

fn render_help(area: Rect, frame: &mut Frame) {
    let mut lines = vec![
        Line::from(Span::styled("Keys", Style::default().add_modifier(Modifier::BOLD))),
        Line::from("  Tab         Switch focused pane"),
        Line::from("  PgUp/PgDn   Scroll focused pane"),
        Line::from("  Up/Down     Scroll one line"),
        Line::from("  Home/End    Jump to top/bottom (End resumes follow)"),
        Line::from("  s, h, v     Toggle stacked/side-by-side layout"),
        Line::from("  r           Restart focused process"),
        Line::from("  c           Clear focused pane"),
        Line::from("  y           Copy focused pane to clipboard"),
        Line::from("  :           Enter a command"),
        Line::from("  ?           Toggle this help"),
        Line::from("  q, Ctrl-C   Quit"),
        Line::from(""),
        Line::from(Span::styled("Commands", Style::default().add_modifier(Modifier::BOLD))),
    ];
    for (name, description) in COMMAND_HELP {
        lines.push(Line::from(format!("  {:<16}{}", name, description)));
    }
    lines.push(Line::from(""));
    lines.push(Line::from(Span::styled(
        "Press any key to close",
        Style::default().fg(Color::Gray),
    )));

    let help = Paragraph::new(Text::from(lines))
        .block(
            Block::default()
                .title(" Help ")
                .borders(Borders::ALL)
                .border_type(BorderType::Rounded),
        )
        .style(Style::default().bg(Color::DarkGray).fg(Color::White));
    frame.render_widget(Clear, area);
    frame.render_widget(help, area);
}

fn centered_rect(percent_x: u16, percent_y: u16, r: Rect) -> Rect {
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(r);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(popup_layout[1])[1]
}

fn window_title(app: &App) -> String {
    let divider = if app.use_symbols { "·" } else { "-" };
    format!("devpane {} {}", divider, app.focused)
}

fn status_style(status: &ProcessStatus) -> Style {
    match status {
        ProcessStatus::NotStarted => Style::default().fg(Color::DarkGray),
        ProcessStatus::Restarting => Style::default().fg(Color::Yellow),
        ProcessStatus::Running => Style::default().fg(Color::Green),
        ProcessStatus::Stopped { .. } => Style::default().fg(Color::Gray),
        ProcessStatus::Failed { .. } => Style::default().fg(Color::Red),
    }
}

fn truncate(text: &str, max: usize) -> String {
    if max == 0 {
        return String::new();
    }
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut out = text.chars().take(max.saturating_sub(1)).collect::<String>();
    out.push('~');
    out
}
