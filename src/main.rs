//! devpane: run a development server and client side by side in one terminal.
//!
//! This is the entry point of the application. It parses command-line arguments,
//! resolves configuration, runs the optional dependency hooks and drives the
//! session event loop that ties the supervisor, the input listener and the UI
//! together.

mod app;
mod clipboard;
mod command;
mod config;
mod deps;
mod events;
mod output;
mod process;
mod shutdown;
mod supervisor;
mod tui;
mod watch;

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use clap::builder::styling::{AnsiColor, Effects, Style};
use clap::builder::Styles;
use clap::{Args, Parser, Subcommand};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use crate::app::{App, AppAction, PaneLayout};
use crate::config::{Config, Overrides, Settings};
use crate::deps::Hook;
use crate::events::Event;
use crate::process::Role;
use crate::shutdown::ShutdownCoordinator;
use crate::supervisor::{ProcessControl, RestartTrigger, Supervisor};
use crate::tui::TerminalSession;

const TICK_RATE: Duration = Duration::from_millis(150);
/// Events handled between two draws at most.
const MAX_EVENTS_PER_FRAME: usize = 512;
/// Consecutive draw failures after which the session gives up.
const MAX_DRAW_FAILURES: u32 = 3;
const LOG_FILE_ENV: &str = "DEVPANE_LOG_FILE";
const LOG_FILTER_ENV: &str = "DEVPANE_LOG";

/// Command-line interface definition.
#[derive(Debug, Parser)]
#[command(
    name = "devpane",
    version,
    about = "Run a dev server and client in one split-pane terminal",
    styles = help_styles(),
    args_conflicts_with_subcommands = true,
    disable_help_subcommand = true
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
    #[command(flatten)]
    run: RunArgs,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Start both processes in the split-pane UI (the default).
    Run(RunArgs),
    /// Print the resolved commands and settings without starting anything.
    Check(ConfigArgs),
    /// Show version information.
    Version,
}

#[derive(Debug, Clone, Default, Args)]
struct ConfigArgs {
    /// Path to devpane.toml configuration file.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Ignore any devpane.toml in the current directory.
    #[arg(long)]
    no_config: bool,
}

#[derive(Debug, Clone, Default, Args)]
struct RunArgs {
    #[command(flatten)]
    config: ConfigArgs,
    /// Initial pane layout.
    #[arg(long, value_enum)]
    layout: Option<PaneLayout>,
    /// Max output lines kept per pane.
    #[arg(long)]
    max_lines: Option<usize>,
    /// Milliseconds to wait after the stop signal before killing.
    #[arg(long)]
    grace_ms: Option<u64>,
    /// Skip the [deps] start and stop commands.
    #[arg(long)]
    no_deps: bool,
    /// Disable restart-on-change watchers.
    #[arg(long)]
    no_watch: bool,
    /// Write logs to this file (also DEVPANE_LOG_FILE).
    #[arg(long)]
    log_file: Option<PathBuf>,
}

impl RunArgs {
    fn overrides(&self) -> Overrides {
        Overrides {
            max_lines: self.max_lines,
            grace_ms: self.grace_ms,
            layout: self.layout,
            no_deps: self.no_deps,
            no_watch: self.no_watch,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let result = match cli.command {
        Some(Commands::Version) => {
            println!("devpane {}", env!("CARGO_PKG_VERSION"));
            Ok(ExitCode::SUCCESS)
        }
        Some(Commands::Check(args)) => check(&args),
        Some(Commands::Run(args)) => run(args).await,
        None => run(cli.run).await,
    };
    match result {
        Ok(code) => code,
        Err(err) => {
            eprintln!("devpane: {:?}", err);
            ExitCode::from(1)
        }
    }
}

fn load_settings(args: &ConfigArgs, overrides: &Overrides) -> Result<Settings> {
    let (source, file) = match config::discover_config(args.config.as_deref(), args.no_config)? {
        Some((path, config)) => (Some(path), config),
        None => (None, Config::default()),
    };
    config::resolve(file, source, overrides)
}

fn check(args: &ConfigArgs) -> Result<ExitCode> {
    let settings = load_settings(args, &Overrides::default())?;
    print!("{}", settings.describe());
    Ok(ExitCode::SUCCESS)
}

async fn run(args: RunArgs) -> Result<ExitCode> {
    init_logging(args.log_file.as_deref())?;
    let settings = load_settings(&args.config, &args.overrides())?;
    info!(
        source = ?settings.source,
        server = %settings.specs.server.command_line(),
        client = %settings.specs.client.command_line(),
        "starting session"
    );

    if let Some(deps) = &settings.deps {
        deps::run_hook(deps, Hook::Start).await?;
    }

    let result = run_session(&settings).await;

    if let Some(deps) = &settings.deps {
        if let Err(err) = deps::run_hook(deps, Hook::Stop).await {
            warn!(error = %format!("{:#}", err), "deps stop failed");
            eprintln!("devpane: warning: {:#}", err);
        }
    }
    if let Ok(code) = &result {
        info!(?code, "session finished");
    }
    result
}

async fn run_session(settings: &Settings) -> Result<ExitCode> {
    let (event_tx, mut event_rx) = mpsc::channel(1024);

    tui::install_panic_hook();
    let mut terminal = TerminalSession::enter().context("failed to initialize terminal")?;
    let size = terminal.size().context("failed to read terminal size")?;

    let commands = settings.specs.clone().map(|_, spec| spec.command_line());
    let mut app = App::new(
        commands,
        settings.max_lines,
        settings.layout,
        settings.scroll_step,
        settings.use_symbols,
    );
    app.resize(size.width, size.height);

    let supervisor = Supervisor::spawn(settings.specs.clone(), settings.stop_config(), event_tx.clone());
    for role in Role::ALL {
        supervisor.start(role);
    }

    spawn_input_listener(event_tx.clone());
    spawn_signal_listener(event_tx.clone());
    watch::spawn_watchers(&settings.specs, event_tx.clone());

    let mut session = Session {
        app,
        coordinator: ShutdownCoordinator::new(),
        supervisor,
        event_tx,
    };
    let mut ticker = tokio::time::interval(TICK_RATE);
    let mut draw_failures = 0;
    let mut fatal = None;

    loop {
        tokio::select! {
            Some(event) = event_rx.recv() => {
                session.handle_event(event);
                for _ in 0..MAX_EVENTS_PER_FRAME {
                    match event_rx.try_recv() {
                        Ok(event) => session.handle_event(event),
                        Err(_) => break,
                    }
                }
            }
            _ = ticker.tick() => {}
        }

        if session.coordinator.is_terminated() {
            break;
        }

        session.app.tick(Instant::now());
        match terminal.draw(&session.app) {
            Ok(()) => draw_failures = 0,
            Err(err) => {
                draw_failures += 1;
                warn!(error = %err, failures = draw_failures, "failed to draw");
                if draw_failures >= MAX_DRAW_FAILURES && fatal.is_none() {
                    fatal = Some(anyhow!(err).context("terminal output failed repeatedly"));
                    session.begin_shutdown("terminal failure");
                }
            }
        }
    }

    terminal.restore().context("failed to restore terminal")?;
    if let Some(err) = fatal {
        return Err(err);
    }
    Ok(session.coordinator.exit_code(session.app.initial_spawn_failed))
}

/// State owned by the event loop.
struct Session {
    app: App,
    coordinator: ShutdownCoordinator,
    supervisor: Supervisor,
    event_tx: mpsc::Sender<Event>,
}

impl Session {
    fn handle_event(&mut self, event: Event) {
        let app = &mut self.app;
        match event {
            Event::ProcessRestarting { role } => app.on_process_restarting(role),
            Event::ProcessStarting {
                role,
                generation,
                command,
            } => app.on_process_starting(role, generation, &command),
            Event::ProcessStarted {
                role,
                generation,
                pid,
            } => app.on_process_started(role, generation, pid),
            Event::ProcessOutput {
                role,
                generation,
                line,
            } => {
                if !app.on_process_output(role, generation, &line) {
                    debug!(role = %role, generation, "dropped output from stale instance");
                }
            }
            Event::ProcessSignalled {
                role,
                generation,
                signal,
            } => app.on_process_signalled(role, generation, signal),
            Event::ProcessStopped {
                role,
                generation,
                code,
                forced,
            } => app.on_process_stopped(role, generation, code, forced),
            Event::ProcessExited {
                role,
                generation,
                code,
            } => app.on_process_exited(role, generation, code),
            Event::ProcessFailed {
                role,
                generation,
                kind,
                error,
            } => app.on_process_failed(role, generation, kind, &error),
            Event::OutputError {
                role,
                generation,
                error,
            } => app.on_output_error(role, generation, &error),
            Event::Restart { role } => {
                if !app.shutting_down {
                    self.supervisor.restart(role, RestartTrigger::Watch);
                }
            }
            Event::Shutdown { signal } => {
                self.begin_shutdown(&format!("received {}", signal));
            }
            Event::ShutdownComplete(report) => self.coordinator.complete(report),
            Event::CopyFinished { role, result } => app.on_copy_finished(role, result),
            Event::Key(key) => {
                let action = app.handle_key(key);
                self.apply(action);
            }
            Event::Mouse(mouse) => {
                let action = app.handle_mouse(mouse);
                self.apply(action);
            }
            Event::Resize { width, height } => app.resize(width, height),
        }
    }

    fn apply(&mut self, action: AppAction) {
        if let AppAction::Copy(role) = action {
            self.copy_pane(role);
            return;
        }
        if dispatch_action(action, &mut self.app, &self.supervisor) {
            self.begin_shutdown("quit requested");
        }
    }

    fn copy_pane(&mut self, role: Role) {
        let Some(text) = self.app.pane_text(role) else {
            self.app.set_status_message(format!("{} pane is empty", role));
            return;
        };
        let lines = self.app.pane(role).output.len();
        clipboard::copy_in_background(role, text, lines, self.event_tx.clone());
    }

    /// Starts stopping both roles in the background. Repeated calls are ignored.
    fn begin_shutdown(&mut self, reason: &str) {
        if !self.coordinator.trigger(reason) {
            return;
        }
        self.app.on_shutdown_started(reason);
        let supervisor = self.supervisor.clone();
        let tx = self.event_tx.clone();
        tokio::spawn(async move {
            let report = supervisor.shutdown().await;
            let _ = tx.send(Event::ShutdownComplete(report)).await;
        });
    }
}

/// Carries out a user action. Returns `true` when the session should end.
fn dispatch_action(action: AppAction, app: &mut App, control: &impl ProcessControl) -> bool {
    match action {
        AppAction::None => false,
        AppAction::Quit => true,
        AppAction::Restart(role) => {
            if app.shutting_down {
                return false;
            }
            control.restart(role, RestartTrigger::Manual);
            false
        }
        // The session copies on a blocking task; see `Session::copy_pane`.
        AppAction::Copy(_) => false,
    }
}

/// Sends logs to a file when one is configured. Without a file nothing is
/// installed, since the UI owns the terminal.
fn init_logging(path: Option<&Path>) -> Result<()> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => match std::env::var_os(LOG_FILE_ENV) {
            Some(path) => PathBuf::from(path),
            None => return Ok(()),
        },
    };
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("failed to open log file {}", path.display()))?;
    let filter = EnvFilter::try_from_env(LOG_FILTER_ENV).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .init();
    Ok(())
}

fn spawn_input_listener(tx: mpsc::Sender<Event>) {
    std::thread::spawn(move || {
        while !tx.is_closed() {
            if !crossterm::event::poll(Duration::from_millis(100)).unwrap_or(false) {
                continue;
            }
            let event = match crossterm::event::read() {
                Ok(crossterm::event::Event::Key(key)) => Event::Key(key),
                Ok(crossterm::event::Event::Mouse(mouse)) => Event::Mouse(mouse),
                Ok(crossterm::event::Event::Resize(width, height)) => Event::Resize { width, height },
                Ok(_) => continue,
                Err(err) => {
                    warn!(error = %err, "failed to read terminal input");
                    continue;
                }
            };
            if tx.blocking_send(event).is_err() {
                break;
            }
        }
    });
}

fn spawn_signal_listener(tx: mpsc::Sender<Event>) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let (mut sigint, mut sigterm, mut sighup) = match (
                signal(SignalKind::interrupt()),
                signal(SignalKind::terminate()),
                signal(SignalKind::hangup()),
            ) {
                (Ok(int), Ok(term), Ok(hup)) => (int, term, hup),
                _ => {
                    warn!("failed to install signal handlers");
                    return;
                }
            };
            loop {
                let name = tokio::select! {
                    _ = sigint.recv() => "SIGINT",
                    _ = sigterm.recv() => "SIGTERM",
                    _ = sighup.recv() => "SIGHUP",
                };
                if tx.send(Event::Shutdown { signal: name }).await.is_err() {
                    break;
                }
            }
        }
        #[cfg(not(unix))]
        {
            while tokio::signal::ctrl_c().await.is_ok() {
                if tx.send(Event::Shutdown { signal: "Ctrl-C" }).await.is_err() {
                    break;
                }
            }
        }
    });
}

fn help_styles() -> Styles {
    Styles::styled()
        .header(
            Style::new()
                .fg_color(Some(AnsiColor::Cyan.into()))
                .effects(Effects::BOLD),
        )
        .usage(
            Style::new()
                .fg_color(Some(AnsiColor::Green.into()))
                .effects(Effects::BOLD),
        )
        .literal(Style::new().fg_color(Some(AnsiColor::Yellow.into())))
        .placeholder(Style::new().fg_color(Some(AnsiColor::Magenta.into())))
        .valid(Style::new().fg_color(Some(AnsiColor::Green.into())))
        .invalid(
            Style::new()
                .fg_color(Some(AnsiColor::Red.into()))
                .effects(Effects::BOLD),
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::RoleMap;
    use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
    use std::cell::RefCell;

    #[derive(Default)]
    struct Recorder {
        restarts: RefCell<Vec<(Role, RestartTrigger)>>,
    }

    impl ProcessControl for Recorder {
        fn start(&self, _role: Role) {}

        fn restart(&self, role: Role, trigger: RestartTrigger) {
            self.restarts.borrow_mut().push((role, trigger));
        }
    }

    fn make_app() -> App {
        let mut app = App::new(
            RoleMap::new("make run-server".into(), "npm run run".into()),
            100,
            PaneLayout::Stacked,
            5,
            true,
        );
        app.resize(80, 24);
        app
    }

    fn press(app: &mut App, control: &Recorder, code: KeyCode) -> bool {
        let action = app.handle_key(KeyEvent::new(code, KeyModifiers::NONE));
        dispatch_action(action, app, control)
    }

    #[test]
    fn server_restart_command_restarts_only_server() {
        let mut app = make_app();
        let recorder = Recorder::default();
        press(&mut app, &recorder, KeyCode::Char(':'));
        for c in "server-restart".chars() {
            press(&mut app, &recorder, KeyCode::Char(c));
        }
        assert!(recorder.restarts.borrow().is_empty());
        assert!(!press(&mut app, &recorder, KeyCode::Enter));
        assert_eq!(
            *recorder.restarts.borrow(),
            vec![(Role::Server, RestartTrigger::Manual)]
        );
    }

    #[test]
    fn unknown_command_dispatches_nothing() {
        let mut app = make_app();
        let recorder = Recorder::default();
        press(&mut app, &recorder, KeyCode::Char(':'));
        for c in "restart-everything".chars() {
            press(&mut app, &recorder, KeyCode::Char(c));
        }
        assert!(!press(&mut app, &recorder, KeyCode::Enter));
        assert!(recorder.restarts.borrow().is_empty());
    }

    #[test]
    fn quit_ends_session_and_restarts_stop_during_shutdown() {
        let mut app = make_app();
        let recorder = Recorder::default();
        assert!(press(&mut app, &recorder, KeyCode::Char('q')));
        app.on_shutdown_started("quit requested");
        assert!(!press(&mut app, &recorder, KeyCode::Char('r')));
        assert!(recorder.restarts.borrow().is_empty());
    }

    #[cfg(unix)]
    fn shell(role: Role, script: &str) -> crate::process::ProcessSpec {
        crate::process::ProcessSpec {
            role,
            cmd: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
            cwd: None,
            env: std::collections::HashMap::new(),
            watch_paths: Vec::new(),
            watch_ignore: Vec::new(),
            watch_ignore_gitignore: false,
            watch_debounce_ms: 200,
        }
    }

    /// Runs a session with the given scripts until both print `ready`, quits it
    /// and returns the resulting exit status.
    #[cfg(unix)]
    async fn exit_status_after_quit(server: &str, client: &str) -> u8 {
        use crate::events::ProcessSignal;
        use crate::supervisor::StopConfig;

        let (event_tx, mut event_rx) = mpsc::channel(256);
        let specs = RoleMap::new(shell(Role::Server, server), shell(Role::Client, client));
        let supervisor = Supervisor::spawn(specs, StopConfig::new(300, ProcessSignal::SigTerm), event_tx.clone());
        let mut session = Session {
            app: make_app(),
            coordinator: ShutdownCoordinator::new(),
            supervisor,
            event_tx,
        };
        for role in Role::ALL {
            session.supervisor.start(role);
        }

        let ready = |session: &Session| {
            Role::ALL.iter().all(|role| {
                session
                    .app
                    .pane_text(*role)
                    .is_some_and(|text| text.contains("ready"))
            })
        };
        let mut quit_sent = false;
        while !session.coordinator.is_terminated() {
            let event = tokio::time::timeout(Duration::from_secs(10), event_rx.recv())
                .await
                .expect("timed out waiting for session event")
                .expect("event channel closed");
            session.handle_event(event);
            if !quit_sent && ready(&session) {
                session.apply(AppAction::Quit);
                quit_sent = true;
            }
        }
        assert!(session.app.shutting_down);
        session.coordinator.exit_status(session.app.initial_spawn_failed)
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn quitting_with_cooperative_children_exits_cleanly() {
        let status = exit_status_after_quit("echo ready; sleep 30", "echo ready; sleep 30").await;
        assert_eq!(status, 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn quitting_with_a_child_ignoring_term_exits_forced() {
        let status = exit_status_after_quit("trap '' TERM; echo ready; sleep 30", "echo ready; sleep 30").await;
        assert_eq!(status, 2);
    }

    #[test]
    fn cli_defaults_to_run() {
        let cli = Cli::try_parse_from(["devpane", "--layout", "side-by-side", "--no-deps"]).unwrap();
        assert!(cli.command.is_none());
        assert_eq!(cli.run.layout, Some(PaneLayout::SideBySide));
        assert!(cli.run.no_deps);

        let cli = Cli::try_parse_from(["devpane", "run", "--max-lines", "50", "--grace-ms", "250"]).unwrap();
        let Some(Commands::Run(args)) = cli.command else {
            panic!("expected run subcommand");
        };
        let overrides = args.overrides();
        assert_eq!(overrides.max_lines, Some(50));
        assert_eq!(overrides.grace_ms, Some(250));
    }

    #[test]
    fn cli_check_takes_config_path() {
        let cli = Cli::try_parse_from(["devpane", "check", "--config", "alt.toml"]).unwrap();
        let Some(Commands::Check(args)) = cli.command else {
            panic!("expected check subcommand");
        };
        assert_eq!(args.config, Some(PathBuf::from("alt.toml")));
        assert!(Cli::try_parse_from(["devpane", "--layout", "diagonal"]).is_err());
    }
}
