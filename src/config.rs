//! Configuration management for devpane.
//!
//! This module defines the structure of the `devpane.toml` configuration file,
//! loads it, and resolves it together with command-line overrides into the
//! `Settings` a session runs with.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::app::PaneLayout;
use crate::events::ProcessSignal;
use crate::process::{ProcessSpec, Role, RoleMap};
use crate::supervisor::{StopConfig, DEFAULT_GRACE_MS};

/// Looked up in the current directory when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "devpane.toml";

const DEFAULT_MAX_LINES: usize = 2000;
const DEFAULT_SCROLL_STEP: usize = 5;
const DEFAULT_DEBOUNCE_MS: u64 = 200;

/// Top-level configuration structure corresponding to `devpane.toml`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Lines kept per pane.
    pub max_lines: Option<usize>,
    /// Milliseconds between the graceful signal and SIGKILL.
    pub grace_ms: Option<u64>,
    /// Graceful signal sent on stop.
    pub stop_signal: Option<StopSignal>,
    /// Initial pane layout.
    pub layout: Option<PaneLayout>,
    /// Lines moved by page-up/page-down.
    pub scroll_step: Option<usize>,
    /// Whether to use Unicode symbols in the TUI (default: true).
    pub symbols: Option<bool>,
    pub server: Option<RoleConfig>,
    pub client: Option<RoleConfig>,
    pub deps: Option<DepsConfig>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StopSignal {
    Term,
    Int,
}

impl From<StopSignal> for ProcessSignal {
    fn from(signal: StopSignal) -> Self {
        match signal {
            StopSignal::Term => ProcessSignal::SigTerm,
            StopSignal::Int => ProcessSignal::SigInt,
        }
    }
}

/// Configuration for one role's process.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RoleConfig {
    /// Command line, split with shell quoting rules.
    pub cmd: Option<String>,
    /// Working directory for the process.
    pub cwd: Option<String>,
    /// Environment variables to set for the process.
    pub env: Option<HashMap<String, String>>,
    /// List of file paths or patterns to watch for changes.
    pub watch: Option<Vec<String>>,
    /// List of patterns to ignore when watching.
    pub watch_ignore: Option<Vec<String>>,
    /// Whether to skip `.gitignore` rules when watching (default: false).
    pub watch_ignore_gitignore: Option<bool>,
    /// Debounce interval in milliseconds for watch events.
    pub watch_debounce_ms: Option<u64>,
}

/// Commands bringing auxiliary services up before the session and down after.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DepsConfig {
    pub start: Option<String>,
    pub stop: Option<String>,
    pub cwd: Option<String>,
}

/// Values given on the command line. They win over the file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub max_lines: Option<usize>,
    pub grace_ms: Option<u64>,
    pub layout: Option<PaneLayout>,
    pub no_deps: bool,
    pub no_watch: bool,
}

/// Fully resolved settings for a session.
#[derive(Debug, Clone)]
pub struct Settings {
    pub specs: RoleMap<ProcessSpec>,
    pub max_lines: usize,
    pub grace_ms: u64,
    pub stop_signal: ProcessSignal,
    pub layout: PaneLayout,
    pub scroll_step: usize,
    pub use_symbols: bool,
    /// `None` when there is nothing to run or `--no-deps` was given.
    pub deps: Option<DepsConfig>,
    /// The file the settings were read from, if any.
    pub source: Option<PathBuf>,
}

impl Settings {
    pub fn stop_config(&self) -> StopConfig {
        StopConfig::new(self.grace_ms, self.stop_signal)
    }

    /// Human-readable summary printed by `devpane check`.
    pub fn describe(&self) -> String {
        let mut out = String::new();
        let source = self
            .source
            .as_ref()
            .map(|path| path.display().to_string())
            .unwrap_or_else(|| "built-in defaults".to_string());
        let _ = writeln!(out, "config: {}", source);
        for (role, spec) in self.specs.iter() {
            let _ = writeln!(out, "{}:", role);
            let _ = writeln!(out, "  cmd: {}", spec.command_line());
            let _ = writeln!(out, "  cwd: {}", spec.cwd.as_deref().unwrap_or("."));
            if !spec.env.is_empty() {
                let mut keys = spec.env.keys().map(String::as_str).collect::<Vec<_>>();
                keys.sort_unstable();
                let _ = writeln!(out, "  env: {}", keys.join(", "));
            }
            if !spec.watch_paths.is_empty() {
                let _ = writeln!(
                    out,
                    "  watch: {} (debounce {}ms)",
                    spec.watch_paths.join(", "),
                    spec.watch_debounce_ms
                );
            }
        }
        let _ = writeln!(out, "max_lines: {}", self.max_lines);
        let _ = writeln!(
            out,
            "stop: {} then SIGKILL after {}ms",
            self.stop_signal.label(),
            self.grace_ms
        );
        let _ = writeln!(out, "layout: {}", self.layout.label());
        let _ = writeln!(out, "scroll_step: {}", self.scroll_step);
        match &self.deps {
            Some(deps) => {
                let _ = writeln!(out, "deps start: {}", deps.start.as_deref().unwrap_or("-"));
                let _ = writeln!(out, "deps stop: {}", deps.stop.as_deref().unwrap_or("-"));
            }
            None => {
                let _ = writeln!(out, "deps: none");
            }
        }
        out
    }
}

/// Loads and parses the configuration from a file path.
pub fn load_config(path: &Path) -> Result<Config> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let config: Config = toml::from_str(&raw)
        .with_context(|| format!("failed to parse config file {}", path.display()))?;
    Ok(config)
}

/// Finds the config to use: an explicit path must exist, the default file is
/// optional.
pub fn discover_config(explicit: Option<&Path>, no_config: bool) -> Result<Option<(PathBuf, Config)>> {
    if no_config {
        return Ok(None);
    }
    if let Some(path) = explicit {
        let config = load_config(path)?;
        return Ok(Some((path.to_path_buf(), config)));
    }
    let path = PathBuf::from(DEFAULT_CONFIG_FILE);
    if !path.exists() {
        return Ok(None);
    }
    let config = load_config(&path)?;
    Ok(Some((path, config)))
}

/// Merges command-line overrides, the config file and built-in defaults.
pub fn resolve(config: Config, source: Option<PathBuf>, overrides: &Overrides) -> Result<Settings> {
    let max_lines = overrides
        .max_lines
        .or(config.max_lines)
        .unwrap_or(DEFAULT_MAX_LINES);
    if max_lines == 0 {
        bail!("max_lines must be at least 1");
    }
    let scroll_step = config.scroll_step.unwrap_or(DEFAULT_SCROLL_STEP);
    if scroll_step == 0 {
        bail!("scroll_step must be at least 1");
    }

    let server = role_spec(Role::Server, config.server, overrides.no_watch)?;
    let client = role_spec(Role::Client, config.client, overrides.no_watch)?;

    let deps = if overrides.no_deps {
        None
    } else {
        config
            .deps
            .filter(|deps| deps.start.is_some() || deps.stop.is_some())
    };

    Ok(Settings {
        specs: RoleMap::new(server, client),
        max_lines,
        grace_ms: overrides
            .grace_ms
            .or(config.grace_ms)
            .unwrap_or(DEFAULT_GRACE_MS),
        stop_signal: config.stop_signal.unwrap_or(StopSignal::Term).into(),
        layout: overrides
            .layout
            .or(config.layout)
            .unwrap_or(PaneLayout::Stacked),
        scroll_step,
        use_symbols: config.symbols.unwrap_or(true),
        deps,
        source,
    })
}

fn default_command(role: Role) -> (&'static str, &'static str) {
    match role {
        Role::Server => ("make run-server", "server"),
        Role::Client => ("npm run run", "webapp"),
    }
}

fn role_spec(role: Role, config: Option<RoleConfig>, no_watch: bool) -> Result<ProcessSpec> {
    let config = config.unwrap_or_default();
    let (default_cmd, default_cwd) = default_command(role);
    let (line, cwd) = match config.cmd {
        // a configured command runs where devpane runs unless cwd says otherwise
        Some(cmd) => (cmd, config.cwd),
        None => (
            default_cmd.to_string(),
            Some(config.cwd.unwrap_or_else(|| default_cwd.to_string())),
        ),
    };

    let mut parts = shell_words::split(&line)
        .with_context(|| format!("failed to parse {} command: {}", role, line))?;
    if parts.is_empty() {
        bail!("{} command is empty", role);
    }
    let cmd = parts.remove(0);

    Ok(ProcessSpec {
        role,
        cmd,
        args: parts,
        cwd,
        env: config.env.unwrap_or_default(),
        watch_paths: if no_watch {
            Vec::new()
        } else {
            config.watch.unwrap_or_default()
        },
        watch_ignore: config.watch_ignore.unwrap_or_default(),
        watch_ignore_gitignore: config.watch_ignore_gitignore.unwrap_or(false),
        watch_debounce_ms: config.watch_debounce_ms.unwrap_or(DEFAULT_DEBOUNCE_MS),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const FULL: &str = r#"
max_lines = 500
grace_ms = 1500
stop_signal = "int"
layout = "side-by-side"
scroll_step = 10
symbols = false

[server]
cmd = "cargo run --bin api -- --port 8080"
cwd = "api"
env = { RUST_LOG = "debug" }
watch = ["src", "Cargo.toml"]
watch_ignore = ["target", "**/*.log"]
watch_ignore_gitignore = true
watch_debounce_ms = 150

[client]
cmd = "pnpm dev"

[deps]
start = "docker compose up -d"
stop = "docker compose down"
"#;

    #[test]
    fn parses_all_fields() {
        let config: Config = toml::from_str(FULL).unwrap();
        let settings = resolve(config, None, &Overrides::default()).unwrap();
        assert_eq!(settings.max_lines, 500);
        assert_eq!(settings.grace_ms, 1500);
        assert_eq!(settings.stop_signal, ProcessSignal::SigInt);
        assert_eq!(settings.layout, PaneLayout::SideBySide);
        assert_eq!(settings.scroll_step, 10);
        assert!(!settings.use_symbols);

        let server = &settings.specs[Role::Server];
        assert_eq!(server.cmd, "cargo");
        assert_eq!(server.args, vec!["run", "--bin", "api", "--", "--port", "8080"]);
        assert_eq!(server.cwd.as_deref(), Some("api"));
        assert_eq!(server.env.get("RUST_LOG").map(String::as_str), Some("debug"));
        assert_eq!(server.watch_paths, vec!["src", "Cargo.toml"]);
        assert!(server.watch_ignore_gitignore);
        assert_eq!(server.watch_debounce_ms, 150);

        let client = &settings.specs[Role::Client];
        assert_eq!(client.cmd, "pnpm");
        assert_eq!(client.args, vec!["dev"]);
        assert_eq!(client.cwd, None);

        let deps = settings.deps.unwrap();
        assert_eq!(deps.start.as_deref(), Some("docker compose up -d"));
        assert_eq!(deps.stop.as_deref(), Some("docker compose down"));
    }

    #[test]
    fn defaults_without_config() {
        let settings = resolve(Config::default(), None, &Overrides::default()).unwrap();
        let server = &settings.specs[Role::Server];
        assert_eq!(server.command_line(), "make run-server");
        assert_eq!(server.cwd.as_deref(), Some("server"));
        let client = &settings.specs[Role::Client];
        assert_eq!(client.command_line(), "npm run run");
        assert_eq!(client.cwd.as_deref(), Some("webapp"));
        assert_eq!(settings.max_lines, 2000);
        assert_eq!(settings.grace_ms, 5000);
        assert_eq!(settings.stop_signal, ProcessSignal::SigTerm);
        assert_eq!(settings.layout, PaneLayout::Stacked);
        assert_eq!(settings.scroll_step, 5);
        assert!(settings.use_symbols);
        assert!(settings.deps.is_none());
    }

    #[test]
    fn command_line_flags_override_file() {
        let config: Config = toml::from_str(FULL).unwrap();
        let overrides = Overrides {
            max_lines: Some(42),
            grace_ms: Some(300),
            layout: Some(PaneLayout::Stacked),
            no_deps: true,
            no_watch: true,
        };
        let settings = resolve(config, None, &overrides).unwrap();
        assert_eq!(settings.max_lines, 42);
        assert_eq!(settings.grace_ms, 300);
        assert_eq!(settings.layout, PaneLayout::Stacked);
        assert!(settings.deps.is_none());
        assert!(settings.specs[Role::Server].watch_paths.is_empty());
    }

    #[test]
    fn default_cwd_applies_only_to_default_command() {
        let raw = r#"
[server]
cwd = "backend"
"#;
        let config: Config = toml::from_str(raw).unwrap();
        let settings = resolve(config, None, &Overrides::default()).unwrap();
        assert_eq!(settings.specs[Role::Server].cwd.as_deref(), Some("backend"));
        assert_eq!(settings.specs[Role::Server].cmd, "make");
    }

    #[test]
    fn rejects_bad_values() {
        let unbalanced: Config = toml::from_str("[server]\ncmd = \"echo 'oops\"").unwrap();
        let err = resolve(unbalanced, None, &Overrides::default()).unwrap_err();
        assert!(err.to_string().contains("failed to parse server command"));

        let empty: Config = toml::from_str("[client]\ncmd = \"   \"").unwrap();
        let err = resolve(empty, None, &Overrides::default()).unwrap_err();
        assert_eq!(err.to_string(), "client command is empty");

        let zero: Config = toml::from_str("max_lines = 0").unwrap();
        assert!(resolve(zero, None, &Overrides::default()).is_err());

        assert!(toml::from_str::<Config>("stop_signal = \"hup\"").is_err());
        assert!(toml::from_str::<Config>("unknown_key = 1").is_err());
    }

    #[test]
    fn empty_deps_section_is_ignored() {
        let config: Config = toml::from_str("[deps]\ncwd = \"infra\"").unwrap();
        let settings = resolve(config, None, &Overrides::default()).unwrap();
        assert!(settings.deps.is_none());
    }

    #[test]
    fn loads_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(FULL.as_bytes()).unwrap();
        let (path, config) = discover_config(Some(file.path()), false).unwrap().unwrap();
        assert_eq!(path, file.path());
        assert_eq!(config.max_lines, Some(500));
    }

    #[test]
    fn missing_explicit_config_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        let err = discover_config(Some(&missing), false).unwrap_err();
        assert!(err.to_string().contains("failed to read config file"));
        assert!(discover_config(Some(&missing), true).unwrap().is_none());
    }

    #[test]
    fn describe_lists_both_roles() {
        let settings = resolve(Config::default(), None, &Overrides::default()).unwrap();
        let text = settings.describe();
        assert!(text.contains("config: built-in defaults"));
        assert!(text.contains("server:\n  cmd: make run-server\n  cwd: server"));
        assert!(text.contains("client:\n  cmd: npm run run"));
        assert!(text.contains("stop: SIGTERM then SIGKILL after 5000ms"));
    }
}
