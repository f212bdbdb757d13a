//! Auxiliary service hooks run around the session.
//!
//! `[deps].start` runs to completion before the terminal is taken over and
//! `[deps].stop` after it is given back. Both inherit stdio so their output is
//! visible in the plain terminal.

use std::process::Stdio;

use anyhow::{bail, Context, Result};
use tokio::process::Command;
use tracing::{info, warn};

use crate::config::DepsConfig;

/// Which hook to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hook {
    Start,
    Stop,
}

impl Hook {
    fn name(self) -> &'static str {
        match self {
            Hook::Start => "start",
            Hook::Stop => "stop",
        }
    }
}

/// Runs one hook. A missing hook is a no-op.
pub async fn run_hook(deps: &DepsConfig, hook: Hook) -> Result<()> {
    let line = match hook {
        Hook::Start => deps.start.as_deref(),
        Hook::Stop => deps.stop.as_deref(),
    };
    let Some(line) = line else {
        return Ok(());
    };
    let mut parts = shell_words::split(line)
        .with_context(|| format!("failed to parse deps {} command: {}", hook.name(), line))?;
    if parts.is_empty() {
        return Ok(());
    }
    let cmd = parts.remove(0);

    let mut command = Command::new(&cmd);
    command
        .args(&parts)
        .stdin(Stdio::null())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit());
    if let Some(cwd) = &deps.cwd {
        command.current_dir(cwd);
    }

    info!(hook = hook.name(), command = line, "running deps hook");
    let status = command
        .status()
        .await
        .with_context(|| format!("failed to run deps {} command: {}", hook.name(), line))?;
    if !status.success() {
        warn!(hook = hook.name(), ?status, "deps hook failed");
        bail!("deps {} command `{}` failed with {}", hook.name(), line, status);
    }
    Ok(())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn deps(start: Option<&str>, stop: Option<&str>) -> DepsConfig {
        DepsConfig {
            start: start.map(String::from),
            stop: stop.map(String::from),
            cwd: None,
        }
    }

    #[tokio::test]
    async fn missing_hook_is_a_no_op() {
        run_hook(&deps(None, None), Hook::Start).await.unwrap();
        run_hook(&deps(Some("false"), None), Hook::Stop).await.unwrap();
    }

    #[tokio::test]
    async fn successful_hook() {
        run_hook(&deps(Some("true"), None), Hook::Start).await.unwrap();
    }

    #[tokio::test]
    async fn failing_hook_reports_command() {
        let err = run_hook(&deps(None, Some("sh -c 'exit 4'")), Hook::Stop)
            .await
            .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("deps stop command"));
        assert!(message.contains("exit"));
    }

    #[tokio::test]
    async fn hook_runs_in_configured_cwd() {
        let dir = tempfile::tempdir().unwrap();
        let config = DepsConfig {
            start: Some("touch started".into()),
            stop: None,
            cwd: Some(dir.path().display().to_string()),
        };
        run_hook(&config, Hook::Start).await.unwrap();
        assert!(dir.path().join("started").exists());
    }

    #[tokio::test]
    async fn missing_binary_is_an_error() {
        let err = run_hook(&deps(Some("devpane-no-such-binary"), None), Hook::Start)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("failed to run deps start command"));
    }
}
