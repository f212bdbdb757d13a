//! File watching and auto-restart.
//!
//! Each role with watch paths gets a background thread owning a `notify`
//! watcher. Bursts of relevant changes are debounced into a single
//! `Event::Restart` for that role. Changes matching ignore globs, or
//! `.gitignore` rules unless disabled, are dropped.

use std::path::{Path, PathBuf};
use std::sync::mpsc::RecvTimeoutError;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use ignore::gitignore::{Gitignore, GitignoreBuilder};
use notify::{Event as NotifyEvent, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::events::Event;
use crate::process::{ProcessSpec, RoleMap};

const MIN_DEBOUNCE_MS: u64 = 50;

/// Starts one watcher thread per role that has watch paths configured.
pub fn spawn_watchers(specs: &RoleMap<ProcessSpec>, tx: mpsc::Sender<Event>) {
    for (role, spec) in specs.iter() {
        if spec.watch_paths.is_empty() {
            continue;
        }
        let spec = spec.clone();
        let tx = tx.clone();
        std::thread::spawn(move || {
            if let Err(err) = watch_role(&spec, tx) {
                warn!(role = %role, error = %format!("{:#}", err), "watcher stopped");
            }
        });
    }
}

fn watch_role(spec: &ProcessSpec, tx: mpsc::Sender<Event>) -> Result<()> {
    let base = match &spec.cwd {
        Some(cwd) => PathBuf::from(cwd),
        None => std::env::current_dir().context("failed to resolve current dir")?,
    };
    // notify reports absolute paths
    let base = base.canonicalize().unwrap_or(base);
    let watch_paths = resolve_watch_paths(&base, &spec.watch_paths);
    let matcher = IgnoreMatcher::new(&base, &spec.watch_ignore, !spec.watch_ignore_gitignore)?;

    let (raw_tx, raw_rx) = std::sync::mpsc::channel();
    let mut watcher = RecommendedWatcher::new(
        move |res| {
            let _ = raw_tx.send(res);
        },
        notify::Config::default(),
    )
    .context("failed to create watcher")?;

    for path in &watch_paths {
        watcher
            .watch(path, RecursiveMode::Recursive)
            .with_context(|| format!("failed to watch {}", path.display()))?;
    }
    info!(role = %spec.role, paths = watch_paths.len(), "watching for changes");

    let debounce = Duration::from_millis(spec.watch_debounce_ms.max(MIN_DEBOUNCE_MS));
    while let Ok(event) = raw_rx.recv() {
        if !is_relevant(&event, &matcher) {
            continue;
        }

        let mut last = Instant::now();
        loop {
            let elapsed = last.elapsed();
            if elapsed >= debounce {
                break;
            }
            match raw_rx.recv_timeout(debounce - elapsed) {
                Ok(res) => {
                    if is_relevant(&res, &matcher) {
                        last = Instant::now();
                    }
                }
                Err(RecvTimeoutError::Timeout) => break,
                Err(RecvTimeoutError::Disconnected) => return Ok(()),
            }
        }

        debug!(role = %spec.role, "change detected, requesting restart");
        if tx.blocking_send(Event::Restart { role: spec.role }).is_err() {
            // session is gone
            break;
        }
    }

    Ok(())
}

fn resolve_watch_paths(base: &Path, paths: &[String]) -> Vec<PathBuf> {
    paths
        .iter()
        .map(|path| {
            let path_buf = PathBuf::from(path);
            if path_buf.is_absolute() {
                path_buf
            } else {
                base.join(path_buf)
            }
        })
        .collect()
}

fn is_relevant(event: &notify::Result<NotifyEvent>, matcher: &IgnoreMatcher) -> bool {
    let Ok(event) = event else {
        return true;
    };
    if event.paths.is_empty() {
        return true;
    }
    event.paths.iter().any(|path| !matcher.is_ignored(path))
}

/// Explicit ignore globs plus optional gitignore rules.
struct IgnoreMatcher {
    base: PathBuf,
    globset: Option<GlobSet>,
    gitignore: Option<Gitignore>,
}

impl IgnoreMatcher {
    fn new(base: &Path, patterns: &[String], use_gitignore: bool) -> Result<Self> {
        let globset = if patterns.is_empty() {
            None
        } else {
            let mut builder = GlobSetBuilder::new();
            for pattern in patterns {
                for expanded in expand_pattern(pattern) {
                    builder.add(
                        Glob::new(&expanded)
                            .with_context(|| format!("invalid watch_ignore pattern {}", pattern))?,
                    );
                }
            }
            Some(builder.build()?)
        };

        let gitignore = if use_gitignore {
            Some(build_gitignore(base)?)
        } else {
            None
        };

        Ok(Self {
            base: base.to_path_buf(),
            globset,
            gitignore,
        })
    }

    fn is_ignored(&self, path: &Path) -> bool {
        if let Some(globset) = &self.globset {
            if globset.is_match(path) {
                return true;
            }
            if let Ok(relative) = path.strip_prefix(&self.base) {
                if globset.is_match(relative) {
                    return true;
                }
            }
        }
        if let Some(gitignore) = &self.gitignore {
            if path.starts_with(&self.base) {
                let is_dir = path.is_dir();
                if gitignore.matched_path_or_any_parents(path, is_dir).is_ignore() {
                    return true;
                }
            }
        }
        false
    }
}

fn expand_pattern(pattern: &str) -> Vec<String> {
    let trimmed = pattern.trim_end_matches('/');
    let has_glob = pattern.contains('*') || pattern.contains('?') || pattern.contains('[');
    if has_glob {
        vec![pattern.to_string()]
    } else {
        vec![trimmed.to_string(), format!("{}/**", trimmed)]
    }
}

fn build_gitignore(base: &Path) -> Result<Gitignore> {
    let mut builder = GitignoreBuilder::new(base);
    for ancestor in base.ancestors() {
        let path = ancestor.join(".gitignore");
        if path.exists() {
            builder.add(path);
        }
        let exclude = ancestor.join(".git").join("info").join("exclude");
        if exclude.exists() {
            builder.add(exclude);
        }
    }
    Ok(builder.build()?)
}
