use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tracing::warn;

use crate::events::Event;
use crate::process::Role;

/// Copies `text` to the system clipboard on a blocking thread and reports back
/// with `Event::CopyFinished`.
pub fn copy_in_background(role: Role, text: String, lines: usize, tx: mpsc::Sender<Event>) {
    tokio::task::spawn_blocking(move || {
        let result = copy_text(&text)
            .map(|()| lines)
            .map_err(|err| format!("{:#}", err));
        if let Err(err) = &result {
            warn!(role = %role, error = %err, "clipboard copy failed");
        }
        let _ = tx.blocking_send(Event::CopyFinished { role, result });
    });
}

fn copy_text(text: &str) -> Result<()> {
    let mut clipboard = arboard::Clipboard::new().context("failed to access clipboard")?;
    clipboard
        .set_text(text.to_string())
        .context("failed to set clipboard text")?;
    Ok(())
}
