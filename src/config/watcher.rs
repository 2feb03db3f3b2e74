//! Polling-based config file watcher.
//!
//! Checks the config file's mtime every 2 seconds. When a change is detected,
//! debounces for 500ms (to handle partial writes from editors), then asks the
//! dispatcher for a full configuration reload. The watcher never parses the
//! file itself; a bad edit is rejected by the reload and the previous
//! configuration stays active.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::defaults::{CONFIG_DEBOUNCE_DELAY, CONFIG_POLL_INTERVAL};
use crate::pipeline::WakeEvent;

/// Run the config file watcher loop.
///
/// Sends [`WakeEvent::ReloadConfiguration`] on `tx` for every stable change.
/// Returns when the channel is closed or `cancel` fires.
pub async fn run_config_watcher(
    path: PathBuf,
    tx: mpsc::UnboundedSender<WakeEvent>,
    cancel: CancellationToken,
) {
    tracing::info!(path = %path.display(), "Config watcher started");

    let mut last_mtime = get_mtime(&path);

    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                tracing::debug!("Config watcher cancelled");
                return;
            }
            () = tokio::time::sleep(CONFIG_POLL_INTERVAL) => {}
        }

        // If we can't read mtime (file deleted, permissions), warn and keep polling
        let Some(current) = get_mtime(&path) else {
            if last_mtime.is_some() {
                tracing::warn!(
                    path = %path.display(),
                    "Config file not accessible, keeping current config, will retry"
                );
                last_mtime = None;
            }
            continue;
        };

        let changed = last_mtime.map_or(true, |prev| current != prev);
        if !changed {
            continue;
        }

        // Debounce: wait, then re-check mtime to ensure write is complete
        tokio::time::sleep(CONFIG_DEBOUNCE_DELAY).await;
        if get_mtime(&path) != Some(current) {
            continue;
        }

        last_mtime = Some(current);

        if tx.send(WakeEvent::ReloadConfiguration).is_err() {
            tracing::debug!("Config watcher channel closed, stopping");
            return;
        }
    }
}

/// Read the modification time of a file, returning None on any error.
fn get_mtime(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).ok().and_then(|m| m.modified().ok())
}
