//! Session cancellation sources.
//!
//! A running session stops when its `CancellationToken` fires. Two things
//! fire it: Ctrl-C, and a `.stop` sentinel file dropped into the output
//! directory by `stealthdl pause` from another shell.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Sentinel file name
pub const PAUSE_SENTINEL: &str = ".stop";

/// Errors from the cancellation sources
#[derive(Debug, Error)]
pub enum ControlError {
    #[error("Notify error: {0}")]
    Notify(#[from] notify::Error),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Sentinel location for an output directory
pub fn sentinel_path(dir: &Path) -> PathBuf {
    dir.join(PAUSE_SENTINEL)
}

/// Ask a running session in `dir` to stop
pub fn write_pause_sentinel(dir: &Path) -> Result<PathBuf, ControlError> {
    fs::create_dir_all(dir)?;
    let path = sentinel_path(dir);
    fs::write(&path, b"")?;
    Ok(path)
}

/// Remove the sentinel if present. Returns whether it was there.
pub fn consume_sentinel(dir: &Path) -> bool {
    let path = sentinel_path(dir);
    match fs::remove_file(&path) {
        Ok(()) => true,
        Err(e) if e.kind() == io::ErrorKind::NotFound => false,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Could not remove pause sentinel");
            path.exists()
        }
    }
}

/// Keeps the directory watch alive; dropping it stops watching
pub struct PauseWatcher {
    _watcher: RecommendedWatcher,
}

/// Cancel `token` when the sentinel appears in `dir`.
///
/// A sentinel already present is honored (and cleared) immediately.
pub fn watch_pause_sentinel(dir: &Path, token: CancellationToken) -> Result<PauseWatcher, ControlError> {
    fs::create_dir_all(dir)?;

    if consume_sentinel(dir) {
        info!("Pause sentinel present at start");
        token.cancel();
    }

    let watched = dir.to_path_buf();
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
        Ok(event) => {
            let hit = event
                .paths
                .iter()
                .any(|p| p.file_name().map(|n| n == PAUSE_SENTINEL).unwrap_or(false));
            if hit && consume_sentinel(&watched) {
                info!("Pause requested");
                token.cancel();
            }
        }
        Err(e) => warn!(error = %e, "Pause watcher error"),
    })?;
    watcher.watch(dir, RecursiveMode::NonRecursive)?;

    Ok(PauseWatcher { _watcher: watcher })
}

/// Cancel `token` on Ctrl-C
pub fn cancel_on_ctrl_c(token: CancellationToken) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, stopping after the current step");
            token.cancel();
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn test_sentinel_roundtrip() {
        let temp = TempDir::new().unwrap();
        assert!(!consume_sentinel(temp.path()));

        let path = write_pause_sentinel(temp.path()).unwrap();
        assert!(path.exists());
        assert!(consume_sentinel(temp.path()));
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_existing_sentinel_cancels_immediately() {
        let temp = TempDir::new().unwrap();
        write_pause_sentinel(temp.path()).unwrap();

        let token = CancellationToken::new();
        let _watcher = watch_pause_sentinel(temp.path(), token.clone()).unwrap();

        assert!(token.is_cancelled());
        assert!(!sentinel_path(temp.path()).exists());
    }

    #[tokio::test]
    async fn test_new_sentinel_cancels() {
        let temp = TempDir::new().unwrap();
        let token = CancellationToken::new();
        let _watcher = watch_pause_sentinel(temp.path(), token.clone()).unwrap();
        assert!(!token.is_cancelled());

        write_pause_sentinel(temp.path()).unwrap();

        tokio::time::timeout(Duration::from_secs(5), token.cancelled())
            .await
            .expect("watcher should cancel the token");
    }
}
