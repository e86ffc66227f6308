//! Cooperative stop requests for a running orchestrator.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

/// How often a waiting dispatcher re-checks the stop file.
const STOP_FILE_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Shared flag asking a run to stop dispatching new work.
///
/// Clones observe the same flag. A stop is requested either by calling
/// [`request_stop`](Self::request_stop) or, when configured, by creating the
/// stop file.
#[derive(Debug, Clone)]
pub struct StopSignal {
    tx: Arc<watch::Sender<bool>>,
    stop_file: Option<Arc<PathBuf>>,
}

impl Default for StopSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl StopSignal {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self {
            tx: Arc::new(tx),
            stop_file: None,
        }
    }

    /// Also treat the existence of `path` as a stop request.
    pub fn with_stop_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.stop_file = Some(Arc::new(path.into()));
        self
    }

    pub fn stop_file(&self) -> Option<&Path> {
        self.stop_file.as_deref().map(PathBuf::as_path)
    }

    /// Ask every holder of this signal to stop.
    pub fn request_stop(&self) {
        if !self.tx.send_replace(true) {
            tracing::info!("Stop requested");
        }
    }

    /// Withdraw a stop request. The stop file, if any, still counts.
    pub fn reset(&self) {
        self.tx.send_replace(false);
    }

    pub fn is_stop_requested(&self) -> bool {
        if *self.tx.borrow() {
            return true;
        }
        self.stop_file
            .as_deref()
            .map(|path| path.exists())
            .unwrap_or(false)
    }

    /// Resolve once a stop has been requested.
    pub async fn stopped(&self) {
        let mut rx = self.tx.subscribe();
        loop {
            if self.is_stop_requested() {
                return;
            }
            if self.stop_file.is_some() {
                tokio::select! {
                    _ = rx.changed() => {}
                    _ = tokio::time::sleep(STOP_FILE_POLL_INTERVAL) => {}
                }
            } else if rx.changed().await.is_err() {
                // The sender lives as long as `self`, so this is unreachable in practice.
                std::future::pending::<()>().await;
            }
        }
    }
}
