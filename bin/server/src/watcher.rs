//! Hot reload of the htpasswd and authenticated-emails files.
//!
//! Files are polled for modification-time changes. A file that changed is
//! re-read through its reload callback on a blocking thread; the stores swap
//! their contents under a lock, so requests never see a partial update.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use authgate_access::AccessError;
use rootcause::prelude::Report;
use tokio::task::JoinHandle;

type Reload = Arc<dyn Fn() -> Result<(), Report<AccessError>> + Send + Sync>;

struct WatchedFile {
    path: PathBuf,
    last_modified: Option<SystemTime>,
    reload: Reload,
}

/// Polls credential files and reloads the ones that changed.
#[derive(Default)]
pub struct CredentialWatcher {
    files: Vec<WatchedFile>,
}

async fn modified(path: &Path) -> std::io::Result<SystemTime> {
    tokio::fs::metadata(path).await?.modified()
}

impl CredentialWatcher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Watches `path`, calling `reload` whenever its modification time moves.
    ///
    /// The file is assumed to be loaded already; only later changes reload it.
    #[must_use]
    pub fn watch<F>(mut self, path: impl Into<PathBuf>, reload: F) -> Self
    where
        F: Fn() -> Result<(), Report<AccessError>> + Send + Sync + 'static,
    {
        let path = path.into();
        let last_modified = std::fs::metadata(&path).and_then(|m| m.modified()).ok();
        self.files.push(WatchedFile {
            path,
            last_modified,
            reload: Arc::new(reload),
        });
        self
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Checks every file once and returns how many were reloaded.
    pub async fn poll(&mut self) -> usize {
        let mut reloaded = 0;
        for file in &mut self.files {
            let current = match modified(&file.path).await {
                Ok(current) => current,
                Err(e) => {
                    tracing::debug!(path = %file.path.display(), error = %e, "could not stat watched file");
                    continue;
                }
            };
            if file.last_modified == Some(current) {
                continue;
            }

            let reload = Arc::clone(&file.reload);
            match tokio::task::spawn_blocking(move || reload()).await {
                Ok(Ok(())) => {
                    tracing::info!(path = %file.path.display(), "reloaded credentials file");
                    file.last_modified = Some(current);
                    reloaded += 1;
                }
                Ok(Err(e)) => {
                    tracing::warn!(path = %file.path.display(), error = %e, "reload failed, keeping previous contents");
                }
                Err(e) => {
                    tracing::error!(path = %file.path.display(), error = %e, "reload task failed");
                }
            }
        }
        reloaded
    }

    /// Polls on `interval` until the runtime shuts down.
    pub fn spawn(mut self, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                self.poll().await;
            }
        })
    }
}
