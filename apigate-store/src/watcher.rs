use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::Notify;
use tracing::{debug, warn};

/// Polls a config file's mtime and fires `notify` on change, replacing the
/// teacher's etcd watch loop with a local-file equivalent (§4.12).
pub struct FileWatcher {
    path: PathBuf,
    poll_interval: std::time::Duration,
    notify: Arc<Notify>,
}

impl FileWatcher {
    pub fn new(path: impl AsRef<Path>, poll_interval: std::time::Duration) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            poll_interval,
            notify: Arc::new(Notify::new()),
        }
    }

    pub fn notifier(&self) -> Arc<Notify> {
        self.notify.clone()
    }

    /// Runs until `shutdown` fires. Intended to be spawned as a background task.
    pub async fn run(self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        let mut last_mtime = mtime_of(&self.path);
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {
                    let current = mtime_of(&self.path);
                    if current != last_mtime {
                        debug!(path = %self.path.display(), "config file changed, signaling reload");
                        last_mtime = current;
                        self.notify.notify_waiters();
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }
}

fn mtime_of(path: &Path) -> Option<SystemTime> {
    match std::fs::metadata(path) {
        Ok(meta) => meta.modified().ok(),
        Err(err) => {
            warn!(path = %path.display(), error = %err, "failed to stat watched config file");
            None
        }
    }
}
