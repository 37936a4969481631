//! Directory watcher for hot reload.
//!
//! One task per registry. Each tick compares the directory against the
//! loaded map: unmapped artifacts are loaded, artifacts whose mtime moved
//! are reloaded, and mapped names whose file disappeared are removed.
//! Errors are logged and never terminate the task.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tracing::info;

use super::ModelRegistry;

impl ModelRegistry {
    pub(super) fn start_watcher(self: &Arc<Self>) {
        let interval = Duration::from_millis(self.config.watch_interval_ms);
        info!(interval_ms = self.config.watch_interval_ms, "Starting model file watcher");

        let registry = Arc::clone(self);
        let token = self.shutdown.clone();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(interval) => registry.check_for_changes().await,
                }
            }
        });

        *self.watcher.lock().unwrap() = Some(handle);
    }

    /// One watcher tick.
    pub(super) async fn check_for_changes(&self) {
        // New or modified artifacts.
        for (path, name) in self.artifacts_on_disk() {
            let mtime = std::fs::metadata(&path)
                .and_then(|m| m.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);

            let known = {
                let models = self.models.read().await;
                models.get(&name).map(|entry| entry.mtime)
            };

            match known {
                None => {
                    info!(model = %name, "Detected new model");
                    self.load_model(&path, &name).await;
                }
                Some(stored) if stored != mtime => {
                    info!(model = %name, "Detected model change");
                    self.load_model(&path, &name).await;
                }
                Some(_) => {}
            }
        }

        // Mapped names whose backing file no longer exists.
        let stale: Vec<String> = {
            let models = self.models.read().await;
            models
                .iter()
                .filter(|(_, entry)| !std::path::Path::new(&entry.schema.path).exists())
                .map(|(name, _)| name.clone())
                .collect()
        };
        self.remove_models(&stale).await;
    }
}
