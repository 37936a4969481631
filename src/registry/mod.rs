//! Model registry: concurrent, hot-reloadable mapping from model name to
//! loaded session and schema.
//!
//! Readers (the inference hot path) share a read lock over the map and
//! clone out the entry `Arc`, so a model swap never waits for in-flight
//! inferences: the old entry is dropped when its last reader finishes.
//! Writers are `load_model`, `reload`, the directory watcher, and removal.

mod watcher;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Instant, SystemTime};

use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::backend::BackendSession;
use crate::config::ModelsConfig;
use crate::metrics::MetricsCollector;
use crate::session::SessionManager;
use crate::types::{InferenceRequest, InferenceResponse, ModelSchema};

/// One loaded model. The entry exclusively owns its session; dropping the
/// entry tears the session down.
pub struct ModelEntry {
    pub schema: ModelSchema,
    pub session: Box<dyn BackendSession>,
    pub mtime: SystemTime,
}

pub struct ModelRegistry {
    session_manager: SessionManager,
    config: ModelsConfig,
    metrics: Arc<MetricsCollector>,
    models: RwLock<HashMap<String, Arc<ModelEntry>>>,
    watcher: std::sync::Mutex<Option<JoinHandle<()>>>,
    shutdown: CancellationToken,
}

impl ModelRegistry {
    pub fn new(
        session_manager: SessionManager,
        config: ModelsConfig,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            session_manager,
            config,
            metrics,
            models: RwLock::new(HashMap::new()),
            watcher: std::sync::Mutex::new(None),
            shutdown: CancellationToken::new(),
        }
    }

    /// Scan the configured directory, load every artifact in it, and start
    /// the watcher when hot reload is enabled. A missing directory is
    /// created and left empty.
    pub async fn initialize(self: &Arc<Self>) {
        let directory = Path::new(&self.config.directory);
        info!(directory = %directory.display(), "Initializing model registry");

        if !directory.exists() {
            warn!(directory = %directory.display(), "Models directory does not exist, creating it");
            if let Err(e) = std::fs::create_dir_all(directory) {
                error!(directory = %directory.display(), error = %e, "Failed to create models directory");
            }
            return;
        }

        self.scan_and_load().await;

        for name in &self.config.preload {
            if !self.has(name).await {
                warn!(model = %name, "Preload model not found in directory");
            }
        }

        if self.config.hot_reload {
            self.start_watcher();
        }
    }

    pub async fn has(&self, name: &str) -> bool {
        self.models.read().await.contains_key(name)
    }

    pub async fn has_models(&self) -> bool {
        !self.models.read().await.is_empty()
    }

    pub async fn count(&self) -> usize {
        self.models.read().await.len()
    }

    pub async fn get(&self, name: &str) -> Option<ModelSchema> {
        self.models.read().await.get(name).map(|entry| entry.schema.clone())
    }

    pub async fn list(&self) -> Vec<ModelSchema> {
        self.models
            .read()
            .await
            .values()
            .map(|entry| entry.schema.clone())
            .collect()
    }

    /// Reload a model from its current artifact path. Returns `false` when
    /// the name is unknown; a failed reload leaves the old entry in place.
    pub async fn reload(&self, name: &str) -> bool {
        let path = {
            let models = self.models.read().await;
            match models.get(name) {
                Some(entry) => PathBuf::from(&entry.schema.path),
                None => return false,
            }
        };

        self.load_model(&path, name).await
    }

    /// Look the model up and execute the request against its session.
    ///
    /// The entry `Arc` is cloned out from under the read lock, so a
    /// concurrent reload can swap the map entry while this call is still
    /// running against the old session.
    pub async fn run_inference(&self, request: &InferenceRequest) -> InferenceResponse {
        let entry = {
            let models = self.models.read().await;
            models.get(&request.model_name).cloned()
        };

        match entry {
            Some(entry) => self
                .session_manager
                .run(entry.session.as_ref(), request, &entry.schema),
            None => InferenceResponse::model_not_found(&request.model_name),
        }
    }

    /// Cooperative watcher shutdown; waits for the task to finish.
    pub async fn stop_watcher(&self) {
        self.shutdown.cancel();
        let handle = self.watcher.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = handle.await;
            info!("Model watcher stopped");
        }
    }

    async fn scan_and_load(&self) {
        for (path, name) in self.artifacts_on_disk() {
            self.load_model(&path, &name).await;
        }
    }

    /// Load (or replace) a single model. Returns whether the swap happened.
    async fn load_model(&self, path: &Path, name: &str) -> bool {
        let start = Instant::now();
        match self.session_manager.load(path, name) {
            Ok((session, schema)) => {
                let mtime = std::fs::metadata(path)
                    .and_then(|m| m.modified())
                    .unwrap_or(SystemTime::UNIX_EPOCH);
                let entry = Arc::new(ModelEntry { schema, session, mtime });

                let count = {
                    let mut models = self.models.write().await;
                    models.insert(name.to_string(), entry);
                    models.len()
                };

                self.metrics
                    .record_model_load(name, start.elapsed().as_secs_f64());
                self.metrics.set_loaded_models(count);
                self.metrics.set_active_sessions(count as i64);
                info!(model = name, "Model loaded successfully");
                true
            }
            Err(e) => {
                error!(model = name, error = %e, "Failed to load model");
                false
            }
        }
    }

    /// Remove entries under a write lock; used by the watcher when the
    /// backing file disappears.
    async fn remove_models(&self, names: &[String]) {
        if names.is_empty() {
            return;
        }
        let count = {
            let mut models = self.models.write().await;
            for name in names {
                info!(model = %name, "Removing unloaded model");
                models.remove(name);
            }
            models.len()
        };
        self.metrics.set_loaded_models(count);
        self.metrics.set_active_sessions(count as i64);
    }

    /// Enumerate `(path, name)` for every artifact file in the directory.
    fn artifacts_on_disk(&self) -> Vec<(PathBuf, String)> {
        let directory = Path::new(&self.config.directory);
        let entries = match std::fs::read_dir(directory) {
            Ok(entries) => entries,
            Err(_) => return Vec::new(),
        };

        let mut artifacts = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let file_name = match path.file_name().and_then(|f| f.to_str()) {
                Some(file_name) => file_name,
                None => continue,
            };
            if let Some(stem) = file_name.strip_suffix(self.config.artifact_suffix.as_str()) {
                if !stem.is_empty() {
                    artifacts.push((path.clone(), stem.to_string()));
                }
            }
        }
        artifacts
    }
}
