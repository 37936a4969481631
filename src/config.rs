//! Gateway configuration.
//!
//! A nested record with one section per subsystem. Precedence, lowest to
//! highest: built-in defaults, JSON config file, `ONNX_*` environment
//! variables, CLI flags (applied in `main`). Every field survives a
//! serialize/deserialize round trip.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::ConfigError;

/// HTTP listener settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Tokio worker threads for the runtime.
    pub threads: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { host: "0.0.0.0".to_string(), port: 8080, threads: 4 }
    }
}

/// ONNX Runtime session settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceConfig {
    /// Execution providers in preference order; unavailable ones are
    /// skipped, CPU is always the final fallback.
    pub providers: Vec<String>,
    pub gpu_device_id: i32,
    /// Accelerator arena limit in MiB; 0 means unlimited. Forwarded to the
    /// runtime as `mb * 1024 * 1024` without further interpretation.
    pub memory_limit_mb: u64,
    /// 0 leaves the runtime default in place.
    pub intra_op_threads: i32,
    /// 0 leaves the runtime default in place.
    pub inter_op_threads: i32,
    /// One of "disabled", "basic", "extended", "all".
    pub graph_optimization: String,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            providers: vec!["cuda".to_string(), "cpu".to_string()],
            gpu_device_id: 0,
            memory_limit_mb: 4096,
            intra_op_threads: 0,
            inter_op_threads: 0,
            graph_optimization: "all".to_string(),
        }
    }
}

/// Dynamic batching settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchingConfig {
    pub enabled: bool,
    /// Strict upper bound on the size of a dispatched batch.
    pub max_batch_size: usize,
    /// Queue length that triggers an early dispatch.
    pub min_batch_size: usize,
    /// Oldest-item age bound before a forced flush.
    pub max_wait_ms: u64,
}

impl Default for BatchingConfig {
    fn default() -> Self {
        Self { enabled: true, max_batch_size: 32, min_batch_size: 1, max_wait_ms: 10 }
    }
}

/// Model directory settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelsConfig {
    pub directory: String,
    pub hot_reload: bool,
    pub watch_interval_ms: u64,
    /// File extension that marks an artifact; the model name is the stem.
    pub artifact_suffix: String,
    /// Model names expected after the initial scan; missing ones are
    /// logged as warnings.
    pub preload: Vec<String>,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            directory: "./models".to_string(),
            hot_reload: true,
            watch_interval_ms: 5000,
            artifact_suffix: ".onnx".to_string(),
            preload: Vec::new(),
        }
    }
}

/// Prometheus exposition settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub path: String,
    /// Upper bounds (seconds) for the latency histograms; an implicit
    /// `+Inf` bucket is always appended.
    pub latency_buckets: Vec<f64>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: "/metrics".to_string(),
            latency_buckets: vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0],
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// One of "debug", "info", "warn", "error".
    pub level: String,
    /// "json" or "text".
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), format: "json".to_string() }
    }
}

/// Complete gateway configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub inference: InferenceConfig,
    pub batching: BatchingConfig,
    pub models: ModelsConfig,
    pub metrics: MetricsConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a JSON file. A missing file falls back to
    /// defaults; an unparseable file is a startup error.
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(_) => {
                warn!(path = %path.display(), "Config file not found, using defaults");
                return Ok(Self::default());
            }
        };

        let config = serde_json::from_str(&contents)
            .map_err(|e| ConfigError::new(path.display().to_string(), e.to_string()))?;
        info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    /// Apply `ONNX_*` environment variable overrides in place.
    pub fn apply_env(&mut self) {
        set_from_env("ONNX_SERVER_HOST", &mut self.server.host);
        parse_from_env("ONNX_SERVER_PORT", &mut self.server.port);
        parse_from_env("ONNX_SERVER_THREADS", &mut self.server.threads);

        parse_from_env("ONNX_GPU_DEVICE_ID", &mut self.inference.gpu_device_id);
        parse_from_env("ONNX_MEMORY_LIMIT_MB", &mut self.inference.memory_limit_mb);

        bool_from_env("ONNX_BATCHING_ENABLED", &mut self.batching.enabled);
        parse_from_env("ONNX_MAX_BATCH_SIZE", &mut self.batching.max_batch_size);
        parse_from_env("ONNX_MAX_WAIT_MS", &mut self.batching.max_wait_ms);

        set_from_env("ONNX_MODELS_DIR", &mut self.models.directory);
        bool_from_env("ONNX_HOT_RELOAD", &mut self.models.hot_reload);

        bool_from_env("ONNX_METRICS_ENABLED", &mut self.metrics.enabled);
        set_from_env("ONNX_LOG_LEVEL", &mut self.logging.level);
    }
}

fn set_from_env(key: &str, target: &mut String) {
    if let Ok(val) = std::env::var(key) {
        *target = val;
    }
}

fn parse_from_env<T: std::str::FromStr>(key: &str, target: &mut T) {
    if let Ok(val) = std::env::var(key) {
        match val.parse() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(key, value = %val, "Ignoring unparseable environment override"),
        }
    }
}

fn bool_from_env(key: &str, target: &mut bool) {
    if let Ok(val) = std::env::var(key) {
        *target = val == "true" || val == "1";
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.inference.providers, vec!["cuda", "cpu"]);
        assert_eq!(config.batching.max_batch_size, 32);
        assert_eq!(config.batching.min_batch_size, 1);
        assert_eq!(config.models.artifact_suffix, ".onnx");
        assert_eq!(config.metrics.path, "/metrics");
        assert_eq!(config.metrics.latency_buckets.len(), 9);
    }

    #[test]
    fn serialize_round_trip_preserves_every_field() {
        let mut config = Config::default();
        config.server.host = "127.0.0.1".into();
        config.server.port = 9000;
        config.server.threads = 8;
        config.inference.providers = vec!["tensorrt".into(), "cpu".into()];
        config.inference.gpu_device_id = 1;
        config.inference.memory_limit_mb = 0;
        config.inference.intra_op_threads = 2;
        config.inference.inter_op_threads = 3;
        config.inference.graph_optimization = "basic".into();
        config.batching.enabled = false;
        config.batching.max_batch_size = 8;
        config.batching.min_batch_size = 4;
        config.batching.max_wait_ms = 50;
        config.models.directory = "/models".into();
        config.models.hot_reload = false;
        config.models.watch_interval_ms = 250;
        config.models.artifact_suffix = ".ort".into();
        config.models.preload = vec!["resnet".into()];
        config.metrics.enabled = false;
        config.metrics.path = "/prom".into();
        config.metrics.latency_buckets = vec![0.1, 1.0];
        config.logging.level = "debug".into();
        config.logging.format = "text".into();

        let json = serde_json::to_string(&config).unwrap();
        let parsed: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let parsed: Config =
            serde_json::from_str(r#"{"server": {"port": 1234}, "batching": {"enabled": false}}"#)
                .unwrap();
        assert_eq!(parsed.server.port, 1234);
        assert_eq!(parsed.server.host, "0.0.0.0");
        assert!(!parsed.batching.enabled);
        assert_eq!(parsed.batching.max_batch_size, 32);
    }

    #[test]
    fn missing_file_is_defaults() {
        let config = Config::load_from_file("/definitely/not/here.json").unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn unparseable_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(Config::load_from_file(&path).is_err());
    }
}
