use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::matcher::DEFAULT_DISTANCE_THRESHOLD;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// Service configuration.
///
/// Built from defaults, then an optional TOML file named by
/// `PRESENCE_CONFIG`, then `PRESENCE_*` environment variables.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Address the HTTP daemon listens on (default: 0.0.0.0:5000).
    pub bind_addr: String,
    /// Record store base URL, or `memory://` for an in-process store.
    pub store_url: String,
    /// Bearer token for the record store.
    pub store_token: Option<String>,
    /// Collection holding enrolled people.
    pub people_collection: String,
    /// Collection holding daily presence records.
    pub presence_collection: String,
    /// Base URL of the DeepFace-compatible embedding service.
    pub embedder_url: String,
    /// Embedding model requested from the service.
    pub embedder_model: String,
    /// Euclidean distance below which a face is accepted.
    pub distance_threshold: f32,
    /// V4L2 device used for live scans.
    pub camera_device: String,
    /// Process one frame out of every `frame_stride` during live scans.
    pub frame_stride: usize,
    /// Timeout for remote calls. Unset means wait indefinitely.
    pub request_timeout_secs: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:5000".to_string(),
            store_url: "http://127.0.0.1:8090".to_string(),
            store_token: None,
            people_collection: "people".to_string(),
            presence_collection: "presences".to_string(),
            embedder_url: "http://127.0.0.1:5005".to_string(),
            embedder_model: "Facenet".to_string(),
            distance_threshold: DEFAULT_DISTANCE_THRESHOLD,
            camera_device: "/dev/video0".to_string(),
            frame_stride: 5,
            request_timeout_secs: None,
        }
    }
}

impl Config {
    /// Load configuration from the optional file and the environment.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match std::env::var("PRESENCE_CONFIG") {
            Ok(path) => Self::from_file(Path::new(&path))?,
            Err(_) => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Parse a TOML config file. Missing keys keep their defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::info!(path = %path.display(), "loaded config file");
        Ok(config)
    }

    /// Apply `PRESENCE_*` overrides from `lookup`.
    ///
    /// Unparseable values are logged and ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let string = |key: &str, target: &mut String| {
            if let Some(v) = lookup(key) {
                *target = v;
            }
        };
        string("PRESENCE_BIND_ADDR", &mut self.bind_addr);
        string("PRESENCE_STORE_URL", &mut self.store_url);
        string("PRESENCE_PEOPLE_COLLECTION", &mut self.people_collection);
        string("PRESENCE_PRESENCE_COLLECTION", &mut self.presence_collection);
        string("PRESENCE_EMBEDDER_URL", &mut self.embedder_url);
        string("PRESENCE_EMBEDDER_MODEL", &mut self.embedder_model);
        string("PRESENCE_CAMERA_DEVICE", &mut self.camera_device);

        parsed(&lookup, "PRESENCE_DISTANCE_THRESHOLD", &mut self.distance_threshold);
        parsed(&lookup, "PRESENCE_FRAME_STRIDE", &mut self.frame_stride);

        if let Some(secs) = lookup("PRESENCE_REQUEST_TIMEOUT_SECS") {
            match secs.parse() {
                Ok(v) => self.request_timeout_secs = Some(v),
                Err(_) => tracing::warn!(value = %secs, "invalid PRESENCE_REQUEST_TIMEOUT_SECS; ignoring"),
            }
        }

        if let Some(token) = lookup("PRESENCE_STORE_TOKEN") {
            self.store_token = Some(token);
        } else if let Some(path) = lookup("PRESENCE_STORE_TOKEN_FILE") {
            match std::fs::read_to_string(&path) {
                Ok(token) => self.store_token = Some(token.trim().to_string()),
                Err(e) => tracing::warn!(path = %path, error = %e, "cannot read store token file"),
            }
        }

        if self.frame_stride == 0 {
            tracing::warn!("frame_stride must be at least 1; using 1");
            self.frame_stride = 1;
        }
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, target: &mut T) {
    if let Some(v) = lookup(key) {
        match v.parse() {
            Ok(parsed) => *target = parsed,
            Err(_) => tracing::warn!(key, value = %v, "invalid value; keeping default"),
        }
    }
}
