use presence_core::{Config, DeepFaceEmbedder, Extractor, FaceEmbedder};
use presence_hw::{CameraProvider, V4lCameraProvider};
use presence_store::{RecordStore, Scanner};
use std::sync::Arc;

use crate::session::SessionStore;

pub type SharedState = Arc<AppState>;

/// Everything a request handler needs. Built once at startup and passed
/// to handlers explicitly.
pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn RecordStore>,
    pub extractor: Extractor,
    pub scanner: Scanner,
    pub sessions: SessionStore,
    pub camera: Arc<dyn CameraProvider>,
}

impl AppState {
    pub fn new(
        config: Config,
        store: Arc<dyn RecordStore>,
        embedder: Arc<dyn FaceEmbedder>,
        camera: Arc<dyn CameraProvider>,
    ) -> SharedState {
        let scanner = Scanner::new(store.clone(), config.distance_threshold);
        Arc::new(Self {
            config,
            store,
            extractor: Extractor::new(embedder),
            scanner,
            sessions: SessionStore::default(),
            camera,
        })
    }

    /// Wire up the configured store, embedding service, and camera.
    pub fn from_config(config: Config) -> anyhow::Result<SharedState> {
        let store = presence_store::open(&config)?;
        let embedder = DeepFaceEmbedder::new(
            &config.embedder_url,
            &config.embedder_model,
            config.request_timeout(),
        )?;
        tracing::info!(
            url = %config.embedder_url,
            model = %config.embedder_model,
            "embedding service configured"
        );
        let camera = V4lCameraProvider::new(config.camera_device.clone());

        Ok(Self::new(config, store, Arc::new(embedder), Arc::new(camera)))
    }
}
