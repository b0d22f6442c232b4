//! Face embedding extraction.
//!
//! The embedding model itself is external: [`FaceEmbedder`] is the seam,
//! and [`DeepFaceEmbedder`] talks to a DeepFace-compatible `/represent`
//! service. [`Extractor`] adapts uploads, files and camera frames into the
//! JPEG the model expects and turns every failure into a logged outcome.

use crate::embedding::Embedding;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::{ImageFormat, RgbImage};
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

const DEEPFACE_NO_FACE_MARKER: &str = "Face could not be detected";

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("no face detected")]
    NoFace,
    #[error("image: {0}")]
    Image(#[from] image::ImageError),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("embedding service unreachable: {0}")]
    Request(#[from] reqwest::Error),
    #[error("embedding service error: {0}")]
    Service(String),
}

/// External face-detection-and-embedding model.
#[async_trait]
pub trait FaceEmbedder: Send + Sync {
    /// Embed the first face found in a JPEG image.
    async fn represent(&self, jpeg: &[u8]) -> Result<Embedding, ExtractError>;
}

/// Client for a DeepFace API server (`POST /represent`).
pub struct DeepFaceEmbedder {
    client: reqwest::Client,
    url: String,
    model_name: String,
}

impl DeepFaceEmbedder {
    pub fn new(
        base_url: &str,
        model_name: &str,
        timeout: Option<Duration>,
    ) -> Result<Self, ExtractError> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }

        Ok(Self {
            client: builder.build()?,
            url: format!("{}/represent", base_url.trim_end_matches('/')),
            model_name: model_name.to_string(),
        })
    }
}

#[async_trait]
impl FaceEmbedder for DeepFaceEmbedder {
    async fn represent(&self, jpeg: &[u8]) -> Result<Embedding, ExtractError> {
        let img = format!("data:image/jpeg;base64,{}", BASE64.encode(jpeg));

        let response = self
            .client
            .post(&self.url)
            .json(&serde_json::json!({
                "img": img,
                "model_name": self.model_name,
                "enforce_detection": true,
            }))
            .send()
            .await?;

        let success = response.status().is_success();
        let body: serde_json::Value = response.json().await?;
        parse_represent_response(success, &body)
    }
}

/// Interpret a `/represent` response body.
///
/// Success bodies look like `{"results": [{"embedding": [...]}, ...]}`;
/// only the first face is used. Error bodies carry an `error` string.
fn parse_represent_response(
    success: bool,
    body: &serde_json::Value,
) -> Result<Embedding, ExtractError> {
    if let Some(message) = body.get("error").and_then(|e| e.as_str()) {
        if message.contains(DEEPFACE_NO_FACE_MARKER) {
            return Err(ExtractError::NoFace);
        }
        return Err(ExtractError::Service(message.to_string()));
    }
    if !success {
        return Err(ExtractError::Service(format!("unexpected response: {body}")));
    }

    let first = body
        .get("results")
        .and_then(|r| r.as_array())
        .and_then(|r| r.first())
        .ok_or(ExtractError::NoFace)?;

    let embedding = first
        .get("embedding")
        .ok_or_else(|| ExtractError::Service("result has no embedding".into()))?;

    Embedding::from_stored(embedding).map_err(|e| ExtractError::Service(e.to_string()))
}

/// Result of an extraction attempt. Never an error: failures are logged and
/// reported as [`ExtractOutcome::Failed`].
#[derive(Debug, Clone, PartialEq)]
pub enum ExtractOutcome {
    Embedding(Embedding),
    NoFace,
    Failed(String),
}

impl ExtractOutcome {
    pub fn into_embedding(self) -> Option<Embedding> {
        match self {
            ExtractOutcome::Embedding(e) => Some(e),
            _ => None,
        }
    }
}

/// Format adaptation and error translation in front of a [`FaceEmbedder`].
#[derive(Clone)]
pub struct Extractor {
    model: Arc<dyn FaceEmbedder>,
}

impl Extractor {
    pub fn new(model: Arc<dyn FaceEmbedder>) -> Self {
        Self { model }
    }

    /// Extract from an image file on disk.
    pub async fn from_path(&self, path: &Path) -> ExtractOutcome {
        tracing::debug!(path = %path.display(), "loading image");
        let prepared = std::fs::read(path)
            .map_err(ExtractError::from)
            .and_then(|bytes| prepare_image(&bytes));
        self.run(prepared).await
    }

    /// Extract from an uploaded image in any format the `image` crate decodes.
    pub async fn from_bytes(&self, bytes: &[u8]) -> ExtractOutcome {
        self.run(prepare_image(bytes)).await
    }

    /// Extract from an in-memory RGB camera frame.
    pub async fn from_frame(&self, frame: &RgbImage) -> ExtractOutcome {
        self.run(encode_jpeg(frame)).await
    }

    async fn run(&self, prepared: Result<Vec<u8>, ExtractError>) -> ExtractOutcome {
        let result = match prepared {
            Ok(jpeg) => self.model.represent(&jpeg).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(embedding) => {
                tracing::debug!(dim = embedding.len(), "embedding extracted");
                ExtractOutcome::Embedding(embedding)
            }
            Err(ExtractError::NoFace) => {
                tracing::info!("no face detected");
                ExtractOutcome::NoFace
            }
            Err(e) => {
                tracing::warn!(error = %e, "embedding extraction failed");
                ExtractOutcome::Failed(e.to_string())
            }
        }
    }
}

/// Decode an arbitrary image, drop any alpha channel, and re-encode as JPEG.
pub fn prepare_image(bytes: &[u8]) -> Result<Vec<u8>, ExtractError> {
    let decoded = image::load_from_memory(bytes)?;
    encode_jpeg(&decoded.to_rgb8())
}

/// Encode an RGB frame as JPEG.
pub fn encode_jpeg(frame: &RgbImage) -> Result<Vec<u8>, ExtractError> {
    let mut buf = Cursor::new(Vec::new());
    frame.write_to(&mut buf, ImageFormat::Jpeg)?;
    Ok(buf.into_inner())
}
