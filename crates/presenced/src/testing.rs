//! Test doubles: a scripted embedding model and a synthetic camera.

use async_trait::async_trait;
use image::RgbImage;
use presence_core::{Config, EnrolledPerson, Embedding, ExtractError, FaceEmbedder, Role};
use presence_hw::{CameraError, CameraProvider, Frame, FrameSource};
use presence_store::MemoryStore;
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::state::{AppState, SharedState};

/// Embedding model that returns the same answer for every image.
pub struct StubEmbedder {
    embedding: Option<Embedding>,
}

impl StubEmbedder {
    pub fn always(embedding: Embedding) -> Self {
        Self {
            embedding: Some(embedding),
        }
    }

    pub fn no_face() -> Self {
        Self { embedding: None }
    }
}

#[async_trait]
impl FaceEmbedder for StubEmbedder {
    async fn represent(&self, _jpeg: &[u8]) -> Result<Embedding, ExtractError> {
        self.embedding.clone().ok_or(ExtractError::NoFace)
    }
}

/// Camera that yields a fixed number of blank frames, then fails.
pub struct FakeCamera {
    frames: Option<usize>,
    released: Arc<AtomicBool>,
}

impl FakeCamera {
    pub fn frames(count: usize) -> Self {
        Self {
            frames: Some(count),
            released: Arc::default(),
        }
    }

    pub fn unavailable() -> Self {
        Self {
            frames: None,
            released: Arc::default(),
        }
    }

    /// Set once an opened source has been dropped.
    pub fn released(&self) -> Arc<AtomicBool> {
        self.released.clone()
    }
}

struct FakeSource {
    remaining: usize,
    sequence: u32,
    released: Arc<AtomicBool>,
}

impl Drop for FakeSource {
    fn drop(&mut self) {
        self.released.store(true, Ordering::SeqCst);
    }
}

impl FrameSource for FakeSource {
    fn next_frame(&mut self) -> Result<Frame, CameraError> {
        if self.remaining == 0 {
            return Err(CameraError::CaptureFailed("end of test frames".into()));
        }
        self.remaining -= 1;
        self.sequence = self.sequence.wrapping_add(1);
        Ok(Frame {
            image: RgbImage::from_pixel(8, 8, image::Rgb([90, 90, 90])),
            timestamp: std::time::Instant::now(),
            sequence: self.sequence,
        })
    }
}

impl CameraProvider for FakeCamera {
    fn open(&self) -> Result<Box<dyn FrameSource>, CameraError> {
        match self.frames {
            Some(remaining) => Ok(Box::new(FakeSource {
                remaining,
                sequence: 0,
                released: self.released.clone(),
            })),
            None => Err(CameraError::DeviceNotFound("/dev/fake".into())),
        }
    }

    fn device(&self) -> &str {
        "/dev/fake"
    }
}

/// Roster: student "Ada" at the origin, teacher "Tess" at (5, 5, 5).
pub fn roster() -> Vec<EnrolledPerson> {
    vec![
        EnrolledPerson {
            id: "ada".into(),
            name: "Ada".into(),
            role: Role::Student,
            face_embedding: json!([0.0, 0.0, 0.0]),
        },
        EnrolledPerson {
            id: "tess".into(),
            name: "Tess".into(),
            role: Role::Teacher,
            face_embedding: json!("[5.0, 5.0, 5.0]"),
        },
    ]
}

pub fn test_state(embedder: StubEmbedder, camera: FakeCamera) -> SharedState {
    let config = Config {
        store_url: presence_store::MEMORY_STORE_URL.to_string(),
        ..Config::default()
    };
    AppState::new(
        config,
        Arc::new(MemoryStore::with_people(roster())),
        Arc::new(embedder),
        Arc::new(camera),
    )
}
