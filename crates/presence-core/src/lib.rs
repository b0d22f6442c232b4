//! presence-core — Face matching engine for daily attendance.
//!
//! Decodes stored face embeddings, finds the nearest enrolled person by
//! Euclidean distance, and adapts images for an external embedding model.

pub mod config;
pub mod embedding;
pub mod extractor;
pub mod matcher;
pub mod types;

pub use config::Config;
pub use embedding::{Embedding, EmbeddingError};
pub use extractor::{DeepFaceEmbedder, ExtractError, ExtractOutcome, Extractor, FaceEmbedder};
pub use matcher::{Candidate, EuclideanMatcher, MatchOutcome, Matcher, DEFAULT_DISTANCE_THRESHOLD};
pub use types::{EnrolledPerson, NewPerson, PresenceRecord, Role};
