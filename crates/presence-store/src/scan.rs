//! Embedding → roster match → attendance, shared by every scan entry point.

use presence_core::{Embedding, EuclideanMatcher, ExtractOutcome, Matcher};
use std::fmt;
use std::sync::Arc;

use crate::recorder::{AttendanceRecorder, RecordOutcome};
use crate::store::RecordStore;

/// Result of one scan attempt, as shown to the user.
#[derive(Debug, Clone, PartialEq)]
pub enum ScanOutcome {
    Present {
        person_id: String,
        name: String,
        distance: f32,
        /// `None` when the scan was not asked to record attendance.
        recorded: Option<RecordOutcome>,
    },
    NoMatch {
        min_distance: Option<f32>,
    },
    NoFace,
    RecordFailed(String),
    StoreUnavailable(String),
}

impl ScanOutcome {
    /// True for outcomes that report a failure rather than a scan result.
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            ScanOutcome::NoFace | ScanOutcome::RecordFailed(_) | ScanOutcome::StoreUnavailable(_)
        )
    }
}

impl fmt::Display for ScanOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanOutcome::Present { name, distance, .. } => {
                write!(f, "Present - {name} recognized at distance {distance:.4}")
            }
            ScanOutcome::NoMatch {
                min_distance: Some(d),
            } => write!(f, "No matching face found (minimum distance = {d:.4})"),
            ScanOutcome::NoMatch { min_distance: None } => {
                f.write_str("No matching face found (minimum distance = inf)")
            }
            ScanOutcome::NoFace => f.write_str("No face detected in the image"),
            ScanOutcome::RecordFailed(_) => f.write_str("Failed to record attendance"),
            ScanOutcome::StoreUnavailable(reason) => write!(f, "Record store unavailable: {reason}"),
        }
    }
}

/// Matches embeddings against the full roster and records attendance.
pub struct Scanner {
    store: Arc<dyn RecordStore>,
    recorder: AttendanceRecorder,
    threshold: f32,
}

impl Scanner {
    pub fn new(store: Arc<dyn RecordStore>, threshold: f32) -> Self {
        Self {
            recorder: AttendanceRecorder::new(store.clone()),
            store,
            threshold,
        }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Scan the result of an extraction. A model failure counts as no face.
    pub async fn scan(&self, extracted: ExtractOutcome) -> ScanOutcome {
        match extracted {
            ExtractOutcome::Embedding(embedding) => self.identify(&embedding).await,
            ExtractOutcome::NoFace | ExtractOutcome::Failed(_) => ScanOutcome::NoFace,
        }
    }

    /// Match `embedding` against the roster; on acceptance mark today present.
    pub async fn identify(&self, embedding: &Embedding) -> ScanOutcome {
        self.run(embedding, true).await
    }

    /// Match `embedding` against the roster without writing attendance.
    pub async fn preview(&self, embedding: &Embedding) -> ScanOutcome {
        self.run(embedding, false).await
    }

    async fn run(&self, embedding: &Embedding, record: bool) -> ScanOutcome {
        let roster = match self.store.list_people().await {
            Ok(roster) => roster,
            Err(e) => {
                tracing::warn!(error = %e, "cannot fetch roster");
                return ScanOutcome::StoreUnavailable(e.user_message());
            }
        };

        let outcome = EuclideanMatcher.compare(embedding, &roster, self.threshold);
        tracing::debug!(
            roster = roster.len(),
            compared = outcome.compared,
            skipped = outcome.skipped,
            min_distance = ?outcome.min_distance(),
            "roster matched"
        );

        let Some(candidate) = outcome.matched() else {
            return ScanOutcome::NoMatch {
                min_distance: outcome.min_distance(),
            };
        };

        let recorded = if record {
            match self.recorder.record_today(&candidate.person_id, true).await {
                Ok(recorded) => Some(recorded),
                Err(e) => {
                    tracing::warn!(person = %candidate.name, error = %e, "recording attendance failed");
                    return ScanOutcome::RecordFailed(e.user_message());
                }
            }
        } else {
            None
        };

        tracing::info!(
            person = %candidate.name,
            distance = candidate.distance,
            ?recorded,
            "face recognized"
        );
        ScanOutcome::Present {
            person_id: candidate.person_id.clone(),
            name: candidate.name.clone(),
            distance: candidate.distance,
            recorded,
        }
    }
}
