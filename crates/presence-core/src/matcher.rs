//! Nearest-neighbour matching of a probe embedding against the enrolled roster.

use crate::embedding::Embedding;
use crate::types::{EnrolledPerson, Role};

/// Maximum Euclidean distance (exclusive) for a positive match.
///
/// Empirical value for Facenet embeddings; override it through configuration.
pub const DEFAULT_DISTANCE_THRESHOLD: f32 = 10.0;

/// The roster entry closest to the probe.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub person_id: String,
    pub name: String,
    pub role: Role,
    pub distance: f32,
}

/// Result of matching a probe embedding against a roster.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchOutcome {
    /// Closest decodable entry, whether or not it passed the threshold.
    pub best: Option<Candidate>,
    /// True when `best` lies strictly below the threshold.
    pub accepted: bool,
    /// Entries whose distance was computed.
    pub compared: usize,
    /// Entries skipped because their stored embedding was absent or unusable.
    pub skipped: usize,
}

impl MatchOutcome {
    /// The accepted candidate, if any.
    pub fn matched(&self) -> Option<&Candidate> {
        if self.accepted {
            self.best.as_ref()
        } else {
            None
        }
    }

    /// Smallest distance seen, or `None` when nothing could be compared.
    pub fn min_distance(&self) -> Option<f32> {
        self.best.as_ref().map(|c| c.distance)
    }
}

/// Strategy for comparing a probe embedding against the enrolled roster.
pub trait Matcher {
    fn compare(&self, probe: &Embedding, roster: &[EnrolledPerson], threshold: f32) -> MatchOutcome;
}

/// Exact linear scan by Euclidean distance.
///
/// Ties keep the first entry in roster order. An entry that cannot be
/// decoded or has the wrong dimension is skipped; it never aborts the scan.
pub struct EuclideanMatcher;

impl Matcher for EuclideanMatcher {
    fn compare(&self, probe: &Embedding, roster: &[EnrolledPerson], threshold: f32) -> MatchOutcome {
        let mut best: Option<(usize, f32)> = None;
        let mut compared = 0usize;
        let mut skipped = 0usize;

        for (i, person) in roster.iter().enumerate() {
            let stored = match Embedding::from_stored(&person.face_embedding) {
                Ok(e) => e,
                Err(e) if e.is_missing() => {
                    tracing::debug!(person = %person.name, "no stored embedding; skipping");
                    skipped += 1;
                    continue;
                }
                Err(e) => {
                    tracing::warn!(person = %person.name, id = %person.id, error = %e, "unreadable stored embedding; skipping");
                    skipped += 1;
                    continue;
                }
            };

            let distance = match stored.euclidean_distance(probe) {
                Ok(d) => d,
                Err(e) => {
                    tracing::warn!(person = %person.name, id = %person.id, error = %e, "cannot compare embedding; skipping");
                    skipped += 1;
                    continue;
                }
            };

            compared += 1;
            tracing::debug!(person = %person.name, distance, "compared");

            // NaN compares false and never becomes the best.
            let is_better = match best {
                None => !distance.is_nan(),
                Some((_, d)) => distance < d,
            };
            if is_better {
                best = Some((i, distance));
            }
        }

        let best = best.map(|(i, distance)| {
            let person = &roster[i];
            Candidate {
                person_id: person.id.clone(),
                name: person.name.clone(),
                role: person.role,
                distance,
            }
        });
        let accepted = best.as_ref().is_some_and(|c| c.distance < threshold);

        MatchOutcome {
            best,
            accepted,
            compared,
            skipped,
        }
    }
}
