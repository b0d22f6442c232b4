//! Idempotent daily attendance recording.

use chrono::{Local, NaiveDate};
use presence_core::PresenceRecord;
use std::sync::Arc;

use crate::error::StoreError;
use crate::store::RecordStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    /// A new record was written.
    Created,
    /// A record already existed for this person and day; nothing was written.
    AlreadyRecorded,
}

/// Writes at most one presence record per (person, day).
///
/// The existence check and the insert are two separate store calls with no
/// lock between them, so two concurrent requests for the same person can
/// both insert.
#[derive(Clone)]
pub struct AttendanceRecorder {
    store: Arc<dyn RecordStore>,
}

impl AttendanceRecorder {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    /// Record presence for `person_id` on `date` unless already recorded.
    pub async fn record(
        &self,
        person_id: &str,
        present: bool,
        date: NaiveDate,
    ) -> Result<RecordOutcome, StoreError> {
        let existing = self.store.count_presence(person_id, date).await?;
        if existing > 0 {
            tracing::debug!(person_id, %date, "presence already recorded");
            return Ok(RecordOutcome::AlreadyRecorded);
        }

        let record = PresenceRecord {
            id: None,
            person_id: person_id.to_string(),
            date,
            present,
        };
        self.store.create_presence(&record).await?;
        tracing::info!(person_id, %date, present, "presence recorded");
        Ok(RecordOutcome::Created)
    }

    /// Record presence for the current local calendar day.
    pub async fn record_today(&self, person_id: &str, present: bool) -> Result<RecordOutcome, StoreError> {
        self.record(person_id, present, Local::now().date_naive()).await
    }
}
