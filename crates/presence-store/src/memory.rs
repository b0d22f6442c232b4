//! In-process record store for local runs and tests.

use async_trait::async_trait;
use chrono::NaiveDate;
use presence_core::{EnrolledPerson, NewPerson, PresenceRecord};
use std::collections::HashMap;
use tokio::sync::Mutex;

use crate::error::StoreError;
use crate::store::{ImageUpload, RecordStore};

#[derive(Default)]
struct Inner {
    people: Vec<EnrolledPerson>,
    presences: Vec<PresenceRecord>,
    images: HashMap<String, ImageUpload>,
    presence_writes: usize,
}

/// Record store backed by process memory. Nothing survives a restart.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-built roster entries as-is, including raw embeddings.
    pub fn with_people(people: Vec<EnrolledPerson>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                people,
                ..Inner::default()
            }),
        }
    }

    /// Number of presence records written so far.
    pub async fn presence_writes(&self) -> usize {
        self.inner.lock().await.presence_writes
    }

    /// Enrolment photo stored for a person, if one was uploaded.
    pub async fn image_for(&self, person_id: &str) -> Option<ImageUpload> {
        self.inner.lock().await.images.get(person_id).cloned()
    }
}

fn new_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn list_people(&self) -> Result<Vec<EnrolledPerson>, StoreError> {
        Ok(self.inner.lock().await.people.clone())
    }

    async fn create_person(
        &self,
        person: &NewPerson,
        image: Option<ImageUpload>,
    ) -> Result<EnrolledPerson, StoreError> {
        let created = EnrolledPerson {
            id: new_id(),
            name: person.name.clone(),
            role: person.role,
            face_embedding: serde_json::to_value(&person.embedding)
                .map_err(|e| StoreError::Decode(e.to_string()))?,
        };

        let mut inner = self.inner.lock().await;
        if let Some(image) = image {
            inner.images.insert(created.id.clone(), image);
        }
        inner.people.push(created.clone());
        Ok(created)
    }

    async fn count_presence(&self, person_id: &str, date: NaiveDate) -> Result<usize, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .presences
            .iter()
            .filter(|r| r.person_id == person_id && r.date == date)
            .count())
    }

    async fn create_presence(&self, record: &PresenceRecord) -> Result<PresenceRecord, StoreError> {
        let mut created = record.clone();
        created.id = Some(new_id());

        let mut inner = self.inner.lock().await;
        inner.presences.push(created.clone());
        inner.presence_writes += 1;
        Ok(created)
    }

    async fn list_presences(&self) -> Result<Vec<PresenceRecord>, StoreError> {
        Ok(self.inner.lock().await.presences.clone())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}
