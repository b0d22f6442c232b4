use async_trait::async_trait;
use chrono::NaiveDate;
use presence_core::{EnrolledPerson, NewPerson, PresenceRecord};

use crate::error::StoreError;

/// Enrolment photo uploaded alongside a new person.
#[derive(Debug, Clone)]
pub struct ImageUpload {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// Remote collections of enrolled people and presence records.
///
/// Every call is independent: no transactions, no retries.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Fetch the whole roster, in store order.
    async fn list_people(&self) -> Result<Vec<EnrolledPerson>, StoreError>;

    async fn create_person(
        &self,
        person: &NewPerson,
        image: Option<ImageUpload>,
    ) -> Result<EnrolledPerson, StoreError>;

    /// Number of stored presence items for one person on one day, whatever
    /// their other fields hold.
    async fn count_presence(&self, person_id: &str, date: NaiveDate) -> Result<usize, StoreError>;

    async fn create_presence(&self, record: &PresenceRecord) -> Result<PresenceRecord, StoreError>;

    async fn list_presences(&self) -> Result<Vec<PresenceRecord>, StoreError>;

    /// Short description for status output.
    fn describe(&self) -> String;
}
