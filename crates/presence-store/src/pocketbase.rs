//! PocketBase REST client.
//!
//! Records live under `/api/collections/{collection}/records`. Lists are
//! paginated; every page is fetched so the roster is always complete.

use async_trait::async_trait;
use chrono::NaiveDate;
use presence_core::{Config, EnrolledPerson, NewPerson, PresenceRecord};
use reqwest::multipart::{Form, Part};
use reqwest::{RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;

use crate::error::StoreError;
use crate::store::{ImageUpload, RecordStore};

const PAGE_SIZE: u32 = 500;

/// One page of a list response.
#[derive(Debug, Deserialize)]
struct Page {
    #[serde(default = "first_page")]
    page: u32,
    #[serde(default, rename = "totalPages")]
    total_pages: u32,
    items: Vec<serde_json::Value>,
}

fn first_page() -> u32 {
    1
}

pub struct PocketBaseStore {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
    people: String,
    presences: String,
}

impl PocketBaseStore {
    pub fn new(
        base_url: &str,
        token: Option<String>,
        people_collection: &str,
        presence_collection: &str,
        timeout: Option<Duration>,
    ) -> Result<Self, StoreError> {
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(StoreError::InvalidUrl(base_url.to_string()));
        }

        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }

        Ok(Self {
            client: builder.build()?,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            people: people_collection.to_string(),
            presences: presence_collection.to_string(),
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, StoreError> {
        if config.store_token.is_none() {
            tracing::warn!("no store token configured; requests will be unauthenticated");
        }
        Self::new(
            &config.store_url,
            config.store_token.clone(),
            &config.people_collection,
            &config.presence_collection,
            config.request_timeout(),
        )
    }

    fn records_url(&self, collection: &str) -> String {
        format!("{}/api/collections/{collection}/records", self.base_url)
    }

    fn authed(&self, req: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    /// Fetch every raw item of `collection` matching `filter`, following pages.
    async fn list_items(
        &self,
        collection: &str,
        filter: Option<&str>,
    ) -> Result<Vec<serde_json::Value>, StoreError> {
        let mut items = Vec::new();
        let mut page = 1u32;

        loop {
            let mut query = vec![
                ("page", page.to_string()),
                ("perPage", PAGE_SIZE.to_string()),
            ];
            if let Some(filter) = filter {
                query.push(("filter", filter.to_string()));
            }

            let req = self.client.get(self.records_url(collection)).query(&query);
            let body = read_json(self.authed(req).send().await?).await?;
            let parsed: Page = serde_json::from_value(body)
                .map_err(|e| StoreError::Decode(format!("list {collection}: {e}")))?;

            let count = parsed.items.len();
            items.extend(parsed.items);

            if count == 0 || parsed.page >= parsed.total_pages {
                break;
            }
            page = parsed.page + 1;
        }

        tracing::debug!(collection, count = items.len(), "listed records");
        Ok(items)
    }

    /// Fetch and decode every record of `collection`.
    ///
    /// Items that do not deserialize as `T` are logged and dropped.
    async fn list_all<T: DeserializeOwned>(&self, collection: &str) -> Result<Vec<T>, StoreError> {
        let items = self.list_items(collection, None).await?;
        let mut records = Vec::with_capacity(items.len());
        for item in items {
            match serde_json::from_value::<T>(item) {
                Ok(record) => records.push(record),
                Err(e) => tracing::warn!(collection, error = %e, "skipping unreadable record"),
            }
        }
        Ok(records)
    }
}

#[async_trait]
impl RecordStore for PocketBaseStore {
    async fn list_people(&self) -> Result<Vec<EnrolledPerson>, StoreError> {
        self.list_all(&self.people).await
    }

    async fn create_person(
        &self,
        person: &NewPerson,
        image: Option<ImageUpload>,
    ) -> Result<EnrolledPerson, StoreError> {
        let req = self.client.post(self.records_url(&self.people));
        let req = match image {
            Some(image) => {
                let file = Part::bytes(image.bytes)
                    .file_name(image.file_name)
                    .mime_str(&image.content_type)?;
                let form = Form::new()
                    .text("name", person.name.clone())
                    .text("role", person.role.as_str())
                    .text("face_embedding", person.embedding.to_text())
                    .part("image", file);
                req.multipart(form)
            }
            None => req.json(person),
        };

        let body = read_json(self.authed(req).send().await?).await?;
        let created: EnrolledPerson = serde_json::from_value(body)
            .map_err(|e| StoreError::Decode(format!("created person: {e}")))?;
        tracing::info!(id = %created.id, name = %created.name, role = %created.role, "person enrolled");
        Ok(created)
    }

    async fn count_presence(&self, person_id: &str, date: NaiveDate) -> Result<usize, StoreError> {
        let filter = presence_filter(person_id, date);
        Ok(self.list_items(&self.presences, Some(&filter)).await?.len())
    }

    async fn create_presence(&self, record: &PresenceRecord) -> Result<PresenceRecord, StoreError> {
        let req = self.client.post(self.records_url(&self.presences)).json(record);
        let body = read_json(self.authed(req).send().await?).await?;
        serde_json::from_value(body).map_err(|e| StoreError::Decode(format!("created presence: {e}")))
    }

    async fn list_presences(&self) -> Result<Vec<PresenceRecord>, StoreError> {
        self.list_all(&self.presences).await
    }

    fn describe(&self) -> String {
        format!("pocketbase {}", self.base_url)
    }
}

/// Read a JSON body, turning non-2xx statuses and `error` payloads into errors.
async fn read_json(response: Response) -> Result<serde_json::Value, StoreError> {
    let status = response.status();
    let text = response.text().await?;
    let body: Option<serde_json::Value> = serde_json::from_str(&text).ok();

    if !status.is_success() {
        let message = body
            .as_ref()
            .and_then(error_message)
            .unwrap_or_else(|| text.trim().to_string());
        tracing::warn!(status = status.as_u16(), %message, "record store request failed");
        return Err(StoreError::Status {
            status: status.as_u16(),
            message,
        });
    }

    let body = body.ok_or_else(|| StoreError::Decode(format!("not JSON: {}", text.trim())))?;
    if let Some(message) = body.get("error").and_then(|e| e.as_str()) {
        return Err(StoreError::Status {
            status: status.as_u16(),
            message: message.to_string(),
        });
    }
    Ok(body)
}

/// Error text from a PocketBase (`message`) or proxy (`error`) payload.
fn error_message(body: &serde_json::Value) -> Option<String> {
    ["error", "message"]
        .iter()
        .find_map(|key| body.get(*key).and_then(|v| v.as_str()))
        .map(str::to_string)
}

/// Filter expression selecting one person's record for one day.
fn presence_filter(person_id: &str, date: NaiveDate) -> String {
    format!(
        "person_id='{}' && date='{}'",
        escape_filter_value(person_id),
        date.format("%Y-%m-%d")
    )
}

fn escape_filter_value(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}
