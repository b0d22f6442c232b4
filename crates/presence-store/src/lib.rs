//! presence-store — Record store access for enrolled people and daily presence.
//!
//! [`RecordStore`] is the seam; [`PocketBaseStore`] talks to a PocketBase
//! REST API and [`MemoryStore`] keeps everything in process. [`Scanner`]
//! runs the match-then-record pipeline on top of any store.

pub mod error;
pub mod memory;
pub mod pocketbase;
pub mod recorder;
pub mod scan;
pub mod store;

use presence_core::Config;
use std::sync::Arc;

pub use error::StoreError;
pub use memory::MemoryStore;
pub use pocketbase::PocketBaseStore;
pub use recorder::{AttendanceRecorder, RecordOutcome};
pub use scan::{ScanOutcome, Scanner};
pub use store::{ImageUpload, RecordStore};

/// URL scheme selecting the in-process store.
pub const MEMORY_STORE_URL: &str = "memory://";

/// Open the store named by `config.store_url`.
pub fn open(config: &Config) -> Result<Arc<dyn RecordStore>, StoreError> {
    if config.store_url.starts_with(MEMORY_STORE_URL) {
        tracing::warn!("using in-memory record store; nothing will be persisted");
        return Ok(Arc::new(MemoryStore::new()));
    }

    let store = PocketBaseStore::from_config(config)?;
    tracing::info!(url = %config.store_url, "using PocketBase record store");
    Ok(Arc::new(store))
}
