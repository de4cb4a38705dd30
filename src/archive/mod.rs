//! Local archive of generated images and publication records.
//!
//! Layout under the archive root:
//! - `generated/{timestamp}_{sha256-prefix}.{ext}`: raw provider output
//! - `records/{timestamp}_{hash}.json`: one [`PublicationRecord`] per delivery

mod hash;
mod records;
mod storage;

use std::path::PathBuf;

use anyhow::Result;
use chrono::Utc;
use tracing::debug;

use crate::content::ContentType;
use crate::image_processing::{detect_mime_type, extension_for_mime_type};

pub use hash::{compute_hash, short_hash};
pub use records::{PublicationRecord, list_records, save_record};
pub use storage::LocalFileStorage;

#[derive(Clone, Debug)]
pub struct Archive {
    storage: LocalFileStorage,
}

impl Archive {
    pub fn new(dir: PathBuf) -> Self {
        Self {
            storage: LocalFileStorage::new(dir),
        }
    }

    pub fn storage(&self) -> &LocalFileStorage {
        &self.storage
    }

    /// Stores raw image bytes and returns their key.
    pub async fn save_generated(&self, bytes: &[u8]) -> Result<String> {
        let stamp = Utc::now().format("%Y%m%dT%H%M%S%.3fZ").to_string();
        let ext = detect_mime_type(bytes)
            .map(extension_for_mime_type)
            .unwrap_or("bin");
        let key = LocalFileStorage::generated_key(&stamp, &short_hash(bytes, 16), ext);
        self.storage.put(&key, bytes).await?;
        debug!(key = %key, bytes = bytes.len(), "Archived generated image");
        Ok(key)
    }

    pub async fn save_record(&self, record: &PublicationRecord) -> Result<String> {
        save_record(&self.storage, record).await
    }

    pub async fn recent_records(
        &self,
        limit: usize,
        content_type: Option<ContentType>,
    ) -> Result<Vec<PublicationRecord>> {
        list_records(&self.storage, limit, content_type).await
    }
}
