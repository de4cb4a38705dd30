use std::path::PathBuf;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tokio::fs;

use super::{LocalFileStorage, short_hash};
use crate::content::ContentType;

const RECORD_DIR: &str = "records";

/// What happened to one piece of content, written after every attempted delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicationRecord {
    pub content_type: ContentType,
    pub genre: String,
    pub sub_genre: Option<String>,
    pub style: Option<String>,
    pub theme: Option<String>,
    pub palette: Option<String>,
    pub prompt: String,
    pub caption: String,
    pub post_id: Option<String>,
    pub success: bool,
    pub attempts_used: u32,
    /// Archive key of the raw generated image, when it was archived.
    pub image_key: Option<String>,
    pub created_at: String,
}

pub async fn save_record(storage: &LocalFileStorage, record: &PublicationRecord) -> Result<String> {
    let stamp = record.created_at.replace(':', "-");
    let hash_source = format!(
        "{}:{}:{}:{}",
        record.content_type, record.genre, record.prompt, record.caption
    );
    let hash = short_hash(hash_source.as_bytes(), 16);
    let key = LocalFileStorage::record_key(&stamp, &hash);
    let payload = serde_json::to_vec_pretty(record)?;
    storage.put(&key, &payload).await?;
    Ok(key)
}

/// Newest first. Unreadable files are skipped.
pub async fn list_records(
    storage: &LocalFileStorage,
    limit: usize,
    content_type: Option<ContentType>,
) -> Result<Vec<PublicationRecord>> {
    let dir_path = storage.resolve_path(RECORD_DIR);
    let mut entries: Vec<PathBuf> = Vec::new();
    let mut dir = match fs::read_dir(&dir_path).await {
        Ok(dir) => dir,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err.into()),
    };
    while let Some(entry) = dir.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) == Some("json") {
            entries.push(path);
        }
    }
    entries.sort_by(|a, b| b.cmp(a));

    let mut records = Vec::new();
    for path in entries {
        if records.len() >= limit {
            break;
        }
        let bytes = fs::read(&path).await?;
        let Ok(record) = serde_json::from_slice::<PublicationRecord>(&bytes) else {
            continue;
        };
        if content_type.is_some_and(|wanted| record.content_type != wanted) {
            continue;
        }
        records.push(record);
    }
    Ok(records)
}
