//! Saved drafts, persisted as a single JSON blob that is rewritten on every change.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::models::{DraftInput, SavedPost};

/// Name of the blob holding the draft collection.
pub const DRAFTS_KEY: &str = "eslite_saved_posts";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Named string blobs, the server-side stand-in for browser local storage.
pub trait BlobStore: Send + Sync {
    fn read(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn write(&self, key: &str, blob: &str) -> Result<(), StoreError>;
}

/// One `<key>.json` file per blob inside a directory.
pub struct FileBlobStore {
    dir: PathBuf,
}

impl FileBlobStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self { dir: dir.as_ref().to_path_buf() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}

impl BlobStore for FileBlobStore {
    fn read(&self, key: &str) -> Result<Option<String>, StoreError> {
        match std::fs::read_to_string(self.path_for(key)) {
            Ok(blob) => Ok(Some(blob)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&self, key: &str, blob: &str) -> Result<(), StoreError> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, blob)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }
}

/// Newest-first draft collection. Every mutation persists the whole list
/// before the in-memory copy is replaced.
pub struct DraftStore {
    blobs: Arc<dyn BlobStore>,
    posts: RwLock<Vec<SavedPost>>,
}

impl DraftStore {
    /// Loads the persisted collection. Unreadable or corrupt blobs yield an
    /// empty collection.
    pub fn open(blobs: Arc<dyn BlobStore>) -> Self {
        let posts = match blobs.read(DRAFTS_KEY) {
            Ok(Some(blob)) => match serde_json::from_str::<Vec<SavedPost>>(&blob) {
                Ok(posts) => posts,
                Err(e) => {
                    warn!("⚠️ Failed to parse saved posts, starting empty: {}", e);
                    Vec::new()
                }
            },
            Ok(None) => Vec::new(),
            Err(e) => {
                warn!("⚠️ Failed to read saved posts, starting empty: {}", e);
                Vec::new()
            }
        };
        info!("📚 Loaded {} saved drafts", posts.len());
        Self { blobs, posts: RwLock::new(posts) }
    }

    fn persist(&self, posts: &[SavedPost]) -> Result<(), StoreError> {
        let blob = serde_json::to_string(posts)?;
        self.blobs.write(DRAFTS_KEY, &blob)
    }

    pub fn save(&self, draft: DraftInput) -> Result<SavedPost, StoreError> {
        let mut posts = self.posts.write();
        let mut id = Uuid::new_v4().to_string();
        while posts.iter().any(|p| p.id == id) {
            id = Uuid::new_v4().to_string();
        }
        let saved = SavedPost {
            id,
            // stored with millisecond precision, so keep memory in step with the blob
            timestamp: DateTime::<Utc>::from_timestamp_millis(Utc::now().timestamp_millis()).unwrap_or_else(Utc::now),
            post: draft.post,
            platform: draft.platform,
            tone: draft.tone,
            generated_image_url: draft.generated_image_url.filter(|u| !u.is_empty()),
            product: draft.product,
        };

        let mut updated = Vec::with_capacity(posts.len() + 1);
        updated.push(saved.clone());
        updated.extend(posts.iter().cloned());
        self.persist(&updated)?;
        *posts = updated;

        info!("💾 Saved draft {} ({} total)", saved.id, posts.len());
        Ok(saved)
    }

    /// Removes the draft with `id`. Returns false, without writing, if none matched.
    pub fn delete(&self, id: &str) -> Result<bool, StoreError> {
        let mut posts = self.posts.write();
        if !posts.iter().any(|p| p.id == id) {
            return Ok(false);
        }
        let updated: Vec<SavedPost> = posts.iter().filter(|p| p.id != id).cloned().collect();
        self.persist(&updated)?;
        *posts = updated;
        info!("🗑️ Deleted draft {}", id);
        Ok(true)
    }

    pub fn load(&self, id: &str) -> Option<SavedPost> {
        self.posts.read().iter().find(|p| p.id == id).cloned()
    }

    pub fn load_all(&self) -> Vec<SavedPost> {
        self.posts.read().clone()
    }
}
