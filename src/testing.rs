//! Scripted collaborators shared by the unit tests.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tokio::sync::Notify;

use crate::drafts::{BlobStore, StoreError};
use crate::gemini::{error_post, ContentBrief, ContentModel, GeminiError};
use crate::models::{GeneratedPost, Outcome, SearchResult};
use crate::orchestrator::{ProgressSink, SlotUpdate};
use crate::search::ProductSearch;

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Keyword(String),
    Content(ContentBrief),
    Refine(String),
    Image(String),
}

#[derive(Default)]
pub struct ScriptedModel {
    /// Overrides the refined image prompt; `None` derives one from the post.
    pub image_prompt: Option<String>,
    pub fail_content: bool,
    pub fail_image: bool,
    /// When set, content generation waits for a notification.
    pub hold: Option<Arc<Notify>>,
    pub calls: Mutex<Vec<Call>>,
}

impl ScriptedModel {
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn briefs(&self) -> Vec<ContentBrief> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Content(brief) => Some(brief),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl ContentModel for ScriptedModel {
    async fn extract_keyword(&self, topic: &str) -> Outcome<String> {
        self.calls.lock().push(Call::Keyword(topic.to_string()));
        Outcome::Fresh(topic.to_string())
    }

    async fn generate_content(&self, brief: &ContentBrief) -> Outcome<GeneratedPost> {
        self.calls.lock().push(Call::Content(brief.clone()));
        if let Some(hold) = &self.hold {
            hold.notified().await;
        }
        if self.fail_content {
            return Outcome::recovered(error_post(), "scripted failure");
        }
        Outcome::Fresh(GeneratedPost {
            content: format!("關於{}的貼文\n\n第二段", brief.topic),
            hashtags: vec!["#誠品".to_string()],
            suggested_image_prompt: Some("a suggested scene".to_string()),
        })
    }

    async fn refine_image_prompt(&self, post_content: &str) -> Outcome<String> {
        self.calls.lock().push(Call::Refine(post_content.to_string()));
        Outcome::Fresh(self.image_prompt.clone().unwrap_or_else(|| format!("photo of {}", post_content.lines().next().unwrap_or(""))))
    }

    async fn generate_image(&self, prompt: &str) -> Result<String, GeminiError> {
        self.calls.lock().push(Call::Image(prompt.to_string()));
        if self.fail_image {
            return Err(GeminiError::ImageGenerationFailed("scripted failure".into()));
        }
        Ok("data:image/png;base64,SU1H".to_string())
    }
}

pub struct ScriptedSearch {
    result: SearchResult,
    fail: bool,
    keywords: Mutex<Vec<String>>,
}

impl ScriptedSearch {
    pub fn returning(result: SearchResult) -> Self {
        Self { result, fail: false, keywords: Mutex::new(Vec::new()) }
    }

    pub fn failing() -> Self {
        Self { result: SearchResult::default(), fail: true, keywords: Mutex::new(Vec::new()) }
    }

    pub fn keywords(&self) -> Vec<String> {
        self.keywords.lock().clone()
    }
}

#[async_trait]
impl ProductSearch for ScriptedSearch {
    async fn search_products(&self, keyword: &str) -> Outcome<SearchResult> {
        self.keywords.lock().push(format!("keyword:{keyword}"));
        if self.fail {
            return Outcome::recovered(SearchResult::default(), "upstream down");
        }
        Outcome::Fresh(self.result.clone())
    }

    async fn capture_search_page_image(&self, keyword: &str) -> Outcome<String> {
        self.keywords.lock().push(format!("snapshot:{keyword}"));
        if self.fail {
            return Outcome::recovered(String::new(), "capture failed");
        }
        Outcome::Fresh("data:image/jpeg;base64,U05BUA==".to_string())
    }
}

#[derive(Default)]
pub struct RecordingSink {
    updates: Mutex<Vec<SlotUpdate>>,
    statuses: Mutex<Vec<String>>,
}

impl RecordingSink {
    pub fn updates(&self) -> Vec<SlotUpdate> {
        self.updates.lock().clone()
    }

    pub fn last_status(&self) -> Option<String> {
        self.statuses.lock().last().cloned()
    }
}

impl ProgressSink for RecordingSink {
    fn status(&self, message: &str) {
        self.statuses.lock().push(message.to_string());
    }

    fn publish(&self, update: SlotUpdate) {
        self.updates.lock().push(update);
    }
}

/// Blobs kept in memory instead of on disk.
#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: RwLock<HashMap<String, String>>,
}

impl BlobStore for MemoryBlobStore {
    fn read(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.blobs.read().get(key).cloned())
    }

    fn write(&self, key: &str, blob: &str) -> Result<(), StoreError> {
        self.blobs.write().insert(key.to_string(), blob.to_string());
        Ok(())
    }
}
