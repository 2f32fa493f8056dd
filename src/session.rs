use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;

use crate::models::{GeneratedPost, GenerationRequest, Platform, ProductsSummary, SavedPost, SearchResult, Tone};
use crate::orchestrator::{PriorOutputs, ProgressSink, RunGate, RunGuard, SlotUpdate};

/// The live editing state: the last request and every output slot.
#[skip_serializing_none]
#[derive(Debug, Serialize, Clone, Default, PartialEq)]
pub struct EditorSession {
    pub request: Option<GenerationRequest>,
    pub platform: Platform,
    pub tone: Tone,
    pub keyword: Option<String>,
    pub search: Option<SearchResult>,
    pub products_summary: ProductsSummary,
    pub screenshot: Option<String>,
    pub post: Option<GeneratedPost>,
    pub image: Option<String>,
    pub status: String,
    pub running: bool,
}

/// Direct user edits to the current post. Absent fields are left alone.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct PostEdits {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub hashtags: Option<Vec<String>>,
    #[serde(default)]
    pub suggested_image_prompt: Option<String>,
}

impl EditorSession {
    pub fn apply(&mut self, update: SlotUpdate) {
        match update {
            SlotUpdate::Reset { keep_search } => {
                if !keep_search {
                    self.keyword = None;
                    self.search = None;
                    self.products_summary = ProductsSummary::empty();
                    self.screenshot = None;
                }
                self.post = None;
                self.image = None;
            }
            SlotUpdate::Keyword(keyword) => self.keyword = Some(keyword),
            SlotUpdate::Search { result, summary } => {
                self.search = Some(result);
                self.products_summary = summary;
            }
            SlotUpdate::Summary(summary) => self.products_summary = summary,
            SlotUpdate::Screenshot(screenshot) => self.screenshot = Some(screenshot),
            SlotUpdate::Post(post) => self.post = Some(post),
            SlotUpdate::ImagePrompt(prompt) => {
                if let Some(post) = self.post.as_mut() {
                    post.suggested_image_prompt = Some(prompt).filter(|p| !p.is_empty());
                }
            }
            SlotUpdate::Image(image) => self.image = Some(image),
        }
    }

    pub fn prior_outputs(&self) -> PriorOutputs {
        PriorOutputs { search: self.search.clone(), screenshot: self.screenshot.clone() }
    }

    pub fn apply_edits(&mut self, edits: PostEdits) {
        let post = self.post.get_or_insert_with(GeneratedPost::default);
        if let Some(content) = edits.content {
            post.content = content;
        }
        if let Some(hashtags) = edits.hashtags {
            post.hashtags = hashtags;
        }
        if let Some(prompt) = edits.suggested_image_prompt {
            post.suggested_image_prompt = Some(prompt);
        }
    }

    /// Puts a saved draft back into the editor. Drafts keep no topic or
    /// search context, so those of the previous run are dropped with it.
    pub fn load_draft(&mut self, draft: &SavedPost) {
        self.request = None;
        self.keyword = None;
        self.search = None;
        self.products_summary = ProductsSummary::empty();
        self.screenshot = None;
        self.post = Some(draft.post.clone());
        self.image = draft.generated_image_url.clone();
        self.platform = draft.platform;
        self.tone = draft.tone;
    }

    /// The current post's image prompt, as edited.
    pub fn image_prompt(&self) -> String {
        self.post.as_ref().and_then(|p| p.suggested_image_prompt.clone()).unwrap_or_default()
    }

    pub fn has_content(&self) -> bool {
        self.post.as_ref().is_some_and(|p| !p.content.trim().is_empty())
    }
}

/// Session shared between handlers, plus the run-in-progress flag.
#[derive(Default)]
pub struct SharedSession {
    state: RwLock<EditorSession>,
    gate: RunGate,
}

impl SharedSession {
    pub fn try_begin(&self) -> Option<RunGuard> {
        self.gate.try_begin()
    }

    #[cfg(test)]
    pub fn is_running(&self) -> bool {
        self.gate.is_running()
    }

    pub fn snapshot(&self) -> EditorSession {
        let mut snapshot = self.state.read().clone();
        snapshot.running = self.gate.is_running();
        snapshot
    }

    pub fn update<R>(&self, f: impl FnOnce(&mut EditorSession) -> R) -> R {
        f(&mut self.state.write())
    }
}

impl ProgressSink for SharedSession {
    fn status(&self, message: &str) {
        self.state.write().status = message.to_string();
    }

    fn publish(&self, update: SlotUpdate) {
        self.state.write().apply(update);
    }
}
