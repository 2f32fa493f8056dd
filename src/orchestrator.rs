//! Sequencing of the search, content and image steps of a generation run.
//!
//! The orchestrator holds no state between runs. Prior outputs come in as
//! [`PriorOutputs`], and every intermediate result is pushed through a
//! [`ProgressSink`] so the caller's state can show partial progress.

use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::gemini::{ContentBrief, ContentModel};
use crate::models::{GeneratedPost, GenerationRequest, ImageStatus, Outcome, ProductsSummary, SearchResult};
use crate::search::{summarize_products, ProductSearch};

pub const STATUS_KEYWORD: &str = "分析搜尋關鍵字中...";
pub const STATUS_WRITING: &str = "撰寫社群貼文中...";
pub const STATUS_IMAGE_PROMPT: &str = "生成配圖描述中...";
pub const STATUS_IMAGE: &str = "生成配圖中...";
pub const STATUS_PARALLEL: &str = "AI 正在同步處理：擷取誠品網頁與撰寫社群貼文...";
pub const STATUS_REWRITING: &str = "重新撰寫中...";
pub const STATUS_IMAGE_FAILED: &str = "貼文已完成，但配圖生成失敗。";

/// Which of the two run designs is in use. Fixed for the life of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowMode {
    /// Search completes (or is skipped/reused) before content is written,
    /// and the content prompt lists the products found.
    #[default]
    ProductAware,
    /// Search-page screenshot and content+image run as two concurrent tracks.
    ParallelSnapshot,
}

impl FromStr for WorkflowMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "product_aware" | "serial" => Ok(WorkflowMode::ProductAware),
            "parallel_snapshot" | "parallel" => Ok(WorkflowMode::ParallelSnapshot),
            other => Err(format!("unknown workflow mode: {other}")),
        }
    }
}

/// A write into one of the caller's output slots.
#[derive(Debug, Clone, PartialEq)]
pub enum SlotUpdate {
    /// Start of a full run. Search outputs survive only when reused.
    Reset { keep_search: bool },
    Keyword(String),
    Search { result: SearchResult, summary: ProductsSummary },
    /// Products summary supplied by the caller instead of a search.
    Summary(ProductsSummary),
    Screenshot(String),
    Post(GeneratedPost),
    ImagePrompt(String),
    Image(String),
}

pub trait ProgressSink: Send + Sync {
    fn status(&self, message: &str);
    fn publish(&self, update: SlotUpdate);
}

/// Outputs of earlier runs that a new run may reuse.
#[derive(Debug, Clone, Default)]
pub struct PriorOutputs {
    pub search: Option<SearchResult>,
    pub screenshot: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SearchStage {
    Disabled,
    Reused,
    Products { keyword: Outcome<String>, result: Outcome<SearchResult> },
    Snapshot { keyword: Outcome<String>, screenshot: Outcome<String> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub search: SearchStage,
    pub products_summary: ProductsSummary,
    pub post: Outcome<GeneratedPost>,
    pub image_prompt: Option<Outcome<String>>,
    pub image: ImageStatus,
}

impl RunReport {
    /// Human-readable notes about every step that fell back or failed.
    pub fn notices(&self) -> Vec<String> {
        let mut notices = Vec::new();
        match &self.search {
            SearchStage::Products { keyword, result } => {
                if let Some(reason) = keyword.reason() {
                    notices.push(format!("keyword extraction recovered: {reason}"));
                }
                if let Some(reason) = result.reason() {
                    notices.push(format!("product search recovered: {reason}"));
                }
            }
            SearchStage::Snapshot { keyword, screenshot } => {
                if let Some(reason) = keyword.reason() {
                    notices.push(format!("keyword extraction recovered: {reason}"));
                }
                if let Some(reason) = screenshot.reason() {
                    notices.push(format!("search page capture recovered: {reason}"));
                }
            }
            SearchStage::Disabled | SearchStage::Reused => {}
        }
        if let Some(reason) = self.post.reason() {
            notices.push(format!("content generation recovered: {reason}"));
        }
        if let Some(reason) = self.image_prompt.as_ref().and_then(|p| p.reason()) {
            notices.push(format!("image prompt refinement recovered: {reason}"));
        }
        if let ImageStatus::Failed(reason) = &self.image {
            notices.push(format!("image generation failed: {reason}"));
        }
        notices
    }
}

/// The content half of a run: post, refined image prompt, image.
struct ContentTrack {
    post: Outcome<GeneratedPost>,
    image_prompt: Option<Outcome<String>>,
    image: ImageStatus,
}

pub struct Orchestrator {
    ai: Arc<dyn ContentModel>,
    search: Arc<dyn ProductSearch>,
    mode: WorkflowMode,
}

impl Orchestrator {
    pub fn new(ai: Arc<dyn ContentModel>, search: Arc<dyn ProductSearch>, mode: WorkflowMode) -> Self {
        Self { ai, search, mode }
    }

    pub fn mode(&self) -> WorkflowMode { self.mode }

    /// Full generation run. Never fails: every step degrades to a fallback.
    pub async fn run_full(&self, request: &GenerationRequest, prior: &PriorOutputs, sink: &dyn ProgressSink) -> RunReport {
        info!("🚀 Full run ({:?}) for topic: {}", self.mode, request.topic);
        let report = match self.mode {
            WorkflowMode::ProductAware => self.run_product_aware(request, prior, sink).await,
            WorkflowMode::ParallelSnapshot => self.run_parallel(request, prior, sink).await,
        };
        match report.image {
            ImageStatus::Failed(_) => sink.status(STATUS_IMAGE_FAILED),
            _ => sink.status(""),
        }
        info!("✅ Run finished with {} notice(s)", report.notices().len());
        report
    }

    async fn run_product_aware(&self, request: &GenerationRequest, prior: &PriorOutputs, sink: &dyn ProgressSink) -> RunReport {
        let retained = prior.search.as_ref().filter(|_| !request.retake_search);
        sink.publish(SlotUpdate::Reset { keep_search: retained.is_some() });

        let (search, summary) = if let Some(result) = retained {
            info!("♻️ Reusing previous search result ({} products)", result.len());
            let summary = summarize_products(result);
            sink.publish(SlotUpdate::Search { result: result.clone(), summary: summary.clone() });
            (SearchStage::Reused, summary)
        } else if let Some(summary) = self.supplied_summary(request) {
            info!("♻️ Using supplied products summary ({} listed)", summary.listed);
            sink.publish(SlotUpdate::Summary(summary.clone()));
            (SearchStage::Reused, summary)
        } else if request.search_enabled {
            self.product_search(&request.topic, sink).await
        } else {
            (SearchStage::Disabled, ProductsSummary::empty())
        };

        let track = self.content_track(request, &summary, sink).await;
        RunReport {
            search,
            products_summary: summary,
            post: track.post,
            image_prompt: track.image_prompt,
            image: track.image,
        }
    }

    async fn run_parallel(&self, request: &GenerationRequest, prior: &PriorOutputs, sink: &dyn ProgressSink) -> RunReport {
        let retained = prior.screenshot.as_ref().filter(|s| !request.retake_search && !s.is_empty());
        sink.publish(SlotUpdate::Reset { keep_search: retained.is_some() });
        sink.status(STATUS_PARALLEL);

        let summary = ProductsSummary::empty();
        let snapshot_track = async {
            if retained.is_some() {
                SearchStage::Reused
            } else if request.search_enabled {
                self.snapshot_search(&request.topic, sink).await
            } else {
                SearchStage::Disabled
            }
        };
        let (search, track) = tokio::join!(snapshot_track, self.content_track(request, &summary, sink));

        RunReport {
            search,
            products_summary: summary,
            post: track.post,
            image_prompt: track.image_prompt,
            image: track.image,
        }
    }

    // Only consulted when the caller asked not to search again.
    fn supplied_summary(&self, request: &GenerationRequest) -> Option<ProductsSummary> {
        if request.retake_search {
            return None;
        }
        request.detected_products.as_deref()
            .filter(|text| !text.trim().is_empty())
            .map(ProductsSummary::from_text)
    }

    async fn product_search(&self, topic: &str, sink: &dyn ProgressSink) -> (SearchStage, ProductsSummary) {
        sink.status(STATUS_KEYWORD);
        let keyword = self.ai.extract_keyword(topic).await;
        sink.publish(SlotUpdate::Keyword(keyword.value().clone()));

        sink.status(&format!("搜尋誠品商品：{}...", keyword.value()));
        let result = self.search.search_products(keyword.value()).await;
        let summary = summarize_products(result.value());
        sink.publish(SlotUpdate::Search { result: result.value().capped(), summary: summary.clone() });
        sink.status(&format!("找到 {} 項商品，準備撰寫貼文...", result.value().len()));

        (SearchStage::Products { keyword, result }, summary)
    }

    async fn snapshot_search(&self, topic: &str, sink: &dyn ProgressSink) -> SearchStage {
        let keyword = self.ai.extract_keyword(topic).await;
        sink.publish(SlotUpdate::Keyword(keyword.value().clone()));
        let screenshot = self.search.capture_search_page_image(keyword.value()).await;
        if !screenshot.value().is_empty() {
            sink.publish(SlotUpdate::Screenshot(screenshot.value().clone()));
        }
        SearchStage::Snapshot { keyword, screenshot }
    }

    async fn content_track(&self, request: &GenerationRequest, summary: &ProductsSummary, sink: &dyn ProgressSink) -> ContentTrack {
        if self.mode == WorkflowMode::ProductAware {
            sink.status(STATUS_WRITING);
        }
        let brief = brief_for(request, summary, None);
        let post = self.ai.generate_content(&brief).await;
        sink.publish(SlotUpdate::Post(post.value().clone()));

        // A recovered post only carries the error message, so no image is drawn for it.
        if post.is_recovered() || post.value().content.trim().is_empty() {
            return ContentTrack { post, image_prompt: None, image: ImageStatus::NotAttempted };
        }

        if self.mode == WorkflowMode::ProductAware {
            sink.status(STATUS_IMAGE_PROMPT);
        }
        let image_prompt = self.ai.refine_image_prompt(&post.value().content).await;
        sink.publish(SlotUpdate::ImagePrompt(image_prompt.value().clone()));

        let image = if image_prompt.value().trim().is_empty() {
            info!("No image prompt, skipping image generation");
            ImageStatus::NotAttempted
        } else {
            self.render_image(image_prompt.value(), sink).await
        };

        ContentTrack { post, image_prompt: Some(image_prompt), image }
    }

    async fn render_image(&self, prompt: &str, sink: &dyn ProgressSink) -> ImageStatus {
        if self.mode == WorkflowMode::ProductAware {
            sink.status(STATUS_IMAGE);
        }
        match self.ai.generate_image(prompt).await {
            Ok(image) => {
                sink.publish(SlotUpdate::Image(image.clone()));
                ImageStatus::Generated(image)
            }
            Err(e) => {
                warn!("⚠️ Image generation failed, keeping text: {}", e);
                ImageStatus::Failed(e.to_string())
            }
        }
    }

    /// Rewrites the post only, reusing the given products summary.
    pub async fn regenerate_text_only(&self, request: &GenerationRequest, summary: &ProductsSummary, sink: &dyn ProgressSink) -> Outcome<GeneratedPost> {
        sink.status(STATUS_REWRITING);
        let brief = brief_for(request, summary, request.refinement_instruction.clone());
        let post = self.ai.generate_content(&brief).await;
        sink.publish(SlotUpdate::Post(post.value().clone()));
        sink.status("");
        post
    }

    /// Draws a new image from the prompt exactly as the editor left it.
    pub async fn regenerate_image_only(&self, edited_prompt: &str, sink: &dyn ProgressSink) -> ImageStatus {
        if edited_prompt.trim().is_empty() {
            return ImageStatus::NotAttempted;
        }
        sink.status(STATUS_IMAGE);
        let status = match self.ai.generate_image(edited_prompt).await {
            Ok(image) => {
                sink.publish(SlotUpdate::Image(image.clone()));
                ImageStatus::Generated(image)
            }
            Err(e) => {
                warn!("⚠️ Image regeneration failed: {}", e);
                ImageStatus::Failed(e.to_string())
            }
        };
        match status {
            ImageStatus::Failed(_) => sink.status(STATUS_IMAGE_FAILED),
            _ => sink.status(""),
        }
        status
    }
}

fn brief_for(request: &GenerationRequest, summary: &ProductsSummary, refinement: Option<String>) -> ContentBrief {
    ContentBrief {
        topic: request.topic.clone(),
        platform: request.platform,
        tone: request.tone,
        products_summary: summary.text.clone(),
        refinement: refinement.filter(|r| !r.trim().is_empty()),
    }
}

/// Run-in-progress flag. At most one [`RunGuard`] exists at a time.
#[derive(Debug, Default)]
pub struct RunGate {
    running: Arc<AtomicBool>,
}

impl RunGate {
    pub fn try_begin(&self) -> Option<RunGuard> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RunGuard { running: self.running.clone() })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

/// Clears the flag when dropped, whichever way the run ends. Owns its flag,
/// so it can travel into a spawned task.
#[derive(Debug)]
pub struct RunGuard {
    running: Arc<AtomicBool>,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Platform, Product, Tone, NO_PRODUCTS_FOUND};
    use crate::testing::{Call, RecordingSink, ScriptedModel, ScriptedSearch};
    use pretty_assertions::assert_eq;

    fn orchestrator(model: &Arc<ScriptedModel>, search: &Arc<ScriptedSearch>, mode: WorkflowMode) -> Orchestrator {
        Orchestrator::new(model.clone(), search.clone(), mode)
    }

    fn dior_products() -> SearchResult {
        SearchResult::new(vec![Product::new("Dior 迪奧癮誘超模唇膏", "1350"), Product::new("Dior 粉漾潤唇膏", "1250")])
    }

    #[tokio::test]
    async fn search_results_feed_content_prompt() {
        let model = Arc::new(ScriptedModel::default());
        let search = Arc::new(ScriptedSearch::returning(dior_products()));
        let sink = RecordingSink::default();

        let request = GenerationRequest::new("Dior 唇膏", Platform::Instagram, Tone::Promotional);
        let report = orchestrator(&model, &search, WorkflowMode::ProductAware)
            .run_full(&request, &PriorOutputs::default(), &sink)
            .await;

        let briefs = model.briefs();
        assert_eq!(briefs.len(), 1);
        assert_eq!(
            briefs[0].products_summary,
            "1. Dior 迪奧癮誘超模唇膏 (Price: 1350)\n2. Dior 粉漾潤唇膏 (Price: 1250)"
        );
        assert_eq!(report.products_summary.listed, 2);
        assert_eq!(search.keywords(), vec!["keyword:Dior 唇膏".to_string()]);

        // search strictly precedes content generation
        let calls = model.calls();
        assert_eq!(calls[0], Call::Keyword("Dior 唇膏".into()));
        assert!(matches!(calls[1], Call::Content(_)));
        assert!(matches!(report.image, ImageStatus::Generated(_)));
        assert!(report.notices().is_empty());
    }

    #[tokio::test]
    async fn disabled_search_skips_keyword_and_search() {
        let model = Arc::new(ScriptedModel::default());
        let search = Arc::new(ScriptedSearch::returning(dior_products()));
        let sink = RecordingSink::default();

        let request = GenerationRequest::new("村上春樹", Platform::Threads, Tone::Literary).without_search();
        let report = orchestrator(&model, &search, WorkflowMode::ProductAware)
            .run_full(&request, &PriorOutputs::default(), &sink)
            .await;

        assert_eq!(report.search, SearchStage::Disabled);
        assert!(search.keywords().is_empty());
        assert!(!model.calls().iter().any(|c| matches!(c, Call::Keyword(_))));
        assert_eq!(model.briefs()[0].products_summary, NO_PRODUCTS_FOUND);
        assert!(report.products_summary.is_empty());
    }

    #[tokio::test]
    async fn failed_search_still_generates_content() {
        let model = Arc::new(ScriptedModel::default());
        let search = Arc::new(ScriptedSearch::failing());
        let sink = RecordingSink::default();

        let request = GenerationRequest::new("過年大掃除", Platform::Facebook, Tone::Casual);
        let report = orchestrator(&model, &search, WorkflowMode::ProductAware)
            .run_full(&request, &PriorOutputs::default(), &sink)
            .await;

        assert!(matches!(&report.search, SearchStage::Products { result, .. } if result.is_recovered()));
        assert_eq!(model.briefs()[0].products_summary, NO_PRODUCTS_FOUND);
        assert!(!report.post.is_recovered());
        assert!(!report.post.value().content.is_empty());
        assert_eq!(report.notices().len(), 1);
    }

    #[tokio::test]
    async fn empty_image_prompt_skips_image() {
        let model = Arc::new(ScriptedModel { image_prompt: Some(String::new()), ..Default::default() });
        let search = Arc::new(ScriptedSearch::returning(SearchResult::default()));
        let sink = RecordingSink::default();

        let request = GenerationRequest::new("村上春樹", Platform::Instagram, Tone::Literary);
        let report = orchestrator(&model, &search, WorkflowMode::ProductAware)
            .run_full(&request, &PriorOutputs::default(), &sink)
            .await;

        assert_eq!(report.image, ImageStatus::NotAttempted);
        assert!(!model.calls().iter().any(|c| matches!(c, Call::Image(_))));
        assert!(!report.post.value().content.is_empty());
        assert!(!sink.updates().iter().any(|u| matches!(u, SlotUpdate::Image(_))));
    }

    #[tokio::test]
    async fn image_failure_keeps_text_and_reports_status() {
        let model = Arc::new(ScriptedModel { fail_image: true, ..Default::default() });
        let search = Arc::new(ScriptedSearch::returning(dior_products()));
        let sink = RecordingSink::default();

        let request = GenerationRequest::new("Dior 唇膏", Platform::Instagram, Tone::Promotional);
        let report = orchestrator(&model, &search, WorkflowMode::ProductAware)
            .run_full(&request, &PriorOutputs::default(), &sink)
            .await;

        assert!(matches!(report.image, ImageStatus::Failed(_)));
        assert!(!report.post.is_recovered());
        assert_eq!(sink.last_status().as_deref(), Some(STATUS_IMAGE_FAILED));
        assert!(report.notices().iter().any(|n| n.starts_with("image generation failed")));
    }

    #[tokio::test]
    async fn content_failure_installs_error_post_without_image() {
        let model = Arc::new(ScriptedModel { fail_content: true, ..Default::default() });
        let search = Arc::new(ScriptedSearch::returning(dior_products()));
        let sink = RecordingSink::default();

        let request = GenerationRequest::new("Dior 唇膏", Platform::Instagram, Tone::Promotional);
        let report = orchestrator(&model, &search, WorkflowMode::ProductAware)
            .run_full(&request, &PriorOutputs::default(), &sink)
            .await;

        assert!(report.post.is_recovered());
        assert_eq!(report.post.value().content, crate::gemini::CONTENT_ERROR_MESSAGE);
        assert!(report.post.value().hashtags.is_empty());
        assert_eq!(report.image, ImageStatus::NotAttempted);
        assert_eq!(report.image_prompt, None);
    }

    #[tokio::test]
    async fn retained_search_is_reused_without_searching() {
        let model = Arc::new(ScriptedModel::default());
        let search = Arc::new(ScriptedSearch::returning(SearchResult::default()));
        let sink = RecordingSink::default();

        let mut request = GenerationRequest::new("Dior 唇膏", Platform::Instagram, Tone::Promotional);
        request.retake_search = false;
        let prior = PriorOutputs { search: Some(dior_products()), screenshot: None };
        let report = orchestrator(&model, &search, WorkflowMode::ProductAware)
            .run_full(&request, &prior, &sink)
            .await;

        assert_eq!(report.search, SearchStage::Reused);
        assert!(search.keywords().is_empty());
        assert_eq!(model.briefs()[0].products_summary.lines().count(), 2);
        assert_eq!(sink.updates()[0], SlotUpdate::Reset { keep_search: true });
    }

    #[tokio::test]
    async fn supplied_products_stand_in_for_search() {
        let model = Arc::new(ScriptedModel::default());
        let search = Arc::new(ScriptedSearch::returning(dior_products()));
        let sink = RecordingSink::default();

        let mut request = GenerationRequest::new("Dior 唇膏", Platform::Instagram, Tone::Promotional);
        request.retake_search = false;
        request.detected_products = Some("1. Dior 粉漾潤唇膏 (Price: 1250)".into());
        let report = orchestrator(&model, &search, WorkflowMode::ProductAware)
            .run_full(&request, &PriorOutputs::default(), &sink)
            .await;

        assert_eq!(report.search, SearchStage::Reused);
        assert_eq!(report.products_summary.listed, 1);
        assert!(search.keywords().is_empty());
        assert_eq!(model.briefs()[0].products_summary, "1. Dior 粉漾潤唇膏 (Price: 1250)");
        assert!(sink.updates().contains(&SlotUpdate::Summary(report.products_summary.clone())));
    }

    #[tokio::test]
    async fn supplied_products_ignored_when_retaking_search() {
        let model = Arc::new(ScriptedModel::default());
        let search = Arc::new(ScriptedSearch::returning(dior_products()));
        let sink = RecordingSink::default();

        let mut request = GenerationRequest::new("Dior 唇膏", Platform::Instagram, Tone::Promotional);
        request.detected_products = Some("1. Something else (Price: 1)".into());
        let report = orchestrator(&model, &search, WorkflowMode::ProductAware)
            .run_full(&request, &PriorOutputs::default(), &sink)
            .await;

        assert_eq!(search.keywords().len(), 1);
        assert_eq!(report.products_summary.listed, 2);
    }

    #[tokio::test]
    async fn retake_search_ignores_retained_result() {
        let model = Arc::new(ScriptedModel::default());
        let search = Arc::new(ScriptedSearch::returning(SearchResult::default()));
        let sink = RecordingSink::default();

        let request = GenerationRequest::new("Dior 唇膏", Platform::Instagram, Tone::Promotional);
        let prior = PriorOutputs { search: Some(dior_products()), screenshot: None };
        orchestrator(&model, &search, WorkflowMode::ProductAware)
            .run_full(&request, &prior, &sink)
            .await;

        assert_eq!(search.keywords().len(), 1);
        assert_eq!(sink.updates()[0], SlotUpdate::Reset { keep_search: false });
    }

    #[tokio::test]
    async fn parallel_mode_runs_both_tracks() {
        let model = Arc::new(ScriptedModel::default());
        let search = Arc::new(ScriptedSearch::returning(dior_products()));
        let sink = RecordingSink::default();

        let request = GenerationRequest::new("村上春樹", Platform::Threads, Tone::Literary);
        let report = orchestrator(&model, &search, WorkflowMode::ParallelSnapshot)
            .run_full(&request, &PriorOutputs::default(), &sink)
            .await;

        assert!(matches!(&report.search, SearchStage::Snapshot { screenshot, .. } if !screenshot.value().is_empty()));
        assert_eq!(search.keywords(), vec!["snapshot:村上春樹".to_string()]);
        assert_eq!(model.briefs()[0].products_summary, NO_PRODUCTS_FOUND);
        assert!(matches!(report.image, ImageStatus::Generated(_)));
        let updates = sink.updates();
        assert!(updates.iter().any(|u| matches!(u, SlotUpdate::Screenshot(_))));
        assert!(updates.iter().any(|u| matches!(u, SlotUpdate::Post(_))));
    }

    #[tokio::test]
    async fn parallel_mode_survives_capture_failure() {
        let model = Arc::new(ScriptedModel::default());
        let search = Arc::new(ScriptedSearch::failing());
        let sink = RecordingSink::default();

        let request = GenerationRequest::new("村上春樹", Platform::Threads, Tone::Literary);
        let report = orchestrator(&model, &search, WorkflowMode::ParallelSnapshot)
            .run_full(&request, &PriorOutputs::default(), &sink)
            .await;

        assert!(matches!(&report.search, SearchStage::Snapshot { screenshot, .. } if screenshot.is_recovered()));
        assert!(!report.post.is_recovered());
        assert!(!sink.updates().iter().any(|u| matches!(u, SlotUpdate::Screenshot(_))));
        assert_eq!(sink.last_status().as_deref(), Some(""));
    }

    #[tokio::test]
    async fn regenerate_text_only_touches_only_the_post() {
        let model = Arc::new(ScriptedModel::default());
        let search = Arc::new(ScriptedSearch::returning(dior_products()));
        let sink = RecordingSink::default();

        let mut request = GenerationRequest::new("Dior 唇膏", Platform::Instagram, Tone::Promotional);
        request.refinement_instruction = Some("語氣再活潑一點".into());
        let summary = ProductsSummary::from_text("1. Dior 粉漾潤唇膏 (Price: 1250)");
        let post = orchestrator(&model, &search, WorkflowMode::ProductAware)
            .regenerate_text_only(&request, &summary, &sink)
            .await;

        assert!(!post.is_recovered());
        assert!(search.keywords().is_empty());
        let brief = &model.briefs()[0];
        assert_eq!(brief.products_summary, "1. Dior 粉漾潤唇膏 (Price: 1250)");
        assert_eq!(brief.refinement.as_deref(), Some("語氣再活潑一點"));
        assert!(sink.updates().iter().all(|u| matches!(u, SlotUpdate::Post(_))));
        assert!(!model.calls().iter().any(|c| matches!(c, Call::Image(_) | Call::Refine(_))));
    }

    #[tokio::test]
    async fn regenerate_image_uses_edited_prompt_verbatim() {
        let model = Arc::new(ScriptedModel::default());
        let search = Arc::new(ScriptedSearch::returning(SearchResult::default()));
        let sink = RecordingSink::default();

        let edited = "A red lipstick on a stack of novels, morning light";
        let status = orchestrator(&model, &search, WorkflowMode::ProductAware)
            .regenerate_image_only(edited, &sink)
            .await;

        assert!(matches!(status, ImageStatus::Generated(_)));
        assert_eq!(model.calls(), vec![Call::Image(edited.to_string())]);
        assert!(sink.updates().iter().all(|u| matches!(u, SlotUpdate::Image(_))));
    }

    #[tokio::test]
    async fn regenerate_image_with_blank_prompt_does_nothing() {
        let model = Arc::new(ScriptedModel::default());
        let search = Arc::new(ScriptedSearch::returning(SearchResult::default()));
        let status = orchestrator(&model, &search, WorkflowMode::ProductAware)
            .regenerate_image_only("   ", &RecordingSink::default())
            .await;
        assert_eq!(status, ImageStatus::NotAttempted);
        assert!(model.calls().is_empty());
    }

    #[test]
    fn gate_admits_one_run_at_a_time() {
        let gate = RunGate::default();
        let guard = gate.try_begin().expect("first run");
        assert!(gate.is_running());
        assert!(gate.try_begin().is_none());
        drop(guard);
        assert!(!gate.is_running());
        assert!(gate.try_begin().is_some());
    }

    #[test]
    fn parses_workflow_modes() {
        assert_eq!("product-aware".parse::<WorkflowMode>(), Ok(WorkflowMode::ProductAware));
        assert_eq!("PARALLEL".parse::<WorkflowMode>(), Ok(WorkflowMode::ParallelSnapshot));
        assert!("other".parse::<WorkflowMode>().is_err());
    }
}
