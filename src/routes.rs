use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{cors::{Any, CorsLayer}, trace::TraceLayer};

use crate::{
    drafts::DraftStore,
    error::ApiError,
    models::{DraftInput, GenerationRequest, ImageStatus, Platform, Product, ProductsSummary, SavedPost, Tone},
    orchestrator::Orchestrator,
    search::EsliteSearchClient,
    session::{EditorSession, PostEdits, SharedSession},
};

#[derive(Clone)]
pub struct AppState {
    pub session: Arc<SharedSession>,
    pub orchestrator: Arc<Orchestrator>,
    pub drafts: Arc<DraftStore>,
    pub catalogue: Arc<EsliteSearchClient>,
}

impl AppState {
    pub fn new(orchestrator: Arc<Orchestrator>, drafts: Arc<DraftStore>, catalogue: Arc<EsliteSearchClient>) -> Self {
        Self { session: Arc::default(), orchestrator, drafts, catalogue }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/search", get(search_proxy))
        .route("/api/generate", post(generate))
        .route("/api/regenerate/text", post(regenerate_text))
        .route("/api/regenerate/image", post(regenerate_image))
        .route("/api/session", get(get_session))
        .route("/api/session/post", put(edit_post))
        .route("/api/drafts", get(list_drafts).post(save_draft))
        .route("/api/drafts/:id", get(get_draft).delete(delete_draft))
        .route("/api/drafts/:id/load", post(load_draft))
        .route("/api/options", get(options))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(
                    CorsLayer::new()
                        .allow_origin(Any)
                        .allow_methods(Any)
                        .allow_headers(Any)
                ),
        )
        .with_state(state)
}

#[derive(Debug, Serialize)]
pub struct RunResponse {
    pub session: EditorSession,
    pub notices: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub q: Option<String>,
}

/// Pass-through to the catalogue search API for browser clients.
pub async fn search_proxy(State(state): State<AppState>, Query(params): Query<SearchQuery>) -> Result<Json<Value>, ApiError> {
    let q = params.q.filter(|q| !q.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest("Missing query parameter 'q'".into()))?;
    Ok(Json(state.catalogue.fetch_raw(&q).await?))
}

pub async fn generate(State(state): State<AppState>, Json(body): Json<GenerationRequest>) -> Result<Json<RunResponse>, ApiError> {
    if body.topic.trim().is_empty() {
        return Err(ApiError::BadRequest("topic must not be empty".into()));
    }
    let guard = state.session.try_begin().ok_or(ApiError::RunInProgress)?;

    tracing::info!("🚀 Generating {} post for topic: {}", body.platform.as_str(), body.topic);
    let prior = state.session.update(|s| {
        s.request = Some(body.clone());
        s.platform = body.platform;
        s.tone = body.tone;
        s.prior_outputs()
    });
    // the run lives in its own task so a dropped request cannot cut it short
    let (session, orchestrator) = (state.session.clone(), state.orchestrator.clone());
    let report = tokio::spawn(async move {
        let _guard = guard;
        orchestrator.run_full(&body, &prior, session.as_ref()).await
    })
    .await?;

    Ok(Json(RunResponse { notices: report.notices(), session: state.session.snapshot() }))
}

#[derive(Debug, Deserialize, Default)]
pub struct RegenerateTextRequest {
    #[serde(default)]
    pub refinement_instruction: Option<String>,
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default)]
    pub platform: Option<Platform>,
    #[serde(default)]
    pub tone: Option<Tone>,
    #[serde(default)]
    pub detected_products: Option<String>,
}

pub async fn regenerate_text(State(state): State<AppState>, body: Option<Json<RegenerateTextRequest>>) -> Result<Json<RunResponse>, ApiError> {
    let body = body.map(|Json(b)| b).unwrap_or_default();
    let guard = state.session.try_begin().ok_or(ApiError::RunInProgress)?;

    let current = state.session.snapshot();
    if !current.has_content() {
        return Err(ApiError::BadRequest("there is no post to regenerate".into()));
    }
    let topic = body.topic.clone()
        .or_else(|| current.request.as_ref().map(|r| r.topic.clone()))
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest("topic must not be empty".into()))?;

    let mut request = current.request.clone().unwrap_or_else(|| GenerationRequest::new(topic.clone(), current.platform, current.tone));
    request.topic = topic;
    request.platform = body.platform.unwrap_or(current.platform);
    request.tone = body.tone.unwrap_or(current.tone);
    request.refinement_instruction = body.refinement_instruction;
    let summary = match body.detected_products.as_deref() {
        Some(text) => ProductsSummary::from_text(text),
        None => current.products_summary.clone(),
    };

    state.session.update(|s| {
        s.platform = request.platform;
        s.tone = request.tone;
    });
    let (session, orchestrator) = (state.session.clone(), state.orchestrator.clone());
    let post = tokio::spawn(async move {
        let _guard = guard;
        orchestrator.regenerate_text_only(&request, &summary, session.as_ref()).await
    })
    .await?;

    let notices = post.reason().map(|r| vec![format!("content generation recovered: {r}")]).unwrap_or_default();
    Ok(Json(RunResponse { notices, session: state.session.snapshot() }))
}

#[derive(Debug, Deserialize, Default)]
pub struct RegenerateImageRequest {
    #[serde(default)]
    pub image_prompt: Option<String>,
}

pub async fn regenerate_image(State(state): State<AppState>, body: Option<Json<RegenerateImageRequest>>) -> Result<Json<RunResponse>, ApiError> {
    let body = body.map(|Json(b)| b).unwrap_or_default();
    let guard = state.session.try_begin().ok_or(ApiError::RunInProgress)?;

    if let Some(prompt) = body.image_prompt {
        state.session.update(|s| s.apply_edits(PostEdits { suggested_image_prompt: Some(prompt), ..Default::default() }));
    }
    let prompt = state.session.snapshot().image_prompt();
    if prompt.trim().is_empty() {
        return Err(ApiError::BadRequest("image prompt must not be empty".into()));
    }

    let (session, orchestrator) = (state.session.clone(), state.orchestrator.clone());
    let status = tokio::spawn(async move {
        let _guard = guard;
        orchestrator.regenerate_image_only(&prompt, session.as_ref()).await
    })
    .await?;

    let notices = match status {
        ImageStatus::Failed(reason) => vec![format!("image generation failed: {reason}")],
        _ => Vec::new(),
    };
    Ok(Json(RunResponse { notices, session: state.session.snapshot() }))
}

pub async fn get_session(State(state): State<AppState>) -> Json<EditorSession> {
    Json(state.session.snapshot())
}

pub async fn edit_post(State(state): State<AppState>, Json(edits): Json<PostEdits>) -> Result<Json<EditorSession>, ApiError> {
    // outputs belong to the running task until it finishes
    let _guard = state.session.try_begin().ok_or(ApiError::RunInProgress)?;
    state.session.update(|s| s.apply_edits(edits));
    Ok(Json(state.session.snapshot()))
}

pub async fn list_drafts(State(state): State<AppState>) -> Json<Vec<SavedPost>> {
    Json(state.drafts.load_all())
}

#[derive(Debug, Deserialize, Default)]
pub struct SaveDraftRequest {
    #[serde(default)]
    pub product: Option<Product>,
}

pub async fn save_draft(State(state): State<AppState>, body: Option<Json<SaveDraftRequest>>) -> Result<(StatusCode, Json<SavedPost>), ApiError> {
    let body = body.map(|Json(b)| b).unwrap_or_default();
    let current = state.session.snapshot();
    let post = current.post.clone()
        .filter(|p| !p.content.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest("there is no post to save".into()))?;

    let input = DraftInput {
        post,
        platform: current.platform,
        tone: current.tone,
        generated_image_url: current.image,
        product: body.product,
    };
    // the store rewrites its file synchronously
    let drafts = state.drafts.clone();
    let saved = tokio::task::spawn_blocking(move || drafts.save(input)).await??;
    Ok((StatusCode::CREATED, Json(saved)))
}

pub async fn get_draft(Path(id): Path<String>, State(state): State<AppState>) -> Result<Json<SavedPost>, ApiError> {
    state.drafts.load(&id).map(Json).ok_or_else(|| ApiError::NotFound(format!("draft {id}")))
}

pub async fn delete_draft(Path(id): Path<String>, State(state): State<AppState>) -> Result<StatusCode, ApiError> {
    let drafts = state.drafts.clone();
    let target = id.clone();
    if tokio::task::spawn_blocking(move || drafts.delete(&target)).await?? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(format!("draft {id}")))
    }
}

pub async fn load_draft(Path(id): Path<String>, State(state): State<AppState>) -> Result<Json<EditorSession>, ApiError> {
    let _guard = state.session.try_begin().ok_or(ApiError::RunInProgress)?;
    let draft = state.drafts.load(&id).ok_or_else(|| ApiError::NotFound(format!("draft {id}")))?;
    state.session.update(|s| s.load_draft(&draft));
    Ok(Json(state.session.snapshot()))
}

pub async fn options(State(state): State<AppState>) -> Json<Value> {
    let tones: Vec<Value> = Tone::ALL.iter().map(|t| json!({ "id": t, "label": t.label() })).collect();
    Json(json!({
        "platforms": Platform::ALL,
        "tones": tones,
        "workflow_mode": state.orchestrator.mode(),
    }))
}
