//! Runtime configuration read from the environment (and `.env`).

use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{anyhow, Context, Result};

use crate::gemini::DEMO_KEY;
use crate::orchestrator::WorkflowMode;

#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_key: String,
    pub base_url: String,
    pub text_model: String,
    pub image_model: String,
}

impl GeminiConfig {
    /// Configuration that keeps the client in offline demo mode.
    pub fn demo() -> Self {
        Self {
            api_key: DEMO_KEY.to_string(),
            base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            text_model: "gemini-3-flash-preview".to_string(),
            image_model: "gemini-2.5-flash-image".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SearchConfig {
    /// Catalogue search API; answers `{ results: [...] }`.
    pub search_endpoint: String,
    /// Public search page, used as the screenshot target.
    pub page_url: String,
    pub screenshot_endpoint: String,
    pub screenshot_access_key: Option<String>,
    /// Render delay handed to the screenshot service so lazy content settles.
    pub screenshot_delay_secs: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            search_endpoint: "https://holmes.eslite.com/v1/search".to_string(),
            page_url: "https://www.eslite.com/Search".to_string(),
            screenshot_endpoint: "https://api.apiflash.com/v1/urltoimage".to_string(),
            screenshot_access_key: None,
            screenshot_delay_secs: 6,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub gemini: GeminiConfig,
    pub search: SearchConfig,
    pub drafts_dir: PathBuf,
    pub workflow_mode: WorkflowMode,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from any key lookup; empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let port = match get("PORT") {
            Some(v) => v.parse::<u16>().with_context(|| format!("invalid PORT: {v}"))?,
            None => 8080,
        };

        let demo = GeminiConfig::demo();
        let gemini = GeminiConfig {
            api_key: get("GEMINI_API_KEY").unwrap_or(demo.api_key),
            base_url: get("GEMINI_API_BASE").unwrap_or(demo.base_url),
            text_model: get("GEMINI_TEXT_MODEL").unwrap_or(demo.text_model),
            image_model: get("GEMINI_IMAGE_MODEL").unwrap_or(demo.image_model),
        };

        let defaults = SearchConfig::default();
        let screenshot_delay_secs = match get("SCREENSHOT_DELAY_SECS") {
            Some(v) => v.parse::<u64>().with_context(|| format!("invalid SCREENSHOT_DELAY_SECS: {v}"))?,
            None => defaults.screenshot_delay_secs,
        };
        let search = SearchConfig {
            search_endpoint: get("SEARCH_ENDPOINT").unwrap_or(defaults.search_endpoint),
            page_url: get("SEARCH_PAGE_URL").unwrap_or(defaults.page_url),
            screenshot_endpoint: get("SCREENSHOT_ENDPOINT").unwrap_or(defaults.screenshot_endpoint),
            screenshot_access_key: get("SCREENSHOT_ACCESS_KEY"),
            screenshot_delay_secs,
        };

        let workflow_mode = match get("WORKFLOW_MODE") {
            Some(v) => WorkflowMode::from_str(&v).map_err(|e| anyhow!(e))?,
            None => WorkflowMode::default(),
        };

        Ok(Self {
            port,
            gemini,
            search,
            drafts_dir: get("DRAFTS_DIR").map(PathBuf::from).unwrap_or_else(|| PathBuf::from("./data")),
            workflow_mode,
        })
    }
}
