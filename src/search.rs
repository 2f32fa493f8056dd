use crate::config::SearchConfig;
use crate::models::{Outcome, Product, ProductsSummary, SearchResult, SUMMARY_LIMIT};
use async_trait::async_trait;
use base64::Engine;
use bytes::Bytes;
use reqwest::{Client, Url};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn, error};

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("HTTP error: {0}")] Http(String),
    #[error("upstream responded with status {0}")] Status(u16),
    #[error("parse error: {0}")] Parse(String),
    #[error("not configured: {0}")] NotConfigured(String),
}

/// Catalogue lookups used by the orchestrator. Neither call fails: errors are
/// logged and reported as a recovered empty value.
#[async_trait]
pub trait ProductSearch: Send + Sync {
    async fn search_products(&self, keyword: &str) -> Outcome<SearchResult>;

    /// Full-page screenshot of the catalogue search page as a data URI.
    async fn capture_search_page_image(&self, keyword: &str) -> Outcome<String>;
}

/// Client for the Eslite catalogue search API and the screenshot service.
pub struct EsliteSearchClient {
    client: Client,
    config: SearchConfig,
}

impl EsliteSearchClient {
    pub fn new(config: SearchConfig) -> Self {
        Self { client: Client::new(), config }
    }

    /// Raw upstream search payload; shared by the HTTP proxy route.
    pub async fn fetch_raw(&self, query: &str) -> Result<Value, SearchError> {
        info!("🔍 Searching catalogue for: \"{}\"", query);
        let response = self.client
            .get(&self.config.search_endpoint)
            .query(&[("q", query), ("page_size", "20"), ("page_no", "1")])
            .send()
            .await
            .map_err(|e| SearchError::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SearchError::Status(status.as_u16()));
        }
        response.json::<Value>().await.map_err(|e| SearchError::Parse(e.to_string()))
    }

    /// Human-facing search page for a keyword.
    pub fn search_page_url(&self, keyword: &str) -> Result<Url, SearchError> {
        Url::parse_with_params(&self.config.page_url, &[("keyword", keyword)])
            .map_err(|e| SearchError::NotConfigured(format!("search page url: {e}")))
    }

    fn screenshot_request_url(&self, keyword: &str) -> Result<Url, SearchError> {
        let access_key = self.config.screenshot_access_key.as_deref()
            .ok_or_else(|| SearchError::NotConfigured("SCREENSHOT_ACCESS_KEY is not set".into()))?;
        let target = self.search_page_url(keyword)?;
        let delay = self.config.screenshot_delay_secs.to_string();
        Url::parse_with_params(&self.config.screenshot_endpoint, &[
            ("access_key", access_key),
            ("url", target.as_str()),
            ("wait_until", "page_loaded"),
            ("delay", delay.as_str()),
            ("fresh", "true"),
            ("full_page", "true"),
            ("format", "jpeg"),
            ("quality", "80"),
        ])
        .map_err(|e| SearchError::NotConfigured(format!("screenshot endpoint: {e}")))
    }

    async fn fetch_screenshot(&self, keyword: &str) -> Result<Bytes, SearchError> {
        let url = self.screenshot_request_url(keyword)?;
        info!(
            "📸 Capturing search page for \"{}\" (render delay {}s)",
            keyword, self.config.screenshot_delay_secs
        );
        let response = self.client
            .get(url)
            .send()
            .await
            .map_err(|e| SearchError::Http(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(SearchError::Status(status.as_u16()));
        }
        response.bytes().await.map_err(|e| SearchError::Http(e.to_string()))
    }
}

#[async_trait]
impl ProductSearch for EsliteSearchClient {
    async fn search_products(&self, keyword: &str) -> Outcome<SearchResult> {
        let result = match self.fetch_raw(keyword).await {
            Ok(payload) => parse_search_payload(payload),
            Err(e) => Err(e),
        };
        match result {
            Ok(found) => {
                info!("✅ Found {} products for \"{}\"", found.len(), keyword);
                Outcome::Fresh(found)
            }
            Err(e) => {
                error!("❌ Search API failed: {}", e);
                Outcome::recovered(SearchResult::default(), e.to_string())
            }
        }
    }

    async fn capture_search_page_image(&self, keyword: &str) -> Outcome<String> {
        match self.fetch_screenshot(keyword).await {
            Ok(bytes) => {
                info!("✅ Captured search page ({} bytes)", bytes.len());
                Outcome::Fresh(encode_data_uri(&bytes))
            }
            Err(e) => {
                warn!("⚠️ Search page capture failed: {}", e);
                Outcome::recovered(String::new(), e.to_string())
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct SearchPayload {
    #[serde(default)]
    results: Vec<Value>,
}

/// Reads the `{ results: [...] }` search shape. Entries without a usable name
/// are skipped rather than failing the whole result.
pub fn parse_search_payload(payload: Value) -> Result<SearchResult, SearchError> {
    let payload: SearchPayload = serde_json::from_value(payload)
        .map_err(|e| SearchError::Parse(e.to_string()))?;
    let products = payload.results
        .into_iter()
        .filter_map(|entry| serde_json::from_value::<Product>(entry).ok())
        .filter(|p| !p.name.trim().is_empty())
        .collect();
    Ok(SearchResult::new(products))
}

/// Numbered `name (Price: price)` lines for the leading products.
pub fn summarize_products(result: &SearchResult) -> ProductsSummary {
    if result.is_empty() {
        return ProductsSummary::empty();
    }
    let lines: Vec<String> = result.products
        .iter()
        .take(SUMMARY_LIMIT)
        .enumerate()
        .map(|(i, p)| format!("{}. {} (Price: {})", i + 1, p.name, p.price.as_deref().unwrap_or("N/A")))
        .collect();
    ProductsSummary { listed: lines.len(), text: lines.join("\n") }
}

pub fn encode_data_uri(bytes: &Bytes) -> String {
    let mime = image::guess_format(bytes)
        .map(|format| format.to_mime_type())
        .unwrap_or("image/jpeg");
    format!("data:{};base64,{}", mime, base64::engine::general_purpose::STANDARD.encode(bytes))
}
