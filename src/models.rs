use serde::{Serialize, Deserialize, Deserializer};
use serde_with::skip_serializing_none;
use chrono::{DateTime, Utc};

/// Products shown to the editor are capped to this many entries.
pub const DISPLAY_LIMIT: usize = 10;
/// Only the leading results are summarised into the content prompt.
pub const SUMMARY_LIMIT: usize = 3;
/// Summary text used whenever no product could be listed.
pub const NO_PRODUCTS_FOUND: &str = "No specific products found";

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
pub enum Platform {
    #[default]
    Instagram,
    Facebook,
    Threads,
}

impl Platform {
    pub const ALL: [Platform; 3] = [Platform::Instagram, Platform::Facebook, Platform::Threads];

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Instagram => "Instagram",
            Platform::Facebook => "Facebook",
            Platform::Threads => "Threads",
        }
    }
}

/// Writing style of a post. Deserialisation also accepts the display labels,
/// which is how drafts saved by the browser tool store the tone.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Tone {
    #[default]
    #[serde(alias = "文青感性 (Literary)")]
    Literary,
    #[serde(alias = "銷售急迫 (Promotional)")]
    Promotional,
    #[serde(alias = "親切日常 (Casual)")]
    Casual,
    #[serde(alias = "專業資訊 (Professional)")]
    Professional,
}

impl Tone {
    pub const ALL: [Tone; 4] = [Tone::Literary, Tone::Promotional, Tone::Casual, Tone::Professional];

    pub fn label(&self) -> &'static str {
        match self {
            Tone::Literary => "文青感性 (Literary)",
            Tone::Promotional => "銷售急迫 (Promotional)",
            Tone::Casual => "親切日常 (Casual)",
            Tone::Professional => "專業資訊 (Professional)",
        }
    }
}

fn default_true() -> bool { true }

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct GenerationRequest {
    pub topic: String,
    #[serde(default)]
    pub platform: Platform,
    #[serde(default)]
    pub tone: Tone,
    #[serde(default = "default_true")]
    pub search_enabled: bool,
    /// When false and a previous search result exists, that result is reused.
    #[serde(default = "default_true")]
    pub retake_search: bool,
    #[serde(default)]
    pub refinement_instruction: Option<String>,
    #[serde(default)]
    pub detected_products: Option<String>,
}

impl GenerationRequest {
    pub fn new(topic: impl Into<String>, platform: Platform, tone: Tone) -> Self {
        Self {
            topic: topic.into(),
            platform,
            tone,
            search_enabled: true,
            retake_search: true,
            refinement_instruction: None,
            detected_products: None,
        }
    }

    #[cfg(test)]
    pub fn without_search(mut self) -> Self {
        self.search_enabled = false;
        self
    }
}

/// One catalogue hit. Accepts both the upstream field names
/// (`final_price`, `product_photo_url`) and the stored camelCase ones.
#[skip_serializing_none]
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub name: String,
    #[serde(default, alias = "final_price", deserialize_with = "price_text")]
    pub price: Option<String>,
    #[serde(default, alias = "product_photo_url")]
    pub photo_url: Option<String>,
}

impl Product {
    #[cfg(test)]
    pub fn new(name: impl Into<String>, price: impl Into<String>) -> Self {
        Self { name: name.into(), price: Some(price.into()), photo_url: None }
    }
}

// Upstream prices arrive as numbers or strings depending on the listing.
fn price_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) => Some(s),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct SearchResult {
    pub products: Vec<Product>,
}

impl SearchResult {
    pub fn new(products: Vec<Product>) -> Self { Self { products } }

    pub fn is_empty(&self) -> bool { self.products.is_empty() }

    pub fn len(&self) -> usize { self.products.len() }

    /// Copy of the result limited to the display prefix.
    pub fn capped(&self) -> SearchResult {
        SearchResult { products: self.products.iter().take(DISPLAY_LIMIT).cloned().collect() }
    }
}

/// Formatted product list handed to the content prompt.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ProductsSummary {
    pub text: String,
    pub listed: usize,
}

impl ProductsSummary {
    pub fn empty() -> Self {
        Self { text: NO_PRODUCTS_FOUND.to_string(), listed: 0 }
    }

    /// Wraps a summary text supplied by the caller (e.g. kept from an earlier run).
    pub fn from_text(text: &str) -> Self {
        let text = text.trim();
        if text.is_empty() || text == NO_PRODUCTS_FOUND {
            return Self::empty();
        }
        let listed = text.lines().filter(|l| !l.trim().is_empty()).count();
        Self { text: text.to_string(), listed }
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool { self.listed == 0 }
}

impl Default for ProductsSummary {
    fn default() -> Self { Self::empty() }
}

#[skip_serializing_none]
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedPost {
    pub content: String,
    #[serde(default)]
    pub hashtags: Vec<String>,
    #[serde(default)]
    pub suggested_image_prompt: Option<String>,
}

/// Persisted draft. Field names and the millisecond timestamp match the
/// blob layout written by the browser tool.
#[skip_serializing_none]
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SavedPost {
    pub id: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub post: GeneratedPost,
    pub platform: Platform,
    pub tone: Tone,
    #[serde(default)]
    pub generated_image_url: Option<String>,
    #[serialize_always]
    #[serde(default)]
    pub product: Option<Product>,
}

/// Everything a save needs apart from the identity the store assigns.
#[derive(Debug, Clone, PartialEq)]
pub struct DraftInput {
    pub post: GeneratedPost,
    pub platform: Platform,
    pub tone: Tone,
    pub generated_image_url: Option<String>,
    pub product: Option<Product>,
}

/// Result of a step that recovers from failure with a fallback value.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T> {
    Fresh(T),
    Recovered { value: T, reason: String },
}

impl<T> Outcome<T> {
    pub fn recovered(value: T, reason: impl Into<String>) -> Self {
        Outcome::Recovered { value, reason: reason.into() }
    }

    pub fn value(&self) -> &T {
        match self {
            Outcome::Fresh(value) | Outcome::Recovered { value, .. } => value,
        }
    }

    #[cfg(test)]
    pub fn into_value(self) -> T {
        match self {
            Outcome::Fresh(value) | Outcome::Recovered { value, .. } => value,
        }
    }

    pub fn is_recovered(&self) -> bool { matches!(self, Outcome::Recovered { .. }) }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Outcome::Recovered { reason, .. } => Some(reason),
            Outcome::Fresh(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ImageStatus {
    NotAttempted,
    Generated(String),
    Failed(String),
}
