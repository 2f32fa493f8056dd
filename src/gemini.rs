use crate::config::GeminiConfig;
use crate::models::{GeneratedPost, Outcome, Platform, Tone, NO_PRODUCTS_FOUND};
use async_trait::async_trait;
use serde_json::{json, Value};
use thiserror::Error;
use serde::Deserialize;
use base64::Engine;
use reqwest::Client;
use tracing::{info, warn, error};

pub const DEMO_KEY: &str = "DEMO_KEY";
/// Shown in place of the post when content generation fails.
pub const CONTENT_ERROR_MESSAGE: &str = "貼文產生發生錯誤，請稍後再試。";
/// Only this many leading characters of a post feed the image prompt.
const IMAGE_PROMPT_SOURCE_CHARS: usize = 1000;

const SYSTEM_INSTRUCTION: &str = "You are a senior social media editor for Eslite Bookstore (誠品線上).
Your audience loves reading, lifestyle, design, and art.
Use Traditional Chinese (Taiwan).

CRITICAL RULES:
1. LENGTH LIMIT: The post content MUST be between 200 and 300 characters. Be concise and impactful.
2. FORMATTING: Use actual newlines for line breaks. Do NOT use the string \"\\n\". Paragraphs should be clearly separated.
3. NO MARKDOWN: Do not use bold (**text**) or italics inside the content body, except for hashtags.";

#[derive(Debug, Error)]
pub enum GeminiError {
    #[error("HTTP error: {0}")] Http(String),
    #[error("parse error: {0}")] Parse(String),
    #[error("image generation failed: {0}")] ImageGenerationFailed(String),
    #[error("Other: {0}")] Other(String),
}

/// Everything the content step needs for one post.
#[derive(Debug, Clone, PartialEq)]
pub struct ContentBrief {
    pub topic: String,
    pub platform: Platform,
    pub tone: Tone,
    pub products_summary: String,
    pub refinement: Option<String>,
}

/// The generative model operations the orchestrator drives.
///
/// Every method except [`ContentModel::generate_image`] recovers from failure
/// with a documented fallback instead of returning an error.
#[async_trait]
pub trait ContentModel: Send + Sync {
    /// Best single catalogue search term for the topic; falls back to the topic.
    async fn extract_keyword(&self, topic: &str) -> Outcome<String>;

    /// Post text, hashtags and an image suggestion; falls back to an error post.
    async fn generate_content(&self, brief: &ContentBrief) -> Outcome<GeneratedPost>;

    /// English photographic description of the post; falls back to "".
    async fn refine_image_prompt(&self, post_content: &str) -> Outcome<String>;

    /// Square image for the prompt, returned as a data URI.
    async fn generate_image(&self, prompt: &str) -> Result<String, GeminiError>;
}

// Helper function to truncate base64 data in JSON for cleaner logging
fn truncate_base64_in_json(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for (key, val) in map.iter_mut() {
                if key == "data" {
                    if let Value::String(s) = val {
                        if s.len() > 100 && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '/' || c == '=') {
                            *val = Value::String(format!("{}...[truncated {} chars]", &s[..50], s.len() - 50));
                        }
                    }
                } else {
                    truncate_base64_in_json(val);
                }
            }
        }
        Value::Array(arr) => {
            for val in arr.iter_mut() {
                truncate_base64_in_json(val);
            }
        }
        _ => {}
    }
}

/// First `max` characters of `text`, safe for multi-byte input.
pub fn preview(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...[{} chars total]", &text[..idx], text.chars().count()),
        None => text.to_string(),
    }
}

pub struct GeminiClient {
    client: Client,
    api_key: String,
    base_url: String,
    text_model: String,
    image_model: String,
}

impl GeminiClient {
    pub fn new(config: &GeminiConfig) -> Self {
        Self {
            client: Client::new(),
            api_key: config.api_key.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            text_model: config.text_model.clone(),
            image_model: config.image_model.clone(),
        }
    }

    fn is_demo(&self) -> bool { self.api_key == DEMO_KEY }

    async fn perform_api_call(&self, model: &str, request_body: &Value) -> Result<GeminiResponse, GeminiError> {
        let url = format!("{}/models/{}:generateContent", self.base_url, model);
        info!("🔗 Making request to: {}", url);

        let response = self.client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(request_body)
            .send()
            .await
            .map_err(|e| GeminiError::Http(e.to_string()))?;

        let status = response.status();
        info!("📥 Response status: {}", status);

        let response_text = response.text().await
            .map_err(|e| GeminiError::Http(e.to_string()))?;

        if !status.is_success() {
            error!("❌ API Error response: {}", response_text);
            return Err(GeminiError::Http(format!("status={} body={}", status, response_text)));
        }

        // Truncate base64 image data for cleaner logging
        let logged = match serde_json::from_str::<Value>(&response_text) {
            Ok(mut json_value) => {
                truncate_base64_in_json(&mut json_value);
                json_value.to_string()
            }
            Err(_) => preview(&response_text, 1000),
        };
        info!("📥 Raw Gemini API response: {}", preview(&logged, 2000));

        serde_json::from_str(&response_text)
            .map_err(|e| GeminiError::Parse(e.to_string()))
    }

    /// Plain text of the first candidate.
    pub async fn generate_text(&self, prompt: &str) -> Result<String, GeminiError> {
        let payload = json!({
            "contents": [{ "parts": [{"text": prompt}] }],
            "generationConfig": {
                "temperature": 0.7,
                "topK": 40,
                "topP": 0.95
            }
        });
        let parsed = self.perform_api_call(&self.text_model, &payload).await?;
        extract_first_text(&parsed).ok_or_else(|| GeminiError::Other("No text content found in response".to_string()))
    }

    async fn request_post(&self, brief: &ContentBrief) -> Result<GeneratedPost, GeminiError> {
        let payload = json!({
            "systemInstruction": { "parts": [{"text": SYSTEM_INSTRUCTION}] },
            "contents": [{ "parts": [{"text": build_content_prompt(brief)}] }],
            "generationConfig": {
                "temperature": 0.9,
                "responseMimeType": "application/json",
                "responseSchema": {
                    "type": "OBJECT",
                    "properties": {
                        "content": { "type": "STRING", "description": "Post content, max 300 chars." },
                        "hashtags": { "type": "ARRAY", "items": { "type": "STRING" } },
                        "suggestedImagePrompt": { "type": "STRING" }
                    }
                }
            }
        });
        let parsed = self.perform_api_call(&self.text_model, &payload).await?;
        let raw = extract_first_text(&parsed)
            .ok_or_else(|| GeminiError::Other("No text content found in response".to_string()))?;
        parse_post(&raw)
    }

    fn demo_post(brief: &ContentBrief) -> GeneratedPost {
        let products = if brief.products_summary.trim().is_empty() || brief.products_summary == NO_PRODUCTS_FOUND {
            String::new()
        } else {
            format!("\n\n今天想推薦：\n{}", brief.products_summary)
        };
        GeneratedPost {
            content: format!(
                "Demo post for {} ({}).\n\n以「{}」為題，為喜歡閱讀與生活的你寫下一段小小的分享。{}",
                brief.platform.as_str(), brief.tone.label(), brief.topic, products
            ),
            hashtags: vec!["#誠品".to_string(), "#閱讀生活".to_string()],
            suggested_image_prompt: Some(format!("A calm bookstore corner inspired by {}", brief.topic)),
        }
    }

    fn generate_placeholder_image(&self, prompt: &str) -> String {
        let palette = ["#354E41", "#B4A792", "#8C7B6B", "#5F7A6B"];
        let color = palette[prompt.len() % palette.len()];
        let svg = format!(r#"<svg width="512" height="512" xmlns="http://www.w3.org/2000/svg">
            <defs>
                <linearGradient id="grad" x1="0%" y1="0%" x2="100%" y2="100%">
                    <stop offset="0%" style="stop-color:{};stop-opacity:1" />
                    <stop offset="100%" style="stop-color:{};stop-opacity:0.6" />
                </linearGradient>
            </defs>
            <rect width="512" height="512" fill="url(#grad)" />
            <text x="256" y="256" font-family="Georgia, serif" font-size="28"
                  text-anchor="middle" fill="white">Image preview</text>
        </svg>"#, color, color);

        format!("data:image/svg+xml;base64,{}", base64::engine::general_purpose::STANDARD.encode(svg.as_bytes()))
    }
}

#[async_trait]
impl ContentModel for GeminiClient {
    async fn extract_keyword(&self, topic: &str) -> Outcome<String> {
        if self.is_demo() {
            return Outcome::Fresh(topic.trim().to_string());
        }
        let prompt = format!(
            "User Input: \"{topic}\"\n\
             Task: Identify the single best product search keyword for an online bookstore (Eslite).\n\
             Output: ONLY the keyword in Traditional Chinese."
        );
        match self.generate_text(&prompt).await {
            Ok(keyword) if !keyword.trim().is_empty() => {
                info!("🔎 Search keyword for '{}': {}", preview(topic, 40), keyword);
                Outcome::Fresh(keyword.trim().to_string())
            }
            Ok(_) => Outcome::recovered(topic.to_string(), "model returned an empty keyword"),
            Err(e) => {
                warn!("⚠️ Keyword extraction failed, using topic as keyword: {}", e);
                Outcome::recovered(topic.to_string(), e.to_string())
            }
        }
    }

    async fn generate_content(&self, brief: &ContentBrief) -> Outcome<GeneratedPost> {
        if self.is_demo() {
            info!("Using demo mode - generating demo post");
            return Outcome::Fresh(Self::demo_post(brief));
        }
        info!("✍️ Generating {} post for topic: {}", brief.platform.as_str(), preview(&brief.topic, 60));
        match self.request_post(brief).await {
            Ok(post) => {
                info!("✅ Post generated ({} chars, {} hashtags)", post.content.chars().count(), post.hashtags.len());
                Outcome::Fresh(post)
            }
            Err(e) => {
                error!("❌ Error generating post: {}", e);
                Outcome::recovered(error_post(), e.to_string())
            }
        }
    }

    async fn refine_image_prompt(&self, post_content: &str) -> Outcome<String> {
        if self.is_demo() {
            return Outcome::Fresh(format!(
                "Soft natural light over an open book and a cup of tea, evoking: {}",
                post_content.chars().take(60).collect::<String>()
            ));
        }
        match self.generate_text(&build_image_prompt_request(post_content)).await {
            Ok(prompt) => {
                info!("🎨 Image prompt: {}", preview(&prompt, 120));
                Outcome::Fresh(prompt.trim().to_string())
            }
            Err(e) => {
                warn!("⚠️ Image prompt refinement failed: {}", e);
                Outcome::recovered(String::new(), e.to_string())
            }
        }
    }

    async fn generate_image(&self, prompt: &str) -> Result<String, GeminiError> {
        if self.is_demo() {
            info!("Using demo mode - no real images generated");
            return Ok(self.generate_placeholder_image(prompt));
        }

        info!("Generating image with Gemini API...");
        let request_body = json!({
            "contents": [{ "parts": [{"text": enhance_image_prompt(prompt)}] }],
            "generationConfig": {
                "responseModalities": ["IMAGE"],
                "imageConfig": { "aspectRatio": "1:1" }
            }
        });

        let parsed = self.perform_api_call(&self.image_model, &request_body)
            .await
            .map_err(|e| GeminiError::ImageGenerationFailed(e.to_string()))?;

        match extract_first_image(&parsed) {
            Some(data_uri) => {
                info!("✅ Successfully generated image: {}", preview(&data_uri, 50));
                Ok(data_uri)
            }
            None => {
                error!("❌ No image data found in response");
                Err(GeminiError::ImageGenerationFailed("no image data in response".into()))
            }
        }
    }
}

pub fn error_post() -> GeneratedPost {
    GeneratedPost { content: CONTENT_ERROR_MESSAGE.to_string(), hashtags: Vec::new(), suggested_image_prompt: None }
}

pub fn build_content_prompt(brief: &ContentBrief) -> String {
    let mut prompt = format!(
        "Context: User wants a post about \"{}\".\n\
         Platform: {}.\n\n\
         We searched Eslite's website. The following products were found:\n\
         \"{}\"\n\n\
         Tone: {}.\n",
        brief.topic, brief.platform.as_str(), brief.products_summary, brief.tone.label()
    );

    if let Some(instruction) = brief.refinement.as_deref().filter(|s| !s.trim().is_empty()) {
        prompt.push_str(&format!(
            "\nIMPORTANT REFINEMENT INSTRUCTION: The user wants to adjust the previous draft.\n\
             Please follow this specific instruction: \"{}\".\n\
             Keep the same topic and tone.\n",
            instruction.trim()
        ));
    }

    prompt.push_str(
        "\nTask: Write a short, engaging social media post.\n\
         Because the listed products were found, SPECIFICALLY MENTION 1 to 3 of them to recommend to the reader.\n\
         Make the connection between the topic and these specific products.\n\
         If no specific products were found, stick to the general lifestyle topic.\n",
    );
    prompt
}

pub fn build_image_prompt_request(post_content: &str) -> String {
    let source: String = post_content.chars().take(IMAGE_PROMPT_SOURCE_CHARS).collect();
    format!(
        "Task: Create a PHOTOREALISTIC image prompt based on the following text.\n\
         Text: \"{source}\"\n\n\
         Style Keywords: Professional photography, Kinfolk magazine style, 4k, soft natural lighting, depth of field, Canon 5D, lifestyle, elegant.\n\
         Negative Constraints: NO cartoons, NO illustrations, NO drawing, NO text.\n\n\
         Output: English prompt.\n\
         Describe the scene visually in detail using English. Keep it under 50 words."
    )
}

pub fn enhance_image_prompt(prompt: &str) -> String {
    format!(
        "High-end lifestyle photography, photorealistic, cinematic lighting, 8k resolution.\n\
         Style: Minimalist, warm, elegant, similar to Eslite Bookstore commercial photography.\n\
         Subject: {}\n\
         Technique: Shot on 35mm lens, f/1.8, soft bokeh.\n\
         Constraints: ABSOLUTELY NO TEXT, NO WATERMARKS, NO CARTOONS, NO ILLUSTRATIONS.",
        prompt.trim()
    )
}

/// Turns literal `\n` escapes into line breaks and drops emphasis markers,
/// leaving hashtag words untouched.
pub fn normalize_content(raw: &str) -> String {
    let text = raw.replace("\\r\\n", "\n").replace("\\n", "\n").replace("\r\n", "\n");
    text.split('\n')
        .map(strip_emphasis)
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

fn strip_emphasis(line: &str) -> String {
    line.split(' ')
        .map(|word| {
            if word.starts_with('#') || word.starts_with('＃') {
                word.to_string()
            } else {
                strip_underscore_pairs(&word.replace("**", "").replace("__", "").replace("~~", "").replace('*', ""))
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

// `_x_` italics. Underscores are dropped two at a time; an unpaired one stays.
fn strip_underscore_pairs(word: &str) -> String {
    let markers = word.matches('_').count();
    if markers < 2 {
        return word.to_string();
    }
    let mut keep = markers % 2;
    let mut seen = 0;
    word.chars()
        .filter(|&c| {
            if c != '_' {
                return true;
            }
            seen += 1;
            if seen > markers - keep {
                keep -= 1;
                return true;
            }
            false
        })
        .collect()
}

#[derive(Debug, Deserialize)]
struct PostPayload {
    #[serde(default)]
    content: String,
    #[serde(default)]
    hashtags: Vec<String>,
    #[serde(default, rename = "suggestedImagePrompt")]
    suggested_image_prompt: Option<String>,
}

/// Parses the JSON post returned by the model.
pub fn parse_post(raw: &str) -> Result<GeneratedPost, GeminiError> {
    let body = raw.trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();
    let payload: PostPayload = serde_json::from_str(body)
        .map_err(|e| GeminiError::Parse(format!("{}: {}", e, preview(raw, 200))))?;

    let content = normalize_content(&payload.content);
    if content.is_empty() {
        return Err(GeminiError::Other("model returned empty content".into()));
    }
    Ok(GeneratedPost {
        content,
        hashtags: payload.hashtags,
        suggested_image_prompt: payload.suggested_image_prompt.filter(|p| !p.trim().is_empty()),
    })
}

// --- Response Parsing Helpers ---

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate { #[serde(default)] content: Content }

#[derive(Debug, Deserialize, Default)]
struct Content { #[serde(default)] parts: Vec<Part> }

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Part {
    Inline {
        #[serde(rename = "inlineData")]
        inline_data: InlineData
    },
    Text { text: String },
    #[allow(dead_code)]
    Other(Value)
}

#[derive(Debug, Deserialize)]
struct InlineData {
    data: String,
    #[serde(rename = "mimeType", default = "default_mime")]
    mime_type: String,
}

fn default_mime() -> String { "image/png".to_string() }

fn extract_first_text(resp: &GeminiResponse) -> Option<String> {
    resp.candidates.first()?.content.parts.iter().find_map(|p| match p {
        Part::Text { text } => Some(text.trim().to_string()),
        _ => None,
    })
}

fn extract_first_image(resp: &GeminiResponse) -> Option<String> {
    for c in &resp.candidates {
        for p in &c.content.parts {
            if let Part::Inline { inline_data } = p {
                if inline_data.data.is_empty() {
                    continue;
                }
                info!("🎯 Found image data with mime type: {}", inline_data.mime_type);
                return Some(format!("data:{};base64,{}", inline_data.mime_type, inline_data.data));
            }
        }
    }
    None
}
