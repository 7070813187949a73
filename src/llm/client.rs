//! Gemini `generateContent` client for flyer extraction.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::extraction::{
    parse_reply, Attachment, ExtractionError, FlyerExtractor, ParsedFlyer, EXTRACTION_PROMPT,
};

/// Configuration for the extraction service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeminiConfig {
    /// API base URL (default: https://generativelanguage.googleapis.com)
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// Model used for flyer pages.
    #[serde(default = "default_model")]
    pub model: String,
    /// API key. Usually supplied through `GEMINI_API_KEY`.
    #[serde(default)]
    pub api_key: Option<String>,
    /// Request timeout in seconds. Vision calls on large pages are slow.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Custom extraction prompt.
    #[serde(default)]
    pub prompt: Option<String>,
}

fn default_endpoint() -> String {
    "https://generativelanguage.googleapis.com".to_string()
}
fn default_model() -> String {
    "gemini-3-flash-preview".to_string()
}
fn default_timeout_secs() -> u64 {
    300
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            model: default_model(),
            api_key: None,
            timeout_secs: default_timeout_secs(),
            prompt: None,
        }
    }
}

impl GeminiConfig {
    pub fn with_endpoint(mut self, endpoint: &str) -> Self {
        self.endpoint = endpoint.to_string();
        self
    }

    /// Get the extraction prompt, using custom or default.
    pub fn get_prompt(&self) -> &str {
        self.prompt.as_deref().unwrap_or(EXTRACTION_PROMPT)
    }

    fn generate_url(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.endpoint.trim_end_matches('/'),
            self.model
        )
    }
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum Part<'a> {
    Text { text: &'a str },
    Inline { inline_data: InlineData<'a> },
}

#[derive(Debug, Serialize)]
struct InlineData<'a> {
    mime_type: &'a str,
    data: String,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    #[serde(rename = "responseMimeType")]
    response_mime_type: &'static str,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: Option<String>,
}

/// Extraction client for Gemini-style vision models.
pub struct GeminiClient {
    config: GeminiConfig,
    client: Client,
}

impl GeminiClient {
    /// Create a new client with the given configuration.
    pub fn new(config: GeminiConfig) -> Result<Self, ExtractionError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self { config, client })
    }

    fn build_request<'a>(
        &'a self,
        attachments: &'a [Attachment],
    ) -> Result<GenerateRequest<'a>, ExtractionError> {
        if attachments.is_empty() {
            return Err(ExtractionError::NoAttachments);
        }

        let mut parts = vec![Part::Text {
            text: self.config.get_prompt(),
        }];
        for attachment in attachments.iter().filter(|a| a.is_supported()) {
            parts.push(Part::Inline {
                inline_data: InlineData {
                    mime_type: &attachment.content_type,
                    data: base64::engine::general_purpose::STANDARD.encode(&attachment.data),
                },
            });
        }

        if parts.len() == 1 {
            return Err(ExtractionError::UnsupportedAttachments);
        }

        Ok(GenerateRequest {
            contents: vec![Content { parts }],
            generation_config: GenerationConfig {
                response_mime_type: "application/json",
            },
        })
    }
}

/// Concatenate the text parts of the first candidate.
fn reply_text(response: GenerateResponse) -> Result<String, ExtractionError> {
    let parts = response
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|c| c.parts)
        .unwrap_or_default();

    if parts.is_empty() {
        return Err(ExtractionError::EmptyResponse);
    }

    Ok(parts.into_iter().filter_map(|p| p.text).collect())
}

#[async_trait]
impl FlyerExtractor for GeminiClient {
    async fn extract(&self, attachments: &[Attachment]) -> Result<ParsedFlyer, ExtractionError> {
        let api_key = self
            .config
            .api_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or(ExtractionError::MissingApiKey)?;
        let request = self.build_request(attachments)?;

        info!(
            attachment_count = attachments.len(),
            model = %self.config.model,
            "Sending flyer to extraction service"
        );

        let resp = self
            .client
            .post(self.config.generate_url())
            .header("x-goog-api-key", api_key)
            .json(&request)
            .send()
            .await?;

        let status = resp.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            warn!("Extraction service rate limited the request");
            return Err(ExtractionError::RateLimited);
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ExtractionError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let body: GenerateResponse = resp.json().await?;
        let text = reply_text(body)?;
        debug!(chars = text.len(), "Extraction reply received");

        parse_reply(&text).inspect_err(|e| warn!(error = %e, raw = %text, "Unusable extraction reply"))
    }
}
