use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::config::StudioConfig;
use crate::key_selection::ApiKeyStore;
use crate::settings::ImageSettings;
use crate::utils;

/// Message the API returns when the selected key does not grant access to the model.
pub const ENTITY_NOT_FOUND: &str = "Requested entity was not found.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedImage {
    /// `data:<mime>;base64,<payload>` URI of the first image in the response.
    pub image_url: String,
}

#[derive(Debug, Error)]
pub enum GenerateError {
    #[error("no API key available; set GEMINI_API_KEY or select a key")]
    MissingApiKey,
    /// Error reported by the API. Displays the API's own message verbatim.
    #[error("{message}")]
    Api { status: u16, message: String },
    #[error("request to image API failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("{0}")]
    NoImage(String),
}

impl GenerateError {
    pub fn is_entity_not_found(&self) -> bool {
        matches!(self, GenerateError::Api { message, .. } if message.contains(ENTITY_NOT_FOUND))
    }
}

#[async_trait]
pub trait ImageGenerator: Send + Sync {
    async fn generate_image(&self, settings: &ImageSettings) -> Result<GeneratedImage, GenerateError>;
}

#[derive(Clone)]
pub struct GeminiClient {
    api_base: String,
    configured_key: Option<String>,
    selected_key: ApiKeyStore,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<Tool>,
}

#[derive(Debug, Serialize)]
struct Content {
    role: &'static str,
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum Part {
    Inline {
        #[serde(rename = "inlineData")]
        inline_data: Blob,
    },
    Text {
        text: String,
    },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Blob {
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_modalities: Vec<&'static str>,
    image_config: ImageConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ImageConfig {
    aspect_ratio: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    image_size: Option<&'static str>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Tool {
    google_search: GoogleSearch,
}

#[derive(Debug, Serialize)]
struct GoogleSearch {}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<CandidateContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResponsePart {
    text: Option<String>,
    #[serde(alias = "inline_data")]
    inline_data: Option<ResponseBlob>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResponseBlob {
    #[serde(alias = "mime_type")]
    mime_type: String,
    data: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

impl GeminiClient {
    pub fn new(config: &StudioConfig, selected_key: ApiKeyStore) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            api_base: config.api_base.trim_end_matches('/').to_string(),
            configured_key: config.api_key.clone().filter(|key| !key.trim().is_empty()),
            selected_key,
            client,
        })
    }

    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    fn endpoint(&self, settings: &ImageSettings) -> String {
        format!("{}/models/{}:generateContent", self.api_base, settings.model.id())
    }

    // A key picked through the selection flow wins over the configured one.
    async fn api_key(&self) -> Option<String> {
        match self.selected_key.get().await {
            Some(key) => Some(key),
            None => self.configured_key.clone(),
        }
    }
}

#[async_trait]
impl ImageGenerator for GeminiClient {
    async fn generate_image(&self, settings: &ImageSettings) -> Result<GeneratedImage, GenerateError> {
        let api_key = self.api_key().await.ok_or(GenerateError::MissingApiKey)?;
        let url = self.endpoint(settings);
        let request = build_request(settings);
        debug!(
            model = settings.model.id(),
            aspect_ratio = settings.aspect_ratio.as_str(),
            image_size = settings.image_size.as_str(),
            use_search = settings.use_search,
            has_input_image = settings.input_image.is_some(),
            "submitting generateContent request"
        );

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", api_key)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read body".to_string());
            return Err(GenerateError::Api {
                status: status.as_u16(),
                message: api_error_message(status, &body),
            });
        }

        let payload: GenerateContentResponse = response.json().await?;
        let image = extract_image(payload)?;
        info!(model = settings.model.id(), "image generation complete");
        Ok(image)
    }
}

fn build_request(settings: &ImageSettings) -> GenerateContentRequest {
    let mut parts = Vec::new();
    if let Some(image) = &settings.input_image {
        parts.push(Part::Inline {
            inline_data: Blob {
                mime_type: image.mime_type.clone(),
                data: image.base64.clone(),
            },
        });
    }
    if !settings.prompt.trim().is_empty() {
        parts.push(Part::Text {
            text: settings.prompt.clone(),
        });
    }

    // Only the Pro model understands output sizes and search grounding.
    let pro = settings.model.is_pro();
    let tools = if pro && settings.use_search {
        vec![Tool {
            google_search: GoogleSearch {},
        }]
    } else {
        Vec::new()
    };

    GenerateContentRequest {
        contents: vec![Content { role: "user", parts }],
        generation_config: GenerationConfig {
            response_modalities: vec!["IMAGE", "TEXT"],
            image_config: ImageConfig {
                aspect_ratio: settings.aspect_ratio.as_str(),
                image_size: pro.then(|| settings.image_size.as_str()),
            },
        },
        tools,
    }
}

fn extract_image(response: GenerateContentResponse) -> Result<GeneratedImage, GenerateError> {
    let mut texts = Vec::new();
    let mut finish_reason = None;
    for candidate in response.candidates {
        if finish_reason.is_none() {
            finish_reason = candidate.finish_reason;
        }
        let parts = candidate.content.map(|content| content.parts).unwrap_or_default();
        for part in parts {
            if let Some(blob) = part.inline_data {
                if !blob.data.is_empty() {
                    return Ok(GeneratedImage {
                        image_url: utils::data_url(&blob.mime_type, &blob.data),
                    });
                }
            }
            if let Some(text) = part.text {
                if !text.trim().is_empty() {
                    texts.push(text.trim().to_string());
                }
            }
        }
    }

    if let Some(reason) = response.prompt_feedback.and_then(|feedback| feedback.block_reason) {
        return Err(GenerateError::NoImage(format!("Request was blocked ({reason}).")));
    }
    let mut message = "No image was returned by the model.".to_string();
    if let Some(reason) = finish_reason.filter(|reason| reason != "STOP") {
        message.push_str(&format!(" Finish reason: {reason}."));
    }
    if !texts.is_empty() {
        message.push(' ');
        message.push_str(&texts.join(" "));
    }
    Err(GenerateError::NoImage(message))
}

fn api_error_message(status: reqwest::StatusCode, body: &str) -> String {
    match serde_json::from_str::<ApiErrorBody>(body) {
        Ok(parsed) => parsed.error.message,
        Err(_) if !body.trim().is_empty() => body.trim().to_string(),
        Err(_) => status
            .canonical_reason()
            .unwrap_or("unknown error")
            .to_string(),
    }
}
