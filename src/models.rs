use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::cache::PromptImageMap;

// OpenAI chat message format
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

// OpenAI chat completion request format
#[derive(Debug, Serialize, Clone)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<serde_json::Value>,
}

// OpenAI chat completion response format
#[derive(Debug, Deserialize, Clone)]
pub struct ChatResponse {
    #[serde(default)]
    pub choices: Vec<Choice>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Choice {
    pub message: ChatMessage,
}

/// Error object shared by the OpenAI and Google APIs.
#[derive(Debug, Deserialize, Clone)]
pub struct ProviderError {
    #[serde(default)]
    pub message: Option<String>,
}

// Image generation request format
#[derive(Debug, Serialize, Clone)]
pub struct ImageGenerationRequest {
    pub model: String,
    pub prompt: String,
    pub n: u32,
    pub size: String,
    pub style: String,
    pub quality: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ImageGenerationResponse {
    #[serde(default)]
    pub data: Option<Vec<GeneratedImage>>,
    #[serde(default)]
    pub error: Option<ProviderError>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GeneratedImage {
    #[serde(default)]
    pub url: Option<String>,
}

// Google Custom Search response format (image search)
#[derive(Debug, Deserialize, Clone)]
pub struct ImageSearchResponse {
    #[serde(default)]
    pub items: Option<Vec<ImageSearchItem>>,
    #[serde(default)]
    pub error: Option<ProviderError>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ImageSearchItem {
    pub link: String,
}

/// Query string shared by the generation endpoints.
#[derive(Debug, Deserialize, Default)]
pub struct PromptQuery {
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
}

/// Body of `POST /generate`.
#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct GeneratePageBody {
    pub current_code: String,
    pub generated_images: PromptImageMap,
    pub use_dall_e: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratePageResponse {
    pub code: String,
    pub new_images: PromptImageMap,
    /// Always zero: images are resolved before the response is sent.
    pub pending_images: usize,
}

/// A language-model-enhanced description of the project to build.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProjectPlan {
    pub enhanced_prompt: String,
    /// Free-form file outline as returned by the model (or the client's
    /// current files when enhancement is skipped).
    #[serde(default)]
    pub files: serde_json::Value,
}

/// Body of `POST /generate-project`.
#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct GenerateProjectBody {
    pub project_plan: ProjectPlan,
    pub current_files: BTreeMap<String, String>,
    pub model: Option<String>,
    pub use_dall_e: bool,
    pub generated_images: PromptImageMap,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateProjectResponse {
    pub files: BTreeMap<String, String>,
    pub new_images: PromptImageMap,
}

/// Body of `POST /resolve-images`.
#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct ResolveImagesBody {
    pub text: String,
    pub generated_images: PromptImageMap,
    pub use_dall_e: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolveImagesResponse {
    pub text: String,
    pub new_images: PromptImageMap,
}
