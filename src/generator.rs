use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::{PromptPagesError, Result};
use crate::models::{ChatMessage, ChatRequest, ProjectPlan};
use crate::transport::ChatTransport;

const IMAGE_INSTRUCTIONS: &str = "Wherever an image belongs, set its src to \
{{generate_image: <short visual description>}} instead of a URL.";

/// Asks the language model for pages, project plans and project files.
pub struct PageGenerator {
    tx: Arc<dyn ChatTransport>,
    default_model: String,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ProjectFiles {
    files: BTreeMap<String, String>,
}

impl PageGenerator {
    pub fn new(tx: Arc<dyn ChatTransport>, default_model: String, max_tokens: u32) -> Self {
        Self {
            tx,
            default_model,
            max_tokens,
        }
    }

    fn model(&self, requested: Option<&str>) -> String {
        requested
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .unwrap_or(self.default_model.as_str())
            .to_string()
    }

    async fn complete(
        &self,
        model: Option<&str>,
        messages: Vec<ChatMessage>,
        json: bool,
    ) -> Result<String> {
        let request = ChatRequest {
            model: self.model(model),
            messages,
            max_tokens: self.max_tokens,
            response_format: json.then(|| serde_json::json!({ "type": "json_object" })),
        };

        let response = self.tx.chat(&request).await?;
        match response.choices.into_iter().next() {
            Some(choice) => Ok(choice.message.content.trim().to_string()),
            None => Err(PromptPagesError::Upstream(
                "Chat completion returned no choices".to_string(),
            )),
        }
    }

    /// Generates a single HTML page, editing `current_code` when present.
    pub async fn generate_page(
        &self,
        prompt: &str,
        model: Option<&str>,
        current_code: &str,
    ) -> Result<String> {
        tracing::info!(prompt, "generating page");

        let mut content = format!(
            "in html {prompt}, just return the html and nothing else. {IMAGE_INSTRUCTIONS}"
        );
        if !current_code.trim().is_empty() {
            content.push_str("\n\nModify this existing page:\n");
            content.push_str(current_code);
        }

        let html = self
            .complete(model, vec![ChatMessage::user(content)], false)
            .await?;
        Ok(strip_code_fences(&html).to_string())
    }

    /// Expands a short prompt into a project plan.
    pub async fn plan_project(&self, prompt: &str, model: Option<&str>) -> Result<ProjectPlan> {
        tracing::info!(prompt, "planning project");

        let system = ChatMessage::system(
            "You plan small static websites. Reply with a JSON object: \
             {\"enhancedPrompt\": string, \"files\": {\"<path>\": \"<purpose>\"}}.",
        );
        let raw = self
            .complete(model, vec![system, ChatMessage::user(prompt)], true)
            .await?;

        serde_json::from_str(strip_code_fences(&raw)).map_err(|e| {
            PromptPagesError::Upstream(format!("Failed to parse project plan JSON: {e}. Raw: {raw}"))
        })
    }

    /// Generates every file of a project from its plan.
    pub async fn generate_project(
        &self,
        plan: &ProjectPlan,
        current_files: &BTreeMap<String, String>,
        model: Option<&str>,
    ) -> Result<BTreeMap<String, String>> {
        tracing::info!(
            prompt = %plan.enhanced_prompt,
            existing_files = current_files.len(),
            "generating project"
        );

        let system = ChatMessage::system(format!(
            "You build small static websites. Reply with a JSON object \
             {{\"files\": {{\"<path>\": \"<file contents>\"}}}} and always include index.html. \
             {IMAGE_INSTRUCTIONS}"
        ));
        let mut content = format!(
            "Project: {}\n\nPlanned files: {}",
            plan.enhanced_prompt, plan.files
        );
        if !current_files.is_empty() {
            content.push_str("\n\nCurrent files:\n");
            content.push_str(&serde_json::to_string(current_files)?);
        }

        let raw = self
            .complete(model, vec![system, ChatMessage::user(content)], true)
            .await?;

        let parsed: ProjectFiles = serde_json::from_str(strip_code_fences(&raw)).map_err(|e| {
            PromptPagesError::Upstream(format!("Failed to parse project JSON: {e}"))
        })?;
        if parsed.files.is_empty() {
            return Err(PromptPagesError::Upstream(
                "Project JSON contained no files".to_string(),
            ));
        }
        Ok(parsed.files)
    }
}

/// Drops a surrounding markdown code fence (```html ... ```), if any.
pub fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let Some(body) = rest.strip_suffix("```") else {
        return trimmed;
    };
    // Skip the language tag on the opening line.
    match body.find('\n') {
        Some(idx) => body[idx + 1..].trim(),
        None => body.trim(),
    }
}
