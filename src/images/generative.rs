use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::sync::Arc;
use tokio::time::sleep;

use super::{ImageProvider, ImageResult, ImageStore};
use crate::config::DalleConfig;
use crate::models::{ImageGenerationRequest, ImageGenerationResponse};
use crate::rate_limit::RateLimiter;

/// Result of one call to the generation endpoint.
enum Attempt {
    Generated(String),
    /// Provider or transport trouble worth another try after backing off.
    Retry(String),
    /// Nothing a retry would fix.
    Fail(String),
}

/// OpenAI image generation, downloaded into the local image store.
pub struct DalleProvider {
    client: Client,
    endpoint: String,
    api_key: String,
    settings: DalleConfig,
    limiter: Arc<RateLimiter>,
    store: Arc<ImageStore>,
    placeholder_base: String,
}

impl DalleProvider {
    pub fn new(
        client: Client,
        api_key: String,
        settings: DalleConfig,
        limiter: Arc<RateLimiter>,
        store: Arc<ImageStore>,
        placeholder_base: String,
    ) -> Self {
        let endpoint = format!(
            "{}/v1/images/generations",
            settings.base_url.trim_end_matches('/')
        );
        Self {
            client,
            endpoint,
            api_key,
            settings,
            limiter,
            store,
            placeholder_base,
        }
    }

    fn placeholder(&self, reason: impl Into<String>) -> ImageResult {
        ImageResult::placeholder(&self.placeholder_base, reason)
    }

    async fn request_once(&self, prompt: &str) -> Attempt {
        let req = ImageGenerationRequest {
            model: self.settings.model.clone(),
            prompt: prompt.to_string(),
            n: 1,
            size: self.settings.size.clone(),
            style: self.settings.style.clone(),
            quality: self.settings.quality.clone(),
        };

        let response = match self
            .client
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&req)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => return Attempt::Retry(format!("Request failed: {e}")),
        };

        let status = response.status();
        let transient = status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error();
        let body: ImageGenerationResponse = match response.json().await {
            Ok(body) => body,
            Err(_) if status.is_success() => {
                return Attempt::Fail("Invalid response from image provider".to_string());
            }
            Err(_) if transient => return Attempt::Retry(format!("HTTP {status}")),
            Err(_) => return Attempt::Fail(format!("HTTP {status}")),
        };

        if let Some(error) = body.error {
            let message = error
                .message
                .unwrap_or_else(|| format!("Provider error (HTTP {status})"));
            // Rate limiting is sometimes only visible in the body.
            return if transient || signals_rate_limit(&message) {
                Attempt::Retry(message)
            } else {
                Attempt::Fail(message)
            };
        }
        if transient {
            return Attempt::Retry(format!("HTTP {status}"));
        }
        if !status.is_success() {
            return Attempt::Fail(format!("HTTP {status}"));
        }

        match body
            .data
            .and_then(|data| data.into_iter().next())
            .and_then(|image| image.url)
        {
            Some(url) => Attempt::Generated(url),
            None => Attempt::Fail("Invalid response from image provider".to_string()),
        }
    }
}

fn signals_rate_limit(message: &str) -> bool {
    let message = message.to_ascii_lowercase();
    message.contains("rate limit") || message.contains("too many requests")
}

#[async_trait]
impl ImageProvider for DalleProvider {
    fn name(&self) -> &'static str {
        "dall-e"
    }

    async fn resolve(&self, prompt: &str) -> ImageResult {
        if self.api_key.is_empty() {
            return self.placeholder("OpenAI API key missing");
        }

        let max_retries = self.limiter.max_retries();
        let mut retries = 0;
        loop {
            if let Err(e) = self.limiter.acquire().await {
                tracing::warn!(prompt, error = %e, "image generation gave up waiting for rate limit");
                return self.placeholder("Rate limit exceeded");
            }

            match self.request_once(prompt).await {
                Attempt::Generated(url) => {
                    return match self.store.persist_from_url(&url).await {
                        Ok(path) => {
                            tracing::info!(prompt, path = %path, "generated image stored");
                            ImageResult::Stored(path)
                        }
                        Err(e) => {
                            tracing::warn!(prompt, error = %e, "failed to download generated image");
                            self.placeholder("Image download failed")
                        }
                    };
                }
                Attempt::Fail(reason) => {
                    tracing::warn!(prompt, reason = %reason, "image generation failed");
                    return self.placeholder(reason);
                }
                Attempt::Retry(reason) => {
                    if retries >= max_retries {
                        tracing::warn!(prompt, reason = %reason, retries, "image generation retries exhausted");
                        return self.placeholder(format!("Image generation failed: {reason}"));
                    }
                    retries += 1;
                    tracing::warn!(prompt, reason = %reason, attempt = retries, "image generation error, backing off");
                    sleep(self.limiter.backoff()).await;
                }
            }
        }
    }
}
