//! Placeholder resolution: scan, consult the client's cache, fetch what is
//! missing concurrently, then splice the results back in by position.

use chrono::{DateTime, Utc};
use futures::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::cache::{CacheLookup, PromptImageMap, lookup};
use crate::images::{ImageMode, ImageProvider, ImageResult};
use crate::placeholder::{PlaceholderToken, scan, substitute};

/// Published once per distinct prompt as soon as its image is ready.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ImageEvent {
    pub batch_id: Uuid,
    pub prompt: String,
    pub reference: String,
    /// `<img>` markup for clients that swap elements in place.
    pub element: String,
    pub status: ImageEventStatus,
    pub resolved_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ImageEventStatus {
    Resolved,
    Failed,
}

/// Substituted text plus the prompts newly resolved by this call.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub text: String,
    pub new_images: PromptImageMap,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FilesResolution {
    pub files: BTreeMap<String, String>,
    pub new_images: PromptImageMap,
}

pub struct ImageResolver {
    generative: Arc<dyn ImageProvider>,
    search: Arc<dyn ImageProvider>,
    events: Option<broadcast::Sender<ImageEvent>>,
    placeholder_base: String,
}

impl ImageResolver {
    pub fn new(
        generative: Arc<dyn ImageProvider>,
        search: Arc<dyn ImageProvider>,
        placeholder_base: String,
    ) -> Self {
        Self {
            generative,
            search,
            events: None,
            placeholder_base,
        }
    }

    /// Publishes an [`ImageEvent`] for every image resolved from now on.
    pub fn with_events(mut self, events: broadcast::Sender<ImageEvent>) -> Self {
        self.events = Some(events);
        self
    }

    fn provider(&self, mode: ImageMode) -> Arc<dyn ImageProvider> {
        match mode {
            ImageMode::Generative => Arc::clone(&self.generative),
            ImageMode::Search => Arc::clone(&self.search),
        }
    }

    pub async fn resolve(&self, text: &str, cache: &PromptImageMap, mode: ImageMode) -> Resolution {
        let mut files = self.resolve_all(&[text], cache, mode).await;
        Resolution {
            text: files.texts.pop().unwrap_or_default(),
            new_images: files.new_images,
        }
    }

    /// Resolves every file of a project as one batch, so a prompt shared by
    /// several files is fetched once.
    pub async fn resolve_files(
        &self,
        files: &BTreeMap<String, String>,
        cache: &PromptImageMap,
        mode: ImageMode,
    ) -> FilesResolution {
        let texts: Vec<&str> = files.values().map(String::as_str).collect();
        let resolved = self.resolve_all(&texts, cache, mode).await;
        FilesResolution {
            files: files.keys().cloned().zip(resolved.texts).collect(),
            new_images: resolved.new_images,
        }
    }

    async fn resolve_all(&self, texts: &[&str], cache: &PromptImageMap, mode: ImageMode) -> Batch {
        let tokens: Vec<Vec<PlaceholderToken<'_>>> =
            texts.iter().map(|text| scan(text).collect()).collect();

        let mut seen = HashSet::new();
        let mut misses = Vec::new();
        let mut hits = 0usize;
        for token in tokens.iter().flatten() {
            match lookup(token.prompt, cache) {
                CacheLookup::Hit(_) => hits += 1,
                CacheLookup::Miss => {
                    if seen.insert(token.prompt) {
                        misses.push(token.prompt.to_string());
                    }
                }
            }
        }

        if hits + misses.len() == 0 {
            return Batch {
                texts: texts.iter().map(|t| t.to_string()).collect(),
                new_images: PromptImageMap::new(),
            };
        }

        tracing::info!(
            mode = ?mode,
            cache_hits = hits,
            distinct_misses = misses.len(),
            "resolving image placeholders"
        );

        let results = self.fetch(misses, mode).await;

        let out = texts
            .iter()
            .zip(&tokens)
            .map(|(text, tokens)| {
                substitute(text, tokens, |token| match lookup(token.prompt, cache) {
                    CacheLookup::Hit(reference) => Some(reference),
                    CacheLookup::Miss => results.get(token.prompt).map(ImageResult::reference),
                })
            })
            .collect();

        let new_images = results
            .iter()
            .filter(|(_, result)| result.is_cacheable())
            .map(|(prompt, result)| (prompt.clone(), result.reference().to_string()))
            .collect();

        Batch {
            texts: out,
            new_images,
        }
    }

    /// One task per distinct prompt; all are awaited before returning.
    async fn fetch(&self, prompts: Vec<String>, mode: ImageMode) -> HashMap<String, ImageResult> {
        let mut results = HashMap::with_capacity(prompts.len());
        if prompts.is_empty() {
            return results;
        }

        let batch_id = Uuid::new_v4();
        let provider = self.provider(mode);
        let mut pending = FuturesUnordered::new();

        for prompt in &prompts {
            if prompt.is_empty() {
                let result =
                    ImageResult::placeholder(&self.placeholder_base, "Empty image description");
                self.publish(batch_id, prompt, &result);
                results.insert(prompt.clone(), result);
                continue;
            }

            let provider = Arc::clone(&provider);
            let prompt = prompt.clone();
            // Detached on drop, so a disconnected client does not cancel
            // work already sent to the provider.
            pending.push(tokio::spawn(async move {
                let result = provider.resolve(&prompt).await;
                (prompt, result)
            }));
        }

        while let Some(joined) = pending.next().await {
            match joined {
                Ok((prompt, result)) => {
                    tracing::debug!(
                        prompt = %prompt,
                        provider = provider.name(),
                        reference = result.reference(),
                        "image resolved"
                    );
                    self.publish(batch_id, &prompt, &result);
                    results.insert(prompt, result);
                }
                Err(e) => tracing::error!(error = %e, "image task aborted"),
            }
        }

        // A panicked task leaves its prompt without a result.
        for prompt in prompts {
            if !results.contains_key(&prompt) {
                let result =
                    ImageResult::placeholder(&self.placeholder_base, "Image resolution failed");
                self.publish(batch_id, &prompt, &result);
                results.insert(prompt, result);
            }
        }

        results
    }

    fn publish(&self, batch_id: Uuid, prompt: &str, result: &ImageResult) {
        let Some(events) = &self.events else {
            return;
        };
        let status = if result.is_cacheable() {
            ImageEventStatus::Resolved
        } else {
            ImageEventStatus::Failed
        };
        // No subscribers is fine; the batched return stays authoritative.
        let _ = events.send(ImageEvent {
            batch_id,
            prompt: prompt.to_string(),
            reference: result.reference().to_string(),
            element: result.to_img_element(prompt),
            status,
            resolved_at: Utc::now(),
        });
    }
}

struct Batch {
    texts: Vec<String>,
    new_images: PromptImageMap,
}
