use reqwest::Client;
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::config::Config;
use crate::error::{PromptPagesError, Result};
use crate::generator::PageGenerator;
use crate::images::{DalleProvider, GoogleImageSearchProvider, ImageMode, ImageStore};
use crate::models::{
    GenerateProjectBody, GenerateProjectResponse, GeneratePageBody, GeneratePageResponse,
    ProjectPlan, ResolveImagesBody, ResolveImagesResponse,
};
use crate::rate_limit::RateLimiter;
use crate::resolver::{ImageEvent, ImageResolver};
use crate::transport::OpenAiTransport;

/// Main service struct: page generation followed by image resolution.
pub struct PagesService {
    generator: PageGenerator,
    resolver: ImageResolver,
    events: broadcast::Sender<ImageEvent>,
}

impl PagesService {
    /// `resolver` should already publish on `events` (see [`ImageResolver::with_events`]).
    pub fn new(
        generator: PageGenerator,
        resolver: ImageResolver,
        events: broadcast::Sender<ImageEvent>,
    ) -> Self {
        Self {
            generator,
            resolver,
            events,
        }
    }

    /// Wires the production collaborators from configuration.
    pub async fn from_config(config: &Config) -> Result<Self> {
        tracing::info!("PagesService::from_config() - Starting initialization");
        let client = Client::builder()
            .user_agent(concat!("prompt-pages/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| PromptPagesError::Config(format!("Failed to build HTTP client: {e}")))?;

        let store = Arc::new(
            ImageStore::new(client.clone(), config.images_dir(), config.images_url_prefix())
                .with_max_bytes(config.images.max_download_bytes),
        );
        store.ensure_dir().await?;
        tracing::info!(dir = %store.dir().display(), "image directory ready");

        let limiter = Arc::new(RateLimiter::from_config(&config.rate_limiter));
        let placeholder_base = config.images.placeholder_base_url.clone();

        let generative = Arc::new(DalleProvider::new(
            client.clone(),
            config.openai.api_key.clone(),
            config.dalle.clone(),
            limiter,
            Arc::clone(&store),
            placeholder_base.clone(),
        ));
        let search = Arc::new(GoogleImageSearchProvider::new(
            client.clone(),
            config.google.clone(),
            store,
            placeholder_base.clone(),
        ));

        let (events, _) = broadcast::channel(config.server.event_capacity);
        let resolver =
            ImageResolver::new(generative, search, placeholder_base).with_events(events.clone());

        let transport = Arc::new(OpenAiTransport::new(
            client,
            &config.openai.base_url,
            config.openai.api_key.clone(),
        ));
        let generator = PageGenerator::new(
            transport,
            config.openai.default_model.clone(),
            config.openai.max_tokens,
        );

        tracing::info!("PagesService::from_config() - Initialization complete");
        Ok(Self::new(generator, resolver, events))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ImageEvent> {
        self.events.subscribe()
    }

    pub async fn generate_page(
        &self,
        prompt: &str,
        model: Option<&str>,
        body: GeneratePageBody,
    ) -> Result<GeneratePageResponse> {
        let html = self
            .generator
            .generate_page(prompt, model, &body.current_code)
            .await?;

        let resolution = self
            .resolver
            .resolve(
                &html,
                &body.generated_images,
                ImageMode::from_use_dalle(body.use_dall_e),
            )
            .await;

        Ok(GeneratePageResponse {
            code: resolution.text,
            new_images: resolution.new_images,
            pending_images: 0,
        })
    }

    pub async fn plan_project(&self, prompt: &str, model: Option<&str>) -> Result<ProjectPlan> {
        self.generator.plan_project(prompt, model).await
    }

    pub async fn generate_project(
        &self,
        body: GenerateProjectBody,
    ) -> Result<GenerateProjectResponse> {
        if body.project_plan.enhanced_prompt.trim().is_empty() {
            return Err(PromptPagesError::Validation(
                "Project plan is required".to_string(),
            ));
        }

        let files = self
            .generator
            .generate_project(&body.project_plan, &body.current_files, body.model.as_deref())
            .await?;

        let resolution = self
            .resolver
            .resolve_files(
                &files,
                &body.generated_images,
                ImageMode::from_use_dalle(body.use_dall_e),
            )
            .await;

        Ok(GenerateProjectResponse {
            files: resolution.files,
            new_images: resolution.new_images,
        })
    }

    pub async fn resolve_images(&self, body: ResolveImagesBody) -> ResolveImagesResponse {
        let resolution = self
            .resolver
            .resolve(
                &body.text,
                &body.generated_images,
                ImageMode::from_use_dalle(body.use_dall_e),
            )
            .await;

        ResolveImagesResponse {
            text: resolution.text,
            new_images: resolution.new_images,
        }
    }
}
