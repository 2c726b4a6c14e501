use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::Stream;
use std::convert::Infallible;
use std::path::Path;
use std::sync::Arc;
use tokio_stream::StreamExt as _;
use tokio_stream::wrappers::BroadcastStream;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::error::{PromptPagesError, Result};
use crate::models::{
    GenerateProjectBody, GenerateProjectResponse, GeneratePageBody, GeneratePageResponse,
    ProjectPlan, PromptQuery, ResolveImagesBody, ResolveImagesResponse,
};
use crate::service::PagesService;

/// Builds the HTTP router; anything not matched is served from `public_dir`.
pub fn router(service: Arc<PagesService>, public_dir: &Path) -> Router {
    Router::new()
        .route("/generate", post(generate))
        .route("/plan-project", post(plan_project))
        .route("/generate-project", post(generate_project))
        .route("/resolve-images", post(resolve_images))
        .route("/events", get(events))
        .route("/health", get(|| async { "ok" }))
        .fallback_service(ServeDir::new(public_dir))
        .layer(TraceLayer::new_for_http())
        .with_state(service)
}

fn required_prompt(query: &PromptQuery) -> Result<&str> {
    query
        .prompt
        .as_deref()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .ok_or_else(|| PromptPagesError::Validation("Prompt is required".to_string()))
}

/// An empty body means a fresh page with no cached images; anything else must parse.
fn page_body(bytes: &[u8]) -> Result<GeneratePageBody> {
    if bytes.trim_ascii().is_empty() {
        return Ok(GeneratePageBody::default());
    }
    serde_json::from_slice(bytes)
        .map_err(|e| PromptPagesError::Validation(format!("Invalid request body: {e}")))
}

async fn generate(
    State(service): State<Arc<PagesService>>,
    Query(query): Query<PromptQuery>,
    body: Bytes,
) -> Result<Json<GeneratePageResponse>> {
    let prompt = required_prompt(&query)?;
    let body = page_body(&body)?;
    let response = service
        .generate_page(prompt, query.model.as_deref(), body)
        .await?;
    Ok(Json(response))
}

async fn plan_project(
    State(service): State<Arc<PagesService>>,
    Query(query): Query<PromptQuery>,
) -> Result<Json<ProjectPlan>> {
    let prompt = required_prompt(&query)?;
    let plan = service.plan_project(prompt, query.model.as_deref()).await?;
    Ok(Json(plan))
}

async fn generate_project(
    State(service): State<Arc<PagesService>>,
    Json(body): Json<GenerateProjectBody>,
) -> Result<Json<GenerateProjectResponse>> {
    Ok(Json(service.generate_project(body).await?))
}

async fn resolve_images(
    State(service): State<Arc<PagesService>>,
    Json(body): Json<ResolveImagesBody>,
) -> Json<ResolveImagesResponse> {
    Json(service.resolve_images(body).await)
}

/// Streams each image as it finishes; the batched responses remain authoritative.
async fn events(
    State(service): State<Arc<PagesService>>,
) -> Sse<impl Stream<Item = std::result::Result<Event, Infallible>>> {
    let stream = BroadcastStream::new(service.subscribe()).filter_map(|message| match message {
        Ok(event) => Event::default()
            .event("imageGenerated")
            .json_data(&event)
            .ok()
            .map(Ok),
        Err(e) => {
            tracing::warn!(error = %e, "event subscriber lagged");
            None
        }
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}
