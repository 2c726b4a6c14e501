use async_trait::async_trait;
use reqwest::Client;
use std::sync::Arc;

use super::{ImageProvider, ImageResult, ImageStore};
use crate::config::GoogleSearchConfig;
use crate::models::ImageSearchResponse;

/// First hit from Google Custom Search image results.
pub struct GoogleImageSearchProvider {
    client: Client,
    endpoint: String,
    settings: GoogleSearchConfig,
    store: Arc<ImageStore>,
    placeholder_base: String,
}

impl GoogleImageSearchProvider {
    pub fn new(
        client: Client,
        settings: GoogleSearchConfig,
        store: Arc<ImageStore>,
        placeholder_base: String,
    ) -> Self {
        let endpoint = format!("{}/customsearch/v1", settings.base_url.trim_end_matches('/'));
        Self {
            client,
            endpoint,
            settings,
            store,
            placeholder_base,
        }
    }

    fn placeholder(&self, reason: impl Into<String>) -> ImageResult {
        ImageResult::placeholder(&self.placeholder_base, reason)
    }

    async fn first_link(
        &self,
        api_key: &str,
        engine_id: &str,
        prompt: &str,
    ) -> Result<Option<String>, String> {
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[
                ("key", api_key),
                ("cx", engine_id),
                ("q", prompt),
                ("searchType", "image"),
                ("num", "1"),
                ("safe", self.settings.safe.as_str()),
                ("imgSize", self.settings.img_size.as_str()),
            ])
            .send()
            .await
            .map_err(|e| format!("Image search failed: {e}"))?;

        let status = response.status();
        let body: ImageSearchResponse = response
            .json()
            .await
            .map_err(|_| format!("Image search failed (HTTP {status})"))?;

        if let Some(error) = body.error {
            return Err(error
                .message
                .unwrap_or_else(|| format!("Image search error (HTTP {status})")));
        }

        Ok(body
            .items
            .and_then(|items| items.into_iter().next())
            .map(|item| item.link))
    }
}

#[async_trait]
impl ImageProvider for GoogleImageSearchProvider {
    fn name(&self) -> &'static str {
        "google-image-search"
    }

    async fn resolve(&self, prompt: &str) -> ImageResult {
        let (Some(api_key), Some(engine_id)) = (
            self.settings.api_key.as_deref(),
            self.settings.search_engine_id.as_deref(),
        ) else {
            tracing::warn!(prompt, "image search requested without credentials");
            return self.placeholder("Google API credentials missing");
        };

        let link = match self.first_link(api_key, engine_id, prompt).await {
            Ok(Some(link)) => link,
            Ok(None) => {
                tracing::info!(prompt, "image search returned no results");
                return self.placeholder("No Images Found");
            }
            Err(reason) => {
                tracing::warn!(prompt, reason = %reason, "image search error");
                return self.placeholder(reason);
            }
        };

        match self.store.persist_from_url(&link).await {
            Ok(path) => {
                tracing::info!(prompt, path = %path, "search image stored");
                ImageResult::Stored(path)
            }
            Err(e) => {
                tracing::warn!(prompt, link = %link, error = %e, "download failed, using remote image");
                ImageResult::Remote(link)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const PLACEHOLDER: &str = "https://placeholder.test/512";

    fn provider(
        server: &MockServer,
        dir: &std::path::Path,
        credentials: Option<(&str, &str)>,
    ) -> GoogleImageSearchProvider {
        let client = Client::new();
        let store = Arc::new(ImageStore::new(client.clone(), dir, "/generated-images"));
        let settings = GoogleSearchConfig {
            api_key: credentials.map(|(k, _)| k.to_string()),
            search_engine_id: credentials.map(|(_, cx)| cx.to_string()),
            base_url: server.uri(),
            safe: "active".into(),
            img_size: "large".into(),
        };
        GoogleImageSearchProvider::new(client, settings, store, PLACEHOLDER.into())
    }

    #[tokio::test]
    async fn test_zero_results_yield_no_images_found_placeholder() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/customsearch/v1"))
            .and(query_param("searchType", "image"))
            .and(query_param("q", "red shoe"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "searchInformation": { "totalResults": "0" }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let provider = provider(&server, dir.path(), Some(("key", "cx")));

        let result = provider.resolve("red shoe").await;
        assert_eq!(
            result.reference(),
            "https://placeholder.test/512?text=No%20Images%20Found"
        );
    }

    #[tokio::test]
    async fn test_found_image_is_stored() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/customsearch/v1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "items": [{ "link": format!("{}/photos/shoe.jpg", server.uri()) }]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/photos/shoe.jpg"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![1u8, 2, 3, 4]))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let provider = provider(&server, dir.path(), Some(("key", "cx")));

        let result = provider.resolve("red shoe").await;
        let ImageResult::Stored(reference) = result else {
            panic!("expected stored image");
        };
        assert!(reference.starts_with("/generated-images/"));
        assert!(reference.ends_with(".png"));
    }

    #[tokio::test]
    async fn test_download_failure_falls_back_to_remote_link() {
        let server = MockServer::start().await;
        let link = format!("{}/photos/forbidden.jpg", server.uri());
        Mock::given(method("GET"))
            .and(path("/customsearch/v1"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "items": [{ "link": link }] })),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/photos/forbidden.jpg"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let provider = provider(&server, dir.path(), Some(("key", "cx")));

        assert_eq!(provider.resolve("red shoe").await, ImageResult::Remote(link));
    }

    #[tokio::test]
    async fn test_provider_error_message_becomes_reason() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/customsearch/v1"))
            .respond_with(ResponseTemplate::new(403).set_body_json(json!({
                "error": { "code": 403, "message": "Daily Limit Exceeded" }
            })))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let provider = provider(&server, dir.path(), Some(("key", "cx")));

        let result = provider.resolve("red shoe").await;
        assert!(matches!(
            result,
            ImageResult::Placeholder { ref reason, .. } if reason == "Daily Limit Exceeded"
        ));
    }

    #[tokio::test]
    async fn test_missing_credentials_skip_the_request() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let provider = provider(&server, dir.path(), None);

        let result = provider.resolve("red shoe").await;
        assert_eq!(
            result.reference(),
            "https://placeholder.test/512?text=Google%20API%20credentials%20missing"
        );
    }
}
