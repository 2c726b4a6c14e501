use reqwest::Client;
use std::path::{Path, PathBuf};

use crate::error::{PromptPagesError, Result};

/// Upper bound on a single downloaded image unless configured otherwise.
pub const DEFAULT_MAX_DOWNLOAD_BYTES: u64 = 20 * 1024 * 1024;

/// Append-only directory of downloaded images.
///
/// Files get 128-bit random hex names, so concurrent writers never collide
/// and need no locking. Nothing is ever evicted.
#[derive(Debug, Clone)]
pub struct ImageStore {
    client: Client,
    dir: PathBuf,
    url_prefix: String,
    max_bytes: u64,
}

impl ImageStore {
    pub fn new(client: Client, dir: impl Into<PathBuf>, url_prefix: impl Into<String>) -> Self {
        Self {
            client,
            dir: dir.into(),
            url_prefix: url_prefix.into().trim_end_matches('/').to_string(),
            max_bytes: DEFAULT_MAX_DOWNLOAD_BYTES,
        }
    }

    pub fn with_max_bytes(mut self, max_bytes: u64) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub async fn ensure_dir(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        Ok(())
    }

    /// Downloads `url` and writes it under a fresh name, returning the served path.
    ///
    /// The body is read chunk by chunk and abandoned as soon as it exceeds
    /// `max_bytes`, whether or not the server announced its length.
    pub async fn persist_from_url(&self, url: &str) -> Result<String> {
        let mut response = self.client.get(url).send().await?.error_for_status()?;
        if response
            .content_length()
            .is_some_and(|len| len > self.max_bytes)
        {
            return Err(self.too_large());
        }

        let mut bytes = Vec::new();
        while let Some(chunk) = response.chunk().await? {
            if (bytes.len() + chunk.len()) as u64 > self.max_bytes {
                return Err(self.too_large());
            }
            bytes.extend_from_slice(&chunk);
        }

        let file_name = format!("{}.png", random_file_stem());
        tokio::fs::write(self.dir.join(&file_name), &bytes).await?;
        tracing::debug!(file = %file_name, size = bytes.len(), "stored image");

        Ok(format!("{}/{}", self.url_prefix, file_name))
    }

    fn too_large(&self) -> PromptPagesError {
        PromptPagesError::Upstream(format!("Image exceeds {} bytes", self.max_bytes))
    }
}

fn random_file_stem() -> String {
    let bytes: [u8; 16] = rand::random();
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_random_stem_is_32_hex_chars() {
        let stem = random_file_stem();
        assert_eq!(stem.len(), 32);
        assert!(stem.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(stem, random_file_stem());
    }

    #[tokio::test]
    async fn test_persist_writes_file_and_returns_served_path() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/cat.png"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![1u8, 2, 3]))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let store = ImageStore::new(Client::new(), dir.path().join("imgs"), "/generated-images/");
        store.ensure_dir().await.unwrap();

        let served = store
            .persist_from_url(&format!("{}/cat.png", server.uri()))
            .await
            .unwrap();
        assert!(served.starts_with("/generated-images/"));

        let file_name = served.rsplit('/').next().unwrap();
        let written = std::fs::read(store.dir().join(file_name)).unwrap();
        assert_eq!(written, vec![1u8, 2, 3]);
    }

    #[tokio::test]
    async fn test_persist_rejects_oversized_download() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/huge.png"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8; 64]))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let store =
            ImageStore::new(Client::new(), dir.path(), "/generated-images").with_max_bytes(16);

        let err = store
            .persist_from_url(&format!("{}/huge.png", server.uri()))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("exceeds 16 bytes"));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_persist_fails_on_http_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let store = ImageStore::new(Client::new(), dir.path(), "/generated-images");
        assert!(store.persist_from_url(&server.uri()).await.is_err());
    }
}
