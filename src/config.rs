use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::images::store::DEFAULT_MAX_DOWNLOAD_BYTES;

/// Main configuration structure for prompt-pages
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub openai: OpenAIConfig,
    pub dalle: DalleConfig,
    pub google: GoogleSearchConfig,
    pub images: ImagesConfig,
    pub rate_limiter: RateLimiterConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub bind: String,
    /// Directory served as static content; generated images live beneath it.
    pub public_dir: PathBuf,
    /// Capacity of the image event broadcast channel.
    pub event_capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAIConfig {
    pub api_key: String,
    pub base_url: String,
    pub default_model: String,
    pub max_tokens: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DalleConfig {
    pub base_url: String,
    pub model: String,
    pub size: String,
    pub style: String,
    pub quality: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoogleSearchConfig {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub search_engine_id: Option<String>,
    pub base_url: String,
    pub safe: String,
    pub img_size: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImagesConfig {
    /// Subdirectory of `server.public_dir` holding generated files.
    pub dir_name: String,
    /// Base of the placeholder image service; the reason goes in `?text=`.
    pub placeholder_base_url: String,
    /// Downloads larger than this are refused.
    #[serde(default = "default_max_download_bytes")]
    pub max_download_bytes: u64,
}

fn default_max_download_bytes() -> u64 {
    DEFAULT_MAX_DOWNLOAD_BYTES
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimiterConfig {
    pub max_requests: u32,
    pub window_seconds: u64,
    /// Fixed wait after hitting the limit, kept above the provider window.
    pub backoff_ms: u64,
    pub max_retries: u32,
}

impl RateLimiterConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.window_seconds)
    }

    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }
}

impl Config {
    /// Load configuration from file with environment variable overrides
    /// ALWAYS returns a valid config - never fails
    pub fn load() -> Self {
        let env_paths = ["../.env", ".env"];

        let mut env_loaded = false;
        for path in &env_paths {
            if dotenvy::from_path(path).is_ok() {
                tracing::info!("Loaded .env from: {}", path);
                env_loaded = true;
                break;
            }
        }

        if !env_loaded {
            tracing::warn!("No .env file found - continuing with env vars only");
        }

        let config_path =
            env::var("PAGES_CONFIG_PATH").unwrap_or_else(|_| "config.yaml".to_string());

        let mut config = Self::from_file(Path::new(&config_path));
        config.apply_env_overrides(|key| env::var(key).ok());

        if let Err(e) = config.validate() {
            tracing::warn!("Config validation warnings: {} - continuing anyway", e);
        }

        config
    }

    fn from_file(path: &Path) -> Self {
        if !path.exists() {
            tracing::warn!("Config file not found at {} - using defaults", path.display());
            return Self::default();
        }

        match fs::read_to_string(path) {
            Ok(contents) => match serde_yaml::from_str::<Config>(&contents) {
                Ok(config) => {
                    tracing::info!("Loaded configuration from {}", path.display());
                    config
                }
                Err(e) => {
                    tracing::error!(
                        "Failed to parse config file {}: {} - using defaults",
                        path.display(),
                        e
                    );
                    Self::default()
                }
            },
            Err(e) => {
                tracing::error!(
                    "Failed to read config file {}: {} - using defaults",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Apply environment variable overrides.
    ///
    /// Takes a lookup function so tests can feed variables without touching
    /// the process environment.
    fn apply_env_overrides<F>(&mut self, var: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        // Server overrides
        if let Some(bind) = var("PAGES_BIND") {
            self.server.bind = bind;
        } else if let Some(port) = var("PORT") {
            if let Ok(port) = port.parse::<u16>() {
                self.server.bind = format!("0.0.0.0:{port}");
            }
        }
        if let Some(dir) = var("PAGES_PUBLIC_DIR") {
            self.server.public_dir = PathBuf::from(dir);
        }

        // OpenAI overrides
        if let Some(api_key) = var("OPENAI_API_KEY") {
            self.openai.api_key = api_key;
        }
        if let Some(base_url) = var("OPENAI_BASE_URL") {
            self.openai.base_url = base_url.clone();
            self.dalle.base_url = base_url;
        }
        if let Some(model) = var("PAGES_DEFAULT_MODEL") {
            self.openai.default_model = model;
        }

        // Google overrides
        if let Some(key) = var("GOOGLE_API_KEY") {
            self.google.api_key = Some(key);
        }
        if let Some(cx) = var("GOOGLE_SEARCH_ENGINE_ID") {
            self.google.search_engine_id = Some(cx);
        }

        // Rate limiter overrides
        if let Some(max) = var("PAGES_RATE_LIMIT_MAX_REQUESTS").and_then(|v| v.parse().ok()) {
            self.rate_limiter.max_requests = max;
        }
        if let Some(window) = var("PAGES_RATE_LIMIT_WINDOW_SECONDS").and_then(|v| v.parse().ok())
        {
            self.rate_limiter.window_seconds = window;
        }
        if let Some(backoff) = var("PAGES_RATE_LIMIT_BACKOFF_MS").and_then(|v| v.parse().ok()) {
            self.rate_limiter.backoff_ms = backoff;
        }
        if let Some(retries) = var("PAGES_RATE_LIMIT_MAX_RETRIES").and_then(|v| v.parse().ok()) {
            self.rate_limiter.max_retries = retries;
        }

        if let Some(max) = var("PAGES_MAX_DOWNLOAD_BYTES").and_then(|v| v.parse().ok()) {
            self.images.max_download_bytes = max;
        }
    }

    /// Validate configuration
    fn validate(&self) -> Result<(), Box<dyn std::error::Error>> {
        if self.rate_limiter.max_requests == 0 {
            return Err("Rate limiter max_requests cannot be 0".into());
        }
        if self.rate_limiter.window_seconds == 0 {
            return Err("Rate limiter window_seconds cannot be 0".into());
        }
        if self.rate_limiter.backoff() <= self.rate_limiter.interval() {
            return Err("Rate limiter backoff_ms should exceed the window".into());
        }
        if self.server.event_capacity == 0 {
            return Err("Event channel capacity cannot be 0".into());
        }
        if self.openai.api_key.is_empty() {
            return Err("OPENAI_API_KEY environment variable must be set".into());
        }
        if self.google.api_key.is_none() || self.google.search_engine_id.is_none() {
            return Err("Google search credentials missing; image search will use placeholders".into());
        }
        Ok(())
    }

    /// Directory where generated images are written.
    pub fn images_dir(&self) -> PathBuf {
        self.server.public_dir.join(&self.images.dir_name)
    }

    /// URL prefix under which generated images are served.
    pub fn images_url_prefix(&self) -> String {
        format!("/{}", self.images.dir_name.trim_matches('/'))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                bind: "127.0.0.1:3000".to_string(),
                public_dir: PathBuf::from("public"),
                event_capacity: 256,
            },
            openai: OpenAIConfig {
                api_key: String::new(),
                base_url: "https://api.openai.com".to_string(),
                default_model: "gpt-4o-mini".to_string(),
                max_tokens: 4096,
            },
            dalle: DalleConfig {
                base_url: "https://api.openai.com".to_string(),
                model: "dall-e-3".to_string(),
                size: "1024x1024".to_string(),
                style: "vivid".to_string(),
                quality: "standard".to_string(),
            },
            google: GoogleSearchConfig {
                api_key: None,
                search_engine_id: None,
                base_url: "https://www.googleapis.com".to_string(),
                safe: "active".to_string(),
                img_size: "large".to_string(),
            },
            images: ImagesConfig {
                dir_name: "generated-images".to_string(),
                placeholder_base_url: "https://via.placeholder.com/512x512".to_string(),
                max_download_bytes: DEFAULT_MAX_DOWNLOAD_BYTES,
            },
            // DALL-E 3 allows a handful of images per minute on low tiers.
            rate_limiter: RateLimiterConfig {
                max_requests: 5,
                window_seconds: 60,
                backoff_ms: 65_000,
                max_retries: 3,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_env_overrides() {
        let mut cfg = Config::default();
        cfg.apply_env_overrides(lookup(&[
            ("PORT", "8080"),
            ("OPENAI_API_KEY", "sk-test"),
            ("GOOGLE_API_KEY", "g-key"),
            ("GOOGLE_SEARCH_ENGINE_ID", "cx-1"),
            ("PAGES_RATE_LIMIT_MAX_REQUESTS", "7"),
            ("PAGES_RATE_LIMIT_BACKOFF_MS", "not-a-number"),
            ("PAGES_MAX_DOWNLOAD_BYTES", "1048576"),
        ]));
        assert_eq!(cfg.server.bind, "0.0.0.0:8080");
        assert_eq!(cfg.openai.api_key, "sk-test");
        assert_eq!(cfg.google.api_key.as_deref(), Some("g-key"));
        assert_eq!(cfg.google.search_engine_id.as_deref(), Some("cx-1"));
        assert_eq!(cfg.rate_limiter.max_requests, 7);
        assert_eq!(cfg.images.max_download_bytes, 1_048_576);
        // Unparseable values leave the default in place
        assert_eq!(cfg.rate_limiter.backoff_ms, 65_000);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_bind_takes_precedence_over_port() {
        let mut cfg = Config::default();
        cfg.apply_env_overrides(lookup(&[("PAGES_BIND", "127.0.0.1:9000"), ("PORT", "8080")]));
        assert_eq!(cfg.server.bind, "127.0.0.1:9000");
    }

    #[test]
    fn test_validate_rejects_short_backoff() {
        let mut cfg = Config::default();
        cfg.openai.api_key = "sk-test".into();
        cfg.google.api_key = Some("k".into());
        cfg.google.search_engine_id = Some("cx".into());
        cfg.rate_limiter.backoff_ms = 1_000;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_yaml_file_is_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        let mut cfg = Config::default();
        cfg.server.bind = "0.0.0.0:4000".into();
        cfg.images.dir_name = "imgs".into();
        fs::write(&path, serde_yaml::to_string(&cfg).unwrap()).unwrap();

        let loaded = Config::from_file(&path);
        assert_eq!(loaded.server.bind, "0.0.0.0:4000");
        assert_eq!(loaded.images_url_prefix(), "/imgs");
        assert_eq!(loaded.images_dir(), PathBuf::from("public").join("imgs"));
    }

    #[test]
    fn test_yaml_without_download_cap_uses_default() {
        let yaml = serde_yaml::to_string(&Config::default())
            .unwrap()
            .lines()
            .filter(|line| !line.contains("max_download_bytes"))
            .collect::<Vec<_>>()
            .join("\n");
        let cfg: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(cfg.images.max_download_bytes, DEFAULT_MAX_DOWNLOAD_BYTES);
    }

    #[test]
    fn test_missing_or_broken_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let missing = Config::from_file(&dir.path().join("nope.yaml"));
        assert_eq!(missing.server.bind, Config::default().server.bind);

        let broken = dir.path().join("broken.yaml");
        fs::write(&broken, "server: [unterminated").unwrap();
        let cfg = Config::from_file(&broken);
        assert_eq!(cfg.rate_limiter.max_requests, 5);
    }
}
