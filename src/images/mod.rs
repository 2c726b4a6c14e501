//! Image providers that turn a prompt into something an `<img>` can display.
//!
//! Providers never fail at this seam: every error becomes a placeholder image
//! whose text carries the reason, so one bad image cannot sink a page.

pub mod generative;
pub mod search;
pub mod store;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use generative::DalleProvider;
pub use search::GoogleImageSearchProvider;
pub use store::ImageStore;

/// Which provider backs a resolution request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageMode {
    Generative,
    Search,
}

impl ImageMode {
    /// Maps the browser's `useDallE` toggle.
    pub fn from_use_dalle(use_dalle: bool) -> Self {
        if use_dalle { Self::Generative } else { Self::Search }
    }
}

/// Where a resolved image lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageResult {
    /// Path under the served image directory, e.g. `/generated-images/<hex>.png`.
    Stored(String),
    /// Remote URL used directly when a local copy could not be made.
    Remote(String),
    /// Stand-in image rendering the failure reason.
    Placeholder { reason: String, reference: String },
}

impl ImageResult {
    /// Builds a placeholder reference with the reason percent-encoded into
    /// its `text` query parameter.
    pub fn placeholder(base_url: &str, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        let reference = format!("{base_url}?text={}", urlencoding::encode(&reason));
        Self::Placeholder { reason, reference }
    }

    /// Bare reference suitable for an `src` attribute.
    pub fn reference(&self) -> &str {
        match self {
            Self::Stored(path) => path,
            Self::Remote(url) => url,
            Self::Placeholder { reference, .. } => reference,
        }
    }

    /// Placeholders are not worth remembering; the next request should try again.
    pub fn is_cacheable(&self) -> bool {
        !matches!(self, Self::Placeholder { .. })
    }

    /// Ready-to-insert `<img>` element for clients that swap markup in place.
    pub fn to_img_element(&self, alt: &str) -> String {
        format!(
            "<img src=\"{}\" alt=\"{}\">",
            escape_attr(self.reference()),
            escape_attr(alt)
        )
    }
}

fn escape_attr(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            other => out.push(other),
        }
    }
    out
}

#[async_trait]
pub trait ImageProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Resolves one prompt. Always yields a displayable result.
    async fn resolve(&self, prompt: &str) -> ImageResult;
}
