pub mod cache;
pub mod config;
pub mod error;
pub mod generator;
pub mod images;
pub mod models;
pub mod placeholder;
pub mod rate_limit;
pub mod resolver;
pub mod server;
pub mod service;
pub mod transport;

pub use crate::cache::PromptImageMap;
pub use crate::error::{PromptPagesError, Result};
pub use crate::images::{ImageMode, ImageProvider, ImageResult};
pub use crate::resolver::{ImageEvent, ImageResolver, Resolution};
pub use crate::service::PagesService;
