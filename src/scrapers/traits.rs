use crate::error::{ExtractError, FetchError};
use crate::models::RawFields;
use async_trait::async_trait;

/// A fetched listing page
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    /// The URL the page was requested from
    pub url: String,
    /// Raw page content (HTML or text)
    pub content: String,
}

impl Page {
    pub fn new(url: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            content: content.into(),
        }
    }
}

/// Retrieves raw page content for a URL.
/// This allows swapping plain HTTP for a rendering or unblocking service.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<String, FetchError>;

    /// Name used in logs
    fn name(&self) -> &'static str;
}

/// Turns raw page content into candidate field values.
/// Implementations may be rule-based or LLM-backed; missing and extra keys are fine.
#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract(&self, page: &Page) -> Result<RawFields, ExtractError>;

    /// Name used in logs
    fn name(&self) -> &'static str;
}
