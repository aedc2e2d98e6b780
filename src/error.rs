//! Typed errors for the extraction pipeline.
//!
//! Collaborator and normalization errors use `thiserror` so the pipeline can
//! match on them; setup code and the binary use `anyhow`.

use crate::models::Field;
use thiserror::Error;

/// Errors returned by a [`Fetcher`](crate::scrapers::Fetcher)
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// Retry may succeed (timeout, connection reset, 5xx, 429)
    #[error("transient fetch error: {0}")]
    Transient(String),

    /// Retry will not help (404, malformed URL)
    #[error("permanent fetch error: {0}")]
    Permanent(String),
}

impl FetchError {
    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::Transient(_))
    }
}

/// Errors returned by an [`Extractor`](crate::scrapers::Extractor)
#[derive(Debug, Error)]
pub enum ExtractError {
    /// Backend (LLM endpoint, parser service) unavailable or failed
    #[error("extractor backend error: {0}")]
    Backend(String),

    /// Backend answered with something that is not a field mapping
    #[error("malformed extractor response: {0}")]
    MalformedResponse(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Per-field normalization failure. Always recovered into the field's slot,
/// never propagated past the normalizer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NormalizationError {
    #[error("{field}: unparsable ({reason})")]
    Unparsable { field: Field, reason: String },

    #[error("{field}: out of range ({value})")]
    OutOfRange { field: Field, value: String },
}

impl NormalizationError {
    pub fn unparsable(field: Field, reason: impl Into<String>) -> Self {
        NormalizationError::Unparsable {
            field,
            reason: reason.into(),
        }
    }

    pub fn detail(&self) -> String {
        match self {
            NormalizationError::Unparsable { reason, .. } => reason.clone(),
            NormalizationError::OutOfRange { value, .. } => value.clone(),
        }
    }
}
