//! Schema-validating extraction of real-estate listings.
//!
//! URLs go through a [`Fetcher`](scrapers::Fetcher) and an
//! [`Extractor`](scrapers::Extractor), then the [`Normalizer`](normalizer::Normalizer)
//! and [`Validator`](validator::Validator), and come out as
//! [`PropertyRecord`](models::PropertyRecord)s in input order.

pub mod error;
pub mod models;
pub mod normalizer;
pub mod output;
pub mod pipeline;
pub mod schema;
pub mod scrapers;
pub mod validator;

pub use models::{Field, PropertyRecord, RawFields};
pub use pipeline::{Pipeline, PipelineConfig, RetryPolicy, UrlOutcome};
pub use schema::SchemaRegistry;
