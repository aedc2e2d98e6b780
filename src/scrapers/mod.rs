pub mod html;
pub mod http;
pub mod llm;
pub mod mock;
pub mod traits;
pub mod types;

pub use html::HtmlExtractor;
pub use http::HttpFetcher;
pub use llm::LlmExtractor;
pub use mock::{MockExtractor, MockFetcher};
pub use traits::{Extractor, Fetcher, Page};
pub use types::{HtmlExtractorConfig, HttpFetcherConfig, LlmConfig};
