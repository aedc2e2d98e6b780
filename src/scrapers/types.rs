use std::time::Duration;

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36";

/// Settings for the HTTP fetcher
#[derive(Debug, Clone)]
pub struct HttpFetcherConfig {
    /// User-Agent header sent with every request
    pub user_agent: String,
    /// Per-request timeout
    pub timeout: Duration,
    /// Optional proxy URL for all requests
    pub proxy: Option<String>,
    /// Optional bearer token for a scraping gateway
    pub api_token: Option<String>,
}

impl Default for HttpFetcherConfig {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout: Duration::from_secs(30),
            proxy: None,
            api_token: None,
        }
    }
}

impl HttpFetcherConfig {
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_proxy(mut self, proxy: Option<String>) -> Self {
        self.proxy = proxy.filter(|p| !p.is_empty());
        self
    }

    pub fn with_api_token(mut self, token: Option<String>) -> Self {
        self.api_token = token.filter(|t| !t.is_empty());
        self
    }
}

/// Settings for the rule-based HTML extractor
#[derive(Debug, Clone)]
pub struct HtmlExtractorConfig {
    /// Maximum number of image URLs to collect per page
    pub max_images: usize,
}

impl Default for HtmlExtractorConfig {
    fn default() -> Self {
        Self { max_images: 20 }
    }
}

/// Settings for an OpenAI-compatible chat completions endpoint
#[derive(Clone)]
pub struct LlmConfig {
    pub api_key: String,
    /// Base URL up to and including `/v1`
    pub base_url: String,
    pub model: String,
    pub timeout: Duration,
    /// Page content beyond this many characters is cut before prompting
    pub max_input_chars: usize,
}

impl std::fmt::Debug for LlmConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmConfig")
            .field("api_key", &"<redacted>")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("timeout", &self.timeout)
            .field("max_input_chars", &self.max_input_chars)
            .finish()
    }
}

impl LlmConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            timeout: Duration::from_secs(60),
            max_input_chars: 40_000,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }
}
