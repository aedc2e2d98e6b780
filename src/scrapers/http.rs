use crate::error::FetchError;
use crate::scrapers::traits::Fetcher;
use crate::scrapers::types::HttpFetcherConfig;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tracing::{debug, warn};
use url::Url;

/// Plain HTTP fetcher built on reqwest
pub struct HttpFetcher {
    client: Client,
    api_token: Option<String>,
}

impl HttpFetcher {
    /// Create a fetcher with default settings (30s timeout, browser User-Agent)
    pub fn new() -> Result<Self> {
        Self::with_config(HttpFetcherConfig::default())
    }

    /// Create a fetcher with custom settings
    pub fn with_config(config: HttpFetcherConfig) -> Result<Self> {
        let mut builder = Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent)
            .redirect(reqwest::redirect::Policy::limited(5));

        if let Some(proxy) = &config.proxy {
            let proxy = reqwest::Proxy::all(proxy).context("Invalid proxy URL")?;
            builder = builder.proxy(proxy);
        }

        let client = builder.build().context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            api_token: config.api_token,
        })
    }
}

/// 408, 429 and 5xx may clear up on retry; every other failure status will not
fn classify_status(status: StatusCode) -> Option<FetchError> {
    if status.is_success() {
        return None;
    }
    let message = format!("HTTP {}", status);
    if status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
    {
        Some(FetchError::Transient(message))
    } else {
        Some(FetchError::Permanent(message))
    }
}

fn classify_error(error: &reqwest::Error) -> FetchError {
    if error.is_builder() {
        FetchError::Permanent(error.to_string())
    } else {
        // timeouts, connection resets, body decode hiccups
        FetchError::Transient(error.to_string())
    }
}

fn parse_listing_url(url: &str) -> Result<Url, FetchError> {
    let parsed = Url::parse(url)
        .map_err(|e| FetchError::Permanent(format!("invalid URL {:?}: {}", url, e)))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(FetchError::Permanent(format!(
            "unsupported URL scheme {:?}",
            parsed.scheme()
        )));
    }
    Ok(parsed)
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        let parsed = parse_listing_url(url)?;

        debug!("Fetching URL: {}", parsed);

        let mut request = self.client.get(parsed);
        if let Some(token) = &self.api_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| classify_error(&e))?;

        if let Some(error) = classify_status(response.status()) {
            warn!(url = %url, status = %response.status(), "Listing page returned error status");
            return Err(error);
        }

        let html = response.text().await.map_err(|e| classify_error(&e))?;

        debug!("Downloaded {} bytes of HTML", html.len());

        Ok(html)
    }

    fn name(&self) -> &'static str {
        "http"
    }
}
