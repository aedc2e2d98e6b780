//! Scripted collaborators for tests.
//!
//! `MockFetcher` replays a per-URL sequence of outcomes; once the sequence is
//! down to its last entry that entry repeats. `MockExtractor` reads the page
//! content as a JSON object of candidate fields.

use crate::error::{ExtractError, FetchError};
use crate::models::RawFields;
use crate::scrapers::traits::{Extractor, Fetcher, Page};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Default)]
struct Script {
    outcomes: VecDeque<Result<String, FetchError>>,
    delay: Duration,
}

/// Fetcher with canned responses per URL
#[derive(Default, Clone)]
pub struct MockFetcher {
    scripts: Arc<RwLock<HashMap<String, Script>>>,
    /// (url, time of call) in call order
    calls: Arc<RwLock<Vec<(String, Instant)>>>,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every fetch of `url` succeeds with `content`
    pub fn with_page(self, url: &str, content: impl Into<String>) -> Self {
        self.with_outcomes(url, vec![Ok(content.into())])
    }

    /// Fetches of `url` return these outcomes in order, the last one repeating
    pub fn with_outcomes(self, url: &str, outcomes: Vec<Result<String, FetchError>>) -> Self {
        self.scripts
            .write()
            .unwrap()
            .entry(url.to_string())
            .or_default()
            .outcomes = outcomes.into();
        self
    }

    /// Every fetch of `url` waits this long before answering
    pub fn with_delay(self, url: &str, delay: Duration) -> Self {
        self.scripts
            .write()
            .unwrap()
            .entry(url.to_string())
            .or_default()
            .delay = delay;
        self
    }

    pub fn call_count(&self, url: &str) -> usize {
        self.calls.read().unwrap().iter().filter(|(u, _)| u == url).count()
    }

    /// When each fetch of `url` started
    pub fn call_times(&self, url: &str) -> Vec<Instant> {
        self.calls
            .read()
            .unwrap()
            .iter()
            .filter(|(u, _)| u == url)
            .map(|(_, at)| *at)
            .collect()
    }

    fn next_outcome(&self, url: &str) -> (Duration, Result<String, FetchError>) {
        let mut scripts = self.scripts.write().unwrap();
        let Some(script) = scripts.get_mut(url) else {
            return (
                Duration::ZERO,
                Err(FetchError::Permanent(format!("no scripted response for {}", url))),
            );
        };
        let outcome = if script.outcomes.len() > 1 {
            script.outcomes.pop_front()
        } else {
            script.outcomes.front().cloned()
        };
        let outcome = outcome.unwrap_or_else(|| Err(FetchError::Permanent("empty script".into())));
        (script.delay, outcome)
    }
}

#[async_trait]
impl Fetcher for MockFetcher {
    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        self.calls
            .write()
            .unwrap()
            .push((url.to_string(), Instant::now()));

        let (delay, outcome) = self.next_outcome(url);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        outcome
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

/// Extractor that parses page content as a JSON object of fields
#[derive(Default, Clone)]
pub struct MockExtractor {
    failing: Arc<RwLock<HashSet<String>>>,
    calls: Arc<RwLock<Vec<String>>>,
}

impl MockExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Extraction of `url` fails with a backend error
    pub fn failing_for(self, url: &str) -> Self {
        self.failing.write().unwrap().insert(url.to_string());
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.read().unwrap().len()
    }
}

#[async_trait]
impl Extractor for MockExtractor {
    async fn extract(&self, page: &Page) -> Result<RawFields, ExtractError> {
        self.calls.write().unwrap().push(page.url.clone());

        if self.failing.read().unwrap().contains(&page.url) {
            return Err(ExtractError::Backend("scripted failure".into()));
        }

        match serde_json::from_str::<serde_json::Value>(&page.content)? {
            serde_json::Value::Object(map) => Ok(map.into_iter().collect()),
            _ => Err(ExtractError::MalformedResponse("page is not a JSON object".into())),
        }
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_outcomes_replay_then_repeat_last() {
        let fetcher = MockFetcher::new().with_outcomes(
            "https://a.test/1",
            vec![
                Err(FetchError::Transient("timeout".into())),
                Ok("<html/>".into()),
            ],
        );

        assert!(fetcher.fetch("https://a.test/1").await.is_err());
        assert_eq!(fetcher.fetch("https://a.test/1").await.unwrap(), "<html/>");
        assert_eq!(fetcher.fetch("https://a.test/1").await.unwrap(), "<html/>");
        assert_eq!(fetcher.call_count("https://a.test/1"), 3);
    }

    #[tokio::test]
    async fn test_unknown_url_is_permanent() {
        let fetcher = MockFetcher::new();
        let err = fetcher.fetch("https://nowhere.test").await.unwrap_err();
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_extractor_reads_json_object() {
        let extractor = MockExtractor::new();
        let fields = extractor
            .extract(&Page::new("u", r#"{"address": "1 Main St"}"#))
            .await
            .unwrap();
        assert_eq!(fields["address"], "1 Main St");

        let failing = MockExtractor::new().failing_for("u");
        assert!(failing.extract(&Page::new("u", "{}")).await.is_err());
        assert_eq!(failing.call_count(), 1);
    }
}
