//! Per-URL extraction pipeline.
//!
//! Each URL moves `Pending -> Fetching -> Extracting -> Normalizing ->
//! Validating` and ends `Emitted` or `Rejected`. Only the fetch step is
//! retried. URLs run concurrently up to `concurrency` and come back in input
//! order. Cancellation (run timeout or an external token) rejects every URL
//! that has not yet reached normalization.

mod retry;

pub use retry::RetryPolicy;

use crate::error::FetchError;
use crate::models::{PropertyRecord, RawFields};
use crate::normalizer::Normalizer;
use crate::schema::SchemaRegistry;
use crate::scrapers::{Extractor, Fetcher, Page};
use crate::validator::{Status, ValidationReport, Validator};
use futures::stream::{self, StreamExt};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub retry: RetryPolicy,
    /// URLs processed at once
    pub concurrency: usize,
    /// Whole-run deadline; unfinished URLs are rejected as cancelled
    pub run_timeout: Option<Duration>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            concurrency: 4,
            run_timeout: None,
        }
    }
}

impl PipelineConfig {
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_run_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.run_timeout = timeout;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Pending,
    Fetching,
    Extracting,
    Normalizing,
    Validating,
    Emitted,
    Rejected,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Pending => "pending",
            Stage::Fetching => "fetching",
            Stage::Extracting => "extracting",
            Stage::Normalizing => "normalizing",
            Stage::Validating => "validating",
            Stage::Emitted => "emitted",
            Stage::Rejected => "rejected",
        };
        f.write_str(name)
    }
}

/// Why a URL produced no record
#[derive(Debug, Clone, PartialEq)]
pub enum RejectReason {
    /// Transient fetch failures on every allowed attempt
    FetchExhausted { attempts: u32, last_error: String },
    /// Fetch failure that retrying cannot fix
    FetchFailed(String),
    Validation(ValidationReport),
    Cancelled,
}

impl RejectReason {
    /// Short reason codes for the run summary
    pub fn codes(&self) -> Vec<String> {
        match self {
            RejectReason::FetchExhausted { .. } => vec!["fetch_exhausted".to_string()],
            RejectReason::FetchFailed(_) => vec!["fetch_failed".to_string()],
            RejectReason::Validation(report) => report.rejection_reasons(),
            RejectReason::Cancelled => vec!["cancelled".to_string()],
        }
    }

    pub fn detail(&self) -> Option<String> {
        match self {
            RejectReason::FetchExhausted {
                attempts,
                last_error,
            } => Some(format!("{} attempts, last error: {}", attempts, last_error)),
            RejectReason::FetchFailed(error) => Some(error.clone()),
            RejectReason::Validation(_) | RejectReason::Cancelled => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Emitted {
        record: PropertyRecord,
        report: ValidationReport,
    },
    Rejected(RejectReason),
}

/// Terminal result for one input URL
#[derive(Debug, Clone, PartialEq)]
pub struct UrlOutcome {
    pub url: String,
    pub outcome: Outcome,
}

impl UrlOutcome {
    fn rejected(url: &str, reason: RejectReason) -> Self {
        Self {
            url: url.to_string(),
            outcome: Outcome::Rejected(reason),
        }
    }

    pub fn record(&self) -> Option<&PropertyRecord> {
        match &self.outcome {
            Outcome::Emitted { record, .. } => Some(record),
            Outcome::Rejected(_) => None,
        }
    }

    pub fn status(&self) -> Status {
        match &self.outcome {
            Outcome::Emitted { report, .. } => report.status,
            Outcome::Rejected(_) => Status::Rejected,
        }
    }

    pub fn is_emitted(&self) -> bool {
        matches!(self.outcome, Outcome::Emitted { .. })
    }
}

pub struct Pipeline {
    fetcher: Arc<dyn Fetcher>,
    extractor: Arc<dyn Extractor>,
    normalizer: Normalizer,
    validator: Validator,
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(
        fetcher: Arc<dyn Fetcher>,
        extractor: Arc<dyn Extractor>,
        registry: Arc<SchemaRegistry>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            fetcher,
            extractor,
            normalizer: Normalizer::new(Arc::clone(&registry)),
            validator: Validator::new(registry),
            config,
        }
    }

    /// Replace the validator, e.g. to pin the current year
    pub fn with_validator(mut self, validator: Validator) -> Self {
        self.validator = validator;
        self
    }

    pub async fn run(&self, urls: &[String]) -> Vec<UrlOutcome> {
        self.run_with_cancel(urls, CancellationToken::new()).await
    }

    /// Process every URL; the result has one entry per input, in input order
    pub async fn run_with_cancel(&self, urls: &[String], cancel: CancellationToken) -> Vec<UrlOutcome> {
        let token = cancel.child_token();

        let timer = self.config.run_timeout.map(|timeout| {
            let token = token.clone();
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                warn!("⏱️  Run timeout of {:?} reached, cancelling unfinished URLs", timeout);
                token.cancel();
            })
        });

        info!(
            "🔎 Processing {} URLs with {} via {} (concurrency {})",
            urls.len(),
            self.extractor.name(),
            self.fetcher.name(),
            self.config.concurrency
        );

        let mut outcomes: Vec<(usize, UrlOutcome)> = stream::iter(urls.iter().enumerate())
            .map(|(index, url)| {
                let token = token.clone();
                async move { (index, self.process(url, &token).await) }
            })
            .buffer_unordered(self.config.concurrency.max(1))
            .collect()
            .await;

        if let Some(timer) = timer {
            timer.abort();
        }

        outcomes.sort_by_key(|(index, _)| *index);
        outcomes.into_iter().map(|(_, outcome)| outcome).collect()
    }

    async fn process(&self, url: &str, token: &CancellationToken) -> UrlOutcome {
        debug!(url = %url, stage = %Stage::Pending, "Queued");
        if token.is_cancelled() {
            return self.reject(url, RejectReason::Cancelled);
        }

        let content = match self.fetch_with_retry(url, token).await {
            Ok(content) => content,
            Err(reason) => return self.reject(url, reason),
        };

        debug!(url = %url, stage = %Stage::Extracting, "Extracting fields");
        let page = Page::new(url, content);
        let extracted = tokio::select! {
            biased;
            _ = token.cancelled() => return self.reject(url, RejectReason::Cancelled),
            result = self.extractor.extract(&page) => result,
        };
        let raw = match extracted {
            Ok(raw) => raw,
            Err(e) => {
                warn!(url = %url, extractor = self.extractor.name(), error = %e, "Extraction failed, continuing with no candidates");
                RawFields::new()
            }
        };

        debug!(url = %url, stage = %Stage::Normalizing, candidates = raw.len(), "Normalizing");
        let source_url = Url::parse(url).ok();
        let normalized = self.normalizer.normalize(&raw, source_url.as_ref());

        debug!(url = %url, stage = %Stage::Validating, "Validating");
        let (record, report) = self.validator.validate(&normalized);

        if !report.status.is_emittable() {
            return self.reject(url, RejectReason::Validation(report));
        }

        info!(url = %url, stage = %Stage::Emitted, status = ?report.status, issues = report.issues.len(), "Record emitted");
        UrlOutcome {
            url: url.to_string(),
            outcome: Outcome::Emitted { record, report },
        }
    }

    async fn fetch_with_retry(&self, url: &str, token: &CancellationToken) -> Result<String, RejectReason> {
        let retry = &self.config.retry;
        let mut attempt = 0;

        loop {
            attempt += 1;
            debug!(url = %url, stage = %Stage::Fetching, attempt, "Fetching");

            let result = tokio::select! {
                biased;
                _ = token.cancelled() => return Err(RejectReason::Cancelled),
                result = self.fetcher.fetch(url) => result,
            };

            match result {
                Ok(content) => return Ok(content),
                Err(FetchError::Permanent(error)) => {
                    return Err(RejectReason::FetchFailed(error));
                }
                Err(FetchError::Transient(error)) => {
                    if !retry.should_retry(attempt) {
                        return Err(RejectReason::FetchExhausted {
                            attempts: attempt,
                            last_error: error,
                        });
                    }
                    let delay = retry.delay_for(attempt);
                    warn!(url = %url, attempt, error = %error, "Transient fetch failure, retrying in {:?}", delay);
                    tokio::select! {
                        biased;
                        _ = token.cancelled() => return Err(RejectReason::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    fn reject(&self, url: &str, reason: RejectReason) -> UrlOutcome {
        warn!(url = %url, stage = %Stage::Rejected, reasons = ?reason.codes(), "URL rejected");
        UrlOutcome::rejected(url, reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::RunSummary;
    use crate::scrapers::{MockExtractor, MockFetcher};
    use crate::validator::IssueKind;
    use std::time::Instant;

    fn listing(address: &str) -> String {
        serde_json::json!({
            "address": address,
            "price": "$450,000",
            "bedrooms": 3,
            "bathrooms": "2.5",
            "square_feet": "1,850 sq ft",
            "lot_size": "0.25 acres",
            "year_built": 1989,
            "property_type": "Single Family",
            "listing_agent": "Jane Doe",
            "days_on_market": 12,
            "mls_number": "ML123",
            "description": "Nice house",
            "image_urls": ["https://img.test/1.jpg"],
            "neighborhood": "Downtown"
        })
        .to_string()
    }

    fn fast_retry() -> PipelineConfig {
        PipelineConfig::default().with_retry(
            RetryPolicy::default()
                .with_max_attempts(3)
                .with_initial_backoff(Duration::from_millis(1))
                .with_max_backoff(Duration::from_millis(5)),
        )
    }

    fn pipeline(fetcher: &MockFetcher, extractor: &MockExtractor, config: PipelineConfig) -> Pipeline {
        Pipeline::new(
            Arc::new(fetcher.clone()),
            Arc::new(extractor.clone()),
            Arc::new(SchemaRegistry::new()),
            config,
        )
        .with_validator(Validator::new(Arc::new(SchemaRegistry::new())).with_current_year(2025))
    }

    fn urls(list: &[&str]) -> Vec<String> {
        list.iter().map(|u| u.to_string()).collect()
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let url = "https://a.test/1";
        let fetcher = MockFetcher::new().with_outcomes(
            url,
            vec![
                Err(FetchError::Transient("503".into())),
                Err(FetchError::Transient("timeout".into())),
                Ok(listing("1 Main St")),
            ],
        );
        let outcomes = pipeline(&fetcher, &MockExtractor::new(), fast_retry())
            .run(&urls(&[url]))
            .await;

        assert_eq!(fetcher.call_count(url), 3);
        assert_eq!(outcomes[0].status(), Status::Complete);
    }

    #[tokio::test]
    async fn test_retry_exhaustion_rejects() {
        let url = "https://a.test/1";
        let fetcher = MockFetcher::new().with_outcomes(url, vec![Err(FetchError::Transient("503".into()))]);
        let outcomes = pipeline(&fetcher, &MockExtractor::new(), fast_retry())
            .run(&urls(&[url]))
            .await;

        assert_eq!(fetcher.call_count(url), 3);
        match &outcomes[0].outcome {
            Outcome::Rejected(RejectReason::FetchExhausted { attempts, last_error }) => {
                assert_eq!(*attempts, 3);
                assert_eq!(last_error, "503");
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_backoff_spaces_attempts() {
        let url = "https://a.test/1";
        let fetcher = MockFetcher::new().with_outcomes(url, vec![Err(FetchError::Transient("503".into()))]);
        let config = PipelineConfig::default().with_retry(
            RetryPolicy::default()
                .with_max_attempts(3)
                .with_initial_backoff(Duration::from_millis(20))
                .with_max_backoff(Duration::from_millis(30)),
        );
        pipeline(&fetcher, &MockExtractor::new(), config)
            .run(&urls(&[url]))
            .await;

        let times = fetcher.call_times(url);
        assert_eq!(times.len(), 3);
        assert!(times[1] - times[0] >= Duration::from_millis(20));
        assert!(times[2] - times[1] >= Duration::from_millis(30));
    }

    #[tokio::test]
    async fn test_permanent_failure_is_not_retried() {
        let url = "https://a.test/gone";
        let fetcher = MockFetcher::new().with_outcomes(url, vec![Err(FetchError::Permanent("HTTP 404".into()))]);
        let outcomes = pipeline(&fetcher, &MockExtractor::new(), fast_retry())
            .run(&urls(&[url]))
            .await;

        assert_eq!(fetcher.call_count(url), 1);
        assert_eq!(
            outcomes[0].outcome,
            Outcome::Rejected(RejectReason::FetchFailed("HTTP 404".into()))
        );
    }

    #[tokio::test]
    async fn test_failures_are_isolated() {
        let list = urls(&[
            "https://a.test/1",
            "https://a.test/2",
            "https://a.test/3",
            "https://a.test/4",
            "https://a.test/5",
        ]);
        let fetcher = MockFetcher::new()
            .with_page(&list[0], listing("1 Main St"))
            .with_outcomes(&list[1], vec![Err(FetchError::Permanent("HTTP 404".into()))])
            .with_page(&list[2], listing("3 Main St"))
            .with_outcomes(&list[3], vec![Err(FetchError::Permanent("HTTP 410".into()))])
            .with_page(&list[4], listing("5 Main St"));

        let outcomes = pipeline(&fetcher, &MockExtractor::new(), fast_retry()).run(&list).await;

        let emitted: Vec<_> = outcomes.iter().filter(|o| o.is_emitted()).collect();
        assert_eq!(emitted.len(), 3);
        assert_eq!(outcomes.len(), 5);
        assert!(!outcomes[1].is_emitted());
        assert!(!outcomes[3].is_emitted());

        let summary = RunSummary::from_outcomes(&outcomes);
        assert_eq!(summary.emitted, 3);
        assert_eq!(summary.rejected, 2);
        let rejected_urls: Vec<_> = summary.rejections.iter().map(|r| r.url.as_str()).collect();
        assert_eq!(rejected_urls, vec!["https://a.test/2", "https://a.test/4"]);
        assert!(summary.rejections.iter().all(|r| r.reasons == vec!["fetch_failed"]));
    }

    #[tokio::test]
    async fn test_overflowing_price_does_not_abort_batch() {
        let list = urls(&["https://a.test/good", "https://a.test/huge"]);
        let fetcher = MockFetcher::new()
            .with_page(&list[0], listing("1 Main St"))
            .with_page(
                &list[1],
                serde_json::json!({
                    "address": "2 Main St",
                    "price": "$79,228,162,514,264,337,593,543,950B"
                })
                .to_string(),
            );

        let outcomes = pipeline(&fetcher, &MockExtractor::new(), fast_retry()).run(&list).await;

        assert_eq!(outcomes.len(), 2);
        assert_eq!(outcomes[0].status(), Status::Complete);
        assert_eq!(outcomes[1].status(), Status::Partial);
        let record = outcomes[1].record().expect("record emitted");
        assert_eq!(record.price, None);
        match &outcomes[1].outcome {
            Outcome::Emitted { report, .. } => {
                assert!(report
                    .issues
                    .iter()
                    .any(|i| i.field == crate::models::Field::Price && i.kind == IssueKind::OutOfRange));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_output_keeps_input_order() {
        let list = urls(&["https://a.test/A", "https://a.test/B", "https://a.test/C"]);
        let fetcher = MockFetcher::new()
            .with_page(&list[0], listing("A St"))
            .with_delay(&list[0], Duration::from_millis(60))
            .with_page(&list[1], listing("B St"))
            .with_page(&list[2], listing("C St"))
            .with_delay(&list[2], Duration::from_millis(30));

        let outcomes = pipeline(&fetcher, &MockExtractor::new(), fast_retry().with_concurrency(3))
            .run(&list)
            .await;

        let addresses: Vec<_> = outcomes
            .iter()
            .map(|o| o.record().and_then(|r| r.address.clone()).unwrap_or_default())
            .collect();
        assert_eq!(addresses, vec!["A St", "B St", "C St"]);
    }

    #[tokio::test]
    async fn test_run_timeout_cancels_slow_urls() {
        let list = urls(&["https://a.test/fast", "https://a.test/slow"]);
        let fetcher = MockFetcher::new()
            .with_page(&list[0], listing("Fast St"))
            .with_page(&list[1], listing("Slow St"))
            .with_delay(&list[1], Duration::from_secs(10));

        let config = fast_retry().with_run_timeout(Some(Duration::from_millis(100)));
        let started = Instant::now();
        let outcomes = pipeline(&fetcher, &MockExtractor::new(), config).run(&list).await;

        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(outcomes[0].is_emitted());
        assert_eq!(outcomes[1].outcome, Outcome::Rejected(RejectReason::Cancelled));
    }

    #[tokio::test]
    async fn test_external_cancellation_during_backoff() {
        let url = "https://a.test/1";
        let fetcher = MockFetcher::new().with_outcomes(url, vec![Err(FetchError::Transient("503".into()))]);
        let config = PipelineConfig::default().with_retry(
            RetryPolicy::default()
                .with_max_attempts(5)
                .with_initial_backoff(Duration::from_secs(30)),
        );
        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });

        let outcomes = pipeline(&fetcher, &MockExtractor::new(), config)
            .run_with_cancel(&urls(&[url]), token)
            .await;

        assert_eq!(fetcher.call_count(url), 1);
        assert_eq!(outcomes[0].outcome, Outcome::Rejected(RejectReason::Cancelled));
    }

    #[tokio::test]
    async fn test_extractor_failure_yields_missing_address() {
        let url = "https://a.test/1";
        let fetcher = MockFetcher::new().with_page(url, listing("1 Main St"));
        let extractor = MockExtractor::new().failing_for(url);
        let outcomes = pipeline(&fetcher, &extractor, fast_retry()).run(&urls(&[url])).await;

        match &outcomes[0].outcome {
            Outcome::Rejected(reason) => {
                assert_eq!(reason.codes(), vec!["missing_required:address".to_string()]);
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(extractor.call_count(), 1);
    }

    #[tokio::test]
    async fn test_missing_optional_field_is_partial() {
        let url = "https://a.test/1";
        let fetcher = MockFetcher::new().with_page(
            url,
            serde_json::json!({"address": "9 Elm St", "bedrooms": "N/A"}).to_string(),
        );
        let outcomes = pipeline(&fetcher, &MockExtractor::new(), fast_retry())
            .run(&urls(&[url]))
            .await;

        assert_eq!(outcomes[0].status(), Status::Partial);
        assert_eq!(outcomes[0].record().and_then(|r| r.bedrooms), None);
    }
}
