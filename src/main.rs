use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use listing_scout::output::{OutputTarget, OutputWriter, RunSummary};
use listing_scout::scrapers::{
    Extractor, HtmlExtractor, HttpFetcher, HttpFetcherConfig, LlmConfig, LlmExtractor,
};
use listing_scout::{Pipeline, PipelineConfig, RetryPolicy, SchemaRegistry};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ExtractorKind {
    /// JSON-LD, selectors and text heuristics
    Html,
    /// OpenAI-compatible chat completions endpoint
    Llm,
}

/// Extract normalized property records from real-estate listing pages
#[derive(Parser, Debug)]
#[command(name = "listing-scout", author, version, about)]
struct Args {
    /// Listing URLs to process
    #[arg(required = true)]
    urls: Vec<String>,

    /// JSON array of emitted records ("-" for stdout)
    #[arg(short, long, default_value = "output.json")]
    output: String,

    /// Write the run summary as JSON
    #[arg(long)]
    summary: Option<PathBuf>,

    /// Also write one envelope file per emitted record here
    #[arg(long)]
    records_dir: Option<PathBuf>,

    #[arg(short, long, value_enum, default_value_t = ExtractorKind::Html)]
    extractor: ExtractorKind,

    /// URLs processed at once
    #[arg(short, long, default_value_t = 4)]
    concurrency: usize,

    /// Fetch attempts per URL, including the first
    #[arg(long, default_value_t = 3)]
    max_attempts: u32,

    #[arg(long, default_value_t = 500)]
    backoff_ms: u64,

    #[arg(long, default_value_t = 8_000)]
    max_backoff_ms: u64,

    /// Backoff growth factor between attempts
    #[arg(long, default_value_t = 2.0)]
    backoff_multiplier: f64,

    /// Cancel URLs still unfinished after this many seconds
    #[arg(long)]
    run_timeout_secs: Option<u64>,

    #[arg(long, default_value_t = 30)]
    request_timeout_secs: u64,

    #[arg(long, env = "FETCH_USER_AGENT")]
    user_agent: Option<String>,

    #[arg(long, env = "FETCH_PROXY")]
    proxy: Option<String>,

    /// Bearer token for a scraping gateway
    #[arg(long, env = "API_TOKEN", hide_env_values = true)]
    api_token: Option<String>,

    #[arg(long, env = "LLM_API_KEY", hide_env_values = true)]
    llm_api_key: Option<String>,

    #[arg(long, env = "LLM_BASE_URL")]
    llm_base_url: Option<String>,

    #[arg(long, env = "LLM_MODEL")]
    llm_model: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    // stdout may carry the records
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    match run(args).await {
        Ok(summary) if summary.emitted > 0 => ExitCode::SUCCESS,
        Ok(_) => {
            warn!("❌ Every URL was rejected");
            ExitCode::from(1)
        }
        Err(e) => {
            error!("{:#}", e);
            ExitCode::from(2)
        }
    }
}

async fn run(args: Args) -> Result<RunSummary> {
    info!("🏠 Listing Scout");
    info!("==========================================");

    let mut fetcher_config = HttpFetcherConfig::default()
        .with_timeout(Duration::from_secs(args.request_timeout_secs))
        .with_proxy(args.proxy)
        .with_api_token(args.api_token);
    if let Some(user_agent) = args.user_agent.filter(|ua| !ua.is_empty()) {
        fetcher_config = fetcher_config.with_user_agent(user_agent);
    }
    let fetcher = HttpFetcher::with_config(fetcher_config).context("Failed to set up fetcher")?;

    let extractor: Arc<dyn Extractor> = match args.extractor {
        ExtractorKind::Html => Arc::new(HtmlExtractor::new()),
        ExtractorKind::Llm => {
            let Some(api_key) = args.llm_api_key.filter(|k| !k.is_empty()) else {
                bail!("--extractor llm needs an API key (--llm-api-key or LLM_API_KEY)");
            };
            let mut config = LlmConfig::new(api_key);
            if let Some(base_url) = args.llm_base_url {
                config = config.with_base_url(base_url);
            }
            if let Some(model) = args.llm_model {
                config = config.with_model(model);
            }
            Arc::new(LlmExtractor::new(config).context("Failed to set up LLM extractor")?)
        }
    };

    let retry = RetryPolicy::default()
        .with_max_attempts(args.max_attempts)
        .with_initial_backoff(Duration::from_millis(args.backoff_ms))
        .with_max_backoff(Duration::from_millis(args.max_backoff_ms))
        .with_multiplier(args.backoff_multiplier);
    let config = PipelineConfig::default()
        .with_retry(retry)
        .with_concurrency(args.concurrency)
        .with_run_timeout(args.run_timeout_secs.map(Duration::from_secs));

    let pipeline = Pipeline::new(
        Arc::new(fetcher),
        extractor,
        Arc::new(SchemaRegistry::new()),
        config,
    );

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("🛑 Interrupted, cancelling unfinished URLs");
            ctrl_c.cancel();
        }
    });

    let outcomes = pipeline.run_with_cancel(&args.urls, cancel).await;
    let summary = RunSummary::from_outcomes(&outcomes);
    summary.log();

    OutputWriter::new(OutputTarget::from(args.output.as_str()))
        .with_summary_path(args.summary)
        .with_records_dir(args.records_dir)
        .write(&outcomes, &summary)
        .await?;

    info!("✅ Done");
    Ok(summary)
}
