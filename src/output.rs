use crate::models::PropertyRecord;
use crate::pipeline::{Outcome, UrlOutcome};
use crate::validator::Status;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

pub const SCHEMA_VERSION: &str = "1.0";

/// A URL that produced no record, with the reasons why
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RejectedUrl {
    pub url: String,
    /// e.g. `missing_required:address`, `fetch_exhausted`, `cancelled`
    pub reasons: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub extracted_at: DateTime<Utc>,
    pub schema_version: String,
    pub total: usize,
    pub emitted: usize,
    pub complete: usize,
    pub partial: usize,
    pub rejected: usize,
    pub rejections: Vec<RejectedUrl>,
}

impl RunSummary {
    pub fn from_outcomes(outcomes: &[UrlOutcome]) -> Self {
        let count = |status: Status| outcomes.iter().filter(|o| o.status() == status).count();

        let rejections = outcomes
            .iter()
            .filter_map(|o| match &o.outcome {
                Outcome::Rejected(reason) => Some(RejectedUrl {
                    url: o.url.clone(),
                    reasons: reason.codes(),
                    detail: reason.detail(),
                }),
                Outcome::Emitted { .. } => None,
            })
            .collect::<Vec<_>>();

        let complete = count(Status::Complete);
        let partial = count(Status::Partial);

        Self {
            extracted_at: Utc::now(),
            schema_version: SCHEMA_VERSION.to_string(),
            total: outcomes.len(),
            emitted: complete + partial,
            complete,
            partial,
            rejected: rejections.len(),
            rejections,
        }
    }

    pub fn log(&self) {
        info!(
            "📊 {} URLs: {} emitted ({} complete, {} partial), {} rejected",
            self.total, self.emitted, self.complete, self.partial, self.rejected
        );
        for rejection in &self.rejections {
            warn!(url = %rejection.url, reasons = %rejection.reasons.join(", "), "Rejected");
        }
    }
}

/// Per-record file written to the records directory
#[derive(Debug, Serialize)]
struct RecordEnvelope<'a> {
    metadata: EnvelopeMetadata<'a>,
    data: &'a PropertyRecord,
}

#[derive(Debug, Serialize)]
struct EnvelopeMetadata<'a> {
    extracted_at: DateTime<Utc>,
    source_url: &'a str,
    schema_version: &'static str,
    status: Status,
}

#[derive(Debug, Clone, PartialEq)]
pub enum OutputTarget {
    Stdout,
    File(PathBuf),
}

impl From<&str> for OutputTarget {
    /// `-` means stdout
    fn from(value: &str) -> Self {
        if value == "-" {
            OutputTarget::Stdout
        } else {
            OutputTarget::File(PathBuf::from(value))
        }
    }
}

#[derive(Debug, Clone)]
pub struct OutputWriter {
    output: OutputTarget,
    summary_path: Option<PathBuf>,
    records_dir: Option<PathBuf>,
}

impl OutputWriter {
    pub fn new(output: OutputTarget) -> Self {
        Self {
            output,
            summary_path: None,
            records_dir: None,
        }
    }

    pub fn with_summary_path(mut self, path: Option<PathBuf>) -> Self {
        self.summary_path = path;
        self
    }

    pub fn with_records_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.records_dir = dir;
        self
    }

    /// Emitted records in input order; rejected URLs are left out
    pub fn render_records(outcomes: &[UrlOutcome]) -> Result<String> {
        let records: Vec<&PropertyRecord> = outcomes.iter().filter_map(UrlOutcome::record).collect();
        serde_json::to_string_pretty(&records).context("Failed to serialize records")
    }

    pub async fn write(&self, outcomes: &[UrlOutcome], summary: &RunSummary) -> Result<()> {
        let json = Self::render_records(outcomes)?;

        match &self.output {
            OutputTarget::Stdout => {
                let mut stdout = tokio::io::stdout();
                stdout.write_all(json.as_bytes()).await?;
                stdout.write_all(b"\n").await?;
                stdout.flush().await?;
            }
            OutputTarget::File(path) => {
                write_file(path, json).await?;
                info!("💾 Saved {} records to {}", summary.emitted, path.display());
            }
        }

        if let Some(path) = &self.summary_path {
            let json = serde_json::to_string_pretty(summary).context("Failed to serialize summary")?;
            write_file(path, json).await?;
            info!("💾 Saved run summary to {}", path.display());
        }

        if let Some(dir) = &self.records_dir {
            let written = write_envelopes(dir, outcomes, summary.extracted_at).await?;
            info!("💾 Saved {} individual record files to {}", written, dir.display());
        }

        Ok(())
    }
}

async fn write_file(path: &Path, contents: String) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    tokio::fs::write(path, contents)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))
}

async fn write_envelopes(dir: &Path, outcomes: &[UrlOutcome], extracted_at: DateTime<Utc>) -> Result<usize> {
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("Failed to create {}", dir.display()))?;

    let mut written = 0;
    for (index, outcome) in outcomes.iter().enumerate() {
        let Outcome::Emitted { record, report } = &outcome.outcome else {
            continue;
        };
        let envelope = RecordEnvelope {
            metadata: EnvelopeMetadata {
                extracted_at,
                source_url: &outcome.url,
                schema_version: SCHEMA_VERSION,
                status: report.status,
            },
            data: record,
        };
        let json = serde_json::to_string_pretty(&envelope)?;
        // position in the input list keeps names stable across reruns
        let filename = dir.join(format!("listing_{:03}.json", index + 1));
        write_file(&filename, json).await?;
        written += 1;
    }
    Ok(written)
}
