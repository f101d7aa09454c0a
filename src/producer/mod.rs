//! Document producer: optional step that fills the input directory.
//!
//! For each `(recipient_address, recipient_id)` row of a procedure, fetch
//! the document from the templated endpoint and write it as
//! `<dir>/<recipient_address>.pdf`. Only HTTP 200 produces a file; other
//! statuses and per-row fetch errors are skipped without an audit record.

pub mod source;

pub use source::{LibSqlSource, RecipientRow, RecipientSource};

use std::path::Path;
use std::time::Duration;

use reqwest::StatusCode;
use serde::Serialize;
use tokio::fs;
use tracing::{debug, info, warn};

use crate::config::PipelineConfig;
use crate::error::ProducerError;
use crate::pipeline::extract::document_path;

const ID_PLACEHOLDER: &str = "{id}";
const FETCH_TIMEOUT: Duration = Duration::from_secs(60);

/// Document endpoint with an optional `{id}` placeholder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointTemplate(String);

impl EndpointTemplate {
    pub fn new(template: impl Into<String>) -> Self {
        Self(template.into())
    }

    /// URL for one recipient id. Without a placeholder the id is appended.
    pub fn url_for(&self, recipient_id: &str) -> String {
        if self.0.contains(ID_PLACEHOLDER) {
            self.0.replace(ID_PLACEHOLDER, recipient_id)
        } else {
            format!("{}{recipient_id}", self.0)
        }
    }
}

/// What a producer run did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProduceReport {
    pub rows: usize,
    pub written: usize,
    /// Rows whose endpoint answered with something other than 200.
    pub skipped: usize,
    /// Rows whose request or write failed.
    pub failed: usize,
}

/// Fetches one document per recipient row.
pub struct DocumentProducer<S: RecipientSource> {
    source: S,
    client: reqwest::Client,
    endpoint: EndpointTemplate,
}

impl<S: RecipientSource> DocumentProducer<S> {
    pub fn new(source: S, endpoint: EndpointTemplate) -> Result<Self, ProducerError> {
        let client = reqwest::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .build()
            .map_err(|e| ProducerError::Http(e.to_string()))?;
        Ok(Self {
            source,
            client,
            endpoint,
        })
    }

    /// Run `procedure` and write its documents into `target_dir`.
    ///
    /// Fails only when the directory cannot be created or the source
    /// cannot be queried.
    pub async fn produce(
        &self,
        procedure: &str,
        target_dir: &Path,
    ) -> Result<ProduceReport, ProducerError> {
        fs::create_dir_all(target_dir).await?;
        let rows = self.source.rows(procedure).await?;

        let mut report = ProduceReport {
            rows: rows.len(),
            ..Default::default()
        };

        for row in &rows {
            if !is_safe_file_stem(&row.recipient_address) {
                warn!(address = %row.recipient_address, "Address is not usable as a filename; skipping");
                report.failed += 1;
                continue;
            }

            let url = self.endpoint.url_for(&row.recipient_id);
            let response = match self.client.get(&url).send().await {
                Ok(response) => response,
                Err(e) => {
                    warn!(url = %url, error = %e, "Document request failed; skipping");
                    report.failed += 1;
                    continue;
                }
            };

            if response.status() != StatusCode::OK {
                debug!(url = %url, status = %response.status(), "No document for recipient");
                report.skipped += 1;
                continue;
            }

            let bytes = match response.bytes().await {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!(url = %url, error = %e, "Reading document body failed; skipping");
                    report.failed += 1;
                    continue;
                }
            };

            let path = document_path(target_dir, &row.recipient_address);
            if let Err(e) = fs::write(&path, &bytes).await {
                warn!(path = %path.display(), error = %e, "Writing document failed; skipping");
                report.failed += 1;
                continue;
            }
            report.written += 1;
        }

        info!(
            procedure,
            rows = report.rows,
            written = report.written,
            skipped = report.skipped,
            failed = report.failed,
            "Document generation complete"
        );
        Ok(report)
    }
}

/// Fill `target_dir` from `procedure` using the configured data source and
/// document endpoint.
///
/// Missing producer settings surface as [`Error::Config`](crate::error::Error::Config),
/// everything else as [`Error::Producer`](crate::error::Error::Producer).
pub async fn generate_documents(
    config: &PipelineConfig,
    procedure: &str,
    target_dir: &Path,
) -> crate::error::Result<ProduceReport> {
    let endpoint = EndpointTemplate::new(config.require_endpoint()?);
    let source = LibSqlSource::open(config.require_dsn()?).await?;
    let producer = DocumentProducer::new(source, endpoint)?;
    Ok(producer.produce(procedure, target_dir).await?)
}

/// A recipient address must stay a single path component.
fn is_safe_file_stem(address: &str) -> bool {
    !address.is_empty()
        && address != "."
        && address != ".."
        && !address.contains(['/', '\\', '\0'])
}
