//! Document distribution pipeline.
//!
//! Strict sequence, no overlap between stages:
//! 1. `extract`: list `<dir>/*.pdf` into candidate identities
//! 2. `validate`: drop malformed candidates, dedup and sort
//! 3. `stage`: reset `<dir>/valid_pdfs/` and copy renamed documents
//! 4. `dispatch`: one mail session, one message per staged document
//!
//! Fatal points: missing input directory, blocked staging reset, failed
//! session login. Everything else is recorded per recipient.

pub mod extract;
pub mod stage;
pub mod types;
pub mod validate;

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, info_span};
use uuid::Uuid;

use crate::audit::AuditSink;
use crate::dispatch::{DispatchEngine, MailTransport, RecipientOutcome};
use crate::error::Result;
use crate::pipeline::extract::RawArtifacts;
use crate::pipeline::stage::Stager;

/// Summary of one run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub input_dir: PathBuf,
    pub dry_run: bool,
    /// Document artifacts found in the input directory.
    pub candidates: usize,
    /// Candidates that failed validation.
    pub rejected: usize,
    /// Distinct valid recipients.
    pub recipients: usize,
    pub staged: usize,
    pub sent: usize,
    pub skipped: usize,
    pub failed: usize,
    pub outcomes: Vec<RecipientOutcome>,
}

/// Run extract → validate → stage → dispatch over `input_dir`.
pub fn run_pipeline<T: MailTransport>(
    input_dir: &Path,
    display_prefix: &str,
    engine: &mut DispatchEngine<T>,
    sink: &dyn AuditSink,
) -> Result<RunReport> {
    let run_id = Uuid::new_v4();
    let started_at = Utc::now();
    let span = info_span!("run", %run_id, dry_run = engine.is_dry_run());
    let _enter = span.enter();

    let raw = RawArtifacts::open(input_dir)?;
    let candidates = raw.candidates()?;
    let rejected = candidates
        .iter()
        .filter(|c| !validate::validate(c))
        .count();
    info!(candidates = candidates.len(), dir = %input_dir.display(), "Collected candidates");

    let recipients = validate::validate_all(&candidates, sink);
    info!(recipients = recipients.len(), rejected, "Validated recipients");

    let stager = Stager::new(input_dir, display_prefix);
    let staged = stager.stage(&recipients, sink)?;

    let report = engine.run(&staged, sink)?;

    Ok(RunReport {
        run_id,
        started_at,
        finished_at: Utc::now(),
        input_dir: input_dir.to_path_buf(),
        dry_run: engine.is_dry_run(),
        candidates: candidates.len(),
        rejected,
        recipients: recipients.len(),
        staged: staged.len(),
        sent: report.sent(),
        skipped: report.skipped(),
        failed: report.failed(),
        outcomes: report.outcomes,
    })
}
