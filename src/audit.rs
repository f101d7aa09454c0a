//! Audit sinks: the three append-only event channels a run writes to.
//!
//! - `errors`: staging, session and per-recipient send failures
//! - `rejected`: candidates that failed address validation
//! - `sent`: confirmations (real sends and dry-run skips)
//!
//! The pipeline only sees the [`AuditSink`] trait. The binary wires in
//! [`TracingAuditSink`], whose events the logging layer routes to one file
//! per channel; tests use [`MemoryAuditSink`].

use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};

use crate::pipeline::types::{DispatchOutcome, StagedArtifact};

/// tracing target for the errors channel.
pub const ERRORS_TARGET: &str = "audit::errors";
/// tracing target for the rejected-recipients channel.
pub const REJECTED_TARGET: &str = "audit::rejected";
/// tracing target for the sent-confirmations channel.
pub const SENT_TARGET: &str = "audit::sent";

/// Level of an errors-channel record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Warning,
    Error,
}

/// Destination for audit events.
pub trait AuditSink {
    /// Record a failure (or a warning worth keeping next to failures).
    fn record_error(&self, severity: Severity, message: &str);

    /// Record a candidate identity that failed validation.
    fn record_rejected(&self, candidate: &str);

    /// Record a delivery confirmation. `outcome` is `Sent` or `SkippedDryRun`.
    fn record_sent(&self, artifact: &StagedArtifact, outcome: &DispatchOutcome);
}

// ── Tracing-backed sink ─────────────────────────────────────────────

/// Emits audit events as tracing events on the `audit::*` targets.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditSink;

impl TracingAuditSink {
    pub fn new() -> Self {
        Self
    }
}

impl AuditSink for TracingAuditSink {
    fn record_error(&self, severity: Severity, message: &str) {
        match severity {
            Severity::Warning => tracing::warn!(target: ERRORS_TARGET, "{message}"),
            Severity::Error => tracing::error!(target: ERRORS_TARGET, "{message}"),
        }
    }

    fn record_rejected(&self, candidate: &str) {
        tracing::info!(
            target: REJECTED_TARGET,
            "The email for {candidate} does not appear to be valid."
        );
    }

    fn record_sent(&self, artifact: &StagedArtifact, outcome: &DispatchOutcome) {
        let path = artifact.path.display();
        match outcome {
            DispatchOutcome::SkippedDryRun => tracing::info!(
                target: SENT_TARGET,
                "Test Run - would have sent: {}, {}, {path}",
                artifact.recipient,
                artifact.display_name,
            ),
            _ => tracing::info!(
                target: SENT_TARGET,
                "Sent email to: {} with attachment: {} at {path}",
                artifact.recipient,
                artifact.display_name,
            ),
        }
    }
}

// ── In-memory sink ──────────────────────────────────────────────────

/// A recorded audit event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuditEvent {
    Error {
        severity: Severity,
        message: String,
    },
    Rejected {
        candidate: String,
    },
    Sent {
        recipient: String,
        display_name: String,
        path: PathBuf,
        outcome: DispatchOutcome,
    },
}

/// Collects events in memory, in arrival order.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, event: AuditEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }

    /// Snapshot of every event recorded so far.
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Messages recorded on the errors channel.
    pub fn errors(&self) -> Vec<(Severity, String)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                AuditEvent::Error { severity, message } => Some((severity, message)),
                _ => None,
            })
            .collect()
    }

    /// Candidates recorded on the rejected channel.
    pub fn rejected(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                AuditEvent::Rejected { candidate } => Some(candidate),
                _ => None,
            })
            .collect()
    }

    /// `(recipient, outcome)` pairs recorded on the sent channel.
    pub fn deliveries(&self) -> Vec<(String, DispatchOutcome)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                AuditEvent::Sent {
                    recipient, outcome, ..
                } => Some((recipient, outcome)),
                _ => None,
            })
            .collect()
    }
}

impl AuditSink for MemoryAuditSink {
    fn record_error(&self, severity: Severity, message: &str) {
        self.push(AuditEvent::Error {
            severity,
            message: message.to_string(),
        });
    }

    fn record_rejected(&self, candidate: &str) {
        self.push(AuditEvent::Rejected {
            candidate: candidate.to_string(),
        });
    }

    fn record_sent(&self, artifact: &StagedArtifact, outcome: &DispatchOutcome) {
        self.push(AuditEvent::Sent {
            recipient: artifact.recipient.to_string(),
            display_name: artifact.display_name.clone(),
            path: artifact.path.clone(),
            outcome: outcome.clone(),
        });
    }
}
