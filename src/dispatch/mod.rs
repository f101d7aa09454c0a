//! Dispatch engine: one session, one message per staged artifact.
//!
//! Session-Open → Per-Recipient-Send (sequential) → Session-Close.
//! Only a failed open aborts; every per-recipient failure is recorded and
//! the loop moves on with the same session.

pub mod compose;
pub mod smtp;
pub mod transport;

pub use compose::MessageTemplate;
pub use smtp::{SmtpSession, SmtpSettings};
pub use transport::MailTransport;

use serde::Serialize;
use tracing::{error, info, warn};

use crate::audit::{AuditSink, Severity};
use crate::error::AuthError;
use crate::pipeline::types::{DispatchOutcome, RecipientIdentity, StagedArtifact};

/// Outcome of one recipient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecipientOutcome {
    pub recipient: RecipientIdentity,
    pub outcome: DispatchOutcome,
}

/// Per-recipient results of a completed dispatch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    pub outcomes: Vec<RecipientOutcome>,
}

impl DispatchReport {
    fn count(&self, pred: impl Fn(&DispatchOutcome) -> bool) -> usize {
        self.outcomes.iter().filter(|o| pred(&o.outcome)).count()
    }

    pub fn sent(&self) -> usize {
        self.count(|o| matches!(o, DispatchOutcome::Sent))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, DispatchOutcome::SkippedDryRun))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, DispatchOutcome::RecipientRejected(_)))
    }
}

/// Owns the mail session for the duration of a run.
pub struct DispatchEngine<T: MailTransport> {
    transport: T,
    template: MessageTemplate,
    dry_run: bool,
}

impl<T: MailTransport> DispatchEngine<T> {
    pub fn new(transport: T, template: MessageTemplate, dry_run: bool) -> Self {
        Self {
            transport,
            template,
            dry_run,
        }
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn into_transport(self) -> T {
        self.transport
    }

    /// Send every staged artifact over one session.
    ///
    /// Returns `Ok` once the session life cycle finished, however many
    /// recipients failed. `Err` means the session could not be opened and
    /// nothing was sent or skipped.
    pub fn run(
        &mut self,
        staged: &[StagedArtifact],
        sink: &dyn AuditSink,
    ) -> Result<DispatchReport, AuthError> {
        if let Err(e) = self.transport.open() {
            let fatal = DispatchOutcome::from_auth_error(&e);
            error!(error = %e, outcome = fatal.label(), "Could not open mail session; aborting run");
            sink.record_error(
                Severity::Error,
                &format!("There was an error when logging in to SMTP. Error: {e}"),
            );
            return Err(e);
        }

        let mut report = DispatchReport::default();
        for artifact in staged {
            let outcome = self.dispatch_one(artifact, sink);
            report.outcomes.push(RecipientOutcome {
                recipient: artifact.recipient.clone(),
                outcome,
            });
        }

        self.transport.close();

        info!(
            sent = report.sent(),
            skipped = report.skipped(),
            failed = report.failed(),
            "Dispatch complete"
        );
        Ok(report)
    }

    fn dispatch_one(&mut self, artifact: &StagedArtifact, sink: &dyn AuditSink) -> DispatchOutcome {
        let message = match self.template.compose(artifact) {
            Ok(message) => message,
            Err(e) => {
                warn!(recipient = %artifact.recipient, error = %e, "Could not compose message");
                sink.record_error(
                    Severity::Error,
                    &format!(
                        "Could not compose message. Receiver: {} Error: {e}",
                        artifact.recipient
                    ),
                );
                return DispatchOutcome::RecipientRejected(e.to_string());
            }
        };

        if self.dry_run {
            let outcome = DispatchOutcome::SkippedDryRun;
            sink.record_sent(artifact, &outcome);
            return outcome;
        }

        match self.transport.send(&message) {
            Ok(()) => {
                let outcome = DispatchOutcome::Sent;
                sink.record_sent(artifact, &outcome);
                outcome
            }
            Err(e) => {
                warn!(recipient = %artifact.recipient, kind = e.kind(), error = %e, "Send failed; continuing");
                sink.record_error(
                    Severity::Error,
                    &format!(
                        "There was a {} error! Receiver: {} Error: {e}",
                        e.kind(),
                        artifact.recipient
                    ),
                );
                DispatchOutcome::from_send_error(&e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditSink;
    use crate::error::SendError;
    use lettre::Message;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    /// Fake session: records calls, refuses listed recipients.
    #[derive(Default)]
    struct FakeTransport {
        fail_open: bool,
        refuse: Vec<String>,
        opened: usize,
        closed: usize,
        attempts: Vec<String>,
    }

    impl MailTransport for FakeTransport {
        fn open(&mut self) -> Result<(), AuthError> {
            self.opened += 1;
            if self.fail_open {
                return Err(AuthError::Credentials {
                    host: "fake".into(),
                    reason: "535 bad credentials".into(),
                });
            }
            Ok(())
        }

        fn send(&mut self, message: &Message) -> Result<(), SendError> {
            let to = message.envelope().to()[0].to_string();
            self.attempts.push(to.clone());
            if self.refuse.contains(&to) {
                return Err(SendError::RecipientRefused {
                    recipient: to,
                    reason: "550 no such user".into(),
                });
            }
            Ok(())
        }

        fn close(&mut self) {
            self.closed += 1;
        }
    }

    fn staged(dir: &Path, addresses: &[&str]) -> Vec<StagedArtifact> {
        addresses
            .iter()
            .map(|a| {
                let recipient = RecipientIdentity::parse(a).unwrap();
                let display_name = format!("AreYouReturning_{}.pdf", recipient.local_part());
                let path = dir.join(&display_name);
                fs::write(&path, b"%PDF").unwrap();
                StagedArtifact {
                    recipient,
                    display_name,
                    path,
                }
            })
            .collect()
    }

    fn engine(transport: FakeTransport, dry_run: bool) -> DispatchEngine<FakeTransport> {
        let template = MessageTemplate::new("hr@corp.com", "subject", "body").unwrap();
        DispatchEngine::new(transport, template, dry_run)
    }

    #[test]
    fn sends_each_artifact_once() {
        let tmp = TempDir::new().unwrap();
        let artifacts = staged(tmp.path(), &["a@x.com", "b@x.com"]);
        let sink = MemoryAuditSink::new();
        let mut engine = engine(FakeTransport::default(), false);

        let report = engine.run(&artifacts, &sink).unwrap();
        assert_eq!(report.sent(), 2);
        let t = engine.transport();
        assert_eq!((t.opened, t.closed), (1, 1));
        assert_eq!(t.attempts, vec!["a@x.com", "b@x.com"]);
        assert_eq!(sink.deliveries().len(), 2);
    }

    #[test]
    fn dry_run_never_touches_transport_send() {
        let tmp = TempDir::new().unwrap();
        let artifacts = staged(
            tmp.path(),
            &["a@x.com", "b@x.com", "c@x.com", "d@x.com", "e@x.com"],
        );
        let sink = MemoryAuditSink::new();
        let mut engine = engine(FakeTransport::default(), true);

        let report = engine.run(&artifacts, &sink).unwrap();
        assert!(engine.transport().attempts.is_empty());
        assert_eq!(report.skipped(), 5);
        let skipped = sink
            .deliveries()
            .into_iter()
            .filter(|(_, o)| *o == DispatchOutcome::SkippedDryRun)
            .count();
        assert_eq!(skipped, 5);
    }

    #[test]
    fn refused_recipient_does_not_stop_the_batch() {
        let tmp = TempDir::new().unwrap();
        let artifacts = staged(tmp.path(), &["a@x.com", "b@x.com", "c@x.com"]);
        let sink = MemoryAuditSink::new();
        let transport = FakeTransport {
            refuse: vec!["b@x.com".into()],
            ..Default::default()
        };
        let mut engine = engine(transport, false);

        let report = engine.run(&artifacts, &sink).unwrap();
        assert_eq!(report.sent(), 2);
        assert_eq!(report.failed(), 1);
        assert!(matches!(
            report.outcomes[1].outcome,
            DispatchOutcome::RecipientRejected(ref r) if r.starts_with("recipient-refused")
        ));
        assert_eq!(engine.transport().attempts.len(), 3);
        assert_eq!(engine.transport().closed, 1);

        let errors = sink.errors();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].1.contains("b@x.com"));
    }

    #[test]
    fn failed_open_is_fatal_and_silent() {
        let tmp = TempDir::new().unwrap();
        let artifacts = staged(tmp.path(), &["a@x.com", "b@x.com"]);
        let sink = MemoryAuditSink::new();
        let transport = FakeTransport {
            fail_open: true,
            ..Default::default()
        };
        let mut engine = engine(transport, false);

        let err = engine.run(&artifacts, &sink).unwrap_err();
        assert!(matches!(err, AuthError::Credentials { .. }));
        assert!(sink.deliveries().is_empty());
        assert_eq!(sink.errors().len(), 1);
        assert!(engine.transport().attempts.is_empty());
        assert_eq!(engine.transport().closed, 0);
    }

    #[test]
    fn failed_open_in_dry_run_records_no_skips() {
        let tmp = TempDir::new().unwrap();
        let artifacts = staged(tmp.path(), &["a@x.com"]);
        let sink = MemoryAuditSink::new();
        let transport = FakeTransport {
            fail_open: true,
            ..Default::default()
        };
        let mut engine = engine(transport, true);

        assert!(engine.run(&artifacts, &sink).is_err());
        assert!(sink.deliveries().is_empty());
    }

    #[test]
    fn unreadable_artifact_is_per_recipient() {
        let tmp = TempDir::new().unwrap();
        let mut artifacts = staged(tmp.path(), &["a@x.com", "b@x.com"]);
        fs::remove_file(&artifacts[0].path).unwrap();
        artifacts[0].path = tmp.path().join("gone.pdf");

        let sink = MemoryAuditSink::new();
        let mut engine = engine(FakeTransport::default(), false);
        let report = engine.run(&artifacts, &sink).unwrap();

        assert_eq!(report.failed(), 1);
        assert_eq!(report.sent(), 1);
        assert_eq!(engine.transport().attempts, vec!["b@x.com"]);
    }

    #[test]
    fn empty_batch_still_opens_and_closes() {
        let sink = MemoryAuditSink::new();
        let mut engine = engine(FakeTransport::default(), false);
        let report = engine.run(&[], &sink).unwrap();
        assert!(report.outcomes.is_empty());
        let t = engine.into_transport();
        assert_eq!((t.opened, t.closed), (1, 1));
    }
}
