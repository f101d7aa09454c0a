//! Shared types for the distribution pipeline.

use std::borrow::Borrow;
use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{AuthError, SendError};
use crate::pipeline::validate;

// ── Recipient identity ──────────────────────────────────────────────

/// A syntactically validated `local-part@domain` address.
///
/// Only [`RecipientIdentity::parse`] creates one, so holding a value means
/// the address passed validation. It is never rewritten into a
/// "corrected" form.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct RecipientIdentity(String);

impl RecipientIdentity {
    /// Validate a candidate and wrap it. Returns `None` when the candidate
    /// does not match the address contract.
    pub fn parse(candidate: &str) -> Option<Self> {
        validate::validate(candidate).then(|| Self(candidate.to_string()))
    }

    /// The full address.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Everything before the `@`.
    pub fn local_part(&self) -> &str {
        // A validated identity always contains exactly one '@'.
        self.0.split_once('@').map_or(&self.0, |(local, _)| local)
    }

    /// Everything after the `@`.
    pub fn domain(&self) -> &str {
        self.0.split_once('@').map_or("", |(_, domain)| domain)
    }
}

impl fmt::Display for RecipientIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for RecipientIdentity {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// Ordering and equality match `str`, so sets can be queried by address.
impl Borrow<str> for RecipientIdentity {
    fn borrow(&self) -> &str {
        &self.0
    }
}

// ── Recipient set ───────────────────────────────────────────────────

/// Deduplicated, lexicographically ordered set of validated recipients.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecipientSet {
    inner: BTreeSet<RecipientIdentity>,
}

impl RecipientSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a recipient. Returns `false` if it was already present.
    pub fn insert(&mut self, recipient: RecipientIdentity) -> bool {
        self.inner.insert(recipient)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn contains(&self, address: &str) -> bool {
        self.inner.contains(address)
    }

    /// Iterate in lexicographic order.
    pub fn iter(&self) -> impl Iterator<Item = &RecipientIdentity> {
        self.inner.iter()
    }

    /// Addresses in order, mostly for logs and assertions.
    pub fn addresses(&self) -> Vec<&str> {
        self.inner.iter().map(RecipientIdentity::as_str).collect()
    }
}

impl FromIterator<RecipientIdentity> for RecipientSet {
    fn from_iter<I: IntoIterator<Item = RecipientIdentity>>(iter: I) -> Self {
        Self {
            inner: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a RecipientSet {
    type Item = &'a RecipientIdentity;
    type IntoIter = std::collections::btree_set::Iter<'a, RecipientIdentity>;

    fn into_iter(self) -> Self::IntoIter {
        self.inner.iter()
    }
}

// ── Artifacts ───────────────────────────────────────────────────────

/// A document found in the raw input directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawArtifact {
    /// Filename without the document extension; the candidate identity.
    pub stem: String,
    /// Full path to the file. Never modified by the pipeline.
    pub path: PathBuf,
}

/// A renamed copy of a raw artifact inside the staging directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StagedArtifact {
    pub recipient: RecipientIdentity,
    /// Attachment filename: display prefix + local part + extension.
    pub display_name: String,
    /// Location of the copy.
    pub path: PathBuf,
}

// ── Dispatch outcome ────────────────────────────────────────────────

/// Per-recipient result of the dispatch stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "snake_case")]
pub enum DispatchOutcome {
    /// Transmitted over the session.
    Sent,
    /// Dry run; composed but not transmitted.
    SkippedDryRun,
    /// This recipient could not be sent to; the run continued.
    RecipientRejected(String),
    /// The session could not be established; nothing was sent.
    SessionFatal(String),
}

impl DispatchOutcome {
    pub fn from_send_error(err: &SendError) -> Self {
        Self::RecipientRejected(format!("{}: {err}", err.kind()))
    }

    pub fn from_auth_error(err: &AuthError) -> Self {
        Self::SessionFatal(err.to_string())
    }

    /// Short label for logs.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Sent => "sent",
            Self::SkippedDryRun => "skipped_dry_run",
            Self::RecipientRejected(_) => "recipient_rejected",
            Self::SessionFatal(_) => "session_fatal",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_rejects_invalid() {
        assert!(RecipientIdentity::parse("not-an-address").is_none());
        assert!(RecipientIdentity::parse("a@x.com").is_some());
    }

    #[test]
    fn local_part_and_domain() {
        let r = RecipientIdentity::parse("jane.doe+hr@mail.example.org").unwrap();
        assert_eq!(r.local_part(), "jane.doe+hr");
        assert_eq!(r.domain(), "mail.example.org");
        assert_eq!(r.to_string(), "jane.doe+hr@mail.example.org");
    }

    #[test]
    fn set_dedups_and_orders() {
        let set: RecipientSet = ["b@x.com", "a@x.com", "a@x.com"]
            .into_iter()
            .filter_map(RecipientIdentity::parse)
            .collect();
        assert_eq!(set.addresses(), vec!["a@x.com", "b@x.com"]);
        assert_eq!(set.len(), 2);
        assert!(set.contains("b@x.com"));
        assert!(!set.contains("c@x.com"));
        assert!(!set.contains("B@x.com"));
    }

    #[test]
    fn outcome_serializes_with_tag() {
        let json = serde_json::to_value(DispatchOutcome::RecipientRejected("550".into())).unwrap();
        assert_eq!(json["outcome"], "recipient_rejected");
        assert_eq!(json["reason"], "550");

        let json = serde_json::to_value(DispatchOutcome::Sent).unwrap();
        assert_eq!(json["outcome"], "sent");
    }
}
