//! Identity validator.
//!
//! A candidate is accepted when it matches `local-part@domain`, where the
//! local part is `[A-Za-z0-9_.+-]+` and the domain is one or more
//! dot-separated labels of `[A-Za-z0-9-]+`. Rejected candidates are
//! recorded and dropped; the batch always continues.

use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use crate::audit::AuditSink;
use crate::pipeline::types::{RecipientIdentity, RecipientSet};

static ADDRESS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9_.+-]+@[A-Za-z0-9-]+(?:\.[A-Za-z0-9-]+)*$")
        .expect("address pattern compiles")
});

/// Check a single candidate against the address contract.
pub fn validate(candidate: &str) -> bool {
    ADDRESS.is_match(candidate)
}

/// Filter candidates into a deduplicated, ordered recipient set.
///
/// Every rejected candidate produces exactly one `rejected` audit record.
pub fn validate_all<I, S>(candidates: I, sink: &dyn AuditSink) -> RecipientSet
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut set = RecipientSet::new();
    for candidate in candidates {
        let candidate = candidate.as_ref();
        match RecipientIdentity::parse(candidate) {
            Some(identity) => {
                if !set.insert(identity) {
                    debug!(candidate, "Duplicate recipient dropped");
                }
            }
            None => sink.record_rejected(candidate),
        }
    }
    set
}
