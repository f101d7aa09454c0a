//! Artifact stager.
//!
//! Reconciles `<input>/valid_pdfs/` so it holds exactly one renamed copy per
//! validated recipient:
//!
//! 1. Plan display names, dropping recipients whose name collides with an
//!    earlier one.
//! 2. Reset the staging directory (create it, or empty it).
//! 3. Copy each raw document to `<prefix><local-part>.pdf`.
//!
//! Running the stager twice on an unchanged input yields identical staging
//! contents. Copy failures drop the recipient and staging continues; only a
//! reset that leaves a stale file where this run must write is fatal.

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::audit::{AuditSink, Severity};
use crate::error::StagingError;
use crate::pipeline::extract::{DOCUMENT_EXTENSION, document_path};
use crate::pipeline::types::{RecipientIdentity, RecipientSet, StagedArtifact};

/// Name of the pipeline-owned staging subdirectory.
pub const STAGING_DIR_NAME: &str = "valid_pdfs";

/// Default attachment filename prefix.
pub const DEFAULT_DISPLAY_PREFIX: &str = "AreYouReturning_";

/// Result of copying one artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyResult {
    Copied,
    /// Source and destination are the same file; nothing to do.
    SameFile,
}

/// Stages validated recipients' documents into the staging directory.
#[derive(Debug, Clone)]
pub struct Stager {
    input_dir: PathBuf,
    staging_dir: PathBuf,
    display_prefix: String,
}

impl Stager {
    pub fn new(input_dir: impl Into<PathBuf>, display_prefix: impl Into<String>) -> Self {
        let input_dir = input_dir.into();
        let staging_dir = input_dir.join(STAGING_DIR_NAME);
        Self {
            input_dir,
            staging_dir,
            display_prefix: display_prefix.into(),
        }
    }

    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }

    /// Attachment filename for a recipient.
    pub fn display_name(&self, recipient: &RecipientIdentity) -> String {
        format!(
            "{}{}.{DOCUMENT_EXTENSION}",
            self.display_prefix,
            recipient.local_part()
        )
    }

    /// Stage every recipient, returning the artifacts that were copied.
    ///
    /// Recipients whose copy failed (or whose display name collided) are
    /// recorded in the errors sink and left out of the result.
    pub fn stage(
        &self,
        recipients: &RecipientSet,
        sink: &dyn AuditSink,
    ) -> Result<Vec<StagedArtifact>, StagingError> {
        self.stage_with(recipients, sink, remove_entry)
    }

    /// [`stage`](Self::stage) with an explicit way of deleting stale entries.
    fn stage_with<R>(
        &self,
        recipients: &RecipientSet,
        sink: &dyn AuditSink,
        remove: R,
    ) -> Result<Vec<StagedArtifact>, StagingError>
    where
        R: Fn(&Path) -> io::Result<()>,
    {
        let plan = self.plan(recipients, sink);
        self.reset(&plan, sink, remove)?;

        let mut staged = Vec::with_capacity(plan.len());
        for (recipient, display_name) in plan {
            let source = document_path(&self.input_dir, recipient.as_str());
            let destination = self.staging_dir.join(&display_name);

            match copy_artifact(&source, &destination) {
                Ok(CopyResult::Copied) => {
                    debug!(recipient = %recipient, file = %display_name, "Staged");
                }
                Ok(CopyResult::SameFile) => {
                    sink.record_error(
                        Severity::Warning,
                        &format!(
                            "Source and destination are the same file, skipping copy: {} and {}",
                            source.display(),
                            destination.display()
                        ),
                    );
                }
                Err(e) => {
                    sink.record_error(
                        Severity::Error,
                        &format!(
                            "Failed to stage document for {recipient}. Current file location: {}. New file location: {}. Error: {e}",
                            source.display(),
                            destination.display()
                        ),
                    );
                    continue;
                }
            }

            staged.push(StagedArtifact {
                recipient,
                display_name,
                path: destination,
            });
        }

        info!(
            staged = staged.len(),
            requested = recipients.len(),
            dir = %self.staging_dir.display(),
            "Staging complete"
        );
        Ok(staged)
    }

    /// Assign display names in recipient order; later collisions are dropped.
    fn plan(
        &self,
        recipients: &RecipientSet,
        sink: &dyn AuditSink,
    ) -> Vec<(RecipientIdentity, String)> {
        let mut taken: HashSet<String> = HashSet::new();
        let mut plan = Vec::with_capacity(recipients.len());

        for recipient in recipients {
            let display_name = self.display_name(recipient);
            if !taken.insert(display_name.clone()) {
                sink.record_error(
                    Severity::Error,
                    &format!(
                        "Display name {display_name} for {recipient} is already used by another recipient in this run; not staged"
                    ),
                );
                continue;
            }
            plan.push((recipient.clone(), display_name));
        }
        plan
    }

    /// Create or empty the staging directory.
    ///
    /// Every failed deletion is recorded. The reset is only fatal when a
    /// leftover entry occupies a name this run must write.
    fn reset<R>(
        &self,
        plan: &[(RecipientIdentity, String)],
        sink: &dyn AuditSink,
        remove: R,
    ) -> Result<(), StagingError>
    where
        R: Fn(&Path) -> io::Result<()>,
    {
        if !self.staging_dir.exists() {
            return fs::create_dir_all(&self.staging_dir).map_err(|source| {
                StagingError::CreateDir {
                    path: self.staging_dir.clone(),
                    source,
                }
            });
        }

        let entries = fs::read_dir(&self.staging_dir).map_err(|source| StagingError::ListDir {
            path: self.staging_dir.clone(),
            source,
        })?;

        let needed: HashSet<&str> = plan.iter().map(|(_, name)| name.as_str()).collect();
        let mut blocked = Vec::new();

        for entry in entries {
            let path = match entry {
                Ok(entry) => entry.path(),
                Err(source) => {
                    return Err(StagingError::ListDir {
                        path: self.staging_dir.clone(),
                        source,
                    });
                }
            };

            if let Err(e) = remove(&path) {
                sink.record_error(
                    Severity::Error,
                    &format!("There was an error deleting {}: {e}", path.display()),
                );
                let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
                if needed.contains(name) {
                    blocked.push(path);
                }
            }
        }

        if blocked.is_empty() {
            Ok(())
        } else {
            Err(StagingError::ResetBlocked { paths: blocked })
        }
    }
}

fn remove_entry(path: &Path) -> io::Result<()> {
    // symlink_metadata so a link to a directory is removed, not followed.
    let meta = fs::symlink_metadata(path)?;
    if meta.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    }
}

/// Copy `source` to `destination`, treating an identical file as success.
pub fn copy_artifact(source: &Path, destination: &Path) -> io::Result<CopyResult> {
    if let (Ok(src), Ok(dst)) = (source.canonicalize(), destination.canonicalize())
        && src == dst
    {
        return Ok(CopyResult::SameFile);
    }
    fs::copy(source, destination)?;
    Ok(CopyResult::Copied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditSink;
    use crate::pipeline::validate::validate_all;
    use tempfile::TempDir;

    fn write_doc(dir: &Path, stem: &str, content: &[u8]) {
        fs::write(document_path(dir, stem), content).unwrap();
    }

    fn recipients(addresses: &[&str]) -> RecipientSet {
        validate_all(addresses.iter().copied(), &MemoryAuditSink::new())
    }

    fn listing(dir: &Path) -> Vec<(String, Vec<u8>)> {
        let mut files: Vec<(String, Vec<u8>)> = fs::read_dir(dir)
            .unwrap()
            .map(|e| {
                let e = e.unwrap();
                (
                    e.file_name().to_string_lossy().into_owned(),
                    fs::read(e.path()).unwrap(),
                )
            })
            .collect();
        files.sort();
        files
    }

    #[test]
    fn display_name_uses_prefix_and_local_part() {
        let stager = Stager::new("/in", DEFAULT_DISPLAY_PREFIX);
        let r = RecipientIdentity::parse("jane.doe@x.com").unwrap();
        assert_eq!(stager.display_name(&r), "AreYouReturning_jane.doe.pdf");
        assert_eq!(stager.staging_dir(), Path::new("/in/valid_pdfs"));
    }

    #[test]
    fn creates_staging_dir_and_copies() {
        let tmp = TempDir::new().unwrap();
        write_doc(tmp.path(), "a@x.com", b"doc-a");
        write_doc(tmp.path(), "b@x.com", b"doc-b");

        let sink = MemoryAuditSink::new();
        let stager = Stager::new(tmp.path(), DEFAULT_DISPLAY_PREFIX);
        let staged = stager
            .stage(&recipients(&["a@x.com", "b@x.com"]), &sink)
            .unwrap();

        assert_eq!(staged.len(), 2);
        assert_eq!(staged[0].recipient.as_str(), "a@x.com");
        assert_eq!(staged[0].display_name, "AreYouReturning_a.pdf");
        assert_eq!(fs::read(&staged[0].path).unwrap(), b"doc-a");
        assert_eq!(fs::read(&staged[1].path).unwrap(), b"doc-b");
        // Source untouched.
        assert_eq!(fs::read(document_path(tmp.path(), "a@x.com")).unwrap(), b"doc-a");
        assert!(sink.events().is_empty());
    }

    #[test]
    fn reset_removes_stale_entries() {
        let tmp = TempDir::new().unwrap();
        write_doc(tmp.path(), "a@x.com", b"doc-a");
        let staging = tmp.path().join(STAGING_DIR_NAME);
        fs::create_dir(&staging).unwrap();
        fs::write(staging.join("AreYouReturning_old.pdf"), b"stale").unwrap();
        fs::create_dir(staging.join("leftover")).unwrap();
        fs::write(staging.join("leftover").join("x"), b"x").unwrap();

        let stager = Stager::new(tmp.path(), DEFAULT_DISPLAY_PREFIX);
        stager
            .stage(&recipients(&["a@x.com"]), &MemoryAuditSink::new())
            .unwrap();

        assert_eq!(
            listing(&staging),
            vec![("AreYouReturning_a.pdf".to_string(), b"doc-a".to_vec())]
        );
    }

    #[test]
    fn staging_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        write_doc(tmp.path(), "a@x.com", b"doc-a");
        write_doc(tmp.path(), "b@x.com", b"doc-b");
        let set = recipients(&["a@x.com", "b@x.com"]);
        let stager = Stager::new(tmp.path(), DEFAULT_DISPLAY_PREFIX);

        let first_run = stager.stage(&set, &MemoryAuditSink::new()).unwrap();
        let first = listing(stager.staging_dir());
        let second_run = stager.stage(&set, &MemoryAuditSink::new()).unwrap();
        let second = listing(stager.staging_dir());

        assert_eq!(first, second);
        assert_eq!(first_run, second_run);
        assert_eq!(first.len(), 2);
    }

    #[test]
    fn missing_source_is_logged_and_skipped() {
        let tmp = TempDir::new().unwrap();
        write_doc(tmp.path(), "a@x.com", b"doc-a");
        write_doc(tmp.path(), "c@x.com", b"doc-c");

        let sink = MemoryAuditSink::new();
        let stager = Stager::new(tmp.path(), DEFAULT_DISPLAY_PREFIX);
        let staged = stager
            .stage(&recipients(&["a@x.com", "b@x.com", "c@x.com"]), &sink)
            .unwrap();

        let names: Vec<&str> = staged.iter().map(|s| s.recipient.as_str()).collect();
        assert_eq!(names, vec!["a@x.com", "c@x.com"]);
        let errors = sink.errors();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].0, Severity::Error);
        assert!(errors[0].1.contains("b@x.com"));
    }

    #[test]
    fn display_name_collision_keeps_first() {
        let tmp = TempDir::new().unwrap();
        write_doc(tmp.path(), "a@x.com", b"from-x");
        write_doc(tmp.path(), "a@y.com", b"from-y");

        let sink = MemoryAuditSink::new();
        let stager = Stager::new(tmp.path(), DEFAULT_DISPLAY_PREFIX);
        let staged = stager
            .stage(&recipients(&["a@y.com", "a@x.com"]), &sink)
            .unwrap();

        assert_eq!(staged.len(), 1);
        assert_eq!(staged[0].recipient.as_str(), "a@x.com");
        assert_eq!(fs::read(&staged[0].path).unwrap(), b"from-x");
        let errors = sink.errors();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].1.contains("a@y.com"));
    }

    #[test]
    fn staging_path_occupied_by_file_is_fatal() {
        let tmp = TempDir::new().unwrap();
        write_doc(tmp.path(), "a@x.com", b"doc-a");
        fs::write(tmp.path().join(STAGING_DIR_NAME), b"not a dir").unwrap();

        let stager = Stager::new(tmp.path(), DEFAULT_DISPLAY_PREFIX);
        let err = stager
            .stage(&recipients(&["a@x.com"]), &MemoryAuditSink::new())
            .unwrap_err();
        assert!(matches!(err, StagingError::ListDir { .. }));
    }

    /// Deletes like the real reset, except for the entries named in `stuck`.
    fn remove_except(stuck: &'static [&'static str]) -> impl Fn(&Path) -> io::Result<()> {
        move |path| {
            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
            if stuck.contains(&name) {
                Err(io::Error::new(io::ErrorKind::PermissionDenied, "permission denied"))
            } else {
                remove_entry(path)
            }
        }
    }

    #[test]
    fn undeletable_needed_entry_blocks_reset() {
        let tmp = TempDir::new().unwrap();
        write_doc(tmp.path(), "a@x.com", b"doc-a");
        let staging = tmp.path().join(STAGING_DIR_NAME);
        fs::create_dir(&staging).unwrap();
        fs::write(staging.join("AreYouReturning_a.pdf"), b"stale").unwrap();
        fs::write(staging.join("unrelated.pdf"), b"stale").unwrap();

        let sink = MemoryAuditSink::new();
        let stager = Stager::new(tmp.path(), DEFAULT_DISPLAY_PREFIX);
        let err = stager
            .stage_with(
                &recipients(&["a@x.com"]),
                &sink,
                remove_except(&["AreYouReturning_a.pdf", "unrelated.pdf"]),
            )
            .unwrap_err();

        match err {
            StagingError::ResetBlocked { paths } => {
                assert_eq!(paths, vec![staging.join("AreYouReturning_a.pdf")]);
            }
            other => panic!("expected ResetBlocked, got {other:?}"),
        }
        // Both failed deletions are recorded; nothing was copied over the stale file.
        assert_eq!(sink.errors().len(), 2);
        assert_eq!(fs::read(staging.join("AreYouReturning_a.pdf")).unwrap(), b"stale");
    }

    #[test]
    fn undeletable_unneeded_entry_is_tolerated() {
        let tmp = TempDir::new().unwrap();
        write_doc(tmp.path(), "a@x.com", b"doc-a");
        let staging = tmp.path().join(STAGING_DIR_NAME);
        fs::create_dir(&staging).unwrap();
        fs::write(staging.join("unrelated.pdf"), b"stale").unwrap();

        let sink = MemoryAuditSink::new();
        let stager = Stager::new(tmp.path(), DEFAULT_DISPLAY_PREFIX);
        let staged = stager
            .stage_with(&recipients(&["a@x.com"]), &sink, remove_except(&["unrelated.pdf"]))
            .unwrap();

        assert_eq!(staged.len(), 1);
        assert_eq!(fs::read(&staged[0].path).unwrap(), b"doc-a");
        let errors = sink.errors();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].0, Severity::Error);
        assert!(errors[0].1.contains("unrelated.pdf"));
    }

    #[test]
    fn empty_set_still_resets() {
        let tmp = TempDir::new().unwrap();
        let staging = tmp.path().join(STAGING_DIR_NAME);
        fs::create_dir(&staging).unwrap();
        fs::write(staging.join("stale.pdf"), b"stale").unwrap();

        let stager = Stager::new(tmp.path(), DEFAULT_DISPLAY_PREFIX);
        let staged = stager.stage(&RecipientSet::new(), &MemoryAuditSink::new()).unwrap();
        assert!(staged.is_empty());
        assert!(listing(&staging).is_empty());
    }

    #[test]
    fn copy_onto_itself_is_noop() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("same.pdf");
        fs::write(&path, b"content").unwrap();

        assert_eq!(copy_artifact(&path, &path).unwrap(), CopyResult::SameFile);
        assert_eq!(fs::read(&path).unwrap(), b"content");
    }

    #[test]
    fn copy_reports_missing_source() {
        let tmp = TempDir::new().unwrap();
        let err = copy_artifact(&tmp.path().join("missing.pdf"), &tmp.path().join("out.pdf"))
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }
}
