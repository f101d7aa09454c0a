//! Error types for the PDF mailer.

use std::path::PathBuf;

/// Top-level error type for a mailing run.
///
/// Every variant here aborts the run. Per-recipient problems never become
/// an `Error`; they are recorded in the audit sinks and the batch moves on.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Extraction error: {0}")]
    Extract(#[from] ExtractError),

    #[error("Staging error: {0}")]
    Staging(#[from] StagingError),

    #[error("Session error: {0}")]
    Session(#[from] AuthError),

    #[error("Producer error: {0}")]
    Producer(#[from] ProducerError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Missing required configuration: {key}. {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Errors raised while listing the input directory.
#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("The specified directory does not exist: {}", .0.display())]
    DirectoryNotFound(PathBuf),

    #[error("Not a directory: {}", .0.display())]
    NotADirectory(PathBuf),

    #[error("Failed to list {}: {source}", .path.display())]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors that stop the stager from producing a clean working set.
#[derive(Debug, thiserror::Error)]
pub enum StagingError {
    #[error("Failed to create staging directory {}: {source}", .path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to list staging directory {}: {source}", .path.display())]
    ListDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Staging reset blocked: could not delete {} stale file(s) this run must write: {}", .paths.len(), display_paths(.paths))]
    ResetBlocked { paths: Vec<PathBuf> },
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Failures while opening and authenticating the mail session.
///
/// Any of these is fatal for the run: no mail is attempted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("Handshake with {host} failed: {reason}")]
    Handshake { host: String, reason: String },

    #[error("Credentials rejected by {host}: {reason}")]
    Credentials { host: String, reason: String },

    #[error("Authentication not supported by {host}: {reason}")]
    NotSupported { host: String, reason: String },

    #[error("Transport failure during login to {host}: {reason}")]
    Transport { host: String, reason: String },
}

/// Classified per-recipient transmission failures.
///
/// None of these end the run; the session stays open for the next recipient.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    #[error("Recipient {recipient} refused: {reason}")]
    RecipientRefused { recipient: String, reason: String },

    #[error("Sender {sender} refused while sending to {recipient}: {reason}")]
    SenderRefused {
        sender: String,
        recipient: String,
        reason: String,
    },

    #[error("Protocol failure while sending to {recipient}: {reason}")]
    Protocol { recipient: String, reason: String },

    #[error("Data transfer failed for {recipient}: {reason}")]
    Data { recipient: String, reason: String },

    #[error("Capability not supported for {recipient}: {reason}")]
    NotSupported { recipient: String, reason: String },
}

impl SendError {
    /// Short classification label used in audit records.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::RecipientRefused { .. } => "recipient-refused",
            Self::SenderRefused { .. } => "sender-refused",
            Self::Protocol { .. } => "protocol",
            Self::Data { .. } => "data-transfer",
            Self::NotSupported { .. } => "not-supported",
        }
    }
}

/// Failures while building the outgoing message for one recipient.
#[derive(Debug, thiserror::Error)]
pub enum ComposeError {
    #[error("Failed to read attachment {}: {source}", .path.display())]
    ReadAttachment {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid address {address}: {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("Failed to build message: {0}")]
    Build(String),
}

/// Document producer errors.
#[derive(Debug, thiserror::Error)]
pub enum ProducerError {
    #[error("Invalid procedure identifier: {0}")]
    InvalidProcedure(String),

    #[error("Recipient source error: {0}")]
    Source(String),

    #[error("HTTP client error: {0}")]
    Http(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for the mailer.
pub type Result<T> = std::result::Result<T, Error>;
