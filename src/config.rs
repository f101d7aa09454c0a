//! Configuration types.
//!
//! Everything comes from the process environment; [`PipelineConfig::from_vars`]
//! takes a lookup function so tests never touch the real environment.

use std::fmt;
use std::str::FromStr;

use secrecy::SecretString;

use crate::error::ConfigError;
use crate::pipeline::stage::DEFAULT_DISPLAY_PREFIX;

pub const DEFAULT_SMTP_PORT: u16 = 465;
pub const DEFAULT_SUBJECT: &str = "Test Subject";
pub const DEFAULT_BODY: &str = "Some Dummy Body Text";

/// How the session to the relay is secured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SmtpSecurity {
    /// Implicit TLS from the first byte (SMTPS).
    #[default]
    Tls,
    /// Plaintext greeting upgraded with STARTTLS.
    StartTls,
    /// No encryption. Local relays only.
    None,
}

impl FromStr for SmtpSecurity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tls" | "ssl" | "smtps" => Ok(Self::Tls),
            "starttls" => Ok(Self::StartTls),
            "none" | "plain" => Ok(Self::None),
            other => Err(format!("expected tls, starttls or none, got {other:?}")),
        }
    }
}

impl fmt::Display for SmtpSecurity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Tls => "tls",
            Self::StartTls => "starttls",
            Self::None => "none",
        })
    }
}

/// Connection parameters for the mail relay and the document producer.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// SMTP relay host.
    pub host: String,
    pub port: u16,
    /// `From` address and envelope sender.
    pub sender_address: String,
    /// Login name; defaults to the sender address.
    pub username: String,
    pub credential: SecretString,
    pub security: SmtpSecurity,
    /// Document endpoint; `{id}` is replaced by the recipient id, or the id
    /// is appended when there is no placeholder.
    pub endpoint_template: Option<String>,
    /// Data source holding the recipient rows (a libSQL database path).
    pub odbc_dsn: Option<String>,
    pub subject: String,
    pub body: String,
    /// Prefix of the attachment filename.
    pub display_prefix: String,
}

impl PipelineConfig {
    /// Build config from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary variable lookup.
    pub fn from_vars<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let required =
            |key: &str| get(key).ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()));

        let host = required("SMTP_ADDRESS")?;

        let port = match get("SMTP_PORT") {
            Some(raw) => raw
                .trim()
                .parse::<u16>()
                .map_err(|e| ConfigError::InvalidValue {
                    key: "SMTP_PORT".into(),
                    message: format!("{raw:?}: {e}"),
                })?,
            None => DEFAULT_SMTP_PORT,
        };

        let sender_address = required("SENDER_EMAIL")?;
        let username = get("SMTP_USERNAME").unwrap_or_else(|| sender_address.clone());
        let credential = SecretString::from(required("SMTP_PASSWORD")?);

        let security = match get("SMTP_SECURITY") {
            Some(raw) => raw
                .parse::<SmtpSecurity>()
                .map_err(|message| ConfigError::InvalidValue {
                    key: "SMTP_SECURITY".into(),
                    message,
                })?,
            None => SmtpSecurity::default(),
        };

        Ok(Self {
            host,
            port,
            sender_address,
            username,
            credential,
            security,
            endpoint_template: get("PDF_EMAILER_DOC_ENDPOINT"),
            odbc_dsn: get("PDF_EMAILER_DSN"),
            subject: get("PDF_EMAILER_SUBJECT").unwrap_or_else(|| DEFAULT_SUBJECT.to_string()),
            body: get("PDF_EMAILER_BODY").unwrap_or_else(|| DEFAULT_BODY.to_string()),
            display_prefix: get("PDF_EMAILER_PREFIX")
                .unwrap_or_else(|| DEFAULT_DISPLAY_PREFIX.to_string()),
        })
    }

    /// Endpoint template, required once the producer runs.
    pub fn require_endpoint(&self) -> Result<&str, ConfigError> {
        self.endpoint_template
            .as_deref()
            .ok_or_else(|| ConfigError::MissingRequired {
                key: "PDF_EMAILER_DOC_ENDPOINT".into(),
                hint: "Set it to generate documents with --stored-procedure.".into(),
            })
    }

    /// Data source, required once the producer runs.
    pub fn require_dsn(&self) -> Result<&str, ConfigError> {
        self.odbc_dsn
            .as_deref()
            .ok_or_else(|| ConfigError::MissingRequired {
                key: "PDF_EMAILER_DSN".into(),
                hint: "Set it to generate documents with --stored-procedure.".into(),
            })
    }
}
