//! lettre-backed SMTP session.
//!
//! Drives a single [`SmtpConnection`] by hand instead of going through
//! `SmtpTransport`, so one login covers every recipient in the batch and
//! each failed transaction is reset with `RSET` rather than tearing the
//! connection down. The MAIL / RCPT / DATA stage that failed decides how
//! the failure is classified.

use std::time::Duration;

use lettre::Message;
use lettre::transport::smtp::Error as SmtpError;
use lettre::transport::smtp::authentication::{Credentials, Mechanism};
use lettre::transport::smtp::client::{SmtpConnection, TlsParameters};
use lettre::transport::smtp::commands::{Data, Mail, Rcpt, Rset};
use lettre::transport::smtp::extension::{ClientId, Extension, MailParameter};
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, info, warn};

use crate::config::{PipelineConfig, SmtpSecurity};
use crate::dispatch::transport::{MailTransport, envelope_recipient};
use crate::error::{AuthError, SendError};

/// Default network timeout for every SMTP exchange.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Connection parameters for the relay.
#[derive(Debug, Clone)]
pub struct SmtpSettings {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: SecretString,
    pub security: SmtpSecurity,
    pub timeout: Duration,
}

impl SmtpSettings {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port,
            username: config.username.clone(),
            password: config.credential.clone(),
            security: config.security,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// SMTP transaction stage, used to classify a failed send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Mail,
    Rcpt,
    Data,
}

/// An authenticated SMTP session reused for the whole run.
pub struct SmtpSession {
    settings: SmtpSettings,
    conn: Option<SmtpConnection>,
}

impl SmtpSession {
    pub fn new(settings: SmtpSettings) -> Self {
        Self {
            settings,
            conn: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.conn.is_some()
    }

    fn connect(&self) -> Result<SmtpConnection, AuthError> {
        let host = &self.settings.host;
        let hello = ClientId::default();

        let tls = match self.settings.security {
            SmtpSecurity::Tls | SmtpSecurity::StartTls => Some(
                TlsParameters::new(host.clone()).map_err(|e| AuthError::Handshake {
                    host: host.clone(),
                    reason: format!("TLS setup failed: {e}"),
                })?,
            ),
            SmtpSecurity::None => None,
        };
        let implicit_tls = match self.settings.security {
            SmtpSecurity::Tls => tls.as_ref(),
            _ => None,
        };

        let mut conn = SmtpConnection::connect(
            (host.as_str(), self.settings.port),
            Some(self.settings.timeout),
            &hello,
            implicit_tls,
            None,
        )
        .map_err(|e| AuthError::Handshake {
            host: host.clone(),
            reason: e.to_string(),
        })?;

        if let (SmtpSecurity::StartTls, Some(params)) = (self.settings.security, tls.as_ref()) {
            if !conn.can_starttls() {
                conn.abort();
                return Err(AuthError::NotSupported {
                    host: host.clone(),
                    reason: "server does not advertise STARTTLS".into(),
                });
            }
            conn.starttls(params, &hello)
                .map_err(|e| AuthError::Handshake {
                    host: host.clone(),
                    reason: format!("STARTTLS failed: {e}"),
                })?;
        }

        Ok(conn)
    }
}

impl MailTransport for SmtpSession {
    fn open(&mut self) -> Result<(), AuthError> {
        let mut conn = self.connect()?;

        let credentials = Credentials::new(
            self.settings.username.clone(),
            self.settings.password.expose_secret().to_string(),
        );
        if let Err(e) = conn.auth(&[Mechanism::Plain, Mechanism::Login], &credentials) {
            conn.abort();
            return Err(classify_auth_failure(&self.settings.host, &e));
        }

        info!(
            host = %self.settings.host,
            port = self.settings.port,
            user = %self.settings.username,
            "SMTP session authenticated"
        );
        self.conn = Some(conn);
        Ok(())
    }

    fn send(&mut self, message: &Message) -> Result<(), SendError> {
        let recipient = envelope_recipient(message);
        let Some(conn) = self.conn.as_mut() else {
            return Err(SendError::Protocol {
                recipient,
                reason: "session is not open".into(),
            });
        };

        let envelope = message.envelope();
        let sender = envelope
            .from()
            .map(|a| a.to_string())
            .unwrap_or_default();

        let needs_utf8 = envelope
            .to()
            .iter()
            .chain(envelope.from())
            .any(|a| !AsRef::<str>::as_ref(a).is_ascii());
        let mut params = Vec::new();
        if needs_utf8 {
            if !conn.server_info().supports_feature(Extension::SmtpUtfEight) {
                return Err(SendError::NotSupported {
                    recipient,
                    reason: "non-ASCII address and server lacks SMTPUTF8".into(),
                });
            }
            params.push(MailParameter::SmtpUtfEight);
        }

        let result = (|| {
            conn.command(Mail::new(envelope.from().cloned(), params))
                .map_err(|e| (Stage::Mail, e))?;
            for to in envelope.to() {
                conn.command(Rcpt::new(to.clone(), vec![]))
                    .map_err(|e| (Stage::Rcpt, e))?;
            }
            conn.command(Data).map_err(|e| (Stage::Data, e))?;
            conn.message(&message.formatted())
                .map_err(|e| (Stage::Data, e))?;
            Ok::<(), (Stage, SmtpError)>(())
        })();

        match result {
            Ok(()) => {
                debug!(recipient = %recipient, "Message accepted by relay");
                Ok(())
            }
            Err((stage, e)) => {
                let replied = e.is_permanent() || e.is_transient();
                if replied && !conn.has_broken() {
                    if let Err(rset) = conn.command(Rset) {
                        warn!(error = %rset, "RSET after failed transaction was rejected");
                    }
                }
                Err(classify_send_failure(
                    stage,
                    replied,
                    &sender,
                    &recipient,
                    e.to_string(),
                ))
            }
        }
    }

    fn close(&mut self) {
        if let Some(mut conn) = self.conn.take() {
            match conn.quit() {
                Ok(_) => debug!(host = %self.settings.host, "SMTP session closed"),
                Err(e) => warn!(host = %self.settings.host, error = %e, "SMTP QUIT failed"),
            }
        }
    }
}

impl Drop for SmtpSession {
    fn drop(&mut self) {
        if let Some(mut conn) = self.conn.take() {
            conn.abort();
        }
    }
}

/// Classify a failed login.
///
/// A negative server reply means the credentials (or the mechanism) were
/// refused; a client-side error means no usable mechanism was offered;
/// anything else is a transport failure.
fn classify_auth_failure(host: &str, e: &SmtpError) -> AuthError {
    let host = host.to_string();
    let reason = e.to_string();
    if e.is_permanent() || e.is_transient() {
        AuthError::Credentials { host, reason }
    } else if e.is_client() {
        AuthError::NotSupported { host, reason }
    } else {
        AuthError::Transport { host, reason }
    }
}

/// Classify a failed send by the stage it failed in.
///
/// Only a negative server reply is attributed to the sender, recipient or
/// data; connection and parse errors are protocol failures.
pub fn classify_send_failure(
    stage: Stage,
    replied: bool,
    sender: &str,
    recipient: &str,
    reason: String,
) -> SendError {
    let recipient = recipient.to_string();
    if !replied {
        return SendError::Protocol { recipient, reason };
    }
    match stage {
        Stage::Mail => SendError::SenderRefused {
            sender: sender.to_string(),
            recipient,
            reason,
        },
        Stage::Rcpt => SendError::RecipientRefused { recipient, reason },
        Stage::Data => SendError::Data { recipient, reason },
    }
}
