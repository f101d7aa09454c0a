//! The seam between the dispatch engine and the mail relay.

use lettre::Message;

use crate::error::{AuthError, SendError};

/// One outbound mail session.
///
/// The engine calls [`open`](Self::open) once, [`send`](Self::send) once per
/// recipient, and [`close`](Self::close) once at the end. Implementations
/// are not reentrant; calls are strictly sequential.
pub trait MailTransport {
    /// Connect and authenticate. Any error is fatal for the run.
    fn open(&mut self) -> Result<(), AuthError>;

    /// Transmit one message. Errors are per-recipient; the session must
    /// remain usable for the next call.
    fn send(&mut self, message: &Message) -> Result<(), SendError>;

    /// Release the session. Failures are logged, not returned.
    fn close(&mut self);
}

/// First envelope recipient, for error context.
pub(crate) fn envelope_recipient(message: &Message) -> String {
    message
        .envelope()
        .to()
        .first()
        .map(|a| a.to_string())
        .unwrap_or_else(|| "unknown".into())
}
