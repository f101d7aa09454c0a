//! Builds the outgoing MIME message for a staged artifact.
//!
//! `multipart/mixed` with a plain-text body and the document attached as
//! `application/octet-stream`, base64-encoded, with the display name as
//! the attachment filename.

use std::fs;

use lettre::Message;
use lettre::message::header::{ContentTransferEncoding, ContentType};
use lettre::message::{Attachment, Body, Mailbox, MultiPart, SinglePart};

use crate::error::ComposeError;
use crate::pipeline::types::StagedArtifact;

const ATTACHMENT_CONTENT_TYPE: &str = "application/octet-stream";

/// Sender, subject and body shared by every message in a run.
#[derive(Debug, Clone)]
pub struct MessageTemplate {
    sender: Mailbox,
    subject: String,
    body: String,
}

impl MessageTemplate {
    pub fn new(
        sender_address: &str,
        subject: impl Into<String>,
        body: impl Into<String>,
    ) -> Result<Self, ComposeError> {
        let sender = sender_address
            .parse::<Mailbox>()
            .map_err(|e| ComposeError::InvalidAddress {
                address: sender_address.to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            sender,
            subject: subject.into(),
            body: body.into(),
        })
    }

    pub fn sender(&self) -> &Mailbox {
        &self.sender
    }

    /// Compose the message for one recipient, reading the staged document.
    pub fn compose(&self, artifact: &StagedArtifact) -> Result<Message, ComposeError> {
        let recipient = artifact
            .recipient
            .as_str()
            .parse::<Mailbox>()
            .map_err(|e| ComposeError::InvalidAddress {
                address: artifact.recipient.to_string(),
                reason: e.to_string(),
            })?;

        let content = fs::read(&artifact.path).map_err(|source| ComposeError::ReadAttachment {
            path: artifact.path.clone(),
            source,
        })?;

        let body = Body::new_with_encoding(content, ContentTransferEncoding::Base64)
            .map_err(|_| ComposeError::Build("attachment could not be base64 encoded".into()))?;
        let content_type = ContentType::parse(ATTACHMENT_CONTENT_TYPE)
            .map_err(|_| ComposeError::Build(format!("invalid content type {ATTACHMENT_CONTENT_TYPE}")))?;
        let attachment = Attachment::new(artifact.display_name.clone()).body(body, content_type);

        Message::builder()
            .from(self.sender.clone())
            .to(recipient)
            .subject(self.subject.clone())
            .multipart(
                MultiPart::mixed()
                    .singlepart(SinglePart::plain(self.body.clone()))
                    .singlepart(attachment),
            )
            .map_err(|e| ComposeError::Build(e.to_string()))
    }
}
