//! Mail assembly: an HTML body plus the invoice as a base64 attachment.
//!
//! Nothing here touches the network; the result is handed to a
//! [`MailSession`](crate::pipeline::dispatch::MailSession).

use crate::config::MailProfile;
use crate::error::RecordError;
use crate::templates::mail_body;
use lettre::message::header::{ContentTransferEncoding, ContentType};
use lettre::message::{Attachment, Body, Mailbox, MultiPart, SinglePart};
use lettre::{Address, Message};
use std::path::Path;
use tracing::info;

/// A composed message ready for the transport.
#[derive(Debug, Clone)]
pub struct OutgoingMessage {
    /// Bare recipient address.
    pub recipient: String,
    /// File name announced in `Content-Disposition`.
    pub attachment_name: String,
    /// Subject line, kept for logs.
    pub subject: String,
    message: Message,
}

impl OutgoingMessage {
    /// The underlying message (headers, envelope, parts).
    pub fn message(&self) -> &Message {
        &self.message
    }

    /// RFC 5322 wire form.
    pub fn formatted(&self) -> Vec<u8> {
        self.message.formatted()
    }
}

/// Builds one [`OutgoingMessage`] per recipient from a [`MailProfile`].
#[derive(Debug, Clone)]
pub struct MailAssembler<'a> {
    profile: &'a MailProfile,
    season: &'a str,
}

impl<'a> MailAssembler<'a> {
    pub fn new(profile: &'a MailProfile, season: &'a str) -> Self {
        Self { profile, season }
    }

    /// Compose the mail for `recipient_email` greeting `recipient_name`, with
    /// the file at `attachment` attached.
    pub async fn assemble(
        &self,
        recipient_name: &str,
        recipient_email: &str,
        attachment: &Path,
    ) -> Result<OutgoingMessage, RecordError> {
        let bytes = tokio::fs::read(attachment)
            .await
            .map_err(|e| RecordError::Attachment {
                path: attachment.to_path_buf(),
                detail: e.to_string(),
            })?;
        let file_name = attachment
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| RecordError::Attachment {
                path: attachment.to_path_buf(),
                detail: "path has no file name".into(),
            })?;
        self.assemble_bytes(recipient_name, recipient_email, &file_name, bytes)
    }

    /// Same as [`assemble`](Self::assemble) for an attachment already in memory.
    pub fn assemble_bytes(
        &self,
        recipient_name: &str,
        recipient_email: &str,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> Result<OutgoingMessage, RecordError> {
        let invalid = |detail: String| RecordError::InvalidMessage {
            recipient: recipient_email.to_string(),
            detail,
        };

        let address: Address = recipient_email
            .trim()
            .parse()
            .map_err(|e| invalid(format!("recipient address: {e}")))?;
        let to = Mailbox::new(Some(recipient_name.to_string()), address);
        let from: Mailbox = self
            .profile
            .sender
            .parse()
            .map_err(|e| invalid(format!("sender address: {e}")))?;
        let reply_to: Mailbox = self
            .profile
            .reply_to()
            .parse()
            .map_err(|e| invalid(format!("reply-to address: {e}")))?;
        let subject = self.profile.subject(self.season);

        let mut builder = Message::builder()
            .from(from)
            .to(to)
            .reply_to(reply_to)
            .subject(subject.clone());
        if let Some(cc) = &self.profile.cc {
            let cc: Mailbox = cc.parse().map_err(|e| invalid(format!("cc address: {e}")))?;
            builder = builder.cc(cc);
        }

        let body = Body::new_with_encoding(bytes, ContentTransferEncoding::Base64)
            .map_err(|_| invalid("attachment cannot be base64-encoded".into()))?;
        let content_type = ContentType::parse("application/octet-stream")
            .map_err(|e| invalid(format!("content type: {e}")))?;
        info!("Add {} as an attachment", file_name);
        let attachment = Attachment::new(file_name.to_string()).body(body, content_type);

        let html = mail_body(recipient_name, self.season, self.profile)
            .map_err(|e| invalid(format!("mail body: {e}")))?;
        let message = builder
            .multipart(
                MultiPart::mixed()
                    .singlepart(SinglePart::html(html))
                    .singlepart(attachment),
            )
            .map_err(|e| invalid(e.to_string()))?;

        Ok(OutgoingMessage {
            recipient: recipient_email.trim().to_string(),
            attachment_name: file_name.to_string(),
            subject,
            message,
        })
    }
}
