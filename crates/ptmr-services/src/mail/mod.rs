//! Outgoing email
//!
//! Handlers describe a message with [`OutgoingEmail`] and hand it to an
//! [`EmailSender`]. Inline images are referenced from the HTML body as
//! `cid:<content id>`.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;

mod recording;
mod smtp;

pub use recording::RecordingEmailSender;
pub use smtp::SmtpEmailSender;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutgoingEmail {
    pub subject: String,
    pub html_body: String,
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub bcc: Vec<String>,
    /// Files attached as regular downloads.
    pub attachments: Vec<PathBuf>,
    /// Content id -> image file, embedded inline.
    pub inline: BTreeMap<String, PathBuf>,
}

impl OutgoingEmail {
    pub fn new(subject: impl Into<String>, html_body: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            html_body: html_body.into(),
            ..Default::default()
        }
    }

    pub fn to(mut self, address: impl Into<String>) -> Self {
        self.to.push(address.into());
        self
    }

    pub fn inline(mut self, content_id: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        self.inline.insert(content_id.into(), path.into());
        self
    }

    pub fn recipient_count(&self) -> usize {
        self.to.len() + self.cc.len() + self.bcc.len()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("invalid email address {address:?}: {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("email has no recipients")]
    NoRecipients,

    #[error("failed to read attachment {}: {source}", path.display())]
    Attachment {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unsupported content type {0:?}")]
    ContentType(String),

    #[error("failed to build email: {0}")]
    Build(#[from] lettre::error::Error),

    #[error("smtp delivery failed: {0}")]
    Transport(#[from] lettre::transport::smtp::Error),

    #[error("email delivery is not configured")]
    NotConfigured,

    #[error("email delivery unavailable: {0}")]
    Unavailable(String),
}

impl MailError {
    /// Whether sending the same message again can never succeed.
    pub fn is_permanent(&self) -> bool {
        match self {
            MailError::InvalidAddress { .. }
            | MailError::NoRecipients
            | MailError::ContentType(_)
            | MailError::Build(_)
            | MailError::NotConfigured => true,
            MailError::Transport(e) => e.is_permanent(),
            MailError::Attachment { .. } | MailError::Unavailable(_) => false,
        }
    }
}

#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send(&self, email: OutgoingEmail) -> Result<(), MailError>;
}

/// Sender used when SMTP is not configured. Every send fails permanently.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledEmailSender;

#[async_trait]
impl EmailSender for DisabledEmailSender {
    async fn send(&self, email: OutgoingEmail) -> Result<(), MailError> {
        tracing::debug!(subject = %email.subject, "Email delivery disabled (SMTP_HOST not set)");
        Err(MailError::NotConfigured)
    }
}
