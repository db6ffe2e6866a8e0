use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Address, AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use std::path::Path;
use std::sync::Arc;

use ptmr_core::config::SmtpConfig;

use super::{EmailSender, MailError, OutgoingEmail};

/// SMTP delivery through lettre's async transport.
#[derive(Clone)]
pub struct SmtpEmailSender {
    mailer: Arc<AsyncSmtpTransport<Tokio1Executor>>,
    from: Mailbox,
}

fn parse_mailbox(address: &str) -> Result<Mailbox, MailError> {
    address.parse().map_err(|e: lettre::address::AddressError| MailError::InvalidAddress {
        address: address.to_string(),
        reason: e.to_string(),
    })
}

fn mime_type(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match extension.as_deref() {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        _ => "application/octet-stream",
    }
}

fn content_type_for(path: &Path) -> Result<ContentType, MailError> {
    let mime = mime_type(path);
    ContentType::parse(mime).map_err(|_| MailError::ContentType(mime.to_string()))
}

async fn read_file(path: &Path) -> Result<Vec<u8>, MailError> {
    tokio::fs::read(path)
        .await
        .map_err(|source| MailError::Attachment {
            path: path.to_path_buf(),
            source,
        })
}

impl SmtpEmailSender {
    pub fn from_config(config: &SmtpConfig) -> Result<Self, MailError> {
        let address: Address =
            config
                .from
                .parse()
                .map_err(|e: lettre::address::AddressError| MailError::InvalidAddress {
                    address: config.from.clone(),
                    reason: e.to_string(),
                })?;
        let from = Mailbox::new(config.sender_name.clone(), address);

        let builder = if config.tls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host)
        };
        let builder = builder.port(config.port);
        let builder = if let (Some(u), Some(p)) = (&config.user, &config.password) {
            builder.credentials(Credentials::new(u.clone(), p.clone()))
        } else {
            builder
        };
        tracing::info!(
            host = %config.host,
            port = config.port,
            tls = config.tls,
            "Email sender initialized (SMTP)"
        );

        Ok(Self {
            mailer: Arc::new(builder.build()),
            from,
        })
    }

    /// Build the MIME message: the HTML body and its inline images inside a
    /// `multipart/related` part, regular attachments alongside it.
    pub async fn build_message(&self, email: &OutgoingEmail) -> Result<Message, MailError> {
        if email.recipient_count() == 0 {
            return Err(MailError::NoRecipients);
        }

        let mut builder = Message::builder()
            .from(self.from.clone())
            .subject(email.subject.clone());
        for address in &email.to {
            builder = builder.to(parse_mailbox(address)?);
        }
        for address in &email.cc {
            builder = builder.cc(parse_mailbox(address)?);
        }
        for address in &email.bcc {
            builder = builder.bcc(parse_mailbox(address)?);
        }

        let mut related =
            MultiPart::related().singlepart(SinglePart::html(email.html_body.clone()));
        for (content_id, path) in &email.inline {
            let body = read_file(path).await?;
            related = related
                .singlepart(Attachment::new_inline(content_id.clone()).body(body, content_type_for(path)?));
        }

        let mut mixed = MultiPart::mixed().multipart(related);
        for path in &email.attachments {
            let body = read_file(path).await?;
            let filename = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "attachment".to_string());
            mixed = mixed.singlepart(Attachment::new(filename).body(body, content_type_for(path)?));
        }

        Ok(builder.multipart(mixed)?)
    }
}

#[async_trait]
impl EmailSender for SmtpEmailSender {
    #[tracing::instrument(skip(self, email), fields(subject = %email.subject, recipients = email.recipient_count()))]
    async fn send(&self, email: OutgoingEmail) -> Result<(), MailError> {
        let message = self.build_message(&email).await?;
        self.mailer.send(message).await?;
        tracing::info!("Email sent");
        Ok(())
    }
}
