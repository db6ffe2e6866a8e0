use anyhow::anyhow;
use askama::Template;
use std::path::Path;

use ptmr_core::models::PayloadSendVerifyEmail;
use ptmr_core::{TaskError, TaskResultExt};
use ptmr_services::{EmailSender, OutgoingEmail};

use super::mail_error;

const VERIFY_EMAIL_SUBJECT: &str = "Welcome to Part Timer";

const INLINE_IMAGES: [(&str, &str); 2] = [("logo", "logo.png"), ("email-icon", "email-icon.png")];

/// Verification email body. Inline images are referenced as `cid:logo` and
/// `cid:email-icon`.
#[derive(Template)]
#[template(path = "verify_email.html")]
struct VerifyEmailTemplate<'a> {
    subject: &'a str,
    name: &'a str,
    link: &'a str,
}

fn render_verify_email(name: &str, verification_link: &str) -> Result<String, askama::Error> {
    VerifyEmailTemplate {
        subject: VERIFY_EMAIL_SUBJECT,
        name,
        link: verification_link,
    }
    .render()
}

pub(super) async fn send_verify_email(
    mailer: &dyn EmailSender,
    asset_dir: Option<&Path>,
    payload: PayloadSendVerifyEmail,
) -> Result<(), TaskError> {
    let missing: Vec<&str> = [
        ("name", &payload.name),
        ("email", &payload.email),
        ("verification_link", &payload.verification_link),
    ]
    .into_iter()
    .filter(|(_, value)| value.trim().is_empty())
    .map(|(field, _)| field)
    .collect();
    if !missing.is_empty() {
        return Err(TaskError::skip_retry(anyhow!(
            "missing required fields: {}",
            missing.join(", ")
        )));
    }

    let html_body = render_verify_email(&payload.name, &payload.verification_link).skip_retry()?;
    let mut email = OutgoingEmail::new(VERIFY_EMAIL_SUBJECT, html_body).to(payload.email.as_str());

    if let Some(dir) = asset_dir {
        for (content_id, file) in INLINE_IMAGES {
            let path = dir.join(file);
            if !tokio::fs::try_exists(&path).await.retryable()? {
                return Err(TaskError::retryable(anyhow!(
                    "{} image not found: {}",
                    content_id,
                    path.display()
                )));
            }
            email = email.inline(content_id, path);
        }
    }

    mailer.send(email).await.map_err(mail_error)?;
    tracing::info!(email = %payload.email, "Verification email sent");
    Ok(())
}
