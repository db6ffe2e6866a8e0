use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

use super::{EmailSender, MailError, OutgoingEmail};

/// Sender that keeps messages in memory instead of delivering them.
#[derive(Clone, Default)]
pub struct RecordingEmailSender {
    sent: Arc<Mutex<Vec<OutgoingEmail>>>,
    failing_sends: Arc<AtomicUsize>,
}

impl RecordingEmailSender {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` sends fail with a transient error.
    pub fn fail_next(&self, count: usize) {
        self.failing_sends.store(count, Ordering::SeqCst);
    }

    pub async fn sent(&self) -> Vec<OutgoingEmail> {
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl EmailSender for RecordingEmailSender {
    async fn send(&self, email: OutgoingEmail) -> Result<(), MailError> {
        let injected = self
            .failing_sends
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(MailError::Unavailable("smtp relay unreachable".to_string()));
        }
        if email.recipient_count() == 0 {
            return Err(MailError::NoRecipients);
        }
        self.sent.lock().await.push(email);
        Ok(())
    }
}
