use std::sync::Arc;

use tracing::{Instrument, info, info_span, warn};

use crate::error::AppError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAnswerNotice {
    pub recipient_email: String,
    pub recipient_name: String,
    pub question_id: i64,
    pub question_title: String,
    pub answer_author: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailMessage {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub body: String,
}

impl NewAnswerNotice {
    pub fn to_email(&self, sender: &str) -> EmailMessage {
        EmailMessage {
            from: sender.to_string(),
            to: self.recipient_email.clone(),
            subject: format!("New answer to \"{}\"", self.question_title),
            body: format!(
                "Hi {},\n\n{} answered your question \"{}\".\n\nRead it at /questions/{}\n",
                self.recipient_name, self.answer_author, self.question_title, self.question_id
            ),
        }
    }
}

#[rocket::async_trait]
pub trait Notifier: Send + Sync {
    async fn notify_new_answer(&self, notice: &NewAnswerNotice) -> Result<(), AppError>;
}

/// Composes the email and writes it to the log instead of sending it.
pub struct LogNotifier {
    sender: String,
}

impl LogNotifier {
    pub fn new(sender: &str) -> Self {
        Self {
            sender: sender.to_string(),
        }
    }
}

#[rocket::async_trait]
impl Notifier for LogNotifier {
    async fn notify_new_answer(&self, notice: &NewAnswerNotice) -> Result<(), AppError> {
        if notice.recipient_email.is_empty() {
            return Err(AppError::ExternalService(format!(
                "No email address on file for {}",
                notice.recipient_name
            )));
        }

        let email = notice.to_email(&self.sender);
        info!(
            from = %email.from,
            to = %email.to,
            subject = %email.subject,
            "New answer notification"
        );
        Ok(())
    }
}

/// Hands the notice to `notifier` on a detached task. Failures are logged
/// and never reach the caller.
pub fn dispatch_new_answer(notifier: Arc<dyn Notifier>, notice: NewAnswerNotice) {
    let span = info_span!("new_answer_notification", question_id = notice.question_id);

    rocket::tokio::spawn(
        async move {
            if let Err(err) = notifier.notify_new_answer(&notice).await {
                warn!(error = %err, "Failed to send new answer notification");
            }
        }
        .instrument(span),
    );
}
