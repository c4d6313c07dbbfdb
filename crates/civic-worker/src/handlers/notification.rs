//! `notifications` queue handler.

use crate::model::{Recipient, StatusChangePayload, REPORT_STATUS_CHANGE};
use async_trait::async_trait;
use civic_core::CivicResult;
use civic_jobs::{JobContext, JobError, JobHandler};
#[cfg(test)]
use mockall::automock;
use std::sync::Arc;
use tracing::{info, warn};

/// Looks up recipients and delivers messages to them.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn recipient(&self, user_id: &str) -> CivicResult<Option<Recipient>>;
    async fn send_email(&self, to: &str, subject: &str, body: &str) -> CivicResult<()>;
    async fn send_push(&self, subscription: &serde_json::Value, title: &str, body: &str) -> CivicResult<()>;
}

/// Tells reporters that their report changed status.
///
/// Delivery is at-least-once: a retried job may send the same message
/// twice. `job_id` is logged with every send for correlation. Email
/// failures fail the attempt; push failures are only logged.
pub struct NotificationHandler {
    notifier: Arc<dyn Notifier>,
}

impl NotificationHandler {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self { notifier }
    }

    async fn status_change(&self, ctx: &JobContext) -> Result<(), JobError> {
        let payload: StatusChangePayload = ctx.payload_as()?;

        let Some(recipient) = self
            .notifier
            .recipient(&payload.user_id)
            .await
            .map_err(JobError::handler)?
        else {
            warn!(user_id = %payload.user_id, job_id = %ctx.job_id, "Notification recipient not found");
            return Ok(());
        };

        match recipient.email.as_deref().filter(|e| !e.is_empty()) {
            Some(email) => {
                let subject = format!("Update on report {}", payload.report_id);
                let body = format!("Your report {} is now {}", payload.report_id, payload.status);
                self.notifier
                    .send_email(email, &subject, &body)
                    .await
                    .map_err(JobError::handler)?;

                info!(
                    job_id = %ctx.job_id,
                    attempt = ctx.attempt,
                    report_id = %payload.report_id,
                    status = %payload.status,
                    "Status notification sent"
                );
            }
            None => info!(user_id = %recipient.id, "Recipient has no email address, skipping email"),
        }

        if let Some(subscription) = &recipient.push_subscription {
            let body = format!("Status: {}", payload.status);
            match self.notifier.send_push(subscription, "Report update", &body).await {
                Ok(()) => info!(job_id = %ctx.job_id, user_id = %recipient.id, "Push notification sent"),
                Err(e) => warn!(
                    job_id = %ctx.job_id,
                    user_id = %recipient.id,
                    error = %e,
                    "Push notification failed"
                ),
            }
        }
        Ok(())
    }
}

#[async_trait]
impl JobHandler for NotificationHandler {
    async fn handle(&self, ctx: JobContext) -> Result<(), JobError> {
        match ctx.job_type.as_str() {
            REPORT_STATUS_CHANGE => self.status_change(&ctx).await,
            other => {
                warn!(job_id = %ctx.job_id, job_type = other, "No notification for job type, skipping");
                Ok(())
            }
        }
    }
}
