//! `report-processing` queue handler.

use crate::model::{
    department_for_category, ImageAnalysis, Priority, Report, ReportJobPayload,
    StatusChangePayload, REPORT_STATUS_CHANGE,
};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use civic_core::CivicResult;
use civic_jobs::{BackoffPolicy, EnqueueRequest, JobContext, JobError, JobHandler, JobProducer, QueueName};
#[cfg(test)]
use mockall::automock;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Attempts given to a status notification.
pub const NOTIFICATION_ATTEMPTS: u32 = 3;

/// Fixed delay between notification attempts.
pub const NOTIFICATION_BACKOFF_MS: u64 = 2000;

/// Reads and writes reports.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ReportRepository: Send + Sync {
    async fn find_report(&self, id: &str) -> CivicResult<Option<Report>>;
    async fn save_report(&self, report: &Report) -> CivicResult<()>;
}

/// Classifies an image.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ImageClassifier: Send + Sync {
    async fn classify(&self, image: Vec<u8>) -> CivicResult<ImageAnalysis>;
}

/// Resolves a department name to its id.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait DepartmentRouter: Send + Sync {
    async fn department_id(&self, name: &str) -> CivicResult<String>;
}

/// Priority after taking detected issues into account.
///
/// Gas leaks and public-safety issues make a report critical, water leaks
/// and tree hazards make it high. Anything else leaves `current` untouched.
pub fn escalate_priority<'a>(current: Priority, detected: impl IntoIterator<Item = &'a str>) -> Priority {
    let mut escalated = None;
    for issue in detected {
        match issue {
            "gas_leak" | "public_safety" => return Priority::Critical,
            "water_leak" | "tree_hazard" => escalated = Some(Priority::High),
            _ => {}
        }
    }
    escalated.unwrap_or(current)
}

/// Analyses report images, re-routes the report and notifies its reporter.
pub struct ReportProcessingHandler {
    reports: Arc<dyn ReportRepository>,
    classifier: Arc<dyn ImageClassifier>,
    router: Arc<dyn DepartmentRouter>,
    producer: JobProducer,
}

impl ReportProcessingHandler {
    pub fn new(
        reports: Arc<dyn ReportRepository>,
        classifier: Arc<dyn ImageClassifier>,
        router: Arc<dyn DepartmentRouter>,
        producer: JobProducer,
    ) -> Self {
        Self {
            reports,
            classifier,
            router,
            producer,
        }
    }

    async fn analyse_images(&self, report: &mut Report, buffers: &[String]) -> Result<(), JobError> {
        for (index, encoded) in buffers.iter().enumerate() {
            let bytes = STANDARD
                .decode(encoded)
                .map_err(|e| JobError::handler(format!("image {index} is not valid base64: {e}")))?;

            let analysis = self.classifier.classify(bytes).await.map_err(|e| {
                warn!(report_id = %report.id, index, error = %e, "Image analysis failed");
                JobError::handler(e)
            })?;

            if let Some(image) = report.images.get_mut(index) {
                image.analysis = Some(analysis);
            }
        }
        Ok(())
    }

    async fn notify_reporter(&self, report: &Report, user_id: &str) -> Result<(), JobError> {
        let payload = StatusChangePayload {
            user_id: user_id.to_string(),
            report_id: report.id.clone(),
            status: report.status.clone(),
        };
        let request = EnqueueRequest::new(
            QueueName::Notifications,
            REPORT_STATUS_CHANGE,
            serde_json::to_value(payload)?,
        )
        .attempts(NOTIFICATION_ATTEMPTS)
        .backoff(BackoffPolicy::fixed(NOTIFICATION_BACKOFF_MS));

        let job_id = self.producer.enqueue(request).await?;
        debug!(report_id = %report.id, job_id = %job_id, "Queued status notification");
        Ok(())
    }
}

#[async_trait]
impl JobHandler for ReportProcessingHandler {
    async fn handle(&self, ctx: JobContext) -> Result<(), JobError> {
        let payload: ReportJobPayload = ctx.payload_as()?;
        info!(
            report_id = %payload.report_id,
            job_id = %ctx.job_id,
            job_type = %ctx.job_type,
            attempt = ctx.attempt,
            "Processing report"
        );

        let mut report = self
            .reports
            .find_report(&payload.report_id)
            .await
            .map_err(JobError::handler)?
            .ok_or_else(|| JobError::handler(format!("Report not found: {}", payload.report_id)))?;

        self.analyse_images(&mut report, &payload.image_buffers).await?;

        let department = department_for_category(&report.category);
        report.assigned_to_department = Some(
            self.router
                .department_id(department)
                .await
                .map_err(JobError::handler)?,
        );

        let priority = escalate_priority(report.priority, report.detected_issues());
        if priority != report.priority {
            info!(report_id = %report.id, from = ?report.priority, to = ?priority, "Escalated report priority");
            report.priority = priority;
        }

        self.reports.save_report(&report).await.map_err(JobError::handler)?;

        if let Some(user_id) = report.reported_by.clone() {
            self.notify_reporter(&report, &user_id).await?;
        }
        Ok(())
    }
}
