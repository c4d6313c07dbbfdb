//! Queue handlers.

pub mod notification;
pub mod report;

pub use notification::{NotificationHandler, Notifier};
pub use report::{DepartmentRouter, ImageClassifier, ReportProcessingHandler, ReportRepository};
