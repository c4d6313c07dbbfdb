//! Report and notification shapes exchanged with the application API and
//! carried in job payloads.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Job type of report analysis jobs.
pub const IMAGE_ANALYSIS: &str = "image-analysis";

/// Job type of report status notifications.
pub const REPORT_STATUS_CHANGE: &str = "report-status-change";

/// Report priority, ordered from least to most urgent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

/// Classification result for one report image.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageAnalysis {
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub detected_issues: Vec<String>,
}

/// An uploaded report image.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportImage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis: Option<ImageAnalysis>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A citizen report as served by the application API.
///
/// Fields the worker does not touch are kept in `extra` so a save writes
/// them back unchanged.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    #[serde(alias = "_id")]
    pub id: String,
    pub category: String,
    #[serde(default)]
    pub priority: Priority,
    pub status: String,
    #[serde(default)]
    pub images: Vec<ReportImage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reported_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_to_department: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Report {
    /// Every issue detected across the report's analysed images.
    pub fn detected_issues(&self) -> impl Iterator<Item = &str> {
        self.images
            .iter()
            .filter_map(|image| image.analysis.as_ref())
            .flat_map(|analysis| analysis.detected_issues.iter().map(String::as_str))
    }
}

/// Payload of an `image-analysis` job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportJobPayload {
    pub report_id: String,
    /// Base64-encoded image bytes, index-aligned with `Report::images`.
    #[serde(default)]
    pub image_buffers: Vec<String>,
}

/// Payload of a `report-status-change` job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusChangePayload {
    pub user_id: String,
    pub report_id: String,
    pub status: String,
}

/// A user who can be notified.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recipient {
    #[serde(alias = "_id")]
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    /// Web push subscription stored on the user profile.
    #[serde(default)]
    pub push_subscription: Option<serde_json::Value>,
}

/// Department responsible for a report category.
pub fn department_for_category(category: &str) -> &'static str {
    match category {
        "pothole" | "sidewalk" => "Public Works",
        "streetlight" => "Electrical",
        "trash" => "Sanitation",
        "graffiti" => "Parks & Buildings",
        "water_leak" => "Waterworks",
        "tree_hazard" => "Parks",
        "traffic_signal" | "parking" => "Traffic",
        "noise" => "Public Safety",
        "animal_control" => "Animal Control",
        "public_safety" => "Police",
        _ => "General Maintenance",
    }
}
