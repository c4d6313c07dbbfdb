//! Hosted image classification.

use super::{ensure_success, external_error};
use crate::handlers::ImageClassifier;
use crate::model::ImageAnalysis;
use async_trait::async_trait;
use civic_config::InferenceConfig;
use civic_core::{CivicError, CivicResult};
use reqwest::Client;
use serde::Deserialize;
use tracing::{info, warn};

const SERVICE: &str = "inference";

/// Labels kept on an analysis.
const MAX_LABELS: usize = 10;

/// Issue name and the label words that indicate it.
const ISSUE_KEYWORDS: &[(&str, &[&str])] = &[
    ("pothole", &["pothole", "asphalt", "road", "crack"]),
    ("streetlight", &["light", "lamp", "bulb", "streetlight"]),
    ("trash", &["trash", "garbage", "litter", "waste", "bin"]),
    ("graffiti", &["graffiti", "paint", "spray"]),
    ("water_leak", &["water", "leak", "pipe", "flood"]),
    ("tree_hazard", &["tree", "branch", "hazard"]),
];

#[derive(Debug, Deserialize)]
struct Classification {
    label: String,
    score: f64,
}

/// Issues suggested by classifier labels, matched on whole words.
pub fn detect_issues<S: AsRef<str>>(labels: &[S]) -> Vec<String> {
    let words: Vec<String> = labels
        .iter()
        .flat_map(|label| {
            label
                .as_ref()
                .split(|c: char| !c.is_alphanumeric())
                .filter(|w| !w.is_empty())
                .map(str::to_lowercase)
                .collect::<Vec<_>>()
        })
        .collect();

    ISSUE_KEYWORDS
        .iter()
        .filter(|(_, keywords)| words.iter().any(|w| keywords.contains(&w.as_str())))
        .map(|(issue, _)| (*issue).to_string())
        .collect()
}

/// Image classifier backed by a hosted inference API.
///
/// Without a token every image gets an empty analysis.
#[derive(Clone)]
pub struct InferenceClient {
    client: Client,
    endpoint: String,
    token: Option<String>,
}

impl InferenceClient {
    pub fn new(config: &InferenceConfig) -> CivicResult<Self> {
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| CivicError::Configuration(format!("Invalid HTTP client config: {}", e)))?;

        if !config.is_enabled() {
            warn!("No inference token configured, image analysis is disabled");
        }

        Ok(Self {
            client,
            endpoint: format!(
                "{}/models/{}",
                config.base_url.trim_end_matches('/'),
                config.model
            ),
            token: config.token.clone().filter(|_| config.is_enabled()),
        })
    }
}

#[async_trait]
impl ImageClassifier for InferenceClient {
    async fn classify(&self, image: Vec<u8>) -> CivicResult<ImageAnalysis> {
        let Some(token) = &self.token else {
            return Ok(ImageAnalysis::default());
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(token)
            .body(image)
            .send()
            .await
            .map_err(|e| external_error(SERVICE, e))?;
        let results: Vec<Classification> = ensure_success(SERVICE, response)
            .await?
            .json()
            .await
            .map_err(|e| external_error(SERVICE, e))?;

        let Some(top) = results.first() else {
            return Ok(ImageAnalysis::default());
        };
        let confidence = top.score;
        info!(label = %top.label, confidence, "Image analysis complete");

        let labels: Vec<String> = results.into_iter().map(|r| r.label).collect();
        let detected_issues = detect_issues(&labels);
        Ok(ImageAnalysis {
            labels: labels.into_iter().take(MAX_LABELS).collect(),
            confidence,
            detected_issues,
        })
    }
}
