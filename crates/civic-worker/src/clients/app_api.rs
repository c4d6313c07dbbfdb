//! Client for the surrounding application's internal API.

use super::{external_error, ensure_success};
use crate::handlers::{DepartmentRouter, Notifier, ReportRepository};
use crate::model::{Recipient, Report};
use async_trait::async_trait;
use civic_config::AppApiConfig;
use civic_core::{CivicError, CivicResult};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;

const SERVICE: &str = "app-api";

#[derive(Serialize)]
struct ResolveDepartment<'a> {
    name: &'a str,
}

#[derive(Deserialize)]
struct Department {
    #[serde(alias = "_id")]
    id: String,
}

#[derive(Serialize)]
struct Email<'a> {
    to: &'a str,
    subject: &'a str,
    text: &'a str,
}

#[derive(Serialize)]
struct Push<'a> {
    subscription: &'a serde_json::Value,
    title: &'a str,
    body: &'a str,
}

/// Reports, departments, users, mail and push delivery over HTTP.
#[derive(Clone)]
pub struct AppApiClient {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl AppApiClient {
    pub fn new(config: &AppApiConfig) -> CivicResult<Self> {
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| CivicError::Configuration(format!("Invalid HTTP client config: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// GET a JSON resource, mapping 404 to `None`.
    async fn get_optional<T: serde::de::DeserializeOwned>(&self, path: &str) -> CivicResult<Option<T>> {
        let response = self
            .authorized(self.client.get(self.url(path)))
            .send()
            .await
            .map_err(|e| external_error(SERVICE, e))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = ensure_success(SERVICE, response).await?;
        let body = response.json().await.map_err(|e| external_error(SERVICE, e))?;
        Ok(Some(body))
    }
}

#[async_trait]
impl ReportRepository for AppApiClient {
    async fn find_report(&self, id: &str) -> CivicResult<Option<Report>> {
        self.get_optional(&format!("/reports/{}", id)).await
    }

    async fn save_report(&self, report: &Report) -> CivicResult<()> {
        let response = self
            .authorized(self.client.put(self.url(&format!("/reports/{}", report.id))))
            .json(report)
            .send()
            .await
            .map_err(|e| external_error(SERVICE, e))?;
        ensure_success(SERVICE, response).await?;
        debug!(report_id = %report.id, "Saved report");
        Ok(())
    }
}

#[async_trait]
impl DepartmentRouter for AppApiClient {
    async fn department_id(&self, name: &str) -> CivicResult<String> {
        let response = self
            .authorized(self.client.post(self.url("/departments/resolve")))
            .json(&ResolveDepartment { name })
            .send()
            .await
            .map_err(|e| external_error(SERVICE, e))?;
        let department: Department = ensure_success(SERVICE, response)
            .await?
            .json()
            .await
            .map_err(|e| external_error(SERVICE, e))?;
        Ok(department.id)
    }
}

#[async_trait]
impl Notifier for AppApiClient {
    async fn recipient(&self, user_id: &str) -> CivicResult<Option<Recipient>> {
        self.get_optional(&format!("/users/{}", user_id)).await
    }

    async fn send_email(&self, to: &str, subject: &str, body: &str) -> CivicResult<()> {
        let response = self
            .authorized(self.client.post(self.url("/notifications/email")))
            .json(&Email { to, subject, text: body })
            .send()
            .await
            .map_err(|e| external_error(SERVICE, e))?;
        ensure_success(SERVICE, response).await?;
        Ok(())
    }

    async fn send_push(&self, subscription: &serde_json::Value, title: &str, body: &str) -> CivicResult<()> {
        let response = self
            .authorized(self.client.post(self.url("/notifications/push")))
            .json(&Push { subscription, title, body })
            .send()
            .await
            .map_err(|e| external_error(SERVICE, e))?;
        ensure_success(SERVICE, response).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Priority;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer, token: Option<&str>) -> AppApiClient {
        AppApiClient::new(&AppApiConfig {
            base_url: format!("{}/internal/", server.uri()),
            token: token.map(str::to_string),
            timeout_secs: 5,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_find_report() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/internal/reports/r-1"))
            .and(header("authorization", "Bearer secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "_id": "r-1",
                "category": "pothole",
                "priority": "high",
                "status": "submitted",
                "title": "Hole"
            })))
            .mount(&server)
            .await;

        let report = client(&server, Some("secret")).find_report("r-1").await.unwrap().unwrap();
        assert_eq!(report.id, "r-1");
        assert_eq!(report.priority, Priority::High);
        assert_eq!(report.extra["title"], "Hole");
    }

    #[tokio::test]
    async fn test_find_report_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/internal/reports/r-404"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        assert!(client(&server, None).find_report("r-404").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_server_error_is_external_service_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/internal/users/u-1"))
            .respond_with(ResponseTemplate::new(500).set_body_string("database down"))
            .mount(&server)
            .await;

        let err = client(&server, None).recipient("u-1").await.unwrap_err();
        assert!(matches!(err, CivicError::ExternalService { ref message, .. } if message.contains("500")));
    }

    #[tokio::test]
    async fn test_department_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/internal/departments/resolve"))
            .and(body_json(json!({"name": "Waterworks"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"_id": "d-9", "name": "Waterworks"})))
            .mount(&server)
            .await;

        let id = client(&server, None).department_id("Waterworks").await.unwrap();
        assert_eq!(id, "d-9");
    }

    #[tokio::test]
    async fn test_send_email() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/internal/notifications/email"))
            .and(body_json(json!({"to": "a@b.c", "subject": "s", "text": "t"})))
            .respond_with(ResponseTemplate::new(202))
            .expect(1)
            .mount(&server)
            .await;

        client(&server, None).send_email("a@b.c", "s", "t").await.unwrap();
    }

    #[tokio::test]
    async fn test_recipient_with_push_subscription() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/internal/users/u-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "_id": "u-1",
                "email": "a@b.c",
                "pushSubscription": {"endpoint": "https://push.example.org/s/1"}
            })))
            .mount(&server)
            .await;

        let recipient = client(&server, None).recipient("u-1").await.unwrap().unwrap();
        assert_eq!(
            recipient.push_subscription,
            Some(json!({"endpoint": "https://push.example.org/s/1"}))
        );
    }

    #[tokio::test]
    async fn test_send_push() {
        let server = MockServer::start().await;
        let subscription = json!({"endpoint": "https://push.example.org/s/1", "keys": {"auth": "x"}});
        Mock::given(method("POST"))
            .and(path("/internal/notifications/push"))
            .and(body_json(json!({
                "subscription": subscription,
                "title": "Report update",
                "body": "Status: resolved"
            })))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        client(&server, None)
            .send_push(&subscription, "Report update", "Status: resolved")
            .await
            .unwrap();
    }
}
