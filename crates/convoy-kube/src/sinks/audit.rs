//! HTTP audit log of deploy sessions

use std::sync::atomic::{AtomicBool, Ordering};

use convoy_core::Manifest;
use serde::Serialize;

use super::http_client;
use crate::error::{DeployError, Result};
use crate::options::AuditOptions;

const ENDPOINT: &str = "/api/v1/deployment-environment";
const TOKEN_HEADER: &str = "X-Auth-Token";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AuditRecord<'a> {
    cluster: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    environment: Option<&'a str>,
    status: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    manifests: Option<&'a [Manifest]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a str>,
}

/// One deploy session of one cluster
///
/// `fail` and `done` do nothing unless `start` recorded the session.
pub struct AuditLog {
    cluster: String,
    options: AuditOptions,
    client: Option<reqwest::Client>,
    started: AtomicBool,
}

impl AuditLog {
    pub fn new(cluster: impl Into<String>, options: AuditOptions) -> Result<Self> {
        let client = if options.enabled {
            if options.url.is_none() {
                return Err(DeployError::InvalidConfig(
                    "audit log is enabled but no url is set".to_string(),
                ));
            }
            Some(http_client()?)
        } else {
            None
        };
        Ok(Self {
            cluster: cluster.into(),
            options,
            client,
            started: AtomicBool::new(false),
        })
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Record the manifests about to be deployed
    pub async fn start(&self, manifests: &[Manifest]) -> Result<()> {
        if manifests.is_empty() || self.client.is_none() {
            return Ok(());
        }
        self.send(AuditRecord {
            cluster: &self.cluster,
            environment: self.options.environment.as_deref(),
            status: "STARTED",
            manifests: Some(manifests),
            error: None,
        })
        .await?;
        self.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    pub async fn fail(&self, error: &str) -> Result<()> {
        if !self.is_started() {
            return Ok(());
        }
        self.send(AuditRecord {
            cluster: &self.cluster,
            environment: self.options.environment.as_deref(),
            status: "FAILURE",
            manifests: None,
            error: Some(error),
        })
        .await
    }

    pub async fn done(&self) -> Result<()> {
        if !self.is_started() {
            return Ok(());
        }
        self.send(AuditRecord {
            cluster: &self.cluster,
            environment: self.options.environment.as_deref(),
            status: "SUCCESS",
            manifests: None,
            error: None,
        })
        .await
    }

    async fn send(&self, record: AuditRecord<'_>) -> Result<()> {
        let (Some(client), Some(url)) = (&self.client, &self.options.url) else {
            return Ok(());
        };
        let mut request = client
            .post(format!("{}{ENDPOINT}", url.trim_end_matches('/')))
            .json(&record);
        if let Some(token) = &self.options.token {
            request = request.header(TOKEN_HEADER, token);
        }
        request.send().await?.error_for_status()?;
        tracing::debug!(cluster = %self.cluster, status = record.status, "audit record sent");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn options(url: &str) -> AuditOptions {
        AuditOptions {
            enabled: true,
            url: Some(url.to_string()),
            token: Some("secret".to_string()),
            environment: Some("production".to_string()),
        }
    }

    fn manifest() -> Manifest {
        Manifest::from_value(json!({ "kind": "Service", "metadata": { "name": "web" } })).unwrap()
    }

    #[tokio::test]
    async fn test_session_is_recorded() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/deployment-environment"))
            .and(header("X-Auth-Token", "secret"))
            .and(body_partial_json(json!({ "status": "STARTED", "cluster": "east" })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/v1/deployment-environment"))
            .and(body_partial_json(json!({ "status": "SUCCESS" })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let audit = AuditLog::new("east", options(&server.uri())).unwrap();
        audit.start(&[manifest()]).await.unwrap();
        assert!(audit.is_started());
        audit.done().await.unwrap();
    }

    #[tokio::test]
    async fn test_not_started_session_is_silent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let audit = AuditLog::new("east", options(&server.uri())).unwrap();
        audit.start(&[]).await.unwrap();
        assert!(!audit.is_started());
        audit.fail("boom").await.unwrap();
        audit.done().await.unwrap();
    }

    #[tokio::test]
    async fn test_server_error_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let audit = AuditLog::new("east", options(&server.uri())).unwrap();
        assert!(audit.start(&[manifest()]).await.is_err());
        assert!(!audit.is_started());
    }

    #[test]
    fn test_enabled_audit_needs_url() {
        let options = AuditOptions {
            enabled: true,
            ..Default::default()
        };
        assert!(AuditLog::new("east", options).is_err());
        assert!(AuditLog::new("east", AuditOptions::default()).is_ok());
    }
}
