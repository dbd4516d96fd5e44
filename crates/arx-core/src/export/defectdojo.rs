//! DefectDojo findings sink (REST API v2).

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, USER_AGENT};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use super::{FindingsSink, SinkOutcome, SinkResult};
use crate::errors::{ConfigError, ConfigResult, ExportError};
use crate::model::{Finding, Severity};
use crate::settings::Settings;

const USER_AGENT_VALUE: &str = concat!("arx/", env!("CARGO_PKG_VERSION"));

pub struct DefectDojoSink {
    base_url: String,
    test_id: u64,
    user_id: u64,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct FindingList {
    #[serde(default)]
    results: Vec<FindingRef>,
}

#[derive(Debug, Deserialize)]
struct FindingRef {
    id: serde_json::Value,
}

fn severity_name(s: Severity) -> &'static str {
    match s {
        Severity::Critical => "Critical",
        Severity::High => "High",
        Severity::Medium => "Medium",
        Severity::Low => "Low",
        Severity::Info => "Info",
    }
}

fn numerical_severity(s: Severity) -> &'static str {
    match s {
        Severity::Critical => "S0",
        Severity::High => "S1",
        Severity::Medium => "S2",
        Severity::Low => "S3",
        Severity::Info => "S4",
    }
}

fn entry_id(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// 5xx and 429 are transient; any other non-success is a refusal.
async fn classify(resp: reqwest::Response, dedup_key: &str) -> ExportError {
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        ExportError::transport(format!("tracker returned {status}"))
    } else {
        ExportError::ExportRejected {
            dedup_key: dedup_key.to_string(),
            message: format!("tracker returned {status}: {body}"),
        }
    }
}

impl DefectDojoSink {
    pub fn new(
        url: &str,
        token: &str,
        test_id: u64,
        user_id: u64,
        timeout: Duration,
    ) -> ConfigResult<Self> {
        let invalid = |reason: String| ConfigError::InvalidSettings { reason };
        let mut base_url = url.trim().trim_end_matches('/').to_string();
        if !base_url.ends_with("/api/v2") {
            base_url.push_str("/api/v2");
        }

        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(USER_AGENT_VALUE));
        let auth = HeaderValue::from_str(&format!("Token {token}"))
            .map_err(|e| invalid(format!("invalid REPORTER_TOKEN: {e}")))?;
        headers.insert(AUTHORIZATION, auth);

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|e| invalid(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            base_url,
            test_id,
            user_id,
            client,
        })
    }

    pub fn from_settings(settings: &Settings) -> ConfigResult<Self> {
        let missing = |name: &str| ConfigError::InvalidSettings {
            reason: format!("{name} is required for the defectdojo reporter"),
        };
        let url = settings
            .reporter_url
            .as_deref()
            .ok_or_else(|| missing("REPORTER_URL"))?;
        let token = settings
            .reporter_token
            .as_deref()
            .ok_or_else(|| missing("REPORTER_TOKEN"))?;
        Self::new(
            url,
            token,
            settings.tracker_test_id,
            settings.tracker_user_id,
            settings.tracker_timeout(),
        )
    }

    async fn find(&self, sink_id: &str, dedup_key: &str) -> SinkResult<Option<String>> {
        let resp = self
            .client
            .get(format!("{}/findings/", self.base_url))
            .query(&[("unique_id_from_tool", sink_id)])
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(classify(resp, dedup_key).await);
        }
        let list: FindingList = resp
            .json()
            .await
            .map_err(|e| ExportError::transport(format!("invalid tracker response: {e}")))?;
        Ok(list.results.first().map(|f| entry_id(&f.id)))
    }

    fn payload(&self, sink_id: &str, finding: &Finding) -> serde_json::Value {
        let mut description = finding.description.clone();
        if let Some(location) = &finding.location {
            description.push_str(&format!("\n\nLocation: {location}"));
        }
        if !finding.evidence.is_empty() {
            description.push_str("\n\nEvidence:");
            for e in &finding.evidence {
                description.push_str(&format!("\n- {}: {}", e.phase, e.detail));
            }
        }
        json!({
            "title": finding.title,
            "description": description,
            "severity": severity_name(finding.severity),
            "numerical_severity": numerical_severity(finding.severity),
            "test": self.test_id,
            "found_by": [self.user_id],
            "active": true,
            "verified": finding.verified,
            "impact": finding.impact.clone().unwrap_or_default(),
            "mitigation": finding.mitigation.clone().unwrap_or_default(),
            "unique_id_from_tool": sink_id,
        })
    }
}

#[async_trait]
impl FindingsSink for DefectDojoSink {
    async fn find_or_create(&self, sink_id: &str, finding: &Finding) -> SinkResult<SinkOutcome> {
        if let Some(entry_id) = self.find(sink_id, &finding.dedup_key).await? {
            debug!(sink_id, entry_id = %entry_id, "finding already tracked");
            return Ok(SinkOutcome {
                entry_id,
                created: false,
            });
        }

        let resp = self
            .client
            .post(format!("{}/findings/", self.base_url))
            .json(&self.payload(sink_id, finding))
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(classify(resp, &finding.dedup_key).await);
        }
        let created: FindingRef = resp
            .json()
            .await
            .map_err(|e| ExportError::transport(format!("invalid tracker response: {e}")))?;
        Ok(SinkOutcome {
            entry_id: entry_id(&created.id),
            created: true,
        })
    }

    async fn test_connection(&self) -> SinkResult<()> {
        let resp = self
            .client
            .get(format!("{}/users/", self.base_url))
            .send()
            .await?;
        if resp.status().is_success() {
            Ok(())
        } else {
            Err(classify(resp, "").await)
        }
    }

    fn sink_name(&self) -> &'static str {
        "defectdojo"
    }
}
