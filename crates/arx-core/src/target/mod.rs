//! Target Adapter: one request/response shape for probing the system under test.
//!
//! Adapters never retry. A probe may have side effects on the target (an exploit
//! attempt is a probe), so whether repeating it is safe is the caller's decision.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::errors::{TargetError, TargetResult};

pub mod config;
pub mod http;
pub mod stub;

pub use config::{substitute_env, AuthConfig, NetworkConfig, TargetConfig};
pub use http::HttpTargetAdapter;
pub use stub::StaticTargetAdapter;

/// Credentials attached to every probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetAuth {
    None,
    ApiKey { header: String, key: String },
    Bearer { token: String },
}

impl TargetAuth {
    pub fn is_configured(&self) -> bool {
        !matches!(self, TargetAuth::None)
    }
}

/// Resolved, immutable connection parameters for the system under test.
#[derive(Debug, Clone)]
pub struct TargetHandle {
    pub id: String,
    pub name: String,
    pub description: String,
    pub kind: Option<String>,
    /// Always ends with `/`.
    pub base_url: Url,
    pub auth: TargetAuth,
    pub endpoints: BTreeMap<String, String>,
    /// Schema hints and prior knowledge passed to the agents as context.
    pub known_info: serde_json::Value,
    pub test_constraints: serde_json::Value,
}

impl TargetHandle {
    /// Resolve a probe path against the base URL.
    ///
    /// Paths may not leave the target's origin.
    pub fn endpoint_url(&self, path: &str) -> TargetResult<Url> {
        let url = self
            .base_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| TargetError::TargetProtocol {
                message: format!("invalid probe path '{path}': {e}"),
            })?;
        if url.origin() != self.base_url.origin() {
            return Err(TargetError::TargetProtocol {
                message: format!("probe path '{path}' leaves target origin"),
            });
        }
        Ok(url)
    }

    /// Context summary handed to the reasoning backend.
    pub fn describe(&self) -> serde_json::Value {
        serde_json::json!({
            "id": self.id,
            "name": self.name,
            "description": self.description,
            "type": self.kind,
            "url": self.base_url.as_str(),
            "endpoints": self.endpoints,
            "authenticated": self.auth.is_configured(),
            "known_info": self.known_info,
            "test_constraints": self.test_constraints,
        })
    }
}

/// Transport-independent probe request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeRequest {
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

fn default_method() -> String {
    "GET".to_string()
}

impl ProbeRequest {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into().to_ascii_uppercase(),
            path: path.into(),
            headers: BTreeMap::new(),
            body: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new("GET", path)
    }

    pub fn post(path: impl Into<String>, body: impl Into<String>) -> Self {
        Self::new("POST", path).with_body(body)
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// `METHOD path`, used as a stable label in logs and outputs.
    pub fn label(&self) -> String {
        format!("{} /{}", self.method, self.path.trim_start_matches('/'))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeResponse {
    pub status: u16,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub elapsed_ms: u64,
}

impl ProbeResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: BTreeMap::new(),
            body: body.into(),
            elapsed_ms: 0,
        }
    }

    /// Body truncated to `max` characters for prompt context.
    pub fn body_excerpt(&self, max: usize) -> String {
        if self.body.chars().count() <= max {
            return self.body.clone();
        }
        let mut s: String = self.body.chars().take(max).collect();
        s.push_str("...");
        s
    }
}

#[async_trait]
pub trait TargetAdapter: Send + Sync {
    /// Issue one probe. Never retried by the adapter.
    async fn probe(
        &self,
        target: &TargetHandle,
        request: &ProbeRequest,
    ) -> TargetResult<ProbeResponse>;

    /// Reachability check before a run. Rejected credentials still prove reachability.
    async fn preflight(&self, target: &TargetHandle) -> TargetResult<()> {
        match self.probe(target, &ProbeRequest::new("HEAD", "")).await {
            Ok(_) | Err(TargetError::TargetAuth { .. }) => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn adapter_name(&self) -> &'static str;
}
