//! In-process target with canned responses, for tests and dry runs.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::{ProbeRequest, ProbeResponse, TargetAdapter, TargetHandle};
use crate::errors::{TargetError, TargetResult};

/// Answers probes from a table keyed by `METHOD /path`; unknown routes get 404.
#[derive(Default)]
pub struct StaticTargetAdapter {
    routes: HashMap<String, ProbeResponse>,
    delays: HashMap<String, Duration>,
    unreachable: bool,
    log: Mutex<Vec<ProbeRequest>>,
}

impl StaticTargetAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_route(mut self, method: &str, path: &str, response: ProbeResponse) -> Self {
        let key = ProbeRequest::new(method, path).label();
        self.routes.insert(key, response);
        self
    }

    /// Delay the response of one route.
    pub fn with_delay(mut self, method: &str, path: &str, delay: Duration) -> Self {
        let key = ProbeRequest::new(method, path).label();
        self.delays.insert(key, delay);
        self
    }

    /// Every probe fails with `TargetUnreachable`.
    pub fn unreachable() -> Self {
        Self {
            unreachable: true,
            ..Self::default()
        }
    }

    /// Probes received so far, in arrival order.
    pub fn probes(&self) -> Vec<ProbeRequest> {
        self.log.lock().map(|l| l.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl TargetAdapter for StaticTargetAdapter {
    async fn probe(
        &self,
        target: &TargetHandle,
        request: &ProbeRequest,
    ) -> TargetResult<ProbeResponse> {
        if let Ok(mut log) = self.log.lock() {
            log.push(request.clone());
        }
        if self.unreachable {
            return Err(TargetError::TargetUnreachable {
                url: target.base_url.to_string(),
                message: "connection refused".into(),
            });
        }
        let key = request.label();
        if let Some(delay) = self.delays.get(&key) {
            tokio::time::sleep(*delay).await;
        }
        Ok(self
            .routes
            .get(&key)
            .cloned()
            .unwrap_or_else(|| ProbeResponse::new(404, "not found")))
    }

    fn adapter_name(&self) -> &'static str {
        "static"
    }
}
