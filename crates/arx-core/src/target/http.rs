//! HTTP implementation of [`TargetAdapter`] on top of `reqwest`.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, USER_AGENT};
use tracing::debug;

use super::{ProbeRequest, ProbeResponse, TargetAdapter, TargetAuth, TargetHandle};
use crate::errors::{TargetError, TargetResult};

const USER_AGENT_VALUE: &str = concat!("arx/", env!("CARGO_PKG_VERSION"));

pub struct HttpTargetAdapter {
    client: reqwest::Client,
}

impl HttpTargetAdapter {
    pub fn new(timeout: Duration) -> TargetResult<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(USER_AGENT_VALUE));

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| TargetError::TargetProtocol {
                message: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self { client })
    }
}

fn unreachable(url: &str, e: &reqwest::Error) -> TargetError {
    let message = if e.is_timeout() {
        "request timed out".to_string()
    } else {
        e.to_string()
    };
    TargetError::TargetUnreachable {
        url: url.to_string(),
        message,
    }
}

#[async_trait]
impl TargetAdapter for HttpTargetAdapter {
    async fn probe(
        &self,
        target: &TargetHandle,
        request: &ProbeRequest,
    ) -> TargetResult<ProbeResponse> {
        let url = target.endpoint_url(&request.path)?;
        let method = reqwest::Method::from_bytes(request.method.as_bytes()).map_err(|_| {
            TargetError::TargetProtocol {
                message: format!("invalid HTTP method '{}'", request.method),
            }
        })?;

        let mut builder = self.client.request(method, url.clone());
        match &target.auth {
            TargetAuth::None => {}
            TargetAuth::ApiKey { header, key } => {
                builder = builder.header(header.as_str(), key.as_str());
            }
            TargetAuth::Bearer { token } => {
                builder = builder.header(AUTHORIZATION, format!("Bearer {token}"));
            }
        }
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let started = Instant::now();
        let response = builder
            .send()
            .await
            .map_err(|e| unreachable(url.as_str(), &e))?;
        let status = response.status().as_u16();

        // Only a rejection of our own credentials is an auth failure; without
        // configured credentials a 401 is an observation about the target.
        if target.auth.is_configured() && (status == 401 || status == 407) {
            return Err(TargetError::TargetAuth { status });
        }

        let headers: BTreeMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.to_string(), v.to_string())))
            .collect();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| TargetError::TargetProtocol {
                message: format!("failed to read response body: {e}"),
            })?;
        let elapsed_ms = started.elapsed().as_millis() as u64;
        debug!(
            target_id = %target.id,
            probe = %request.label(),
            status,
            elapsed_ms,
            "probe completed"
        );

        Ok(ProbeResponse {
            status,
            headers,
            body: String::from_utf8_lossy(&bytes).into_owned(),
            elapsed_ms,
        })
    }

    fn adapter_name(&self) -> &'static str {
        "http"
    }
}

#[cfg(test)]
mod integration_tests {
    use super::*;
    use crate::target::TargetConfig;
    use wiremock::matchers::{body_string, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn handle(uri: &str, auth: serde_json::Value) -> TargetHandle {
        TargetConfig::from_value(serde_json::json!({
            "id": "T",
            "name": "Demo",
            "network": {"url": uri},
            "authentication": auth,
        }))
        .unwrap()
        .resolve()
        .unwrap()
    }

    #[tokio::test]
    async fn probe_sends_auth_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .and(header("x-api-key", "k1"))
            .and(body_string("{\"q\":1}"))
            .respond_with(ResponseTemplate::new(200).set_body_string("hello"))
            .expect(1)
            .mount(&server)
            .await;

        let target = handle(
            &format!("{}/api", server.uri()),
            serde_json::json!({"enabled": true, "type": "api_key", "api_key": "k1"}),
        );
        let adapter = HttpTargetAdapter::new(Duration::from_secs(5)).unwrap();
        let resp = adapter
            .probe(&target, &ProbeRequest::post("/chat", "{\"q\":1}"))
            .await
            .unwrap();
        assert_eq!(resp.status, 200);
        assert_eq!(resp.body, "hello");
    }

    #[tokio::test]
    async fn rejected_credentials_map_to_auth_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let target = handle(
            &server.uri(),
            serde_json::json!({"enabled": true, "type": "bearer", "token": "t"}),
        );
        let adapter = HttpTargetAdapter::new(Duration::from_secs(5)).unwrap();
        let err = adapter
            .probe(&target, &ProbeRequest::get("/"))
            .await
            .unwrap_err();
        assert!(matches!(err, TargetError::TargetAuth { status: 401 }));
    }

    #[tokio::test]
    async fn unauthenticated_401_is_an_observation() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let target = handle(&server.uri(), serde_json::json!({}));
        let adapter = HttpTargetAdapter::new(Duration::from_secs(5)).unwrap();
        let resp = adapter
            .probe(&target, &ProbeRequest::get("/admin"))
            .await
            .unwrap();
        assert_eq!(resp.status, 401);
    }

    #[tokio::test]
    async fn server_errors_are_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .expect(1)
            .mount(&server)
            .await;

        let target = handle(&server.uri(), serde_json::json!({}));
        let adapter = HttpTargetAdapter::new(Duration::from_secs(5)).unwrap();
        let resp = adapter
            .probe(&target, &ProbeRequest::get("/"))
            .await
            .unwrap();
        assert_eq!(resp.status, 503);
    }

    #[tokio::test]
    async fn closed_port_is_unreachable() {
        let target = handle("http://127.0.0.1:9", serde_json::json!({}));
        let adapter = HttpTargetAdapter::new(Duration::from_secs(2)).unwrap();
        let err = adapter.preflight(&target).await.unwrap_err();
        assert!(matches!(err, TargetError::TargetUnreachable { .. }));
    }
}
