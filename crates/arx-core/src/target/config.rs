//! Target configuration document and its resolution into a [`TargetHandle`].

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use url::Url;

use super::{TargetAuth, TargetHandle};
use crate::errors::{ConfigError, ConfigResult};

/// Target configuration as written by the operator.
///
/// Only `id`, `name` and a network location are required.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TargetConfig {
    #[serde(default, alias = "target_id")]
    pub id: String,

    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub description: String,

    /// Free-form target type (e.g. `web_api`, `llm_chat`).
    #[serde(default, rename = "type")]
    pub kind: Option<String>,

    #[serde(default = "default_active")]
    pub active: bool,

    #[serde(default)]
    pub network: NetworkConfig,

    /// Named endpoints, name → path relative to the base URL.
    #[serde(default)]
    pub endpoints: BTreeMap<String, String>,

    #[serde(default)]
    pub authentication: AuthConfig,

    #[serde(default)]
    pub known_info: serde_json::Value,

    #[serde(default)]
    pub test_constraints: serde_json::Value,

    #[serde(default)]
    pub metadata: serde_json::Value,
}

fn default_active() -> bool {
    true
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetworkConfig {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub protocol: Option<String>,
    #[serde(default)]
    pub base_path: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub enabled: bool,
    /// `api_key`, `bearer` / `token`, or `none`.
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
    /// Header carrying the API key (default `X-API-Key`).
    #[serde(default)]
    pub header: Option<String>,
}

fn env_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\$\{ENV:([^}]+)\}").expect("static regex"))
}

/// Replace `${ENV:VAR}` in every string of a JSON tree. Unset variables become empty.
pub fn substitute_env(value: serde_json::Value) -> serde_json::Value {
    use serde_json::Value;
    match value {
        Value::String(s) => Value::String(
            env_pattern()
                .replace_all(&s, |caps: &regex::Captures<'_>| {
                    std::env::var(&caps[1]).unwrap_or_default()
                })
                .into_owned(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(substitute_env).collect()),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (k, substitute_env(v)))
                .collect(),
        ),
        other => other,
    }
}

impl TargetConfig {
    /// Read a JSON target configuration file.
    pub fn from_path(path: &Path) -> ConfigResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let raw: serde_json::Value =
            serde_json::from_str(&text).map_err(|e| ConfigError::InvalidTarget {
                reason: format!("{}: {e}", path.display()),
            })?;
        Self::from_value(raw)
    }

    /// Build from an already parsed document (e.g. inline in a scenario).
    pub fn from_value(raw: serde_json::Value) -> ConfigResult<Self> {
        serde_json::from_value(substitute_env(raw)).map_err(|e| ConfigError::InvalidTarget {
            reason: e.to_string(),
        })
    }

    fn base_url(&self) -> ConfigResult<Url> {
        let net = &self.network;
        let raw = match (&net.url, &net.host) {
            (Some(url), _) if !url.trim().is_empty() => url.trim().to_string(),
            (_, Some(host)) if !host.trim().is_empty() => {
                let protocol = net.protocol.as_deref().unwrap_or("http");
                let mut s = format!("{protocol}://{}", host.trim());
                if let Some(port) = net.port {
                    s.push_str(&format!(":{port}"));
                }
                if let Some(base) = &net.base_path {
                    if !base.is_empty() {
                        if !base.starts_with('/') {
                            s.push('/');
                        }
                        s.push_str(base);
                    }
                }
                s
            }
            _ => {
                return Err(ConfigError::InvalidTarget {
                    reason: format!("target '{}' has no network.url or network.host", self.id),
                })
            }
        };
        let mut url = Url::parse(&raw).map_err(|e| ConfigError::InvalidTarget {
            reason: format!("invalid target url '{raw}': {e}"),
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::InvalidTarget {
                reason: format!("unsupported target scheme '{}'", url.scheme()),
            });
        }
        // Keep a trailing slash so endpoint paths join under the base path.
        if !url.path().ends_with('/') {
            let path = format!("{}/", url.path());
            url.set_path(&path);
        }
        Ok(url)
    }

    fn auth(&self) -> ConfigResult<TargetAuth> {
        let auth = &self.authentication;
        if !auth.enabled {
            return Ok(TargetAuth::None);
        }
        let nonempty = |v: &Option<String>| v.clone().filter(|s| !s.is_empty());
        let kind = auth.kind.as_deref().unwrap_or("api_key").to_ascii_lowercase();
        match kind.as_str() {
            "api_key" | "apikey" => nonempty(&auth.api_key)
                .map(|key| TargetAuth::ApiKey {
                    header: auth.header.clone().unwrap_or_else(|| "X-API-Key".into()),
                    key,
                })
                .ok_or_else(|| ConfigError::InvalidTarget {
                    reason: "authentication.type=api_key requires authentication.api_key".into(),
                }),
            "bearer" | "token" => nonempty(&auth.token)
                .map(|token| TargetAuth::Bearer { token })
                .ok_or_else(|| ConfigError::InvalidTarget {
                    reason: "authentication.type=bearer requires authentication.token".into(),
                }),
            "none" => Ok(TargetAuth::None),
            other => Err(ConfigError::InvalidTarget {
                reason: format!("unsupported authentication type '{other}'"),
            }),
        }
    }

    /// Validate required fields and produce the immutable handle.
    pub fn resolve(&self) -> ConfigResult<TargetHandle> {
        if self.id.trim().is_empty() {
            return Err(ConfigError::InvalidTarget {
                reason: "missing required field 'id'".into(),
            });
        }
        if self.name.trim().is_empty() {
            return Err(ConfigError::InvalidTarget {
                reason: format!("target '{}' is missing required field 'name'", self.id),
            });
        }
        if !self.active {
            return Err(ConfigError::InvalidTarget {
                reason: format!("target '{}' is marked inactive", self.id),
            });
        }
        Ok(TargetHandle {
            id: self.id.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
            kind: self.kind.clone(),
            base_url: self.base_url()?,
            auth: self.auth()?,
            endpoints: self.endpoints.clone(),
            known_info: self.known_info.clone(),
            test_constraints: self.test_constraints.clone(),
        })
    }
}
