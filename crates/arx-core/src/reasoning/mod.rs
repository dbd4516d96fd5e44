//! Reasoning Client: structured prompt + context in, text + parsed structure out.
//!
//! The backend itself is an opaque call-and-response capability
//! ([`ReasoningBackend`]); [`ReasoningClient`] adds the retry, timeout,
//! cancellation and audit policy on top of it.

use async_trait::async_trait;
use serde::de::DeserializeOwned;

use crate::errors::{ReasoningError, ReasoningResult};
use crate::model::Phase;

pub mod audit;
pub mod client;
pub mod openai;
pub mod parse;
pub mod prompts;
pub mod scripted;

pub use audit::AuditLog;
pub use client::ReasoningClient;
pub use openai::OpenAiBackend;
pub use parse::extract_json;
pub use prompts::{PromptCatalog, REQUIRED_TEMPLATES};
pub use scripted::{Script, ScriptedBackend};

/// A rendered prompt, ready for the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    /// Template reference, `agent.template`.
    pub operation: String,
    pub system: String,
    pub user: String,
}

/// Raw backend answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendReply {
    pub text: String,
    pub model: String,
}

#[async_trait]
pub trait ReasoningBackend: Send + Sync {
    /// One attempt, no retry. Deadlines are enforced by the caller.
    async fn complete(&self, prompt: &Prompt) -> ReasoningResult<BackendReply>;

    fn backend_name(&self) -> &'static str;
}

/// One question to the backend on behalf of a phase.
#[derive(Debug, Clone)]
pub struct ReasoningRequest {
    pub phase: Phase,
    /// Prompt template reference, `agent.template`.
    pub template: String,
    /// Template variables: prior phase outputs, target description, probe results.
    pub context: serde_json::Map<String, serde_json::Value>,
}

impl ReasoningRequest {
    pub fn new(phase: Phase, template: impl Into<String>) -> Self {
        Self {
            phase,
            template: template.into(),
            context: serde_json::Map::new(),
        }
    }

    pub fn with(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.context.insert(key.to_string(), value.into());
        self
    }
}

#[derive(Debug, Clone)]
pub struct ReasoningResponse {
    pub text: String,
    /// First JSON object found in `text`.
    pub structured: serde_json::Value,
    pub model: String,
    /// Attempts it took, including the successful one.
    pub attempts: u32,
}

impl ReasoningResponse {
    /// Decode the structured part into an agent schema.
    pub fn parse<T: DeserializeOwned>(&self) -> ReasoningResult<T> {
        serde_json::from_value(self.structured.clone()).map_err(|e| {
            ReasoningError::protocol(format!("response does not match expected shape: {e}"))
        })
    }
}
