//! Deterministic backend driven by per-template scripts.
//!
//! Used by tests and offline dry runs. Replies are keyed by the prompt's
//! operation (`agent.template`), so concurrent sub-tasks get stable answers
//! regardless of scheduling order.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::{BackendReply, Prompt, ReasoningBackend};
use crate::errors::{ReasoningError, ReasoningResult};

#[derive(Debug, Clone)]
pub enum Script {
    /// Reply with raw text.
    Text(String),
    /// Reply with a serialized JSON object.
    Json(serde_json::Value),
    /// Never answer; the caller's deadline fires.
    Hang,
    RateLimited(Option<Duration>),
    Unavailable,
    /// Answer after a delay.
    Delayed(Duration, Box<Script>),
}

#[derive(Default)]
pub struct ScriptedBackend {
    queued: Mutex<HashMap<String, VecDeque<Script>>>,
    defaults: HashMap<String, Script>,
    calls: Mutex<Vec<Prompt>>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a one-shot reply for `operation`; queued replies are used before the default.
    pub fn then(self, operation: &str, script: Script) -> Self {
        if let Ok(mut q) = self.queued.lock() {
            q.entry(operation.to_string()).or_default().push_back(script);
        }
        self
    }

    /// Reply used whenever no queued reply is left for `operation`.
    pub fn with_default(mut self, operation: &str, script: Script) -> Self {
        self.defaults.insert(operation.to_string(), script);
        self
    }

    /// Number of attempts made for `operation`.
    pub fn calls(&self, operation: &str) -> usize {
        self.calls
            .lock()
            .map(|c| c.iter().filter(|p| p.operation == operation).count())
            .unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().map(|c| c.len()).unwrap_or(0)
    }

    /// Prompts received so far, in arrival order.
    pub fn prompts(&self) -> Vec<Prompt> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    fn next_script(&self, operation: &str) -> Option<Script> {
        let queued = self
            .queued
            .lock()
            .ok()
            .and_then(|mut q| q.get_mut(operation).and_then(VecDeque::pop_front));
        queued.or_else(|| self.defaults.get(operation).cloned())
    }
}

async fn play(script: Script) -> ReasoningResult<String> {
    let mut script = script;
    loop {
        match script {
            Script::Text(text) => return Ok(text),
            Script::Json(value) => return Ok(value.to_string()),
            Script::Hang => std::future::pending::<()>().await,
            Script::RateLimited(retry_after) => {
                return Err(ReasoningError::BackendRateLimit { retry_after })
            }
            Script::Unavailable => {
                return Err(ReasoningError::BackendUnavailable {
                    message: "scripted outage".into(),
                })
            }
            Script::Delayed(delay, next) => {
                tokio::time::sleep(delay).await;
                script = *next;
            }
        }
    }
}

#[async_trait]
impl ReasoningBackend for ScriptedBackend {
    async fn complete(&self, prompt: &Prompt) -> ReasoningResult<BackendReply> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(prompt.clone());
        }
        let script = self.next_script(&prompt.operation).ok_or_else(|| {
            ReasoningError::protocol(format!("no script for operation '{}'", prompt.operation))
        })?;
        let text = play(script).await?;
        Ok(BackendReply {
            text,
            model: "scripted".to_string(),
        })
    }

    fn backend_name(&self) -> &'static str {
        "scripted"
    }
}
