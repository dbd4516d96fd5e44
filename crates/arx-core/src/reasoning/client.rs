use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tracing::{debug, info_span, trace, warn, Instrument};

use super::{
    extract_json, AuditLog, PromptCatalog, ReasoningBackend, ReasoningRequest, ReasoningResponse,
};
use crate::cancel::CancelSignal;
use crate::errors::{CallResult, FailedCall, ReasoningError};
use crate::model::AttemptRecord;
use crate::retry::RetryPolicy;

/// Retrying, deadline-bounded, cancellable front for a [`ReasoningBackend`].
pub struct ReasoningClient {
    backend: Arc<dyn ReasoningBackend>,
    prompts: Arc<PromptCatalog>,
    policy: RetryPolicy,
    log_prompts: bool,
    log_completions: bool,
}

impl ReasoningClient {
    pub fn new(
        backend: Arc<dyn ReasoningBackend>,
        prompts: Arc<PromptCatalog>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            backend,
            prompts,
            policy,
            log_prompts: false,
            log_completions: false,
        }
    }

    /// Emit rendered prompts / completions at trace level.
    pub fn with_text_logging(mut self, prompts: bool, completions: bool) -> Self {
        self.log_prompts = prompts;
        self.log_completions = completions;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.backend_name()
    }

    /// Ask the backend, retrying transient failures up to the attempt ceiling.
    ///
    /// Every attempt, successful or not, is appended to `audit`. Protocol
    /// errors (including a reply with no JSON object) are returned at once.
    /// A failure carries the attempts this call made, never more than the
    /// policy's ceiling.
    pub async fn ask(
        &self,
        request: &ReasoningRequest,
        audit: &AuditLog,
        cancel: &CancelSignal,
    ) -> CallResult<ReasoningResponse> {
        let prompt = self
            .prompts
            .render(&request.template, &request.context)
            .ok_or_else(|| FailedCall {
                error: ReasoningError::protocol(format!(
                    "unknown prompt template '{}'",
                    request.template
                )),
                attempts: 0,
            })?;
        if self.log_prompts {
            trace!(
                operation = %prompt.operation,
                system = %prompt.system,
                user = %prompt.user,
                "prompt"
            );
        }

        let span = info_span!(
            "reasoning.call",
            phase = %request.phase,
            template = %request.template,
            backend = self.backend.backend_name()
        );

        let mut attempt = 0u32;
        let result = async {
            let max_attempts = self.policy.max_attempts;
            loop {
                if cancel.is_cancelled() {
                    return Err(ReasoningError::Cancelled);
                }
                attempt += 1;
                let started_at = Utc::now();
                let clock = Instant::now();

                let call = tokio::time::timeout(
                    self.policy.attempt_timeout,
                    self.backend.complete(&prompt),
                );
                let outcome = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Err(ReasoningError::Cancelled),
                    r = call => {
                        match r {
                            Ok(reply) => reply,
                            Err(_) => Err(ReasoningError::BackendTimeout {
                                after: self.policy.attempt_timeout,
                            }),
                        }
                    }
                };

                let outcome = outcome.and_then(|reply| {
                    let structured = extract_json(&reply.text).ok_or_else(|| {
                        ReasoningError::protocol("response contains no JSON object")
                    })?;
                    Ok(ReasoningResponse {
                        text: reply.text,
                        structured,
                        model: reply.model,
                        attempts: attempt,
                    })
                });

                audit.record(AttemptRecord {
                    attempt,
                    operation: request.template.clone(),
                    started_at,
                    duration_ms: clock.elapsed().as_millis() as u64,
                    error_kind: outcome.as_ref().err().map(ReasoningError::kind),
                    message: outcome.as_ref().err().map(ToString::to_string),
                });

                match outcome {
                    Ok(response) => {
                        debug!(attempt, model = %response.model, "reasoning call succeeded");
                        if self.log_completions {
                            trace!(text = %response.text, "completion");
                        }
                        return Ok(response);
                    }
                    Err(e) if e.is_retryable() && self.policy.allows_retry(attempt) => {
                        let hint = match &e {
                            ReasoningError::BackendRateLimit { retry_after } => *retry_after,
                            _ => None,
                        };
                        let backoff = self.policy.backoff(attempt, hint);
                        warn!(
                            error = %e,
                            retry = attempt,
                            max_attempts,
                            backoff_ms = backoff.as_millis() as u64,
                            "retrying reasoning call"
                        );
                        tokio::select! {
                            biased;
                            _ = cancel.cancelled() => return Err(ReasoningError::Cancelled),
                            _ = tokio::time::sleep(backoff) => {}
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, attempt, max_attempts, "reasoning call failed");
                        return Err(e);
                    }
                }
            }
        }
        .instrument(span)
        .await;
        result.map_err(|error| FailedCall {
            error,
            attempts: attempt,
        })
    }
}
