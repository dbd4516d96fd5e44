//! Phase agents: the per-phase logic driven by the orchestrator.
//!
//! Each agent turns the outputs of earlier phases plus the target into one
//! structured output. Agents only talk to the outside world through
//! [`PhaseContext`], which carries the run's cancellation signal and the
//! phase's attempt audit.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cancel::CancelSignal;
use crate::errors::{PhaseError, TargetError, TargetResult};
use crate::model::Phase;
use crate::reasoning::{AuditLog, ReasoningClient, ReasoningRequest};
use crate::scenario::ScenarioDescriptor;
use crate::target::{ProbeRequest, ProbeResponse, TargetAdapter, TargetHandle};

pub mod analysis;
pub mod attack;
pub mod recon;
pub mod report;

pub use analysis::AnalysisAgent;
pub use attack::AttackAgent;
pub use recon::ReconAgent;
pub use report::ReportAgent;

/// Characters of a probe body kept in outputs and prompts.
const BODY_EXCERPT_CHARS: usize = 2000;

#[async_trait]
pub trait PhaseAgent: Send + Sync {
    fn phase(&self) -> Phase;

    /// Produce the phase output. Must be deterministic for identical
    /// inputs and identical external replies.
    async fn execute(&self, ctx: &PhaseContext) -> Result<Value, PhaseError>;
}

/// Call budgets shared by the agents.
#[derive(Debug, Clone)]
pub struct AgentLimits {
    /// Max in-flight sub-tasks within a phase.
    pub concurrency: usize,
    pub max_recon_calls: u32,
    pub max_attack_calls: u32,
    /// Rounds of the Analysis ↔ probe and Attack ↔ replan loops.
    pub max_cooperative_iterations: u32,
}

impl Default for AgentLimits {
    fn default() -> Self {
        Self {
            concurrency: 4,
            max_recon_calls: 15,
            max_attack_calls: 20,
            max_cooperative_iterations: 2,
        }
    }
}

/// Everything a phase may use. Cheap to clone into pool sub-tasks.
#[derive(Clone)]
pub struct PhaseContext {
    pub phase: Phase,
    pub scenario: Arc<ScenarioDescriptor>,
    pub target: Arc<TargetHandle>,
    /// Outputs of every earlier phase, executed or resumed.
    pub prior: Arc<BTreeMap<Phase, Value>>,
    pub reasoning: Arc<ReasoningClient>,
    pub adapter: Arc<dyn TargetAdapter>,
    pub audit: AuditLog,
    pub cancel: CancelSignal,
    pub limits: AgentLimits,
}

/// One probe as recorded in phase outputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub request: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(default)]
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Observation {
    pub fn reached(&self) -> bool {
        self.error.is_none()
    }
}

impl PhaseContext {
    /// A request pre-filled with the scenario goal and system prompt.
    pub fn request(&self, template: &str) -> ReasoningRequest {
        ReasoningRequest::new(self.phase, template)
            .with("system_prompt", self.scenario.system_prompt.clone())
            .with("goal", self.scenario.goal.clone())
    }

    /// Ask the backend and decode the structured reply.
    pub async fn ask<T: DeserializeOwned>(
        &self,
        request: ReasoningRequest,
    ) -> Result<T, PhaseError> {
        let response = self
            .reasoning
            .ask(&request, &self.audit, &self.cancel)
            .await?;
        response
            .parse()
            .map_err(|e| PhaseError::from(e).with_attempts(response.attempts))
    }

    /// One probe, abandoned when the run is cancelled.
    pub async fn probe(&self, request: &ProbeRequest) -> TargetResult<ProbeResponse> {
        if self.cancel.is_cancelled() {
            return Err(TargetError::Cancelled);
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(TargetError::Cancelled),
            r = self.adapter.probe(&self.target, request) => r,
        }
    }

    /// Probe and record the outcome.
    ///
    /// An unreachable endpoint or a refused path is an observation; rejected
    /// credentials and cancellation fail the phase.
    pub async fn observe(&self, request: ProbeRequest) -> Result<Observation, PhaseError> {
        let label = request.label();
        match self.probe(&request).await {
            Ok(resp) => Ok(Observation {
                request: label,
                status: Some(resp.status),
                content_type: resp.headers.get("content-type").cloned(),
                body: resp.body_excerpt(BODY_EXCERPT_CHARS),
                error: None,
            }),
            Err(
                e @ (TargetError::TargetUnreachable { .. } | TargetError::TargetProtocol { .. }),
            ) => {
                tracing::debug!(request = %label, error = %e, "probe failed");
                Ok(Observation {
                    request: label,
                    status: None,
                    content_type: None,
                    body: String::new(),
                    error: Some(e.to_string()),
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Output of an earlier phase.
    pub fn prior_output(&self, phase: Phase) -> Result<&Value, PhaseError> {
        self.prior
            .get(&phase)
            .ok_or_else(|| {
                PhaseError::internal(format!("output of phase {phase} is not available"))
            })
    }

    /// Decode an earlier phase's output.
    pub fn prior_as<T: DeserializeOwned>(&self, phase: Phase) -> Result<T, PhaseError> {
        serde_json::from_value(self.prior_output(phase)?.clone()).map_err(|e| {
            PhaseError::internal(format!("output of phase {phase} has unexpected shape: {e}"))
        })
    }
}

/// The standard agent for every phase.
pub fn default_agents() -> Vec<Arc<dyn PhaseAgent>> {
    vec![
        Arc::new(ReconAgent),
        Arc::new(AnalysisAgent),
        Arc::new(AttackAgent),
        Arc::new(ReportAgent),
    ]
}

/// Probes suggested by the backend use whatever method casing it chose.
pub(crate) fn normalize_probe(mut request: ProbeRequest) -> ProbeRequest {
    request.method = request.method.trim().to_ascii_uppercase();
    if request.method.is_empty() {
        request.method = "GET".into();
    }
    request
}

/// Serialize an agent output; our output types always serialize.
pub(crate) fn to_output<T: Serialize>(value: &T) -> Result<Value, PhaseError> {
    serde_json::to_value(value).map_err(|e| PhaseError::internal(e.to_string()))
}

#[cfg(test)]
pub(crate) mod testkit {
    use super::*;
    use crate::reasoning::{PromptCatalog, ScriptedBackend};
    use crate::retry::RetryPolicy;
    use crate::scenario::{Constraints, TargetRef};
    use crate::target::{StaticTargetAdapter, TargetConfig};
    use std::time::Duration;

    pub fn scenario() -> Arc<ScenarioDescriptor> {
        Arc::new(ScenarioDescriptor {
            id: "S1".into(),
            name: "S1".into(),
            goal: "find prompt injection".into(),
            target: TargetRef::Inline(Box::default()),
            phases: Phase::ALL.to_vec(),
            system_prompt: "be careful".into(),
            constraints: Constraints::default(),
            steps: Vec::new(),
            severity: Default::default(),
            category: None,
            parameters: Value::Null,
            digest: "00".into(),
            source: "s1.json".into(),
        })
    }

    pub fn target() -> Arc<TargetHandle> {
        Arc::new(
            TargetConfig::from_value(serde_json::json!({
                "id": "T", "name": "Test", "network": {"url": "http://target.local"},
                "endpoints": {"chat": "/chat", "health": "/health"}
            }))
            .and_then(|c| c.resolve())
            .unwrap(),
        )
    }

    pub fn context(
        phase: Phase,
        backend: Arc<ScriptedBackend>,
        adapter: Arc<StaticTargetAdapter>,
        prior: BTreeMap<Phase, Value>,
    ) -> PhaseContext {
        let policy = RetryPolicy::default()
            .with_max_attempts(2)
            .with_base_delay(Duration::from_millis(1))
            .with_attempt_timeout(Duration::from_secs(5));
        PhaseContext {
            phase,
            scenario: scenario(),
            target: target(),
            prior: Arc::new(prior),
            reasoning: Arc::new(ReasoningClient::new(
                backend,
                Arc::new(PromptCatalog::builtin().unwrap()),
                policy,
            )),
            adapter,
            audit: AuditLog::new(),
            cancel: CancelSignal::never(),
            limits: AgentLimits::default(),
        }
    }
}
