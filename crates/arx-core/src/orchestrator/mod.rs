//! Phase Orchestrator: runs Recon → Analysis → Attack → Report for one scenario.
//!
//! Phases run strictly in order. A phase only starts once every earlier
//! phase has a succeeded record, either produced by this run or loaded from
//! the checkpoint store when resuming with an explicit start phase. The first
//! failed phase ends the run; succeeded records are kept so a later run can
//! resume after them.

pub mod pool;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::agents::{default_agents, AgentLimits, PhaseAgent, PhaseContext};
use crate::cancel::CancelSignal;
use crate::checkpoint::CheckpointStore;
use crate::errors::{PhaseError, RunError, TargetError, TargetResult};
use crate::model::{
    Finding, Phase, PhaseDisposition, PhaseOutcome, PhaseRecord, RunFailure, RunResult, RunStatus,
};
use crate::reasoning::{AuditLog, ReasoningClient};
use crate::scenario::ScenarioDescriptor;
use crate::settings::Settings;
use crate::target::{TargetAdapter, TargetHandle};

/// Upper bound on the reachability check before a run.
pub const PREFLIGHT_TIMEOUT: Duration = Duration::from_secs(5);

impl From<&Settings> for AgentLimits {
    fn from(s: &Settings) -> Self {
        Self {
            concurrency: s.concurrency.max(1),
            max_recon_calls: s.max_recon_calls,
            max_attack_calls: s.max_attack_calls,
            max_cooperative_iterations: s.max_cooperative_iterations,
        }
    }
}

pub struct Orchestrator {
    store: CheckpointStore,
    reasoning: Arc<ReasoningClient>,
    adapter: Arc<dyn TargetAdapter>,
    agents: BTreeMap<Phase, Arc<dyn PhaseAgent>>,
    limits: AgentLimits,
}

impl Orchestrator {
    /// Orchestrator with the standard agent for every phase.
    pub fn new(
        store: CheckpointStore,
        reasoning: Arc<ReasoningClient>,
        adapter: Arc<dyn TargetAdapter>,
    ) -> Self {
        let agents = default_agents()
            .into_iter()
            .map(|a| (a.phase(), a))
            .collect();
        Self {
            store,
            reasoning,
            adapter,
            agents,
            limits: AgentLimits::default(),
        }
    }

    /// Replace the agent of one phase.
    pub fn with_agent(mut self, agent: Arc<dyn PhaseAgent>) -> Self {
        self.agents.insert(agent.phase(), agent);
        self
    }

    pub fn with_limits(mut self, limits: AgentLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn store(&self) -> &CheckpointStore {
        &self.store
    }

    /// Bounded reachability check of the target.
    pub async fn preflight(&self, target: &TargetHandle) -> TargetResult<()> {
        match tokio::time::timeout(PREFLIGHT_TIMEOUT, self.adapter.preflight(target)).await {
            Ok(result) => result,
            Err(_) => Err(TargetError::TargetUnreachable {
                url: target.base_url.to_string(),
                message: format!("no response within {}s", PREFLIGHT_TIMEOUT.as_secs()),
            }),
        }
    }

    /// Run `scenario` from `start` (default: the first phase).
    ///
    /// Errors are reserved for conditions detected before a phase runs
    /// (missing prerequisites, mismatched checkpoints) and for checkpoint
    /// persistence failures. A failing phase yields `Ok` with
    /// [`RunStatus::Aborted`].
    pub async fn run(
        &self,
        scenario: Arc<ScenarioDescriptor>,
        target: Arc<TargetHandle>,
        start: Option<Phase>,
        cancel: CancelSignal,
    ) -> Result<RunResult, RunError> {
        let start = start.unwrap_or_else(Phase::first);
        let run_id = Uuid::new_v4().to_string();
        let started_at = Utc::now();

        for &phase in start.remaining() {
            if !self.agents.contains_key(&phase) {
                return Err(RunError::NoAgent { phase });
            }
        }

        let succeeded = self.store.list_succeeded(&scenario.id)?;
        if let Some(&missing) = start
            .predecessors()
            .iter()
            .find(|p| !succeeded.contains(p))
        {
            return Err(RunError::MissingPrerequisite {
                phase: missing,
                start,
            });
        }

        let mut outputs: BTreeMap<Phase, Value> = BTreeMap::new();
        let mut phases = Vec::new();
        for &phase in start.predecessors() {
            let record = self.store.load(&scenario.id, phase)?;
            if record.target_id != target.id {
                return Err(RunError::CheckpointMismatch {
                    phase,
                    expected: target.id.clone(),
                    found: record.target_id,
                });
            }
            info!(
                scenario = %scenario.id,
                phase = %phase,
                from_run = %record.run_id,
                "resumed phase from checkpoint"
            );
            outputs.insert(phase, record.output.clone().unwrap_or(Value::Null));
            phases.push(PhaseOutcome {
                phase,
                disposition: PhaseDisposition::Resumed,
                status: record.status,
                run_id: record.run_id,
                attempt_count: record.attempt_count,
            });
        }

        info!(
            scenario = %scenario.id,
            target = %target.id,
            run_id = %run_id,
            start = %start,
            digest = %scenario.digest,
            "run started"
        );

        let mut failure = None;
        for &phase in start.remaining() {
            let agent = match self.agents.get(&phase) {
                Some(agent) => agent.clone(),
                None => return Err(RunError::NoAgent { phase }),
            };
            let running = PhaseRecord::running(&scenario.id, phase, &run_id, &target.id);
            self.store.save(&running)?;

            let ctx = PhaseContext {
                phase,
                scenario: scenario.clone(),
                target: target.clone(),
                prior: Arc::new(outputs.clone()),
                reasoning: self.reasoning.clone(),
                adapter: self.adapter.clone(),
                audit: AuditLog::new(),
                cancel: cancel.clone(),
                limits: self.limits.clone(),
            };

            let span = info_span!(
                "phase",
                scenario = %scenario.id,
                phase = %phase,
                run_id = %run_id
            );
            let result = async {
                if ctx.cancel.is_cancelled() {
                    return Err(PhaseError::cancelled());
                }
                info!("phase started");
                agent.execute(&ctx).await
            }
            .instrument(span)
            .await;
            let attempts = ctx.audit.snapshot();

            match result {
                Ok(output) => {
                    let record = running.succeed(output.clone(), attempts);
                    self.store.save(&record)?;
                    info!(phase = %phase, attempts = record.attempt_count, "phase succeeded");
                    outputs.insert(phase, output);
                    phases.push(PhaseOutcome {
                        phase,
                        disposition: PhaseDisposition::Executed,
                        status: record.status,
                        run_id: run_id.clone(),
                        attempt_count: record.attempt_count,
                    });
                }
                Err(e) => {
                    let record = running.fail(&e, attempts);
                    self.store.save(&record)?;
                    error!(
                        phase = %phase,
                        kind = %e.kind,
                        attempts = record.attempt_count,
                        error = %e.message,
                        "phase failed, run aborted"
                    );
                    phases.push(PhaseOutcome {
                        phase,
                        disposition: PhaseDisposition::Executed,
                        status: record.status,
                        run_id: run_id.clone(),
                        attempt_count: record.attempt_count,
                    });
                    failure = Some(RunFailure {
                        phase,
                        kind: e.kind,
                        message: e.message,
                        attempt_count: record.attempt_count,
                    });
                    break;
                }
            }
        }

        let findings = match outputs.get(&Phase::Report).and_then(|r| r.get("findings")) {
            Some(raw) => serde_json::from_value::<Vec<Finding>>(raw.clone()).unwrap_or_else(|e| {
                warn!(error = %e, "report findings have unexpected shape, ignoring");
                Vec::new()
            }),
            None => Vec::new(),
        };

        let status = if failure.is_some() {
            RunStatus::Aborted
        } else {
            RunStatus::Completed
        };
        info!(run_id = %run_id, status = ?status, findings = findings.len(), "run finished");

        Ok(RunResult {
            run_id,
            scenario_id: scenario.id.clone(),
            target_id: target.id.clone(),
            status,
            started_at,
            finished_at: Utc::now(),
            phases,
            outputs,
            failure,
            findings,
        })
    }
}
