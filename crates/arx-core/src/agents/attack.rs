use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use super::analysis::{AnalysisOutput, PlannedAttack};
use super::{normalize_probe, to_output, Observation, PhaseAgent, PhaseContext};
use crate::errors::PhaseError;
use crate::model::Phase;
use crate::orchestrator::pool::{collect_all, run_bounded};

/// Backend verdict on one attack.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AttackEvaluation {
    pub success: bool,
    pub severity: String,
    pub impact: String,
    pub evidence: Value,
    /// Id of the vulnerability this attack confirmed, if any.
    pub vulnerability_confirmed: Option<String>,
    pub needs_reanalysis: bool,
    pub notes: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttackResult {
    pub attack: PlannedAttack,
    pub observation: Observation,
    /// Absent when the probe never reached the target.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evaluation: Option<AttackEvaluation>,
}

impl AttackResult {
    pub fn succeeded(&self) -> bool {
        self.evaluation.as_ref().is_some_and(|e| e.success)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct Replan {
    attack_plan: Vec<PlannedAttack>,
}

/// Attack phase output.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AttackOutput {
    pub skipped: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,
    pub attempted: usize,
    pub successful_attacks: Vec<String>,
    pub failed_attacks: Vec<String>,
    pub confirmed_vulnerabilities: Vec<String>,
    pub results: Vec<AttackResult>,
    pub replans: u32,
}

pub struct AttackAgent;

/// Run one attack: a single probe (never retried, it may have side effects)
/// and, when it reached the target, an evaluation of the response.
async fn run_attack(ctx: PhaseContext, attack: PlannedAttack) -> Result<AttackResult, PhaseError> {
    let mut attack = attack;
    attack.request = normalize_probe(attack.request);
    let observation = ctx.observe(attack.request.clone()).await?;
    if !observation.reached() {
        warn!(attack = %attack.name, "attack probe did not reach target");
        return Ok(AttackResult {
            attack,
            observation,
            evaluation: None,
        });
    }
    let request = ctx
        .request("attack.attack_evaluation")
        .with("attack", to_output(&attack)?)
        .with("response", to_output(&observation)?);
    let evaluation: AttackEvaluation = ctx.ask(request).await?;
    Ok(AttackResult {
        attack,
        observation,
        evaluation: Some(evaluation),
    })
}

#[async_trait]
impl PhaseAgent for AttackAgent {
    fn phase(&self) -> Phase {
        Phase::Attack
    }

    async fn execute(&self, ctx: &PhaseContext) -> Result<Value, PhaseError> {
        let analysis: AnalysisOutput = ctx.prior_as(Phase::Analysis)?;

        if analysis.analysis.skip_to_report {
            info!("analysis requested skip to report");
            return to_output(&AttackOutput {
                skipped: true,
                skip_reason: Some("analysis found nothing worth attacking".into()),
                ..AttackOutput::default()
            });
        }

        let budget = ctx.limits.max_attack_calls as usize;
        let mut plan = analysis.analysis.attack_plan.clone();
        let mut results: Vec<AttackResult> = Vec::new();
        let mut calls = 0usize;
        let mut replans = 0u32;

        loop {
            plan.truncate(budget.saturating_sub(calls));
            if plan.is_empty() {
                break;
            }
            calls += plan.len();
            let batch = std::mem::take(&mut plan);
            let outcomes = run_bounded(ctx.limits.concurrency, batch, &ctx.cancel, |attack| {
                run_attack(ctx.clone(), attack)
            })
            .await;
            let batch_results = collect_all(outcomes)?;
            let reanalyse = batch_results
                .iter()
                .any(|r| r.evaluation.as_ref().is_some_and(|e| e.needs_reanalysis));
            results.extend(batch_results);

            if !reanalyse || replans >= ctx.limits.max_cooperative_iterations || calls >= budget {
                break;
            }
            replans += 1;
            calls += 1;
            let request = ctx
                .request("attack.replan")
                .with("analysis", to_output(&analysis.analysis)?)
                .with("attack_results", to_output(&results)?);
            let replan: Replan = ctx.ask(request).await?;
            info!(replans, new_attacks = replan.attack_plan.len(), "attack plan revised");
            plan = replan.attack_plan;
        }

        let mut successful = Vec::new();
        let mut failed = Vec::new();
        let mut confirmed: Vec<String> = Vec::new();
        for r in &results {
            if r.succeeded() {
                successful.push(r.attack.name.clone());
            } else {
                failed.push(r.attack.name.clone());
            }
            let confirmed_id = r
                .evaluation
                .as_ref()
                .and_then(|e| e.vulnerability_confirmed.clone());
            if let Some(id) = confirmed_id {
                if !confirmed.contains(&id) {
                    confirmed.push(id);
                }
            }
        }
        info!(
            attempted = results.len(),
            successful = successful.len(),
            confirmed = confirmed.len(),
            "attacks complete"
        );

        to_output(&AttackOutput {
            skipped: false,
            skip_reason: None,
            attempted: results.len(),
            successful_attacks: successful,
            failed_attacks: failed,
            confirmed_vulnerabilities: confirmed,
            results,
            replans,
        })
    }
}
