use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use super::{normalize_probe, to_output, Observation, PhaseAgent, PhaseContext};
use crate::errors::PhaseError;
use crate::model::Phase;
use crate::orchestrator::pool::{collect_all, run_bounded};
use crate::target::ProbeRequest;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Vulnerability {
    pub id: String,
    pub title: String,
    pub severity: String,
    pub description: String,
    pub location: String,
}

/// One planned attack: a probe plus why it should work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedAttack {
    pub name: String,
    #[serde(default)]
    pub vulnerability_id: Option<String>,
    #[serde(default)]
    pub rationale: String,
    pub request: ProbeRequest,
}

/// Structured analysis as returned by the backend.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisData {
    pub vulnerabilities: Vec<Vulnerability>,
    pub attack_plan: Vec<PlannedAttack>,
    pub confidence_scores: Value,
    pub risk_assessment: Value,
    pub needs_more_recon: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub recon_requests: Vec<ProbeRequest>,
    pub skip_to_report: bool,
    pub analysis_complete: bool,
    pub reasoning: Value,
    pub notes: Value,
}

/// Analysis phase output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisOutput {
    pub analysis: AnalysisData,
    /// Probes run on the backend's request during analysis.
    pub extra_observations: Vec<Observation>,
    pub rounds: u32,
}

pub struct AnalysisAgent;

#[async_trait]
impl PhaseAgent for AnalysisAgent {
    fn phase(&self) -> Phase {
        Phase::Analysis
    }

    async fn execute(&self, ctx: &PhaseContext) -> Result<Value, PhaseError> {
        let recon = ctx.prior_output(Phase::Recon)?.clone();
        let target = ctx.target.describe();
        let mut extra: Vec<Observation> = Vec::new();
        let mut round = 1u32;

        let analysis = loop {
            let request = ctx
                .request("analysis.cot_reasoning")
                .with("target", target.clone())
                .with("recon", recon.clone())
                .with("round", round)
                .with("extra_observations", to_output(&extra)?);
            let mut data: AnalysisData = ctx.ask(request).await?;

            let wants_recon = data.needs_more_recon && !data.recon_requests.is_empty();
            if !wants_recon || round > ctx.limits.max_cooperative_iterations {
                data.recon_requests.clear();
                break data;
            }

            let probes: Vec<ProbeRequest> = std::mem::take(&mut data.recon_requests)
                .into_iter()
                .map(normalize_probe)
                .collect();
            info!(round, probes = probes.len(), "analysis requested more reconnaissance");
            let results = run_bounded(ctx.limits.concurrency, probes, &ctx.cancel, |req| {
                let ctx = ctx.clone();
                async move { ctx.observe(req).await }
            })
            .await;
            extra.extend(collect_all(results)?);
            round += 1;
        };

        info!(
            vulnerabilities = analysis.vulnerabilities.len(),
            planned_attacks = analysis.attack_plan.len(),
            skip_to_report = analysis.skip_to_report,
            "analysis complete"
        );

        to_output(&AnalysisOutput {
            analysis,
            extra_observations: extra,
            rounds: round,
        })
    }
}
