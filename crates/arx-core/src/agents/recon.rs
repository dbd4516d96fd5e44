use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use super::{normalize_probe, to_output, Observation, PhaseAgent, PhaseContext};
use crate::errors::PhaseError;
use crate::model::Phase;
use crate::orchestrator::pool::{collect_all, run_bounded};
use crate::target::ProbeRequest;

/// Structured reconnaissance summary as returned by the backend.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconData {
    pub discovered_services: Vec<Value>,
    pub endpoints: Vec<Value>,
    pub tech_stack: Vec<Value>,
    pub system_capabilities: Vec<Value>,
    pub notes: Value,
    pub recon_complete: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub follow_up_probes: Vec<ProbeRequest>,
}

/// Recon phase output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconOutput {
    pub target: Value,
    pub observations: Vec<Observation>,
    pub summary: ReconData,
    /// Backend calls made by the phase (retries of one call count once).
    pub calls: u32,
    pub forced_completion: bool,
}

pub struct ReconAgent;

async fn probe_all(
    ctx: &PhaseContext,
    probes: Vec<ProbeRequest>,
) -> Result<Vec<Observation>, PhaseError> {
    let results = run_bounded(ctx.limits.concurrency, probes, &ctx.cancel, |req| {
        let ctx = ctx.clone();
        async move { ctx.observe(req).await }
    })
    .await;
    collect_all(results)
}

#[async_trait]
impl PhaseAgent for ReconAgent {
    fn phase(&self) -> Phase {
        Phase::Recon
    }

    async fn execute(&self, ctx: &PhaseContext) -> Result<Value, PhaseError> {
        let target = ctx.target.describe();

        let mut probes: Vec<ProbeRequest> = ctx
            .target
            .endpoints
            .values()
            .map(|path| ProbeRequest::get(path.clone()))
            .collect();
        if probes.is_empty() {
            probes.push(ProbeRequest::get(""));
        }
        let mut observations = probe_all(ctx, probes).await?;
        info!(
            probes = observations.len(),
            reached = observations.iter().filter(|o| o.reached()).count(),
            "initial probes done"
        );

        let request = ctx
            .request("recon.initial_recon")
            .with("steps", ctx.scenario.steps_value())
            .with("target", target.clone())
            .with("observations", to_output(&observations)?);
        let mut summary: ReconData = ctx.ask(request).await?;
        let mut calls = 1u32;
        let mut forced = false;

        while !summary.recon_complete && !summary.follow_up_probes.is_empty() {
            if calls + 1 >= ctx.limits.max_recon_calls {
                debug!(calls, "recon budget reached, forcing completion");
                let request = ctx
                    .request("recon.force_completion")
                    .with("target", target.clone())
                    .with("recon_so_far", to_output(&summary)?);
                summary = ctx.ask(request).await?;
                calls += 1;
                forced = true;
                break;
            }

            let follow_ups = std::mem::take(&mut summary.follow_up_probes)
                .into_iter()
                .map(normalize_probe)
                .collect();
            let fresh = probe_all(ctx, follow_ups).await?;
            let request = ctx
                .request("recon.additional_recon")
                .with("target", target.clone())
                .with("recon_so_far", to_output(&summary)?)
                .with("observations", to_output(&fresh)?);
            observations.extend(fresh);
            summary = ctx.ask(request).await?;
            calls += 1;
        }
        summary.follow_up_probes.clear();

        to_output(&ReconOutput {
            target,
            observations,
            summary,
            calls,
            forced_completion: forced,
        })
    }
}
