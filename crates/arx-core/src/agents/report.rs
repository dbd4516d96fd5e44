use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tracing::info;

use super::analysis::{AnalysisOutput, Vulnerability};
use super::attack::AttackOutput;
use super::{to_output, PhaseAgent, PhaseContext};
use crate::errors::PhaseError;
use crate::model::{EvidenceRef, Finding, Phase, Severity};

/// A finding as proposed by the backend during synthesis.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct ProposedFinding {
    dedup_key: Option<String>,
    title: String,
    description: String,
    severity: String,
    location: Option<String>,
    impact: Option<String>,
    mitigation: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Synthesis {
    pub executive_summary: Value,
    pub technical_findings: Value,
    pub risk_rating: Value,
    pub remediation_plan: Value,
    pub conclusion: Value,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SynthesisReply {
    #[serde(flatten)]
    synthesis: Synthesis,
    findings: Vec<ProposedFinding>,
}

pub struct ReportAgent;

/// Stable dedup key for findings the backend did not key itself.
pub fn derive_dedup_key(scenario_id: &str, title: &str, location: Option<&str>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(scenario_id.as_bytes());
    hasher.update([0u8]);
    hasher.update(title.as_bytes());
    hasher.update([0u8]);
    hasher.update(location.unwrap_or_default().as_bytes());
    hex::encode(hasher.finalize())
}

/// Report id derived from the phase outputs, so a resumed run reproduces it.
fn report_id(scenario_id: &str, inputs: &[&Value]) -> String {
    let mut hasher = Sha256::new();
    for value in inputs {
        hasher.update(value.to_string().as_bytes());
    }
    let digest = hex::encode(hasher.finalize());
    format!("arx_{scenario_id}_{}", &digest[..12])
}

fn evidence(phase: Phase, detail: impl Into<String>) -> EvidenceRef {
    EvidenceRef {
        phase,
        detail: detail.into(),
    }
}

fn non_empty(s: &str) -> Option<String> {
    let s = s.trim();
    (!s.is_empty()).then(|| s.to_string())
}

fn derive_findings(
    scenario_id: &str,
    analysis: &AnalysisOutput,
    attack: &AttackOutput,
    proposed: Vec<ProposedFinding>,
) -> Vec<Finding> {
    if !proposed.is_empty() {
        return proposed
            .into_iter()
            .map(|p| {
                let dedup_key = p
                    .dedup_key
                    .as_deref()
                    .and_then(non_empty)
                    .unwrap_or_else(|| {
                        derive_dedup_key(scenario_id, &p.title, p.location.as_deref())
                    });
                Finding {
                    dedup_key,
                    title: p.title,
                    description: p.description,
                    severity: Severity::from_label(&p.severity),
                    evidence: vec![evidence(Phase::Report, "report synthesis")],
                    location: p.location,
                    impact: p.impact,
                    mitigation: p.mitigation,
                    verified: false,
                }
            })
            .collect();
    }

    let mut findings = Vec::new();
    let confirmed: Vec<&Vulnerability> = analysis
        .analysis
        .vulnerabilities
        .iter()
        .filter(|v| attack.confirmed_vulnerabilities.contains(&v.id))
        .collect();
    for v in &confirmed {
        let location = non_empty(&v.location);
        findings.push(Finding {
            dedup_key: derive_dedup_key(scenario_id, &v.title, location.as_deref()),
            title: v.title.clone(),
            description: v.description.clone(),
            severity: Severity::from_label(&v.severity),
            evidence: vec![
                evidence(Phase::Analysis, format!("vulnerability {}", v.id)),
                evidence(Phase::Attack, format!("confirmed vulnerability {}", v.id)),
            ],
            location,
            impact: None,
            mitigation: None,
            verified: true,
        });
    }

    for r in attack.results.iter().filter(|r| r.succeeded()) {
        let covered = r
            .attack
            .vulnerability_id
            .as_ref()
            .is_some_and(|id| confirmed.iter().any(|v| &v.id == id));
        if covered {
            continue;
        }
        let Some(eval) = &r.evaluation else { continue };
        let title = format!("Successful attack: {}", r.attack.name);
        let location = Some(r.observation.request.clone());
        findings.push(Finding {
            dedup_key: derive_dedup_key(scenario_id, &title, location.as_deref()),
            title,
            description: non_empty(&r.attack.rationale)
                .unwrap_or_else(|| format!("Attack '{}' succeeded", r.attack.name)),
            severity: Severity::from_label(&eval.severity),
            evidence: vec![evidence(Phase::Attack, format!("attack {}", r.attack.name))],
            location,
            impact: non_empty(&eval.impact),
            mitigation: None,
            verified: true,
        });
    }

    if findings.is_empty() {
        let title = "Assessment Complete".to_string();
        findings.push(Finding {
            dedup_key: derive_dedup_key(scenario_id, &title, None),
            title,
            description: format!(
                "No vulnerabilities were confirmed. {} attack(s) attempted.",
                attack.attempted
            ),
            severity: Severity::Info,
            evidence: vec![evidence(Phase::Attack, "no successful attacks")],
            location: None,
            impact: None,
            mitigation: None,
            verified: false,
        });
    }
    findings
}

#[async_trait]
impl PhaseAgent for ReportAgent {
    fn phase(&self) -> Phase {
        Phase::Report
    }

    async fn execute(&self, ctx: &PhaseContext) -> Result<Value, PhaseError> {
        let recon = ctx.prior_output(Phase::Recon)?.clone();
        let analysis_raw = ctx.prior_output(Phase::Analysis)?.clone();
        let attack_raw = ctx.prior_output(Phase::Attack)?.clone();
        let analysis: AnalysisOutput = ctx.prior_as(Phase::Analysis)?;
        let attack: AttackOutput = ctx.prior_as(Phase::Attack)?;
        let scenario = &ctx.scenario;

        let request = ctx
            .request("report.report_synthesis")
            .with("target", ctx.target.describe())
            .with("recon", recon.clone())
            .with("analysis", analysis_raw.clone())
            .with("attack", attack_raw.clone());
        let reply: SynthesisReply = ctx.ask(request).await?;

        let findings = derive_findings(&scenario.id, &analysis, &attack, reply.findings);
        let report_id = report_id(&scenario.id, &[&recon, &analysis_raw, &attack_raw]);
        info!(report_id = %report_id, findings = findings.len(), "report synthesised");

        Ok(json!({
            "report_id": report_id,
            "scenario": {
                "id": scenario.id,
                "name": scenario.name,
                "goal": scenario.goal,
                "category": scenario.category,
                "severity": scenario.severity,
                "digest": scenario.digest,
            },
            "target": ctx.target.id,
            "statistics": {
                "probes": recon.get("observations").and_then(Value::as_array).map_or(0, Vec::len),
                "vulnerabilities": analysis.analysis.vulnerabilities.len(),
                "attacks_attempted": attack.attempted,
                "attacks_successful": attack.successful_attacks.len(),
                "findings": findings.len(),
            },
            "synthesis": to_output(&reply.synthesis)?,
            "sections": {
                "recon": recon,
                "analysis": analysis_raw,
                "attack": attack_raw,
            },
            "findings": to_output(&findings)?,
        }))
    }
}
