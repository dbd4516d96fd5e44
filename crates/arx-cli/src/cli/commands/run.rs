use std::path::{Path, PathBuf};

use anyhow::Context;
use arx_core::{
    cancel_pair, sink_from_settings, ErrorKind, FindingsExporter, Phase, RunResult, Settings,
};
use tracing::warn;

use super::super::args::RunArgs;
use super::builder;
use crate::exit_codes::{CONFIG_ERROR, INTERRUPTED, RUN_FAILED, SUCCESS};

pub(crate) async fn run(args: RunArgs) -> anyhow::Result<i32> {
    // argument errors are reported before settings are even read
    let start = match args.start_from.as_deref().map(Phase::parse_start).transpose() {
        Ok(start) => start,
        Err(e) => {
            eprintln!("error: {e}");
            return Ok(CONFIG_ERROR);
        }
    };

    let mut settings = match Settings::from_env() {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("error: {e}");
            return Ok(CONFIG_ERROR);
        }
    };
    if let Some(n) = args.concurrency {
        settings = settings.with_concurrency(n);
    }
    if let Some(dir) = &args.output {
        settings = settings.with_report_dir(dir.clone());
    }
    if let Err(e) = settings.validate() {
        eprintln!("error: {e}");
        return Ok(CONFIG_ERROR);
    }

    let (scenario, target) = builder::load_scenario(&args.file, &settings)?;
    let sink = if args.export_findings {
        sink_from_settings(&settings)?
    } else {
        None
    };
    let orchestrator = builder::build_orchestrator(&settings, &args.db)?;

    if !args.skip_preflight {
        if let Err(e) = orchestrator.preflight(&target).await {
            eprintln!("error: target {} failed preflight: {e}", target.id);
            return Ok(RUN_FAILED);
        }
    }

    let (handle, signal) = cancel_pair();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling run");
            handle.cancel();
        }
    });

    let result = match orchestrator
        .run(scenario.clone(), target, start, signal)
        .await
    {
        Ok(result) => result,
        Err(e) => {
            eprintln!("error: {e}");
            return Ok(CONFIG_ERROR);
        }
    };

    let report_path = write_report(&settings.report_dir, &result)?;
    print_summary(&result);
    println!("report: {}", report_path.display());

    if let Some(failure) = &result.failure {
        eprintln!(
            "run aborted in {} ({}): {}",
            failure.phase, failure.kind, failure.message
        );
        if failure.kind == ErrorKind::Cancelled {
            return Ok(INTERRUPTED);
        }
        return Ok(RUN_FAILED);
    }

    if args.export_findings {
        let Some(sink) = sink else {
            println!("findings export disabled (REPORTER_TYPE=none)");
            return Ok(SUCCESS);
        };
        let exporter = FindingsExporter::new(sink, settings.export_retry());
        match exporter.export(&result.findings).await {
            Ok(export) => println!(
                "exported {} findings to {}: {} created, {} already present",
                export.total(),
                export.sink,
                export.created.len(),
                export.existing.len()
            ),
            Err(e) => {
                eprintln!("error: findings export failed: {e}");
                return Ok(RUN_FAILED);
            }
        }
    }

    Ok(SUCCESS)
}

fn write_report(dir: &Path, result: &RunResult) -> anyhow::Result<PathBuf> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("failed to create report directory {}", dir.display()))?;
    let path = dir.join("report.json");
    let body = serde_json::to_vec_pretty(result).context("failed to serialize run result")?;
    std::fs::write(&path, body).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(path)
}

fn print_summary(result: &RunResult) {
    println!(
        "scenario {} against {}: {:?} (run {})",
        result.scenario_id, result.target_id, result.status, result.run_id
    );
    for outcome in &result.phases {
        println!(
            "  {:<9} {:<9} {:?} attempts={}",
            outcome.phase.as_str(),
            outcome.status.as_str(),
            outcome.disposition,
            outcome.attempt_count
        );
    }
    println!("findings: {}", result.findings.len());
    for finding in &result.findings {
        println!(
            "  [{}] {} ({})",
            finding.severity.as_str(),
            finding.title,
            finding.dedup_key
        );
    }
}
