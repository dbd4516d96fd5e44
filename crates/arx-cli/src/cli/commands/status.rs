use arx_core::{scenario, CheckpointStore, Phase, PhaseStatus, Settings};

use super::super::args::StatusArgs;
use crate::exit_codes::SUCCESS;

pub(crate) fn run(args: StatusArgs) -> anyhow::Result<i32> {
    let settings = Settings::from_env()?;
    let scenario = scenario::load(&args.file, &settings.system_prompt)?;

    if !args.db.exists() {
        println!(
            "no checkpoints for {} ({} does not exist)",
            scenario.id,
            args.db.display()
        );
        return Ok(SUCCESS);
    }
    let store = CheckpointStore::open(&args.db)?;
    let records = store.latest_records(&scenario.id)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(SUCCESS);
    }

    println!("scenario {}", scenario.id);
    for phase in Phase::ALL {
        match records.iter().find(|r| r.phase == phase) {
            Some(r) => {
                let failure = r
                    .failure
                    .as_ref()
                    .map(|f| format!(" {}: {}", f.kind, f.message))
                    .unwrap_or_default();
                println!(
                    "  {:<9} {:<9} target={} run={} attempts={}{}",
                    phase.as_str(),
                    r.status.as_str(),
                    r.target_id,
                    r.run_id,
                    r.attempt_count,
                    failure
                );
            }
            None => println!("  {:<9} -", phase.as_str()),
        }
    }

    let next = Phase::ALL.into_iter().find(|p| {
        !records
            .iter()
            .any(|r| r.phase == *p && r.status == PhaseStatus::Succeeded)
    });
    match next {
        Some(phase) if phase != Phase::first() => {
            println!("resume with: arx run --file {} --start-from {phase}", args.file.display())
        }
        Some(_) => {}
        None => println!("all phases succeeded"),
    }
    Ok(SUCCESS)
}
