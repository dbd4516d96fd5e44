mod common;

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use arx_core::{
    cancel_pair, CancelSignal, CheckpointStore, ErrorKind, Phase, PhaseStatus, RunStatus, Script,
};
use serde_json::json;

#[tokio::test(start_paused = true)]
async fn timeout_ceiling_fails_the_phase_and_keeps_earlier_checkpoints() {
    let dir = tempfile::tempdir().unwrap();
    let (scenario, target) = common::load_scenario(dir.path());
    let store = CheckpointStore::memory().unwrap();
    let backend =
        Arc::new(common::scripted().with_default("analysis.cot_reasoning", Script::Hang));
    let orch = common::orchestrator(
        store.clone(),
        backend.clone(),
        Arc::new(common::adapter()),
        common::policy(3),
    );

    let result = orch
        .run(scenario, target, None, CancelSignal::never())
        .await
        .unwrap();

    assert_eq!(result.status, RunStatus::Aborted);
    let failure = result.failure.expect("failure recorded");
    assert_eq!(failure.phase, Phase::Analysis);
    assert_eq!(failure.kind, ErrorKind::BackendTimeout);
    assert_eq!(failure.attempt_count, 3);
    assert_eq!(backend.calls("analysis.cot_reasoning"), 3);
    assert_eq!(backend.calls("attack.attack_evaluation"), 0);
    assert!(result.findings.is_empty());

    let record = store.load("S1", Phase::Analysis).unwrap();
    assert_eq!(record.status, PhaseStatus::Failed);
    assert_eq!(record.attempt_count, 3);
    let attempts = store.attempts(&record).unwrap();
    assert_eq!(attempts.len(), 3);
    assert!(attempts
        .iter()
        .all(|a| a.error_kind == Some(ErrorKind::BackendTimeout)));

    assert_eq!(
        store.list_succeeded("S1").unwrap(),
        BTreeSet::from([Phase::Recon])
    );
}

#[tokio::test(start_paused = true)]
async fn concurrent_evaluations_report_the_ceiling_not_the_sum() {
    let dir = tempfile::tempdir().unwrap();
    let (scenario, target) = common::load_scenario(dir.path());
    let store = CheckpointStore::memory().unwrap();
    let backend =
        Arc::new(common::scripted().with_default("attack.attack_evaluation", Script::Hang));
    let orch = common::orchestrator(
        store.clone(),
        backend.clone(),
        Arc::new(common::adapter()),
        common::policy(3),
    );

    let result = orch
        .run(scenario, target, None, CancelSignal::never())
        .await
        .unwrap();

    let failure = result.failure.expect("failure recorded");
    assert_eq!(failure.phase, Phase::Attack);
    assert_eq!(failure.kind, ErrorKind::BackendTimeout);
    assert_eq!(failure.attempt_count, 3);
    // both planned attacks were evaluated up to the ceiling
    assert_eq!(backend.calls("attack.attack_evaluation"), 6);

    let outcome = result.phases.last().unwrap();
    assert_eq!(outcome.phase, Phase::Attack);
    assert_eq!(outcome.status, PhaseStatus::Failed);
    assert_eq!(outcome.attempt_count, 3);

    let record = store.load("S1", Phase::Attack).unwrap();
    assert_eq!(record.attempt_count, 3);
    assert_eq!(store.attempts(&record).unwrap().len(), 6);
}

#[tokio::test(start_paused = true)]
async fn recon_follow_up_timeout_reports_only_the_failing_call() {
    let dir = tempfile::tempdir().unwrap();
    let (scenario, target) = common::load_scenario(dir.path());
    let store = CheckpointStore::memory().unwrap();
    let backend = Arc::new(
        common::scripted()
            .with_default(
                "recon.initial_recon",
                Script::Json(json!({
                    "recon_complete": false,
                    "follow_up_probes": [{"method": "GET", "path": "/admin"}]
                })),
            )
            .with_default("recon.additional_recon", Script::Hang),
    );
    let orch = common::orchestrator(
        store.clone(),
        backend.clone(),
        Arc::new(common::adapter()),
        common::policy(3),
    );

    let result = orch
        .run(scenario, target, None, CancelSignal::never())
        .await
        .unwrap();

    let failure = result.failure.expect("failure recorded");
    assert_eq!(failure.phase, Phase::Recon);
    assert_eq!(failure.kind, ErrorKind::BackendTimeout);
    assert_eq!(failure.attempt_count, 3);
    assert_eq!(backend.calls("recon.initial_recon"), 1);
    assert_eq!(backend.calls("recon.additional_recon"), 3);
    assert_eq!(backend.calls("analysis.cot_reasoning"), 0);

    let record = store.load("S1", Phase::Recon).unwrap();
    assert_eq!(record.status, PhaseStatus::Failed);
    assert_eq!(record.attempt_count, 3);
    let attempts = store.attempts(&record).unwrap();
    assert_eq!(attempts.len(), 4);
    assert!(attempts[0].succeeded());
    assert!(store.list_succeeded("S1").unwrap().is_empty());
}

#[tokio::test]
async fn cancellation_mid_phase_aborts_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let (scenario, target) = common::load_scenario(dir.path());
    let store = CheckpointStore::memory().unwrap();
    let backend =
        Arc::new(common::scripted().with_default("analysis.cot_reasoning", Script::Hang));
    let policy = common::policy(3).with_attempt_timeout(Duration::from_secs(30));
    let orch = common::orchestrator(
        store.clone(),
        backend.clone(),
        Arc::new(common::adapter()),
        policy,
    );

    let (handle, signal) = cancel_pair();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.cancel();
    });

    let result = tokio::time::timeout(
        Duration::from_secs(10),
        orch.run(scenario, target, None, signal),
    )
    .await
    .expect("cancellation is observed promptly")
    .unwrap();

    assert_eq!(result.status, RunStatus::Aborted);
    let failure = result.failure.unwrap();
    assert_eq!(failure.phase, Phase::Analysis);
    assert_eq!(failure.kind, ErrorKind::Cancelled);
    assert_eq!(backend.calls("attack.attack_evaluation"), 0);

    let record = store.load("S1", Phase::Analysis).unwrap();
    assert_eq!(record.status, PhaseStatus::Failed);
    assert!(store.load("S1", Phase::Attack).is_err());
}

#[tokio::test]
async fn cancelled_before_start_makes_no_calls() {
    let dir = tempfile::tempdir().unwrap();
    let (scenario, target) = common::load_scenario(dir.path());
    let backend = Arc::new(common::scripted());
    let adapter = Arc::new(common::adapter());
    let orch = common::orchestrator(
        CheckpointStore::memory().unwrap(),
        backend.clone(),
        adapter.clone(),
        common::policy(3),
    );

    let (handle, signal) = cancel_pair();
    handle.cancel();
    let result = orch.run(scenario, target, None, signal).await.unwrap();

    assert_eq!(result.status, RunStatus::Aborted);
    let failure = result.failure.unwrap();
    assert_eq!(failure.phase, Phase::Recon);
    assert_eq!(failure.kind, ErrorKind::Cancelled);
    assert_eq!(failure.attempt_count, 0);
    assert_eq!(backend.total_calls(), 0);
    assert!(adapter.probes().is_empty());
}

#[tokio::test]
async fn protocol_error_is_not_retried() {
    let dir = tempfile::tempdir().unwrap();
    let (scenario, target) = common::load_scenario(dir.path());
    let store = CheckpointStore::memory().unwrap();
    let backend = Arc::new(
        common::scripted().with_default("recon.initial_recon", Script::Text("I refuse.".into())),
    );
    let orch = common::orchestrator(
        store.clone(),
        backend.clone(),
        Arc::new(common::adapter()),
        common::policy(4),
    );

    let result = orch
        .run(scenario, target, None, CancelSignal::never())
        .await
        .unwrap();

    let failure = result.failure.unwrap();
    assert_eq!(failure.phase, Phase::Recon);
    assert_eq!(failure.kind, ErrorKind::BackendProtocol);
    assert_eq!(backend.calls("recon.initial_recon"), 1);
    assert!(store.list_succeeded("S1").unwrap().is_empty());
}
