mod common;

use std::sync::Arc;
use std::time::Duration;

use arx_core::{
    sink_identifier, CancelSignal, CheckpointStore, DefectDojoSink, FindingsExporter, LocalSink,
    MemorySink, Phase, PhaseStatus, RunStatus,
};
use serde_json::json;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn full_run_checkpoints_every_phase_and_exports_once() {
    let dir = tempfile::tempdir().unwrap();
    let (scenario, target) = common::load_scenario(dir.path());
    let store = CheckpointStore::open(&dir.path().join("arx.db")).unwrap();
    let orch = common::orchestrator(
        store.clone(),
        Arc::new(common::scripted()),
        Arc::new(common::adapter()),
        common::policy(3),
    );

    let result = orch
        .run(scenario, target, None, CancelSignal::never())
        .await
        .unwrap();
    assert_eq!(result.status, RunStatus::Completed);
    assert!(result.failure.is_none());

    let records = store.latest_records("S1").unwrap();
    let phases: Vec<Phase> = records.iter().map(|r| r.phase).collect();
    assert_eq!(phases, Phase::ALL.to_vec());
    for record in &records {
        assert_eq!(record.status, PhaseStatus::Succeeded);
        assert_eq!(record.target_id, "T");
        assert_eq!(record.run_id, result.run_id);
    }

    let report = &result.outputs[&Phase::Report];
    assert!(report["report_id"].as_str().unwrap().starts_with("arx_S1_"));
    assert_eq!(result.findings.len(), 1);
    assert_eq!(result.findings[0].dedup_key, "F1");

    let sink = Arc::new(MemorySink::new());
    let exporter = FindingsExporter::new(sink.clone(), common::policy(3));
    let first = exporter.export(&result.findings).await.unwrap();
    let second = exporter.export(&result.findings).await.unwrap();

    assert_eq!(first.created.len(), 1);
    assert_eq!(second.created.len(), 0);
    assert_eq!(second.existing.len(), 1);
    assert_eq!(first.created[0].entry_id, second.existing[0].entry_id);
    assert_eq!(sink.len(), 1);
    assert!(sink.contains_key("F1"));
}

#[tokio::test]
async fn local_sink_survives_a_second_run() {
    let dir = tempfile::tempdir().unwrap();
    let (scenario, target) = common::load_scenario(dir.path());
    let store = CheckpointStore::memory().unwrap();
    let reports = dir.path().join("reports");

    for _ in 0..2 {
        let orch = common::orchestrator(
            store.clone(),
            Arc::new(common::scripted()),
            Arc::new(common::adapter()),
            common::policy(3),
        );
        let result = orch
            .run(scenario.clone(), target.clone(), None, CancelSignal::never())
            .await
            .unwrap();
        let exporter = FindingsExporter::new(Arc::new(LocalSink::new(&reports)), common::policy(3));
        exporter.export(&result.findings).await.unwrap();
    }

    let entries: Vec<_> = std::fs::read_dir(&reports).unwrap().collect();
    assert_eq!(entries.len(), 1);
    assert_eq!(store.history("S1", Phase::Report).unwrap().len(), 2);
}

#[tokio::test]
async fn defectdojo_export_is_idempotent_across_runs() {
    let server = MockServer::start().await;
    let sink_id = sink_identifier("F1");

    // first lookup misses, later lookups see the created entry
    Mock::given(method("GET"))
        .and(path("/api/v2/findings/"))
        .and(query_param("unique_id_from_tool", sink_id.as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"count": 0, "results": []})))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v2/findings/"))
        .and(query_param("unique_id_from_tool", sink_id.as_str()))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"count": 1, "results": [{"id": 42}]})),
        )
        .with_priority(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v2/findings/"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": 42})))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let (scenario, target) = common::load_scenario(dir.path());
    let orch = common::orchestrator(
        CheckpointStore::memory().unwrap(),
        Arc::new(common::scripted()),
        Arc::new(common::adapter()),
        common::policy(3),
    );
    let result = orch
        .run(scenario, target, None, CancelSignal::never())
        .await
        .unwrap();

    let sink = DefectDojoSink::new(&server.uri(), "tok", 1, 1, Duration::from_secs(5)).unwrap();
    let exporter = FindingsExporter::new(Arc::new(sink), common::policy(3));
    let first = exporter.export(&result.findings).await.unwrap();
    let second = exporter.export(&result.findings).await.unwrap();

    assert_eq!(first.created.len(), 1);
    assert_eq!(second.existing.len(), 1);
    assert_eq!(second.existing[0].entry_id, "42");
}
