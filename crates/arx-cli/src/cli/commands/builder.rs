use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use arx_core::{
    scenario, CheckpointStore, HttpTargetAdapter, OpenAiBackend, Orchestrator, PromptCatalog,
    ReasoningClient, ScenarioDescriptor, Settings, TargetHandle,
};

pub(crate) fn load_scenario(
    file: &Path,
    settings: &Settings,
) -> anyhow::Result<(Arc<ScenarioDescriptor>, Arc<TargetHandle>)> {
    let scenario = scenario::load(file, &settings.system_prompt)
        .with_context(|| format!("failed to load scenario {}", file.display()))?;
    let target = scenario
        .resolve_target()
        .with_context(|| format!("invalid target for scenario {}", scenario.id))?;
    Ok((Arc::new(scenario), Arc::new(target)))
}

pub(crate) fn load_catalog(settings: &Settings) -> anyhow::Result<PromptCatalog> {
    let catalog = match &settings.prompts_path {
        Some(path) => PromptCatalog::load(path)
            .with_context(|| format!("failed to load prompts {}", path.display()))?,
        None => PromptCatalog::builtin()?,
    };
    catalog.validate()?;
    Ok(catalog)
}

pub(crate) fn open_store(db: &Path) -> anyhow::Result<CheckpointStore> {
    if let Some(parent) = db.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    CheckpointStore::open(db)
        .with_context(|| format!("failed to open checkpoint store {}", db.display()))
}

pub(crate) fn build_orchestrator(settings: &Settings, db: &Path) -> anyhow::Result<Orchestrator> {
    let store = open_store(db)?;
    let catalog = load_catalog(settings)?;
    let backend = OpenAiBackend::from_settings(settings)?;
    let reasoning = ReasoningClient::new(
        Arc::new(backend),
        Arc::new(catalog),
        settings.reasoning_retry(),
    )
    .with_text_logging(settings.log_prompts, settings.log_completions);
    let adapter = HttpTargetAdapter::new(settings.target_timeout())
        .context("failed to build target HTTP client")?;

    Ok(
        Orchestrator::new(store, Arc::new(reasoning), Arc::new(adapter))
            .with_limits(settings.into()),
    )
}
