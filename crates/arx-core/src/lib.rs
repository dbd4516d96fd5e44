//! Phase orchestration core for automated adversarial security testing.
//!
//! A run drives four agents in a fixed order against one target:
//!
//! - Recon: probes the target and summarises its attack surface
//! - Analysis: turns reconnaissance into vulnerabilities and an attack plan
//! - Attack: executes planned attacks and has each result evaluated
//! - Report: synthesises the report and derives findings
//!
//! Every phase outcome is checkpointed in SQLite, so a run can resume from a
//! later phase without re-executing earlier ones. Findings are exported to a
//! tracking sink idempotently by dedup key.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use arx_core::{
//!     cancel_pair, scenario, CheckpointStore, HttpTargetAdapter, OpenAiBackend, Orchestrator,
//!     PromptCatalog, ReasoningClient, Settings,
//! };
//!
//! # async fn example() -> anyhow::Result<()> {
//! let settings = Settings::from_env()?;
//! settings.validate()?;
//!
//! let scenario = Arc::new(scenario::load("scenarios/s1.yaml".as_ref(), &settings.system_prompt)?);
//! let target = Arc::new(scenario.resolve_target()?);
//!
//! let reasoning = ReasoningClient::new(
//!     Arc::new(OpenAiBackend::from_settings(&settings)?),
//!     Arc::new(PromptCatalog::builtin()?),
//!     settings.reasoning_retry(),
//! );
//! let orchestrator = Orchestrator::new(
//!     CheckpointStore::open("arx.db".as_ref())?,
//!     Arc::new(reasoning),
//!     Arc::new(HttpTargetAdapter::new(settings.target_timeout())?),
//! )
//! .with_limits((&settings).into());
//!
//! let (_handle, signal) = cancel_pair();
//! let result = orchestrator.run(scenario, target, None, signal).await?;
//! println!("{:?}: {} findings", result.status, result.findings.len());
//! # Ok(())
//! # }
//! ```
//!
//! # Configuration
//!
//! See [`Settings::from_env`] for the full environment table. The most common:
//!
//! | Environment Variable | Description |
//! |---------------------|-------------|
//! | `OPENAI_API_KEY` | Reasoning backend key (required for runs) |
//! | `ARX_CONCURRENCY` | Max in-flight sub-tasks per phase (default: 4) |
//! | `ARX_MAX_ATTEMPTS` | Attempt ceiling for reasoning calls and exports (default: 4) |
//! | `REPORTER_TYPE` | `defectdojo`, `local` or `none` (default: `local`) |

pub mod agents;
pub mod cancel;
pub mod checkpoint;
pub mod errors;
pub mod export;
pub mod model;
pub mod orchestrator;
pub mod reasoning;
pub mod retry;
pub mod scenario;
pub mod settings;
pub mod target;

// Re-export main types
pub use agents::{AgentLimits, PhaseAgent, PhaseContext};
pub use cancel::{cancel_pair, CancelHandle, CancelSignal};
pub use checkpoint::CheckpointStore;
pub use errors::{
    CheckpointError, ConfigError, ErrorKind, ExportError, FailedCall, PhaseError, ReasoningError,
    RunError, TargetError,
};
pub use export::{
    sink_from_settings, sink_identifier, DefectDojoSink, ExportResult, FindingsExporter,
    FindingsSink, LocalSink, MemorySink,
};
pub use model::{
    Finding, Phase, PhaseDisposition, PhaseRecord, PhaseStatus, RunResult, RunStatus, Severity,
};
pub use orchestrator::Orchestrator;
pub use reasoning::{
    OpenAiBackend, PromptCatalog, ReasoningBackend, ReasoningClient, Script, ScriptedBackend,
};
pub use retry::RetryPolicy;
pub use scenario::ScenarioDescriptor;
pub use settings::{ReporterKind, Settings};
pub use target::{
    HttpTargetAdapter, ProbeRequest, ProbeResponse, StaticTargetAdapter, TargetAdapter,
    TargetHandle,
};
