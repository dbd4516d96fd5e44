//! Local JSON sink: one file per finding in the report directory.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::json;

use super::{FindingsSink, SinkOutcome, SinkResult};
use crate::errors::ExportError;
use crate::model::Finding;

pub struct LocalSink {
    dir: PathBuf,
}

impl LocalSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, sink_id: &str) -> PathBuf {
        self.dir.join(format!("finding_{sink_id}.json"))
    }
}

fn io_error(path: &Path, e: std::io::Error) -> ExportError {
    ExportError::transport(format!("{}: {e}", path.display()))
}

#[async_trait]
impl FindingsSink for LocalSink {
    async fn find_or_create(&self, sink_id: &str, finding: &Finding) -> SinkResult<SinkOutcome> {
        let path = self.entry_path(sink_id);
        if tokio::fs::try_exists(&path).await.map_err(|e| io_error(&path, e))? {
            return Ok(SinkOutcome {
                entry_id: sink_id.to_string(),
                created: false,
            });
        }

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| io_error(&self.dir, e))?;
        let body = serde_json::to_vec_pretty(&json!({
            "sink_id": sink_id,
            "finding": finding,
        }))
        .map_err(|e| ExportError::ExportRejected {
            dedup_key: finding.dedup_key.clone(),
            message: e.to_string(),
        })?;

        // readers never see a half-written entry
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, body)
            .await
            .map_err(|e| io_error(&tmp, e))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| io_error(&path, e))?;

        Ok(SinkOutcome {
            entry_id: sink_id.to_string(),
            created: true,
        })
    }

    async fn test_connection(&self) -> SinkResult<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| io_error(&self.dir, e))
    }

    fn sink_name(&self) -> &'static str {
        "local"
    }
}
