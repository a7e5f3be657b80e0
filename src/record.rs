use std::fs::{self, File};
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::error::{PipelineError, PipelineResult};
use crate::observability::MetricsSnapshot;
use crate::pipeline::{Artifact, StageParameters, Workflow};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunStatus {
    Completed,
    Aborted,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum StageStatus {
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct StageRecord {
    pub name: String,
    pub parameters: StageParameters,
    pub params_hash: String,
    pub commands: Vec<String>,
    pub status: StageStatus,
}

/// Everything needed to understand a run after the fact, including which
/// artifacts already exist when a failed run is resumed by hand.
#[derive(Debug, Serialize)]
pub struct RunRecord {
    pub workflow: Workflow,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tree_strategy: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkpoint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
    pub stages: Vec<StageRecord>,
    pub artifacts: Vec<Artifact>,
    pub metrics: MetricsSnapshot,
}

pub fn write_record(record: &RunRecord, path: &Path) -> PipelineResult<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).map_err(|err| PipelineError::io(parent, err))?;
    }
    let file = File::create(path).map_err(|err| PipelineError::io(path, err))?;
    serde_yaml::to_writer(file, record)
        .map_err(|err| PipelineError::io(path, std::io::Error::other(err)))?;
    Ok(())
}

pub fn hash_params(stage: &str, params: &StageParameters) -> String {
    let mut hasher = Sha256::new();
    let serialized = serde_json::to_vec(params).unwrap_or_default();
    hasher.update(stage.as_bytes());
    hasher.update(serialized);
    format!("{:x}", hasher.finalize())
}
