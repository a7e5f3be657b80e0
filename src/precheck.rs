use std::env;
use std::fs;
use std::path::PathBuf;

use tracing::{info, warn};

use crate::config::PilotConfig;
use crate::error::{PipelineError, PipelineResult, PreconditionFailure};
use crate::invoke::program_on_path;
use crate::layout::ProjectLayout;
use crate::pipeline::Workflow;

/// Directories a workflow expects under the project root.
#[derive(Debug, Clone)]
pub struct ExpectedLayout {
    pub required: Vec<PathBuf>,
    /// Created on demand.
    pub writable: Vec<PathBuf>,
}

impl ExpectedLayout {
    pub fn for_workflow(layout: &ProjectLayout, workflow: Workflow) -> Self {
        let required = match workflow {
            Workflow::Dataset => vec![layout.reads_dir()],
            Workflow::Classifier => vec![layout.raw_dir()],
        };
        Self {
            required,
            writable: vec![layout.interim_dir(), layout.logs_dir()],
        }
    }
}

/// The toolkit runtime the user is expected to have activated.
#[derive(Debug, Clone)]
pub struct RuntimeExpectation {
    pub enforce: bool,
    pub environment_prefix: String,
    pub active_environment: Option<String>,
    pub toolkit: String,
}

impl RuntimeExpectation {
    pub fn from_env(config: &PilotConfig) -> Self {
        Self {
            enforce: config.require_environment,
            environment_prefix: config.environment_prefix.clone(),
            active_environment: env::var("CONDA_DEFAULT_ENV").ok(),
            toolkit: config.toolkit.clone(),
        }
    }

    fn verify(&self) -> Result<(), PreconditionFailure> {
        if !self.enforce {
            return Ok(());
        }
        match self.active_environment.as_deref() {
            Some(active) if active.starts_with(&self.environment_prefix) => {}
            found => {
                return Err(PreconditionFailure::EnvironmentNotActive {
                    expected: self.environment_prefix.clone(),
                    found: found.map(str::to_string),
                });
            }
        }
        if !program_on_path(&self.toolkit) {
            return Err(PreconditionFailure::ToolNotFound {
                program: self.toolkit.clone(),
            });
        }
        Ok(())
    }
}

/// Returns advisory warnings on success.
pub fn check(
    layout: &ProjectLayout,
    expected: &ExpectedLayout,
    runtime: &RuntimeExpectation,
) -> PipelineResult<Vec<String>> {
    if !layout.data_dir().is_dir() {
        return Err(PreconditionFailure::WrongWorkingDirectory {
            cwd: layout.root().to_path_buf(),
        }
        .into());
    }
    for dir in &expected.required {
        if !dir.is_dir() {
            return Err(PreconditionFailure::MissingDirectory { path: dir.clone() }.into());
        }
    }
    runtime.verify()?;

    for dir in &expected.writable {
        if !dir.is_dir() {
            fs::create_dir_all(dir).map_err(|err| PipelineError::io(dir, err))?;
            info!(path = %dir.display(), "Created directory");
        }
    }

    let mut warnings = Vec::new();
    if expected.required.contains(&layout.reads_dir()) && count_reads(layout) == 0 {
        let message = format!(
            "no *.fastq.gz files found in {}",
            layout.reads_dir().display()
        );
        warn!("{message}");
        warnings.push(message);
    }
    Ok(warnings)
}

fn count_reads(layout: &ProjectLayout) -> usize {
    let pattern = layout.reads_dir().join("*.fastq.gz");
    glob::glob(&pattern.to_string_lossy())
        .map(|paths| paths.filter_map(Result::ok).count())
        .unwrap_or(0)
}
