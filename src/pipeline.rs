use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, error, info, instrument};

use crate::config::PilotConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::invoke::{ToolInvocation, ToolRunner};
use crate::layout::ProjectLayout;
use crate::observability::MetricsCollector;
use crate::prompt::{Resolver, StageParameter};
use crate::record::{StageRecord, StageStatus, hash_params};
use crate::validation::one_of;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Workflow {
    #[serde(rename = "dataset-builder")]
    Dataset,
    #[serde(rename = "classifier-trainer")]
    Classifier,
}

impl Workflow {
    pub fn slug(self) -> &'static str {
        match self {
            Workflow::Dataset => "dataset-builder",
            Workflow::Classifier => "classifier-trainer",
        }
    }

    pub fn select(resolver: &mut Resolver) -> PipelineResult<Self> {
        resolver.note("Workflows:\n  1) build a dataset from raw reads\n  2) train a taxonomic classifier");
        let mut choice = StageParameter::new("workflow", "Select a workflow", "1")
            .validate_with(one_of(&["1", "2"]));
        let workflow = match resolver.resolve(&mut choice)?.as_str() {
            "2" => Workflow::Classifier,
            _ => Workflow::Dataset,
        };
        Ok(workflow)
    }
}

/// Logical name of a pipeline artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArtifactRole {
    DemultiplexedReads,
    TrimmedReads,
    FeatureTable,
    RepresentativeSequences,
    DenoisingStats,
    Alignment,
    MaskedAlignment,
    UnrootedTree,
    RootedTree,
    Placements,
    RemovedFeatures,
    Taxonomy,
    Classifier,
    ReferenceSequences,
    ReferenceTaxonomy,
    ReferenceReads,
    ExportedTable,
    ExportedTree,
    ExportedSequences,
    ExportedTaxonomy,
    AnnotationTable,
    MergedTable,
    MergedTableText,
    Visualization,
}

impl fmt::Display for ArtifactRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ArtifactRole::DemultiplexedReads => "demultiplexed reads",
            ArtifactRole::TrimmedReads => "trimmed reads",
            ArtifactRole::FeatureTable => "feature table",
            ArtifactRole::RepresentativeSequences => "representative sequences",
            ArtifactRole::DenoisingStats => "denoising stats",
            ArtifactRole::Alignment => "alignment",
            ArtifactRole::MaskedAlignment => "masked alignment",
            ArtifactRole::UnrootedTree => "unrooted tree",
            ArtifactRole::RootedTree => "rooted tree",
            ArtifactRole::Placements => "placements",
            ArtifactRole::RemovedFeatures => "removed features",
            ArtifactRole::Taxonomy => "taxonomy",
            ArtifactRole::Classifier => "classifier",
            ArtifactRole::ReferenceSequences => "reference sequences",
            ArtifactRole::ReferenceTaxonomy => "reference taxonomy",
            ArtifactRole::ReferenceReads => "reference reads",
            ArtifactRole::ExportedTable => "exported table",
            ArtifactRole::ExportedTree => "exported tree",
            ArtifactRole::ExportedSequences => "exported sequences",
            ArtifactRole::ExportedTaxonomy => "exported taxonomy",
            ArtifactRole::AnnotationTable => "taxonomy annotation table",
            ArtifactRole::MergedTable => "merged table",
            ArtifactRole::MergedTableText => "merged table (TSV)",
            ArtifactRole::Visualization => "visualization",
        };
        f.write_str(label)
    }
}

/// A file written by an external tool. Never modified once produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Artifact {
    pub role: ArtifactRole,
    pub path: PathBuf,
    pub producer: &'static str,
}

impl Artifact {
    pub fn new(role: ArtifactRole, path: impl Into<PathBuf>, producer: &'static str) -> Self {
        Self {
            role,
            path: path.into(),
            producer,
        }
    }
}

pub type StageParameters = BTreeMap<String, String>;

/// State threaded through one workflow run.
#[derive(Debug)]
pub struct PipelineContext {
    pub workflow: Workflow,
    pub layout: ProjectLayout,
    pub config: PilotConfig,
    pub metadata: Option<PathBuf>,
    pub threads: u32,
    produced: Vec<Artifact>,
    current: BTreeMap<ArtifactRole, usize>,
}

impl PipelineContext {
    pub fn new(workflow: Workflow, layout: ProjectLayout, config: PilotConfig) -> Self {
        Self {
            workflow,
            layout,
            config,
            metadata: None,
            threads: 1,
            produced: Vec::new(),
            current: BTreeMap::new(),
        }
    }

    pub fn toolkit(&self) -> ToolInvocation {
        ToolInvocation::new(self.config.toolkit.clone())
    }

    pub fn biom(&self) -> ToolInvocation {
        ToolInvocation::new(self.config.biom.clone())
    }

    /// Registers an artifact; a later artifact of the same role becomes the
    /// current handle for that role.
    pub fn record(&mut self, artifact: Artifact) {
        if artifact.role != ArtifactRole::Visualization {
            self.current.insert(artifact.role, self.produced.len());
        }
        self.produced.push(artifact);
    }

    pub fn artifact(&self, role: ArtifactRole) -> Option<&Artifact> {
        self.current.get(&role).map(|&idx| &self.produced[idx])
    }

    pub fn produced(&self) -> &[Artifact] {
        &self.produced
    }

    /// Path of the current artifact for `role`, which must exist on disk.
    pub fn require(&self, stage: &'static str, role: ArtifactRole) -> PipelineResult<&Path> {
        match self.artifact(role) {
            Some(artifact) if artifact.path.exists() => Ok(&artifact.path),
            Some(artifact) => Err(PipelineError::MissingArtifact {
                stage,
                role,
                path: Some(artifact.path.clone()),
            }),
            None => Err(PipelineError::MissingArtifact {
                stage,
                role,
                path: None,
            }),
        }
    }

    pub fn metadata_file(&self, stage: &'static str) -> PipelineResult<&Path> {
        self.metadata
            .as_deref()
            .ok_or_else(|| PipelineError::Validation {
                parameter: "metadata".into(),
                reason: format!("stage '{stage}' needs a metadata file"),
            })
    }
}

pub trait Stage {
    fn name(&self) -> &'static str;

    /// Roles that must already be produced before this stage may start.
    fn requires(&self) -> &'static [ArtifactRole] {
        &[]
    }

    fn parameters(&self) -> StageParameters {
        StageParameters::new()
    }

    fn run(&self, ctx: &PipelineContext, tools: &mut ToolHost<'_>) -> PipelineResult<Vec<Artifact>>;
}

/// Handle a stage uses to run its commands; every command goes to the
/// stage's log and a non-zero exit ends the stage.
pub struct ToolHost<'a> {
    runner: &'a mut dyn ToolRunner,
    stage: &'static str,
    log_path: PathBuf,
    commands: Vec<String>,
}

impl<'a> ToolHost<'a> {
    pub fn new(runner: &'a mut dyn ToolRunner, stage: &'static str, log_path: PathBuf) -> Self {
        Self {
            runner,
            stage,
            log_path,
            commands: Vec::new(),
        }
    }

    pub fn invoke(&mut self, invocation: ToolInvocation) -> PipelineResult<()> {
        let command = invocation.command_line();
        // Outputs from an earlier run must not satisfy the post-run check.
        for output in &invocation.outputs {
            if let Some(dir) = output.parent() {
                fs::create_dir_all(dir).map_err(|err| PipelineError::io(dir, err))?;
            }
            match fs::remove_file(output) {
                Ok(()) => debug!(path = %output.display(), "Removed stale output"),
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => return Err(PipelineError::io(output, err)),
            }
        }
        self.commands.push(command.clone());
        match self.runner.run(self.stage, &invocation, &self.log_path)? {
            Some(0) => Ok(()),
            code => Err(PipelineError::ToolFailed {
                stage: self.stage,
                command,
                code,
            }),
        }
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    pub fn into_commands(self) -> Vec<String> {
        self.commands
    }
}

/// Runs stages one at a time against a context, checking inputs before and
/// outputs after each one.
pub struct StageExecutor {
    runner: Box<dyn ToolRunner>,
    metrics: MetricsCollector,
    records: Vec<StageRecord>,
}

impl StageExecutor {
    pub fn new(runner: Box<dyn ToolRunner>) -> Self {
        Self {
            runner,
            metrics: MetricsCollector::new(),
            records: Vec::new(),
        }
    }

    #[instrument(skip_all, fields(stage = stage.name()))]
    pub fn execute(&mut self, stage: &dyn Stage, ctx: &mut PipelineContext) -> PipelineResult<()> {
        let name = stage.name();
        let parameters = stage.parameters();
        let params_hash = hash_params(name, &parameters);
        let mut timer = self.metrics.start_stage(name);

        let log_path = ctx.layout.stage_log(ctx.workflow, name);
        let mut host = ToolHost::new(self.runner.as_mut(), name, log_path);
        let outcome = run_checked(stage, ctx, &mut host);
        let commands = host.into_commands();

        let (status, result) = match outcome {
            Ok(produced) => {
                for artifact in produced {
                    info!(role = %artifact.role, path = %artifact.path.display(), "Artifact produced");
                    ctx.record(artifact);
                }
                (StageStatus::Succeeded, Ok(()))
            }
            Err(err) => {
                timer.fail();
                error!(error = %err, "Stage failed");
                (StageStatus::Failed, Err(err))
            }
        };

        self.records.push(StageRecord {
            name: name.to_string(),
            parameters,
            params_hash,
            commands,
            status,
        });
        result
    }

    pub fn metrics(&self) -> MetricsCollector {
        self.metrics.clone()
    }

    pub fn records(&self) -> &[StageRecord] {
        &self.records
    }
}

fn run_checked(
    stage: &dyn Stage,
    ctx: &PipelineContext,
    host: &mut ToolHost<'_>,
) -> PipelineResult<Vec<Artifact>> {
    for role in stage.requires() {
        ctx.require(stage.name(), *role)?;
    }
    let produced = stage.run(ctx, host)?;
    if let Some(missing) = produced.iter().find(|artifact| !artifact.path.exists()) {
        return Err(PipelineError::MissingArtifact {
            stage: stage.name(),
            role: missing.role,
            path: Some(missing.path.clone()),
        });
    }
    Ok(produced)
}
