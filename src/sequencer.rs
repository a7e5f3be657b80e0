use std::path::PathBuf;
use std::thread;
use std::time::Instant;

use chrono::{DateTime, Utc};
use tracing::{error, info, instrument, warn};

use crate::config::PilotConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::invoke::ToolRunner;
use crate::layout::ProjectLayout;
use crate::observability::log_snapshot;
use crate::pipeline::{Artifact, ArtifactRole, PipelineContext, Stage, StageExecutor, Workflow};
use crate::precheck::{self, ExpectedLayout, RuntimeExpectation};
use crate::prompt::{Resolver, StageParameter};
use crate::record::{RunRecord, RunStatus, write_record};
use crate::stages::export::ExportResults;
use crate::stages::training::{
    DEFAULT_CLASSIFIER_NAME, ExtractReads, ImportReference, SelfTest, TrainClassifier,
};
use crate::stages::tree::TreeStrategy;
use crate::stages::{
    ClassifyTaxonomy, DenoisePaired, ImportReads, RarefactionCurve, SummarizeReads, TrimPrimers,
};
use crate::validation;

/// How a run ended, for runs that did not fail.
#[derive(Debug)]
pub struct RunOutcome {
    pub workflow: Workflow,
    pub status: RunStatus,
    pub checkpoint: Option<&'static str>,
    pub visited: Vec<&'static str>,
    pub artifacts: Vec<Artifact>,
    pub record_path: Option<PathBuf>,
}

/// Everything one run needs: context, prompts and the stage executor.
pub struct Session {
    ctx: PipelineContext,
    resolver: Resolver,
    executor: StageExecutor,
    started_at: DateTime<Utc>,
    started: Instant,
}

impl Session {
    pub fn new(
        workflow: Workflow,
        layout: ProjectLayout,
        config: PilotConfig,
        resolver: Resolver,
        runner: Box<dyn ToolRunner>,
    ) -> Self {
        Self {
            ctx: PipelineContext::new(workflow, layout, config),
            resolver,
            executor: StageExecutor::new(runner),
            started_at: Utc::now(),
            started: Instant::now(),
        }
    }

    pub fn workflow(&self) -> Workflow {
        self.ctx.workflow
    }

    fn precheck(&mut self) -> PipelineResult<()> {
        let expected = ExpectedLayout::for_workflow(&self.ctx.layout, self.ctx.workflow);
        let runtime = RuntimeExpectation::from_env(&self.ctx.config);
        for warning in precheck::check(&self.ctx.layout, &expected, &runtime)? {
            self.resolver.note(&format!("Warning: {warning}"));
        }
        Ok(())
    }

    fn resolve_metadata(&mut self) -> PipelineResult<()> {
        let mut param = StageParameter::new(
            "metadata",
            "Sample metadata file",
            self.ctx.layout.default_metadata().to_string_lossy(),
        )
        .validate_with(Box::new(validation::metadata_file));
        self.ctx.metadata = Some(PathBuf::from(self.resolver.resolve(&mut param)?));
        Ok(())
    }

    fn resolve_threads(&mut self) -> PipelineResult<()> {
        let available = thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        let mut param = StageParameter::new(
            "threads",
            "Threads/cores for the external tools",
            available.to_string(),
        )
        .validate_with(Box::new(validation::positive_integer));
        self.resolver.resolve(&mut param)?;
        self.ctx.threads = param.parse()?;
        Ok(())
    }

    fn execute(&mut self, stage: &dyn Stage) -> PipelineResult<()> {
        self.executor.execute(stage, &mut self.ctx)
    }

    /// Writes the run record and turns the final result into an outcome.
    fn finish(
        self,
        result: PipelineResult<()>,
        visited: Vec<&'static str>,
        tree_strategy: Option<&TreeStrategy>,
    ) -> PipelineResult<RunOutcome> {
        let (status, checkpoint, failure) = match &result {
            Ok(()) => (RunStatus::Completed, None, None),
            Err(PipelineError::Aborted { checkpoint }) => {
                (RunStatus::Aborted, Some(*checkpoint), None)
            }
            Err(err) => (RunStatus::Failed, None, Some(err.to_string())),
        };

        let metrics = self.executor.metrics();
        metrics.record_total_duration(self.started.elapsed());
        let snapshot = metrics.snapshot();
        log_snapshot(&snapshot);

        let workflow = self.ctx.workflow;
        let record = RunRecord {
            workflow,
            status,
            started_at: self.started_at,
            finished_at: Utc::now(),
            tree_strategy: tree_strategy.map(|s| s.slug().to_string()),
            checkpoint: checkpoint.map(str::to_string),
            failure,
            stages: self.executor.records().to_vec(),
            artifacts: self.ctx.produced().to_vec(),
            metrics: snapshot,
        };

        let mut record_path = None;
        if self.ctx.layout.logs_dir().is_dir() {
            let path = self.ctx.layout.run_record(workflow, self.started_at);
            match write_record(&record, &path) {
                Ok(()) => {
                    info!(path = %path.display(), "Run record written");
                    record_path = Some(path);
                }
                Err(err) => warn!(error = %err, "Could not write run record"),
            }
        }

        match result {
            Ok(()) | Err(PipelineError::Aborted { .. }) => {
                info!(workflow = workflow.slug(), ?status, "Workflow finished");
                Ok(RunOutcome {
                    workflow,
                    status,
                    checkpoint,
                    visited,
                    artifacts: self.ctx.produced().to_vec(),
                    record_path,
                })
            }
            Err(err) => {
                error!(workflow = workflow.slug(), error = %err, "Workflow failed");
                Err(err)
            }
        }
    }
}

/// Runs whichever workflow the session was created for.
pub fn run_workflow(session: Session) -> PipelineResult<RunOutcome> {
    match session.workflow() {
        Workflow::Dataset => DatasetSequencer::new(session).run(),
        Workflow::Classifier => TrainerSequencer::new(session).run(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatasetState {
    Precheck,
    Import,
    Trim,
    Denoise,
    TreeBuild,
    Classify,
    Rarefy,
    Export,
    Done,
    Aborted,
}

impl DatasetState {
    pub fn label(self) -> &'static str {
        match self {
            DatasetState::Precheck => "precheck",
            DatasetState::Import => "import",
            DatasetState::Trim => "trim",
            DatasetState::Denoise => "denoise",
            DatasetState::TreeBuild => "tree-build",
            DatasetState::Classify => "classify",
            DatasetState::Rarefy => "rarefy",
            DatasetState::Export => "export",
            DatasetState::Done => "done",
            DatasetState::Aborted => "aborted",
        }
    }
}

pub struct DatasetSequencer {
    session: Session,
    state: DatasetState,
    visited: Vec<&'static str>,
    tree_strategy: Option<TreeStrategy>,
}

impl DatasetSequencer {
    pub fn new(session: Session) -> Self {
        Self {
            session,
            state: DatasetState::Precheck,
            visited: Vec::new(),
            tree_strategy: None,
        }
    }

    pub fn run(mut self) -> PipelineResult<RunOutcome> {
        let result = loop {
            self.visited.push(self.state.label());
            if self.state == DatasetState::Done {
                break Ok(());
            }
            match self.step() {
                Ok(next) => self.state = next,
                Err(err) => {
                    if err.is_abort() {
                        self.state = DatasetState::Aborted;
                        self.visited.push(self.state.label());
                    }
                    break Err(err);
                }
            }
        };
        self.session
            .finish(result, self.visited, self.tree_strategy.as_ref())
    }

    #[instrument(skip(self), fields(state = self.state.label()))]
    fn step(&mut self) -> PipelineResult<DatasetState> {
        let session = &mut self.session;
        let next = match self.state {
            DatasetState::Precheck => {
                session.precheck()?;
                DatasetState::Import
            }
            DatasetState::Import => {
                session.resolve_metadata()?;
                session.resolve_threads()?;
                session.execute(&ImportReads)?;
                session.execute(&SummarizeReads::demultiplexed())?;
                DatasetState::Trim
            }
            DatasetState::Trim => {
                session
                    .resolver
                    .checkpoint("before-trim", "Continue to primer trimming?")?;
                let trim = TrimPrimers::prompt(&mut session.resolver)?;
                session.execute(&trim)?;
                session.execute(&SummarizeReads::trimmed())?;
                DatasetState::Denoise
            }
            DatasetState::Denoise => {
                let denoise = DenoisePaired::prompt(&mut session.resolver)?;
                session.execute(&denoise)?;
                DatasetState::TreeBuild
            }
            DatasetState::TreeBuild => {
                session
                    .resolver
                    .checkpoint("before-tree", "Continue to tree construction?")?;
                let strategy = TreeStrategy::select(&mut session.resolver, &session.ctx)?;
                info!(strategy = strategy.slug(), "Tree strategy selected");
                let stage = strategy.stage();
                self.tree_strategy = Some(strategy);
                session.execute(&stage)?;
                DatasetState::Classify
            }
            DatasetState::Classify => {
                let classify = ClassifyTaxonomy::prompt(&mut session.resolver, &session.ctx)?;
                session.ctx.record(Artifact::new(
                    ArtifactRole::Classifier,
                    classify.classifier.clone(),
                    "user",
                ));
                session.execute(&classify)?;
                DatasetState::Rarefy
            }
            DatasetState::Rarefy => {
                let rarefy = RarefactionCurve::prompt(&mut session.resolver, &session.ctx)?;
                session.execute(&rarefy)?;
                DatasetState::Export
            }
            DatasetState::Export => {
                session
                    .resolver
                    .checkpoint("before-export", "Continue to the export step?")?;
                if session
                    .resolver
                    .ask("Export results to BIOM/Newick/FASTA/TSV?", true)?
                {
                    session.execute(&ExportResults)?;
                } else {
                    info!("Export skipped");
                }
                DatasetState::Done
            }
            DatasetState::Done | DatasetState::Aborted => self.state,
        };
        Ok(next)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainerState {
    Precheck,
    Import,
    Extract,
    Train,
    SelfTest,
    Done,
    Aborted,
}

impl TrainerState {
    pub fn label(self) -> &'static str {
        match self {
            TrainerState::Precheck => "precheck",
            TrainerState::Import => "import",
            TrainerState::Extract => "extract",
            TrainerState::Train => "train",
            TrainerState::SelfTest => "self-test",
            TrainerState::Done => "done",
            TrainerState::Aborted => "aborted",
        }
    }
}

pub struct TrainerSequencer {
    session: Session,
    state: TrainerState,
    visited: Vec<&'static str>,
    classifier_name: Option<String>,
}

impl TrainerSequencer {
    pub fn new(session: Session) -> Self {
        Self {
            session,
            state: TrainerState::Precheck,
            visited: Vec::new(),
            classifier_name: None,
        }
    }

    pub fn run(mut self) -> PipelineResult<RunOutcome> {
        let result = loop {
            self.visited.push(self.state.label());
            if self.state == TrainerState::Done {
                break Ok(());
            }
            match self.step() {
                Ok(next) => self.state = next,
                Err(err) => {
                    if err.is_abort() {
                        self.state = TrainerState::Aborted;
                        self.visited.push(self.state.label());
                    }
                    break Err(err);
                }
            }
        };
        self.session.finish(result, self.visited, None)
    }

    fn name(&self) -> String {
        self.classifier_name
            .clone()
            .unwrap_or_else(|| DEFAULT_CLASSIFIER_NAME.to_string())
    }

    #[instrument(skip(self), fields(state = self.state.label()))]
    fn step(&mut self) -> PipelineResult<TrainerState> {
        let name = self.name();
        let session = &mut self.session;
        let next = match self.state {
            TrainerState::Precheck => {
                session.precheck()?;
                TrainerState::Import
            }
            TrainerState::Import => {
                session.resolve_threads()?;
                let import = ImportReference::prompt(&mut session.resolver, &session.ctx)?;
                self.classifier_name = Some(import.name.clone());
                session.execute(&import)?;
                TrainerState::Extract
            }
            TrainerState::Extract => {
                let extract = ExtractReads::prompt(&mut session.resolver, &name)?;
                session.execute(&extract)?;
                TrainerState::Train
            }
            TrainerState::Train => {
                session
                    .resolver
                    .checkpoint("before-train", "Continue to classifier training?")?;
                session.execute(&TrainClassifier { name })?;
                TrainerState::SelfTest
            }
            TrainerState::SelfTest => {
                if session
                    .resolver
                    .ask("Classify the extracted reference reads as a self-test?", false)?
                {
                    session.execute(&SelfTest { name })?;
                }
                TrainerState::Done
            }
            TrainerState::Done | TrainerState::Aborted => self.state,
        };
        Ok(next)
    }
}
