pub mod config;
pub mod error;
pub mod invoke;
pub mod layout;
pub mod observability;
pub mod pipeline;
pub mod precheck;
pub mod prompt;
pub mod record;
pub mod sequencer;
pub mod stages;
pub mod validation;

pub use config::PilotConfig;
pub use error::{PipelineError, PipelineResult, PreconditionFailure};
pub use pipeline::{Artifact, ArtifactRole, PipelineContext, StageExecutor, Workflow};
pub use sequencer::{RunOutcome, Session, run_workflow};
