use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::pipeline::ArtifactRole;

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("precondition failed: {0}")]
    Precondition(#[from] PreconditionFailure),

    #[error("invalid value for '{parameter}': {reason}")]
    Validation { parameter: String, reason: String },

    #[error("stage '{stage}' failed: `{command}` exited with {}", describe_code(*code))]
    ToolFailed {
        stage: &'static str,
        command: String,
        code: Option<i32>,
    },

    #[error("stage '{stage}' could not start `{command}`: {source}")]
    ToolSpawn {
        stage: &'static str,
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("stage '{stage}' is missing the {role} artifact{}", describe_location(path.as_deref()))]
    MissingArtifact {
        stage: &'static str,
        role: ArtifactRole,
        path: Option<PathBuf>,
    },

    #[error("aborted by user at checkpoint '{checkpoint}'")]
    Aborted { checkpoint: &'static str },

    #[error("interactive input closed before a value was supplied")]
    InputClosed,

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl PipelineError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PipelineError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn is_abort(&self) -> bool {
        matches!(self, PipelineError::Aborted { .. })
    }
}

#[derive(Debug, Error)]
pub enum PreconditionFailure {
    #[error(
        "{} does not look like a project root (no data/ directory); run from the project directory",
        cwd.display()
    )]
    WrongWorkingDirectory { cwd: PathBuf },

    #[error("required directory {} does not exist", path.display())]
    MissingDirectory { path: PathBuf },

    #[error("toolkit environment is not active (expected CONDA_DEFAULT_ENV starting with '{expected}', found {})", found.as_deref().unwrap_or("nothing"))]
    EnvironmentNotActive {
        expected: String,
        found: Option<String>,
    },

    #[error("'{program}' was not found on PATH")]
    ToolNotFound { program: String },
}

fn describe_code(code: Option<i32>) -> String {
    match code {
        Some(code) => format!("status {code}"),
        None => "no status (terminated by signal)".to_string(),
    }
}

fn describe_location(path: Option<&Path>) -> String {
    match path {
        Some(path) => format!(" at {}", path.display()),
        None => " (no earlier stage produced it)".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_failure_names_stage_and_command() {
        let err = PipelineError::ToolFailed {
            stage: "denoise",
            command: "qiime dada2 denoise-paired".into(),
            code: Some(1),
        };
        let message = err.to_string();
        assert!(message.contains("denoise"));
        assert!(message.contains("qiime dada2 denoise-paired"));
        assert!(message.contains("status 1"));
    }

    #[test]
    fn missing_artifact_message_covers_both_cases() {
        let absent = PipelineError::MissingArtifact {
            stage: "rarefy",
            role: ArtifactRole::RootedTree,
            path: None,
        };
        assert!(absent.to_string().ends_with("(no earlier stage produced it)"));

        let deleted = PipelineError::MissingArtifact {
            stage: "rarefy",
            role: ArtifactRole::RootedTree,
            path: Some(PathBuf::from("data/interim/tree/rooted-tree.qza")),
        };
        assert!(deleted.to_string().ends_with("at data/interim/tree/rooted-tree.qza"));
    }

    #[test]
    fn only_aborts_report_as_abort() {
        assert!(PipelineError::Aborted { checkpoint: "before-trim" }.is_abort());
        assert!(!PipelineError::InputClosed.is_abort());
    }
}
