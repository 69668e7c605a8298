use std::path::PathBuf;

use thiserror::Error;

/// The seven error kinds of the processing pipeline. Each one maps to a
/// fixed exit code and log level at the CLI boundary; see `main::exit_code_for`.
#[derive(Debug, Error)]
pub enum OrcError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("bad input: {0}")]
    BadInput(String),

    #[error("output already exists: {0}")]
    OutputExists(PathBuf),

    #[error("extraction error: {0}")]
    Extraction(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("plugin instance failed: {0}")]
    InstanceFailure(String),

    #[error("merge error: {0}")]
    Merge(String),
}

impl OrcError {
    /// Exit code this error kind maps to when it is the worst outcome observed
    /// across all hosts processed in one invocation.
    pub fn exit_code(&self) -> i32 {
        match self {
            OrcError::Config(_) => 3,
            OrcError::BadInput(_) | OrcError::OutputExists(_) => 2,
            OrcError::Extraction(_)
            | OrcError::Parse(_)
            | OrcError::InstanceFailure(_)
            | OrcError::Merge(_) => 1,
        }
    }
}

pub type OrcResult<T> = Result<T, OrcError>;
