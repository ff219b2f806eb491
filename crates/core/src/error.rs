use std::path::PathBuf;

/// Domain errors raised by the job workspace layer.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Failed to create workspace {}: {source}", path.display())]
    WorkspaceCreation {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to destroy workspace {}: {source}", path.display())]
    WorkspaceDestruction {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("No *.{extension} output found in {}", path.display())]
    OutputNotFound { path: PathBuf, extension: String },

    #[error("Expected one *.{extension} output in {}, found {count}", path.display())]
    AmbiguousOutput {
        path: PathBuf,
        extension: String,
        count: usize,
    },

    #[error("Internal error: {0}")]
    Internal(String),
}
