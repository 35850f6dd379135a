use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

use crate::validation::ValidationSummary;

#[derive(Debug, Error, Diagnostic)]
pub enum UploaderError {
    #[error("directory error: {message} ({path})")]
    #[diagnostic(help("the input directory must exist and be writable"))]
    Directory { path: PathBuf, message: String },

    #[error("invalid samples found: {}", .0.describe())]
    Validation(ValidationSummary),

    #[error("ambiguous filename '{0}': unable to detect strand")]
    AmbiguousFilename(String),

    #[error("invalid strand tag: {0}")]
    InvalidTag(String),

    #[error("invalid IRIDA project id: {0}")]
    InvalidProjectId(String),

    #[error("upload of sample {sample} failed on attempt {attempt}: {message}")]
    UploadAttempt {
        sample: String,
        attempt: u32,
        message: String,
    },

    #[error("aborting sample {sample} after {attempts} attempts")]
    UploadExhausted { sample: String, attempts: u32 },

    #[error("failed to launch upload command {program}: {message}")]
    UploadSpawn { program: String, message: String },

    #[error("{count} projects named '{name}' exist on the server (ids: {ids})")]
    #[diagnostic(help("rename or remove the duplicate projects, or pass a project id"))]
    AmbiguousProject {
        name: String,
        count: usize,
        ids: String,
    },

    #[error("failed to read IRIDA config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse IRIDA config: {0}")]
    ConfigParse(String),

    #[error("IRIDA request failed: {0}")]
    IridaHttp(String),

    #[error("IRIDA returned status {status}: {message}")]
    IridaStatus { status: u16, message: String },

    #[error("filesystem error: {0}")]
    Filesystem(String),
}

impl UploaderError {
    pub fn directory(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        UploaderError::Directory {
            path: path.into(),
            message: message.into(),
        }
    }
}
