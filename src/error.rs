use std::path::PathBuf;
use thiserror::Error;

/// Pipeline error types
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Invalid configuration in {path}: {message}")]
    Config { path: PathBuf, message: String },

    #[error("No space left on device for {path}")]
    DiskFull { path: PathBuf },

    #[error("Failed to copy {src} to {dst}")]
    CopyFailed {
        src: PathBuf,
        dst: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read {path}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write {path}")]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to create directory: {path}")]
    CreateDirFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid glob pattern '{pattern}'")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: globset::Error,
    },

    #[error("CSS error in {path}: {message}")]
    Css { path: PathBuf, message: String },

    #[error("Image optimization failed for {path}: {message}")]
    Image { path: PathBuf, message: String },

    #[error("Invalid SVG icon {path}: {message}")]
    Icon { path: PathBuf, message: String },

    #[error("Invalid theme JSON {path}: {}", problems.join("; "))]
    InvalidThemeJson { path: PathBuf, problems: Vec<String> },

    #[error("Lint failed for {path} (exit code {code}): {output}")]
    LintFailed {
        path: PathBuf,
        code: i32,
        output: String,
    },

    #[error("FTP configuration incomplete: {0}")]
    FtpConfig(String),

    #[error("FTP {operation} failed for {path}: {message}")]
    Ftp {
        operation: &'static str,
        path: String,
        message: String,
    },

    #[error("{path} already exists (use --force to overwrite)")]
    AlreadyExists { path: PathBuf },

    #[error("Invalid JSON in {path}: {message}")]
    Json { path: PathBuf, message: String },

    #[error("Failed to write archive {path}: {message}")]
    Archive { path: PathBuf, message: String },

    #[error("Cannot watch {path}: {message}")]
    Watch { path: PathBuf, message: String },

    #[error("Run cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    /// Map a filesystem write error, recognizing ENOSPC
    pub fn from_write(path: impl Into<PathBuf>, e: std::io::Error) -> Self {
        let path = path.into();
        if e.raw_os_error() == Some(28) {
            return PipelineError::DiskFull { path };
        }
        PipelineError::WriteFailed { path, source: e }
    }

    /// Map a directory creation error, recognizing ENOSPC
    pub fn from_create_dir(path: impl Into<PathBuf>, e: std::io::Error) -> Self {
        let path = path.into();
        if e.raw_os_error() == Some(28) {
            return PipelineError::DiskFull { path };
        }
        PipelineError::CreateDirFailed { path, source: e }
    }
}
