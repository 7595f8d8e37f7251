use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum PortalError {
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("invalid filename (expected stem and extension): {0}")]
    InvalidFilename(String),

    #[error("file extension not allowed: {0}")]
    UnsupportedExtension(String),

    #[error("unknown dataset format: {0}")]
    UnknownFormat(String),

    #[error("invalid row index list: {0}")]
    InvalidIndexList(String),

    #[error("row index {index} out of range for matrix with {n_obs} rows")]
    IndexOutOfRange { index: usize, n_obs: usize },

    #[error("dataset record not found: {0}")]
    RecordNotFound(u64),

    #[error("results file not found for process: {0}")]
    ResultsNotFound(String),

    #[error("conversion failed: {0}")]
    Conversion(String),

    #[error("matrix shape mismatch: {0}")]
    Shape(String),

    #[error("archive layout unexpected: {0}")]
    ArchiveLayout(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("failed to parse dataset record: {0}")]
    RecordParse(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}
