use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AgamError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Conversion error: {0}")]
    Convert(#[from] ConvertError),

    #[error("Merge error: {0}")]
    Merge(#[from] MergeError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Job store error: {0}")]
    Store(#[from] StoreError),

    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Configured {role} binary '{path}' does not exist")]
    BinaryNotFound { role: &'static str, path: PathBuf },
}

#[derive(Error, Debug)]
pub enum ConvertError {
    #[error("Unsupported file type: {0}")]
    UnsupportedFormat(String),

    #[error("Only PDF files can be converted to {0}")]
    InvalidInputType(&'static str),

    #[error("Failed to read document '{path}': {source}")]
    ReadDocument {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write output '{path}': {source}")]
    WriteOutput {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{0}")]
    ConversionFailure(String),

    #[error("{program} did not finish within {secs}s")]
    Timeout { program: String, secs: u64 },

    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[derive(Error, Debug)]
pub enum MergeError {
    #[error("At least 2 files are required for merging, got {count}")]
    InsufficientInputs { count: usize },

    #[error("Merging is not supported for '{0}' files")]
    UnsupportedType(String),

    #[error("File '{path}' is not a {expected} file")]
    TypeMismatch { path: PathBuf, expected: String },

    #[error("Input file not found: {0}")]
    MissingInput(PathBuf),

    #[error("{0}")]
    MergeFailure(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Failed to create directory '{path}': {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write file '{path}': {source}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to move file from '{from}' to '{to}': {source}")]
    MoveFile {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to remove '{path}': {source}")]
    Remove {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid blob reference: {0}")]
    InvalidBlobRef(String),

    #[error("Blob not found: {0}")]
    BlobNotFound(String),
}

/// Request rejections raised before any side effect happens.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("No file provided")]
    NoFiles,

    #[error("At least {min} files are required, got {got}")]
    TooFewFiles { min: usize, got: usize },

    #[error("Maximum {max} files allowed, got {got}")]
    TooManyFiles { max: usize, got: usize },

    #[error("File '{filename}' exceeds the maximum size of {max} bytes")]
    FileTooLarge { filename: String, max: u64 },

    #[error("Total upload size {total} exceeds the maximum of {max} bytes")]
    TotalTooLarge { total: u64, max: u64 },

    #[error("File '{filename}' is empty")]
    EmptyFile { filename: String },

    #[error("Unsupported file type: {filename}")]
    UnsupportedType { filename: String },

    #[error("All files must be of the same type")]
    MixedTypes,

    #[error("Invalid operation: {0}")]
    UnknownOperation(String),
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error(transparent)]
    Database(#[from] crate::db::DatabaseError),

    #[error("Job store is not available in this mode")]
    Unavailable,

    #[error("Corrupt job record '{id}': {reason}")]
    Corrupt { id: String, reason: String },
}

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Worker channel closed unexpectedly")]
    ChannelClosed,

    #[error("Worker queue is full")]
    QueueFull,
}

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Convert(#[from] ConvertError),

    #[error(transparent)]
    Merge(#[from] MergeError),

    #[error("Server is busy, try again later")]
    Busy,

    #[error("Job not found: {0}")]
    NotFound(String),

    #[error("Job {id} is not completed yet (status: {status})")]
    NotReady { id: String, status: String },

    #[error("Job tracking is disabled in streaming mode")]
    StreamingMode,
}

pub type Result<T> = std::result::Result<T, AgamError>;
