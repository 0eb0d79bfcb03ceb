pub mod config;
pub mod db;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod format;
pub mod jobs;
pub mod logging;
pub mod sanitize;
pub mod storage;
pub mod worker;

pub use config::{load_config, load_from_env, Config, ServiceMode};
pub use dispatch::{Artifact, Dispatcher, DispatcherOptions, Health, JobRequest, UploadedFile};
pub use engine::{ConversionOp, DocumentEngine, Engine};
pub use error::{
    AgamError, ConfigError, ConvertError, DispatchError, MergeError, Result, StorageError,
    ValidationError,
};
pub use format::DocumentFormat;
pub use jobs::{JobId, JobRecord, JobStatus, ListQuery};
