//! Turns validated requests into jobs, or into streamed artifacts when the
//! service runs without a job store.

pub mod executor;
pub mod validate;

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;

use crate::config::{Config, LimitsConfig, ServiceMode};
use crate::db::Database;
use crate::engine::{DocumentEngine, Engine};
use crate::error::{AgamError, DispatchError, StorageError, WorkerError};
use crate::format::DocumentFormat;
use crate::jobs::{
    JobId, JobInput, JobPage, JobRecord, JobStatus, JobStore, ListQuery, NewJob, NullJobStore,
    SqliteJobStore,
};
use crate::sanitize::redact_path;
use crate::storage::{remove_quietly, BlobRef, BlobStore, FsBlobStore, TempStorage};
use crate::worker::WorkerPool;

pub use executor::{JobExecutor, RESULTS_NAMESPACE};
pub use validate::{validate, JobRequest, UploadedFile, ValidatedRequest};

/// Blob namespace for uploaded inputs.
pub const INPUTS_NAMESPACE: &str = "inputs";

/// Error recorded on jobs a previous process left unfinished.
pub const INTERRUPTED_MESSAGE: &str = "Interrupted by service restart";

/// A finished file ready to be sent to a client.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub path: PathBuf,
    pub filename: String,
    pub content_type: String,
}

impl Artifact {
    fn new(path: PathBuf, filename: String) -> Self {
        let content_type = DocumentFormat::from_path(&path)
            .map(|f| f.content_type())
            .unwrap_or_else(|| "application/octet-stream".to_string());
        Self {
            path,
            filename,
            content_type,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Health {
    pub status: &'static str,
    pub mode: ServiceMode,
    pub store_reachable: bool,
    pub workers: usize,
}

impl Health {
    pub fn is_ok(&self) -> bool {
        self.status == "ok"
    }
}

/// Tunables for [`Dispatcher::new`].
#[derive(Debug, Clone)]
pub struct DispatcherOptions {
    pub mode: ServiceMode,
    pub limits: LimitsConfig,
    pub worker_count: usize,
    pub queue_capacity: usize,
    pub retention: Duration,
}

impl DispatcherOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            mode: config.mode,
            limits: config.limits.clone(),
            worker_count: config.worker_count,
            queue_capacity: config.queue_capacity,
            retention: Duration::from_secs(config.storage.retention_secs),
        }
    }
}

pub struct Dispatcher {
    mode: ServiceMode,
    /// Durable mode was requested but the store could not be opened.
    degraded: bool,
    limits: LimitsConfig,
    store: Arc<dyn JobStore>,
    blobs: Arc<dyn BlobStore>,
    engine: Arc<dyn DocumentEngine>,
    pool: Mutex<Option<WorkerPool>>,
    worker_count: usize,
}

impl Dispatcher {
    /// Wires the parts together. In durable mode the worker pool starts here.
    pub fn new(
        options: DispatcherOptions,
        store: Arc<dyn JobStore>,
        blobs: Arc<dyn BlobStore>,
        engine: Arc<dyn DocumentEngine>,
    ) -> Self {
        let pool = match options.mode {
            ServiceMode::Durable => {
                let executor = JobExecutor::new(
                    Arc::clone(&store),
                    Arc::clone(&blobs),
                    Arc::clone(&engine),
                    options.retention,
                );
                Some(WorkerPool::new(
                    Arc::new(executor),
                    options.worker_count,
                    options.queue_capacity,
                ))
            }
            ServiceMode::Streaming => None,
        };
        let worker_count = pool.as_ref().map(WorkerPool::worker_count).unwrap_or(0);

        Self {
            mode: options.mode,
            degraded: false,
            limits: options.limits,
            store,
            blobs,
            engine,
            pool: Mutex::new(pool),
            worker_count,
        }
    }

    /// Builds the production dispatcher from configuration.
    ///
    /// When durable mode is configured but the database cannot be opened, the
    /// service starts in streaming mode and reports itself degraded.
    pub fn from_config(config: &Config) -> Result<Self, AgamError> {
        let mut options = DispatcherOptions::from_config(config);

        let temp = TempStorage::new(config.temp_path())?;
        let startup_sweep = temp.reclaim_stale(options.retention);
        tracing::debug!(removed = startup_sweep.removed, "Startup temp sweep finished");

        let engine = Engine::from_config(config, temp)?;
        match engine.office() {
            Some(office) => {
                tracing::info!(binary = %office.binary().display(), "Office converter found")
            }
            None => {
                tracing::warn!("No office converter found, DOCX falls back to text rendering")
            }
        }
        if engine.rasterizer().is_none() {
            tracing::warn!("No PDF rasterizer found, pdf_to_pptx is unavailable");
        }

        let blobs = FsBlobStore::new(config.blob_path())?;

        let mut degraded = false;
        let store: Arc<dyn JobStore> = match options.mode {
            ServiceMode::Durable => match Database::open(&config.database_path()) {
                Ok(db) => {
                    let store = SqliteJobStore::new(db);
                    recover_unfinished(&store);
                    Arc::new(store)
                }
                Err(e) => {
                    tracing::error!(
                        error = %e,
                        "Failed to open job database, falling back to streaming mode"
                    );
                    options.mode = ServiceMode::Streaming;
                    degraded = true;
                    Arc::new(NullJobStore)
                }
            },
            ServiceMode::Streaming => Arc::new(NullJobStore),
        };

        let mut dispatcher = Self::new(options, store, Arc::new(blobs), Arc::new(engine));
        dispatcher.degraded = degraded;

        tracing::info!(
            mode = %dispatcher.mode,
            workers = dispatcher.worker_count,
            "Dispatcher ready"
        );
        Ok(dispatcher)
    }

    pub fn mode(&self) -> ServiceMode {
        self.mode
    }

    pub fn limits(&self) -> &LimitsConfig {
        &self.limits
    }

    fn pool(&self) -> MutexGuard<'_, Option<WorkerPool>> {
        self.pool.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn require_durable(&self) -> Result<(), DispatchError> {
        match self.mode {
            ServiceMode::Durable => Ok(()),
            ServiceMode::Streaming => Err(DispatchError::StreamingMode),
        }
    }

    /// Validates the request, stores its inputs, records the job and queues
    /// it. Returns as soon as the job is queued.
    ///
    /// A full queue is reported as [`DispatchError::Busy`] and leaves no job
    /// and no blobs behind.
    pub fn submit(&self, request: JobRequest) -> Result<JobRecord, DispatchError> {
        self.require_durable()?;
        let validated = validate(request, &self.limits)?;

        let _span = tracing::info_span!(
            "dispatch.submit",
            operation = validated.operation.as_str(),
            files = validated.files.len()
        )
        .entered();

        let inputs = self.store_inputs(&validated)?;
        let blobs: Vec<BlobRef> = inputs.iter().map(|i| i.blob.clone()).collect();

        let mut record = match self.store.create(NewJob {
            operation: validated.operation,
            file_type: validated.file_type,
            output_filename: validated.output_filename,
            inputs,
        }) {
            Ok(record) => record,
            Err(e) => {
                self.release(&blobs);
                return Err(e.into());
            }
        };

        if let Err(e) = self.store.mark_processing(&record.id) {
            self.discard_job(&record.id, &blobs);
            return Err(e.into());
        }
        record.status = JobStatus::Processing;

        let queued = match self.pool().as_ref() {
            Some(pool) => pool.try_submit(record.id.clone()),
            None => Err(WorkerError::ChannelClosed),
        };

        match queued {
            Ok(()) => {
                tracing::info!(job_id = %record.id, "Job queued");
                Ok(record)
            }
            Err(e) => {
                tracing::warn!(job_id = %record.id, error = %e, "Rejecting job");
                self.discard_job(&record.id, &blobs);
                Err(DispatchError::Busy)
            }
        }
    }

    fn store_inputs(&self, validated: &ValidatedRequest) -> Result<Vec<JobInput>, DispatchError> {
        let mut inputs = Vec::with_capacity(validated.files.len());
        for (position, file) in validated.files.iter().enumerate() {
            match self
                .blobs
                .put_bytes(INPUTS_NAMESPACE, &file.filename, &file.bytes)
            {
                Ok(blob) => inputs.push(JobInput {
                    position: position as u32,
                    original_filename: file.filename.clone(),
                    blob,
                    size_bytes: file.size(),
                }),
                Err(e) => {
                    let stored: Vec<BlobRef> = inputs.iter().map(|i| i.blob.clone()).collect();
                    self.release(&stored);
                    return Err(e.into());
                }
            }
        }
        Ok(inputs)
    }

    fn release(&self, blobs: &[BlobRef]) {
        for blob in blobs {
            if let Err(e) = self.blobs.delete(blob) {
                tracing::warn!(blob = %blob, error = %e, "Failed to delete blob");
            }
        }
    }

    fn discard_job(&self, id: &JobId, blobs: &[BlobRef]) {
        if let Err(e) = self.store.delete(id) {
            tracing::warn!(job_id = %id, error = %e, "Failed to delete rejected job");
        }
        self.release(blobs);
    }

    /// Runs the request on the calling thread and returns the artifact.
    ///
    /// The artifact lives in temp storage; the caller removes it once sent.
    pub fn run_streaming(&self, request: JobRequest) -> Result<Artifact, DispatchError> {
        let validated = validate(request, &self.limits)?;

        let _span = tracing::info_span!(
            "dispatch.stream",
            operation = validated.operation.as_str(),
            files = validated.files.len()
        )
        .entered();

        let temp = self.engine.temp();
        let mut inputs = Vec::with_capacity(validated.files.len());
        for file in &validated.files {
            let path = temp.allocate_named("upload", &file.filename);
            if let Err(e) = std::fs::write(&path, &file.bytes) {
                inputs.iter().for_each(|p: &PathBuf| remove_quietly(p));
                remove_quietly(&path);
                return Err(StorageError::WriteFile { path, source: e }.into());
            }
            inputs.push(path);
        }

        let result = executor::run_operation(
            self.engine.as_ref(),
            validated.operation,
            validated.file_type,
            validated.output_filename.as_deref(),
            &inputs,
        );
        for input in &inputs {
            remove_quietly(input);
        }
        let output = result?;

        let first_input = validated
            .files
            .first()
            .map(|f| f.filename.as_str())
            .unwrap_or_default();
        let filename = executor::processed_filename(
            validated.operation,
            validated.file_type,
            validated.output_filename.as_deref(),
            first_input,
        );
        tracing::info!(output = %redact_path(&output), "Streaming result ready");

        Ok(Artifact::new(output, filename))
    }

    pub fn get(&self, id: &JobId) -> Result<JobRecord, DispatchError> {
        self.require_durable()?;
        self.store
            .get(id)?
            .ok_or_else(|| DispatchError::NotFound(id.to_string()))
    }

    pub fn list(&self, query: &ListQuery) -> Result<JobPage, DispatchError> {
        self.require_durable()?;
        Ok(self.store.list(query)?)
    }

    /// The stored result of a completed job. The file belongs to the blob
    /// store and must not be removed by the caller.
    pub fn download(&self, id: &JobId) -> Result<Artifact, DispatchError> {
        let job = self.get(id)?;
        let not_ready = || DispatchError::NotReady {
            id: id.to_string(),
            status: job.status.to_string(),
        };
        if job.status != JobStatus::Completed {
            return Err(not_ready());
        }
        let blob = job.result_blob.as_ref().ok_or_else(not_ready)?;
        let path = self.blobs.path(blob)?;
        let filename = job
            .processed_filename
            .clone()
            .unwrap_or_else(|| redact_path(&path));

        Ok(Artifact::new(path, filename))
    }

    /// Deletes the job together with every blob it owns.
    pub fn delete(&self, id: &JobId) -> Result<(), DispatchError> {
        self.require_durable()?;
        let record = self
            .store
            .delete(id)?
            .ok_or_else(|| DispatchError::NotFound(id.to_string()))?;
        self.release(&record.owned_blobs());
        tracing::info!(job_id = %id, "Job deleted");
        Ok(())
    }

    pub fn health(&self) -> Health {
        let store_reachable = match self.store.ping() {
            Ok(()) => true,
            Err(e) => {
                if self.mode == ServiceMode::Durable || self.degraded {
                    tracing::warn!(error = %e, "Job store unreachable");
                }
                false
            }
        };
        let healthy = !self.degraded && (store_reachable || self.mode == ServiceMode::Streaming);

        Health {
            status: if healthy { "ok" } else { "degraded" },
            mode: self.mode,
            store_reachable,
            workers: self.worker_count,
        }
    }

    /// Stops accepting jobs, lets queued ones finish and joins the workers.
    pub fn shutdown(&self) {
        let pool = self.pool().take();
        if let Some(pool) = pool {
            pool.shutdown();
            pool.wait();
        }
    }
}

/// The queue lives in memory, so jobs left open by a previous process will
/// never be picked up again.
fn recover_unfinished(store: &dyn JobStore) {
    match store.fail_unfinished(INTERRUPTED_MESSAGE) {
        Ok(0) => {}
        Ok(count) => tracing::warn!(count, "Failed jobs left unfinished by a previous run"),
        Err(e) => tracing::error!(error = %e, "Failed to recover unfinished jobs"),
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ConversionOp;
    use crate::error::ValidationError;
    use crate::jobs::Operation;
    use tempfile::TempDir;

    fn dispatcher(dir: &TempDir, mode: ServiceMode) -> Dispatcher {
        let options = DispatcherOptions {
            mode,
            limits: LimitsConfig::default(),
            worker_count: 1,
            queue_capacity: 4,
            retention: Duration::from_secs(3600),
        };
        let store: Arc<dyn JobStore> = match mode {
            ServiceMode::Durable => {
                Arc::new(SqliteJobStore::new(Database::open_in_memory().unwrap()))
            }
            ServiceMode::Streaming => Arc::new(NullJobStore),
        };
        let temp = TempStorage::new(dir.path().join("temp")).unwrap();
        Dispatcher::new(
            options,
            store,
            Arc::new(FsBlobStore::new(dir.path().join("blobs")).unwrap()),
            Arc::new(Engine::new(temp, None, None)),
        )
    }

    fn txt_request() -> JobRequest {
        JobRequest::Convert {
            files: vec![UploadedFile::new("notes.txt", b"hello".to_vec())],
            operation: ConversionOp::ConvertToPdf.as_str().to_string(),
        }
    }

    #[test]
    fn test_validation_failure_has_no_side_effects() {
        let dir = TempDir::new().unwrap();
        let dispatcher = dispatcher(&dir, ServiceMode::Durable);

        let err = dispatcher
            .submit(JobRequest::Merge {
                files: vec![UploadedFile::new("a.pdf", b"x".to_vec())],
                output_filename: None,
            })
            .unwrap_err();

        assert!(matches!(
            err,
            DispatchError::Validation(ValidationError::TooFewFiles { .. })
        ));
        assert_eq!(dispatcher.list(&ListQuery::default()).unwrap().total, 0);
        assert!(!dir.path().join("blobs").join(INPUTS_NAMESPACE).exists());
    }

    #[test]
    fn test_submit_returns_processing_job() {
        let dir = TempDir::new().unwrap();
        let dispatcher = dispatcher(&dir, ServiceMode::Durable);

        let record = dispatcher.submit(txt_request()).unwrap();
        assert_eq!(record.status, JobStatus::Processing);
        assert_eq!(record.inputs.len(), 1);

        dispatcher.shutdown();
        let job = dispatcher.get(&record.id).unwrap();
        assert_eq!(job.status, JobStatus::Completed);
    }

    #[test]
    fn test_submit_after_shutdown_is_busy_and_leaves_nothing() {
        let dir = TempDir::new().unwrap();
        let dispatcher = dispatcher(&dir, ServiceMode::Durable);
        dispatcher.shutdown();

        let err = dispatcher.submit(txt_request()).unwrap_err();
        assert!(matches!(err, DispatchError::Busy));
        assert_eq!(dispatcher.list(&ListQuery::default()).unwrap().total, 0);
        let leftover = std::fs::read_dir(dir.path().join("blobs").join(INPUTS_NAMESPACE))
            .map(|entries| entries.count())
            .unwrap_or(0);
        assert_eq!(leftover, 0);
    }

    #[test]
    fn test_streaming_mode_rejects_job_endpoints() {
        let dir = TempDir::new().unwrap();
        let dispatcher = dispatcher(&dir, ServiceMode::Streaming);

        assert!(matches!(
            dispatcher.submit(txt_request()),
            Err(DispatchError::StreamingMode)
        ));
        assert!(matches!(
            dispatcher.get(&JobId::from("x")),
            Err(DispatchError::StreamingMode)
        ));
    }

    #[test]
    fn test_run_streaming_returns_artifact_and_cleans_inputs() {
        let dir = TempDir::new().unwrap();
        let dispatcher = dispatcher(&dir, ServiceMode::Streaming);

        let artifact = dispatcher.run_streaming(txt_request()).unwrap();
        assert_eq!(artifact.filename, "notes.pdf");
        assert_eq!(artifact.content_type, "application/pdf");
        assert!(artifact.path.is_file());

        // Only the artifact itself is left in temp storage.
        let entries: Vec<_> = std::fs::read_dir(dir.path().join("temp"))
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect();
        assert_eq!(entries, vec![artifact.path.clone()]);
    }

    #[test]
    fn test_run_streaming_surfaces_engine_errors() {
        let dir = TempDir::new().unwrap();
        let dispatcher = dispatcher(&dir, ServiceMode::Streaming);

        let err = dispatcher
            .run_streaming(JobRequest::Convert {
                files: vec![UploadedFile::new("notes.txt", b"hello".to_vec())],
                operation: "pdf_to_txt".to_string(),
            })
            .unwrap_err();
        assert!(matches!(err, DispatchError::Convert(_)));
        assert_eq!(std::fs::read_dir(dir.path().join("temp")).unwrap().count(), 0);
    }

    #[test]
    fn test_health_by_mode() {
        let dir = TempDir::new().unwrap();
        let durable = dispatcher(&dir, ServiceMode::Durable);
        let health = durable.health();
        assert!(health.is_ok());
        assert!(health.store_reachable);
        assert_eq!(health.workers, 1);

        let streaming = dispatcher(&dir, ServiceMode::Streaming);
        let health = streaming.health();
        assert!(health.is_ok());
        assert!(!health.store_reachable);
        assert_eq!(health.workers, 0);
    }

    #[test]
    fn test_from_config_fails_jobs_left_unfinished() {
        let dir = TempDir::new().unwrap();
        let config = Config {
            data_directory: dir.path().to_string_lossy().to_string(),
            worker_count: 1,
            ..Config::default()
        };

        let new_job = |name: &str| NewJob {
            operation: Operation::Convert(ConversionOp::ConvertToPdf),
            file_type: DocumentFormat::Txt,
            output_filename: None,
            inputs: vec![JobInput {
                position: 0,
                original_filename: name.to_string(),
                blob: BlobRef::parse(&format!("{}/0-{}", INPUTS_NAMESPACE, name)).unwrap(),
                size_bytes: 5,
            }],
        };
        let (stuck, queued, done) = {
            let store = SqliteJobStore::new(Database::open(&config.database_path()).unwrap());
            let stuck = store.create(new_job("stuck.txt")).unwrap();
            assert!(store.mark_processing(&stuck.id).unwrap());
            let queued = store.create(new_job("queued.txt")).unwrap();
            let done = store.create(new_job("done.txt")).unwrap();
            assert!(store.fail(&done.id, "earlier failure").unwrap());
            (stuck.id, queued.id, done.id)
        };

        let dispatcher = Dispatcher::from_config(&config).unwrap();
        assert_eq!(dispatcher.mode(), ServiceMode::Durable);

        for id in [&stuck, &queued] {
            let job = dispatcher.get(id).unwrap();
            assert_eq!(job.status, JobStatus::Failed);
            assert_eq!(job.error_message.as_deref(), Some(INTERRUPTED_MESSAGE));
            assert!(job.completed_at.is_some());
        }
        let done = dispatcher.get(&done).unwrap();
        assert_eq!(done.error_message.as_deref(), Some("earlier failure"));
    }
}
