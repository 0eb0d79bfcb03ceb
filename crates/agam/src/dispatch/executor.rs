use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::engine::DocumentEngine;
use crate::error::{DispatchError, ValidationError};
use crate::format::DocumentFormat;
use crate::jobs::{JobId, JobRecord, JobStatus, JobStore, Operation};
use crate::storage::{remove_quietly, BlobRef, BlobStore};
use crate::worker::{JobOutcome, JobRunner};

/// Blob namespace for finished artifacts.
pub const RESULTS_NAMESPACE: &str = "results";

/// Runs `operation` over `inputs` and returns the engine's output path.
pub(crate) fn run_operation(
    engine: &dyn DocumentEngine,
    operation: Operation,
    file_type: DocumentFormat,
    output_filename: Option<&str>,
    inputs: &[PathBuf],
) -> Result<PathBuf, DispatchError> {
    let output_filename = output_filename.unwrap_or_default();
    match operation {
        Operation::Convert(op) => {
            let input = inputs.first().ok_or(ValidationError::NoFiles)?;
            Ok(engine.convert(input, op)?)
        }
        Operation::Merge => Ok(engine.merge(inputs, file_type, output_filename)?),
        Operation::ImagesToPdf => Ok(engine.images_to_pdf(inputs, output_filename)?),
    }
}

/// Download name of a job's result: `report.docx` converted to PDF is
/// `report.pdf`, merges are `<output_filename>.<type>`.
pub(crate) fn processed_filename(
    operation: Operation,
    file_type: DocumentFormat,
    output_filename: Option<&str>,
    first_input: &str,
) -> String {
    match operation {
        Operation::Convert(op) => {
            let stem = Path::new(first_input)
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .filter(|s| !s.trim_start_matches('.').is_empty())
                .unwrap_or_else(|| "converted".to_string());
            format!("{}.{}", stem, op.target().extension())
        }
        Operation::Merge | Operation::ImagesToPdf => format!(
            "{}.{}",
            output_filename.unwrap_or(crate::engine::DEFAULT_MERGE_NAME),
            file_type.extension()
        ),
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    let detail = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown cause".to_string());
    format!("Internal error while processing job: {}", detail)
}

/// Worker-side execution of a stored job.
///
/// Whatever happens inside the engine, the job ends in a terminal state:
/// errors and panics both become `failed` with a readable message.
pub struct JobExecutor {
    store: Arc<dyn JobStore>,
    blobs: Arc<dyn BlobStore>,
    engine: Arc<dyn DocumentEngine>,
    retention: Duration,
}

impl JobExecutor {
    pub fn new(
        store: Arc<dyn JobStore>,
        blobs: Arc<dyn BlobStore>,
        engine: Arc<dyn DocumentEngine>,
        retention: Duration,
    ) -> Self {
        Self {
            store,
            blobs,
            engine,
            retention,
        }
    }

    fn execute(&self, job: &JobRecord) -> Result<PathBuf, DispatchError> {
        let inputs = job
            .inputs
            .iter()
            .map(|input| self.blobs.path(&input.blob))
            .collect::<Result<Vec<_>, _>>()?;

        run_operation(
            self.engine.as_ref(),
            job.operation,
            job.file_type,
            job.output_filename.as_deref(),
            &inputs,
        )
    }

    /// Moves the engine output into the blob store and writes `completed`.
    fn finish(&self, job: &JobRecord, output: &Path) -> JobOutcome {
        let first_input = job
            .inputs
            .first()
            .map(|i| i.original_filename.as_str())
            .unwrap_or_default();
        let name = processed_filename(
            job.operation,
            job.file_type,
            job.output_filename.as_deref(),
            first_input,
        );

        let blob = match self.blobs.put_file(RESULTS_NAMESPACE, &name, output) {
            Ok(blob) => blob,
            Err(e) => {
                remove_quietly(output);
                return self.record_failure(&job.id, &format!("Failed to store result: {}", e));
            }
        };

        match self.store.complete(&job.id, &blob, &name) {
            Ok(true) => {
                tracing::info!(processed_filename = %name, "Job completed");
                JobOutcome {
                    job_id: job.id.clone(),
                    status: JobStatus::Completed,
                    error: None,
                }
            }
            Ok(false) => {
                // Deleted or already terminal; the result has no owner.
                tracing::warn!("Job was no longer open when it finished, discarding result");
                self.discard(&blob);
                self.current_outcome(&job.id)
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to record job completion");
                self.discard(&blob);
                self.record_failure(&job.id, &format!("Failed to record result: {}", e))
            }
        }
    }

    fn record_failure(&self, job_id: &JobId, message: &str) -> JobOutcome {
        tracing::warn!(error = %message, "Job failed");
        match self.store.fail(job_id, message) {
            Ok(true) => {}
            Ok(false) => tracing::warn!("Job was already terminal, failure not recorded"),
            Err(e) => tracing::error!(error = %e, "Failed to record job failure"),
        }
        JobOutcome {
            job_id: job_id.clone(),
            status: JobStatus::Failed,
            error: Some(message.to_string()),
        }
    }

    fn discard(&self, blob: &BlobRef) {
        if let Err(e) = self.blobs.delete(blob) {
            tracing::warn!(error = %e, "Failed to delete orphaned result blob");
        }
    }

    fn current_outcome(&self, job_id: &JobId) -> JobOutcome {
        match self.store.get(job_id) {
            Ok(Some(job)) => JobOutcome {
                job_id: job.id,
                status: job.status,
                error: job.error_message,
            },
            _ => JobOutcome {
                job_id: job_id.clone(),
                status: JobStatus::Failed,
                error: Some(format!("Job not found: {}", job_id)),
            },
        }
    }

    fn sweep(&self) {
        self.engine.temp().reclaim_stale(self.retention);
    }
}

impl JobRunner for JobExecutor {
    fn run(&self, job_id: &JobId) -> JobOutcome {
        let outcome = self.process(job_id);
        self.sweep();
        outcome
    }
}

impl JobExecutor {
    fn process(&self, job_id: &JobId) -> JobOutcome {
        let job = match self.store.get(job_id) {
            Ok(Some(job)) => job,
            Ok(None) => {
                tracing::warn!(job_id = %job_id, "Queued job no longer exists");
                return self.current_outcome(job_id);
            }
            Err(e) => {
                tracing::error!(job_id = %job_id, error = %e, "Failed to load job");
                return self.record_failure(job_id, &format!("Failed to load job: {}", e));
            }
        };

        if job.status.is_terminal() {
            return self.current_outcome(job_id);
        }

        let span = tracing::info_span!(
            "job",
            job_id = %job.id,
            operation = job.operation.as_str(),
            inputs = job.inputs.len()
        );
        let _enter = span.enter();

        match catch_unwind(AssertUnwindSafe(|| self.execute(&job))) {
            Ok(Ok(output)) => self.finish(&job, &output),
            Ok(Err(e)) => self.record_failure(&job.id, &e.to_string()),
            Err(payload) => {
                tracing::error!("Engine panicked");
                self.record_failure(&job.id, &panic_message(payload))
            }
        }
    }
}
