//! Persistent job records.
//!
//! [`SqliteJobStore`] is the durable implementation. [`NullJobStore`] stands
//! in when the service runs in streaming mode and keeps no records at all.

use chrono::{DateTime, SecondsFormat, Utc};

use crate::db::job_repo::{self, InputRow, JobFilter, JobRow};
use crate::db::Database;
use crate::error::StoreError;
use crate::format::DocumentFormat;
use crate::jobs::model::{
    JobId, JobInput, JobKind, JobPage, JobRecord, JobStatus, ListQuery, NewJob, Operation,
};
use crate::storage::BlobRef;

pub trait JobStore: Send + Sync {
    /// Records a new job in `pending` state.
    fn create(&self, job: NewJob) -> Result<JobRecord, StoreError>;

    fn get(&self, id: &JobId) -> Result<Option<JobRecord>, StoreError>;

    fn list(&self, query: &ListQuery) -> Result<JobPage, StoreError>;

    /// `pending` → `processing`. Returns whether the transition applied.
    fn mark_processing(&self, id: &JobId) -> Result<bool, StoreError>;

    /// Non-terminal → `completed`. Returns `false` when the job was already
    /// terminal or no longer exists.
    fn complete(
        &self,
        id: &JobId,
        result: &BlobRef,
        processed_filename: &str,
    ) -> Result<bool, StoreError>;

    /// Non-terminal → `failed`. Same return contract as [`JobStore::complete`].
    fn fail(&self, id: &JobId, message: &str) -> Result<bool, StoreError>;

    /// Removes the record and returns it so the caller can release its blobs.
    fn delete(&self, id: &JobId) -> Result<Option<JobRecord>, StoreError>;

    fn ping(&self) -> Result<(), StoreError>;

    /// Fails every job that is not terminal. Used at startup, when no worker
    /// can still be running them.
    fn fail_unfinished(&self, message: &str) -> Result<usize, StoreError>;
}

fn now() -> String {
    timestamp(Utc::now())
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn corrupt(id: &str, reason: impl Into<String>) -> StoreError {
    StoreError::Corrupt {
        id: id.to_string(),
        reason: reason.into(),
    }
}

fn parse_time(id: &str, raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| corrupt(id, format!("bad timestamp '{}': {}", raw, e)))
}

fn to_record(row: JobRow, inputs: Vec<InputRow>) -> Result<JobRecord, StoreError> {
    let id = row.id.as_str();
    let kind = JobKind::parse(&row.kind).ok_or_else(|| corrupt(id, "unknown kind"))?;
    let operation =
        Operation::parse(&row.operation).ok_or_else(|| corrupt(id, "unknown operation"))?;
    let file_type = DocumentFormat::from_extension(&row.file_type)
        .ok_or_else(|| corrupt(id, "unknown file type"))?;
    let status = JobStatus::parse(&row.status).ok_or_else(|| corrupt(id, "unknown status"))?;
    let result_blob = row
        .result_blob
        .as_deref()
        .map(BlobRef::parse)
        .transpose()
        .map_err(|e| corrupt(id, e.to_string()))?;

    let inputs = inputs
        .into_iter()
        .map(|input| {
            Ok(JobInput {
                position: input.position as u32,
                original_filename: input.original_filename,
                blob: BlobRef::parse(&input.blob_ref).map_err(|e| corrupt(id, e.to_string()))?,
                size_bytes: input.size_bytes.max(0) as u64,
            })
        })
        .collect::<Result<Vec<_>, StoreError>>()?;

    Ok(JobRecord {
        kind,
        operation,
        file_type,
        status,
        result_blob,
        inputs,
        created_at: parse_time(id, &row.created_at)?,
        updated_at: parse_time(id, &row.updated_at)?,
        completed_at: row
            .completed_at
            .as_deref()
            .map(|t| parse_time(id, t))
            .transpose()?,
        output_filename: row.output_filename,
        processed_filename: row.processed_filename,
        error_message: row.error_message,
        id: JobId::from(row.id),
    })
}

/// Job store backed by the SQLite database.
#[derive(Clone)]
pub struct SqliteJobStore {
    db: Database,
}

impl SqliteJobStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    fn load(&self, row: JobRow) -> Result<JobRecord, StoreError> {
        let inputs = job_repo::inputs_for(&self.db, &row.id)?;
        to_record(row, inputs)
    }
}

impl JobStore for SqliteJobStore {
    fn create(&self, job: NewJob) -> Result<JobRecord, StoreError> {
        let id = JobId::generate();
        let created_at = now();

        let row = JobRow {
            id: id.to_string(),
            kind: job.operation.kind().as_str().to_string(),
            operation: job.operation.as_str().to_string(),
            file_type: job.file_type.extension().to_string(),
            output_filename: job.output_filename,
            processed_filename: None,
            status: JobStatus::Pending.as_str().to_string(),
            error_message: None,
            result_blob: None,
            created_at: created_at.clone(),
            updated_at: created_at,
            completed_at: None,
        };
        let inputs: Vec<InputRow> = job
            .inputs
            .iter()
            .map(|input| InputRow {
                job_id: id.to_string(),
                position: i64::from(input.position),
                original_filename: input.original_filename.clone(),
                blob_ref: input.blob.to_string(),
                size_bytes: input.size_bytes as i64,
            })
            .collect();

        job_repo::insert(&self.db, &row, &inputs)?;
        log::debug!("Created job {} ({})", id, row.operation);

        to_record(row, inputs)
    }

    fn get(&self, id: &JobId) -> Result<Option<JobRecord>, StoreError> {
        job_repo::find_by_id(&self.db, id.as_str())?
            .map(|row| self.load(row))
            .transpose()
    }

    fn list(&self, query: &ListQuery) -> Result<JobPage, StoreError> {
        let filter = JobFilter {
            status: query.status.map(|s| s.as_str().to_string()),
            kind: None,
            limit: query.limit,
            offset: query.offset,
        };
        let (rows, total) = job_repo::query(&self.db, &filter)?;
        let jobs = rows
            .into_iter()
            .map(|row| self.load(row))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(JobPage { jobs, total })
    }

    fn mark_processing(&self, id: &JobId) -> Result<bool, StoreError> {
        Ok(job_repo::mark_processing(&self.db, id.as_str(), &now())?)
    }

    fn complete(
        &self,
        id: &JobId,
        result: &BlobRef,
        processed_filename: &str,
    ) -> Result<bool, StoreError> {
        let applied = job_repo::mark_completed(
            &self.db,
            id.as_str(),
            result.as_str(),
            processed_filename,
            &now(),
        )?;
        if !applied {
            log::warn!("Job {} was not open for completion", id);
        }
        Ok(applied)
    }

    fn fail(&self, id: &JobId, message: &str) -> Result<bool, StoreError> {
        let applied = job_repo::mark_failed(&self.db, id.as_str(), message, &now())?;
        if !applied {
            log::warn!("Job {} was not open for failure", id);
        }
        Ok(applied)
    }

    fn delete(&self, id: &JobId) -> Result<Option<JobRecord>, StoreError> {
        let Some(record) = self.get(id)? else {
            return Ok(None);
        };
        if job_repo::delete(&self.db, id.as_str())? {
            Ok(Some(record))
        } else {
            Ok(None)
        }
    }

    fn ping(&self) -> Result<(), StoreError> {
        Ok(job_repo::ping(&self.db)?)
    }

    fn fail_unfinished(&self, message: &str) -> Result<usize, StoreError> {
        Ok(job_repo::fail_unfinished(&self.db, message, &now())?)
    }
}

/// Store used in streaming mode. Holds nothing and reports itself unavailable.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullJobStore;

impl JobStore for NullJobStore {
    fn create(&self, _job: NewJob) -> Result<JobRecord, StoreError> {
        Err(StoreError::Unavailable)
    }

    fn get(&self, _id: &JobId) -> Result<Option<JobRecord>, StoreError> {
        Ok(None)
    }

    fn list(&self, _query: &ListQuery) -> Result<JobPage, StoreError> {
        Ok(JobPage {
            jobs: Vec::new(),
            total: 0,
        })
    }

    fn mark_processing(&self, _id: &JobId) -> Result<bool, StoreError> {
        Err(StoreError::Unavailable)
    }

    fn complete(&self, _id: &JobId, _result: &BlobRef, _name: &str) -> Result<bool, StoreError> {
        Err(StoreError::Unavailable)
    }

    fn fail(&self, _id: &JobId, _message: &str) -> Result<bool, StoreError> {
        Err(StoreError::Unavailable)
    }

    fn delete(&self, _id: &JobId) -> Result<Option<JobRecord>, StoreError> {
        Ok(None)
    }

    fn ping(&self) -> Result<(), StoreError> {
        Err(StoreError::Unavailable)
    }

    fn fail_unfinished(&self, _message: &str) -> Result<usize, StoreError> {
        Ok(0)
    }
}
