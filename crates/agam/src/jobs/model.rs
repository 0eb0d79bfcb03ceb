use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::engine::ConversionOp;
use crate::format::DocumentFormat;
use crate::storage::BlobRef;

/// Unique job identifier (UUID v4).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for JobId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for JobId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    Conversion,
    Merge,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Conversion => "conversion",
            Self::Merge => "merge",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "conversion" => Some(Self::Conversion),
            "merge" => Some(Self::Merge),
            _ => None,
        }
    }
}

/// What a job does with its inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Convert(ConversionOp),
    Merge,
    ImagesToPdf,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Convert(op) => op.as_str(),
            Self::Merge => "merge",
            Self::ImagesToPdf => "images_to_pdf",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "merge" => Some(Self::Merge),
            "images_to_pdf" => Some(Self::ImagesToPdf),
            other => ConversionOp::parse(other).map(Self::Convert),
        }
    }

    pub fn kind(&self) -> JobKind {
        match self {
            Self::Convert(_) => JobKind::Conversion,
            Self::Merge | Self::ImagesToPdf => JobKind::Merge,
        }
    }
}

impl Serialize for Operation {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "processing" => Some(Self::Processing),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Status only moves forward: pending → processing → completed | failed.
    /// A pending job may also fail directly (e.g. it could not be enqueued).
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Processing)
                | (Self::Pending, Self::Completed)
                | (Self::Pending, Self::Failed)
                | (Self::Processing, Self::Completed)
                | (Self::Processing, Self::Failed)
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One stored upload of a job.
#[derive(Debug, Clone, Serialize)]
pub struct JobInput {
    pub position: u32,
    pub original_filename: String,
    #[serde(skip)]
    pub blob: BlobRef,
    pub size_bytes: u64,
}

/// Everything needed to create a job record.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub operation: Operation,
    pub file_type: DocumentFormat,
    pub output_filename: Option<String>,
    pub inputs: Vec<JobInput>,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobRecord {
    pub id: JobId,
    pub kind: JobKind,
    pub operation: Operation,
    pub file_type: DocumentFormat,
    pub output_filename: Option<String>,
    pub processed_filename: Option<String>,
    pub status: JobStatus,
    pub error_message: Option<String>,
    #[serde(skip)]
    pub result_blob: Option<BlobRef>,
    pub inputs: Vec<JobInput>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl JobRecord {
    /// Every blob this job owns: inputs plus the result, if any.
    pub fn owned_blobs(&self) -> Vec<BlobRef> {
        self.inputs
            .iter()
            .map(|i| i.blob.clone())
            .chain(self.result_blob.clone())
            .collect()
    }
}

/// Listing parameters.
#[derive(Debug, Clone, Default)]
pub struct ListQuery {
    pub status: Option<JobStatus>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobPage {
    pub jobs: Vec<JobRecord>,
    pub total: u64,
}
