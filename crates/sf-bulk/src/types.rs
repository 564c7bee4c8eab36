//! Types for the Bulk API 1.0 (asynchronous jobs, JSON content).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{Error, ErrorKind, Result};

/// A record: field name to value, in insertion order.
pub type Record = serde_json::Map<String, serde_json::Value>;

/// Deserialize API version that can be either a float (62.0) or string ("62.0").
pub(crate) fn deserialize_api_version<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum ApiVersion {
        Float(f64),
        String(String),
    }

    Option::<ApiVersion>::deserialize(deserializer).map(|opt| {
        opt.map(|v| match v {
            ApiVersion::Float(f) => format!("{:.1}", f),
            ApiVersion::String(s) => s,
        })
    })
}

/// Job states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobState {
    /// Job is being set up
    Queued,
    /// Job is open and accepting batches
    Open,
    /// No more batches accepted; existing batches are processed
    Closed,
    /// Job was aborted
    Aborted,
    /// Job failed
    Failed,
}

impl JobState {
    /// Check if job is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Closed | JobState::Aborted | JobState::Failed)
    }

    /// Get the API string for this state.
    pub fn api_name(&self) -> &'static str {
        match self {
            JobState::Queued => "Queued",
            JobState::Open => "Open",
            JobState::Closed => "Closed",
            JobState::Aborted => "Aborted",
            JobState::Failed => "Failed",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.api_name())
    }
}

/// Batch states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BatchState {
    Queued,
    InProgress,
    Completed,
    Failed,
    #[serde(rename = "Not Processed")]
    NotProcessed,
}

impl BatchState {
    /// Check if batch is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, BatchState::Queued | BatchState::InProgress)
    }

    /// Get the API string for this state.
    pub fn api_name(&self) -> &'static str {
        match self {
            BatchState::Queued => "Queued",
            BatchState::InProgress => "InProgress",
            BatchState::Completed => "Completed",
            BatchState::Failed => "Failed",
            BatchState::NotProcessed => "Not Processed",
        }
    }
}

impl fmt::Display for BatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.api_name())
    }
}

/// Job operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Operation {
    /// Insert new records
    Insert,
    /// Update existing records
    Update,
    /// Upsert based on external ID
    Upsert,
    /// Delete records (soft delete)
    Delete,
    /// Hard delete records (permanent)
    HardDelete,
    /// Query records
    Query,
}

impl Operation {
    /// Get the API string for this operation.
    pub fn api_name(&self) -> &'static str {
        match self {
            Operation::Insert => "insert",
            Operation::Update => "update",
            Operation::Upsert => "upsert",
            Operation::Delete => "delete",
            Operation::HardDelete => "hardDelete",
            Operation::Query => "query",
        }
    }

    /// Check if this is a query operation.
    pub fn is_query(&self) -> bool {
        matches!(self, Operation::Query)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.api_name())
    }
}

impl FromStr for Operation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "insert" => Ok(Operation::Insert),
            "update" => Ok(Operation::Update),
            "upsert" => Ok(Operation::Upsert),
            "delete" => Ok(Operation::Delete),
            "hardDelete" => Ok(Operation::HardDelete),
            "query" => Ok(Operation::Query),
            other => Err(Error::new(ErrorKind::Config(format!(
                "unknown operation '{other}' (expected insert, update, upsert, delete, hardDelete or query)"
            )))),
        }
    }
}

/// Concurrency mode for a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ConcurrencyMode {
    #[default]
    Parallel,
    Serial,
}

impl FromStr for ConcurrencyMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "Parallel" => Ok(ConcurrencyMode::Parallel),
            "Serial" => Ok(ConcurrencyMode::Serial),
            other => Err(Error::new(ErrorKind::Config(format!(
                "unknown concurrency mode '{other}' (expected Parallel or Serial)"
            )))),
        }
    }
}

/// Content type for batches. Only JSON is spoken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ContentType {
    #[default]
    #[serde(rename = "JSON")]
    Json,
}

// =============================================================================
// Options
// =============================================================================

/// Immutable description of the job a client owns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobOptions {
    /// SObject API name
    pub object: String,
    /// Operation type
    pub operation: Operation,
    /// External ID field, required for upsert
    pub external_id_field_name: Option<String>,
    /// Concurrency mode
    pub concurrency_mode: ConcurrencyMode,
}

impl JobOptions {
    /// Create options for an object and operation.
    pub fn new(object: impl Into<String>, operation: Operation) -> Self {
        Self {
            object: object.into(),
            operation,
            external_id_field_name: None,
            concurrency_mode: ConcurrencyMode::default(),
        }
    }

    /// Set the external ID field for upsert operations.
    pub fn with_external_id_field(mut self, field: impl Into<String>) -> Self {
        self.external_id_field_name = Some(field.into());
        self
    }

    /// Set the concurrency mode.
    pub fn with_concurrency_mode(mut self, mode: ConcurrencyMode) -> Self {
        self.concurrency_mode = mode;
        self
    }

    /// Check that the options describe a job the API will accept.
    pub fn validate(&self) -> Result<()> {
        if self.object.trim().is_empty() {
            return Err(Error::new(ErrorKind::Config("object is required".to_string())));
        }
        if self.operation == Operation::Upsert
            && self
                .external_id_field_name
                .as_deref()
                .is_none_or(|f| f.trim().is_empty())
        {
            return Err(Error::new(ErrorKind::Config(
                "externalIdFieldName is required for upsert".to_string(),
            )));
        }
        Ok(())
    }
}

/// Default number of records per batch.
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Batching configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchOptions {
    /// Records per batch (at least 1)
    pub batch_size: usize,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

impl BatchOptions {
    /// Options with a specific batch size.
    pub fn with_batch_size(batch_size: usize) -> Self {
        Self { batch_size }
    }

    /// Check the batch size.
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(Error::new(ErrorKind::Config(
                "batchSize must be at least 1".to_string(),
            )));
        }
        Ok(())
    }
}

// =============================================================================
// Request Types
// =============================================================================

/// Request to create a job.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateJobRequest {
    pub operation: Operation,
    pub object: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_id_field_name: Option<String>,
    pub content_type: ContentType,
    pub concurrency_mode: ConcurrencyMode,
}

impl From<&JobOptions> for CreateJobRequest {
    fn from(options: &JobOptions) -> Self {
        Self {
            operation: options.operation,
            object: options.object.clone(),
            external_id_field_name: options.external_id_field_name.clone(),
            content_type: ContentType::Json,
            concurrency_mode: options.concurrency_mode,
        }
    }
}

/// Request to move a job to `Closed` or `Aborted`.
#[derive(Debug, Clone, Serialize)]
pub struct JobStateChange {
    pub state: JobState,
}

// =============================================================================
// Response Types
// =============================================================================

/// Job information.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobInfo {
    /// Job ID
    pub id: String,
    /// Current state
    pub state: JobState,
    /// Operation type
    pub operation: Operation,
    /// SObject API name
    pub object: String,
    #[serde(default)]
    pub external_id_field_name: Option<String>,
    #[serde(default)]
    pub concurrency_mode: Option<ConcurrencyMode>,
    #[serde(default)]
    pub content_type: Option<String>,
    /// API version (can be float like 62.0 or string like "62.0")
    #[serde(default, deserialize_with = "deserialize_api_version")]
    pub api_version: Option<String>,
    #[serde(default)]
    pub created_by_id: Option<String>,
    #[serde(default)]
    pub created_date: Option<String>,
    #[serde(default)]
    pub system_modstamp: Option<String>,
    #[serde(default)]
    pub number_batches_queued: i64,
    #[serde(default)]
    pub number_batches_in_progress: i64,
    #[serde(default)]
    pub number_batches_completed: i64,
    #[serde(default)]
    pub number_batches_failed: i64,
    #[serde(default)]
    pub number_batches_total: i64,
    #[serde(default)]
    pub number_records_processed: i64,
    #[serde(default)]
    pub number_records_failed: i64,
    #[serde(default)]
    pub number_retries: i64,
    /// Total processing time in milliseconds
    #[serde(default)]
    pub total_processing_time: Option<i64>,
}

/// Batch information.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchInfo {
    /// Batch ID
    pub id: String,
    /// Owning job ID
    pub job_id: String,
    /// Current state
    pub state: BatchState,
    /// Why the batch failed or was not processed
    #[serde(default)]
    pub state_message: Option<String>,
    #[serde(default)]
    pub created_date: Option<String>,
    #[serde(default)]
    pub system_modstamp: Option<String>,
    #[serde(default)]
    pub number_records_processed: i64,
    #[serde(default)]
    pub number_records_failed: i64,
    #[serde(default)]
    pub total_processing_time: Option<i64>,
}

/// Response of `GET job/{id}/batch`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchInfoList {
    #[serde(default)]
    pub batch_info: Vec<BatchInfo>,
}

/// A per-record error in a batch result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordError {
    #[serde(default)]
    pub status_code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub fields: Vec<String>,
}

/// Outcome of one record of an ingest batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordResult {
    #[serde(default)]
    pub id: Option<String>,
    pub success: bool,
    #[serde(default)]
    pub created: bool,
    #[serde(default)]
    pub errors: Vec<RecordError>,
}

/// Result of `GET …/batch/{id}/result`.
///
/// Query batches answer with result-set ids, ingest batches with one entry
/// per submitted record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BatchResult {
    ResultIds(Vec<String>),
    RecordResults(Vec<RecordResult>),
}

impl BatchResult {
    /// Number of failed records (always 0 for result ids).
    pub fn failed_records(&self) -> usize {
        match self {
            BatchResult::ResultIds(_) => 0,
            BatchResult::RecordResults(results) => results.iter().filter(|r| !r.success).count(),
        }
    }
}
