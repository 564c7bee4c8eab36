//! Client-owned job state and the snapshots handed to observers.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::types::{BatchInfo, BatchState, JobInfo, JobState};

/// How per-record failures count towards [`JobSnapshot::is_error_with`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailedRecordPolicy {
    /// Any batch with a failed record makes the job an error.
    #[default]
    Fatal,
    /// Only failed/unprocessed batches and failed/aborted jobs count.
    Tolerated,
}

/// Outcome of a close or abort request.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// No job was ever created; nothing to do.
    NoJob,
    /// The job was already past `Open`.
    AlreadyFinal(JobState),
    /// The job moved to the requested state.
    Changed(JobInfo),
}

/// Mutable state owned by the client.
#[derive(Debug, Default)]
pub(crate) struct ClientState {
    pub(crate) job: Option<JobInfo>,
    pub(crate) batches: Vec<BatchInfo>,
    pub(crate) query_result_ids: Vec<String>,
}

impl ClientState {
    pub(crate) fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            job: self.job.clone(),
            batches: self.batches.clone(),
            query_result_ids: self.query_result_ids.clone(),
        }
    }
}

/// Immutable copy of the job state at one point in time.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSnapshot {
    pub job: Option<JobInfo>,
    pub batches: Vec<BatchInfo>,
    pub query_result_ids: Vec<String>,
}

impl JobSnapshot {
    /// True if the job failed or was aborted, or any batch failed, was not
    /// processed, or reported failed records. False when no job exists.
    pub fn is_error(&self) -> bool {
        self.is_error_with(FailedRecordPolicy::Fatal)
    }

    /// [`is_error`](Self::is_error) with a configurable per-record rule.
    pub fn is_error_with(&self, policy: FailedRecordPolicy) -> bool {
        let Some(job) = &self.job else {
            return false;
        };
        if matches!(job.state, JobState::Aborted | JobState::Failed) {
            return true;
        }
        self.batches.iter().any(|batch| {
            matches!(batch.state, BatchState::Failed | BatchState::NotProcessed)
                || (policy == FailedRecordPolicy::Fatal && batch.number_records_failed > 0)
        })
    }

    /// Job state, if a job exists.
    pub fn job_state(&self) -> Option<JobState> {
        self.job.as_ref().map(|job| job.state)
    }

    /// True once the job is Closed, Aborted or Failed.
    pub fn is_job_terminal(&self) -> bool {
        self.job_state().is_some_and(|state| state.is_terminal())
    }

    /// True once the job is terminal and no batch is Queued or InProgress.
    pub fn is_terminal(&self) -> bool {
        self.is_job_terminal() && self.batches.iter().all(|b| b.state.is_terminal())
    }

    /// Summary suitable for progress reporting.
    pub fn progress(&self) -> JobProgress {
        let mut batches: BTreeMap<String, usize> = BTreeMap::new();
        for batch in &self.batches {
            *batches.entry(batch.state.to_string()).or_default() += 1;
        }
        JobProgress {
            job_id: self.job.as_ref().map(|job| job.id.clone()),
            state: self.job_state(),
            batches,
            records_processed: self.batches.iter().map(|b| b.number_records_processed).sum(),
            records_failed: self.batches.iter().map(|b| b.number_records_failed).sum(),
            is_error: self.is_error(),
        }
    }
}

/// One line of progress output.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobProgress {
    pub job_id: Option<String>,
    pub state: Option<JobState>,
    /// Batch count per batch state.
    pub batches: BTreeMap<String, usize>,
    pub records_processed: i64,
    pub records_failed: i64,
    pub is_error: bool,
}

#[cfg(test)]
pub(crate) mod fixtures {
    use crate::types::*;

    pub(crate) fn job(state: JobState) -> JobInfo {
        JobInfo {
            id: "750xx0000000001".to_string(),
            state,
            operation: Operation::Insert,
            object: "Account".to_string(),
            external_id_field_name: None,
            concurrency_mode: Some(ConcurrencyMode::Parallel),
            content_type: Some("JSON".to_string()),
            api_version: Some("62.0".to_string()),
            created_by_id: None,
            created_date: None,
            system_modstamp: None,
            number_batches_queued: 0,
            number_batches_in_progress: 0,
            number_batches_completed: 0,
            number_batches_failed: 0,
            number_batches_total: 0,
            number_records_processed: 0,
            number_records_failed: 0,
            number_retries: 0,
            total_processing_time: None,
        }
    }

    pub(crate) fn batch(id: &str, state: BatchState, failed: i64) -> BatchInfo {
        BatchInfo {
            id: id.to_string(),
            job_id: "750xx0000000001".to_string(),
            state,
            state_message: None,
            created_date: None,
            system_modstamp: None,
            number_records_processed: 10,
            number_records_failed: failed,
            total_processing_time: None,
        }
    }
}
