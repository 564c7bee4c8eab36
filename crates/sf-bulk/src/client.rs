//! Bulk API 1.0 job/batch client.
//!
//! A [`BulkJobClient`] owns exactly one remote job: it authenticates once,
//! creates the job on first use, submits batches, refreshes job and batch
//! status, fetches results and closes or aborts the job.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::StreamExt;
use sfpipe_auth::{Authenticator, SessionInfo};
use sfpipe_client::{BodyStream, SessionClient, SfHttpClient};
use tokio::sync::OnceCell;
use tokio::time::sleep;
use tracing::{debug, info, instrument};

use crate::decode::{record_stream, RecordStream};
use crate::error::{Error, ErrorKind, Result};
use crate::monitor::Monitor;
use crate::state::{ClientState, FailedRecordPolicy, JobSnapshot, Transition};
use crate::types::*;

/// Default polling interval for job status checks.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(3);

/// Delay before re-checking a job that is still `Queued` when asked to close
/// or abort it.
const QUEUED_RETRY_DELAY: Duration = Duration::from_millis(500);

/// An authenticated session and the API client bound to it.
struct Session {
    info: SessionInfo,
    api: SessionClient,
}

pub(crate) struct Inner {
    options: JobOptions,
    authenticator: Authenticator,
    http: SfHttpClient,
    poll_interval: Duration,
    failed_record_policy: FailedRecordPolicy,
    session: OnceCell<Session>,
    state: Mutex<ClientState>,
    /// Serializes job creation, close and abort.
    lifecycle: tokio::sync::Mutex<()>,
    pub(crate) monitor: Monitor,
}

/// Client for one Bulk API 1.0 job.
///
/// Cheap to clone; clones share the same job.
///
/// # Example
///
/// ```rust,ignore
/// use sfpipe_auth::LoginCredentials;
/// use sfpipe_bulk::{BulkJobClient, JobOptions, Operation};
///
/// let client = BulkJobClient::new(
///     LoginCredentials::from_env()?.into(),
///     JobOptions::new("Account", Operation::Insert),
/// )?;
///
/// let mut record = sfpipe_bulk::Record::new();
/// record.insert("Name".into(), "Acme".into());
/// client.submit_batch(&[record]).await?;
/// client.close_job().await?;
///
/// let snapshot = client.wait_for_completion().await;
/// println!("error: {}", snapshot.is_error());
/// ```
#[derive(Clone)]
pub struct BulkJobClient {
    pub(crate) inner: Arc<Inner>,
}

impl std::fmt::Debug for BulkJobClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BulkJobClient")
            .field("options", &self.inner.options)
            .field("poll_interval", &self.inner.poll_interval)
            .field("authenticated", &self.inner.session.initialized())
            .finish_non_exhaustive()
    }
}

/// Builder for [`BulkJobClient`].
#[derive(Debug)]
pub struct BulkJobClientBuilder {
    authenticator: Authenticator,
    options: JobOptions,
    http: Option<SfHttpClient>,
    poll_interval: Duration,
    failed_record_policy: FailedRecordPolicy,
}

impl BulkJobClientBuilder {
    /// Use a specific HTTP client (shares its connection pool).
    pub fn with_http_client(mut self, http: SfHttpClient) -> Self {
        self.http = Some(http);
        self
    }

    /// Set the polling interval for job status checks.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set how per-record failures are judged.
    pub fn with_failed_record_policy(mut self, policy: FailedRecordPolicy) -> Self {
        self.failed_record_policy = policy;
        self
    }

    /// Validate the options and build the client. No network call is made.
    pub fn build(self) -> Result<BulkJobClient> {
        self.options.validate()?;
        if self.poll_interval.is_zero() {
            return Err(Error::new(ErrorKind::Config(
                "poll interval must be greater than zero".to_string(),
            )));
        }
        let http = match self.http {
            Some(http) => http,
            None => SfHttpClient::default_client()?,
        };

        Ok(BulkJobClient {
            inner: Arc::new(Inner {
                options: self.options,
                authenticator: self.authenticator,
                http,
                poll_interval: self.poll_interval,
                failed_record_policy: self.failed_record_policy,
                session: OnceCell::new(),
                state: Mutex::new(ClientState::default()),
                lifecycle: tokio::sync::Mutex::new(()),
                monitor: Monitor::new(),
            }),
        })
    }
}

impl BulkJobClient {
    /// Create a client with default settings.
    pub fn new(authenticator: Authenticator, options: JobOptions) -> Result<Self> {
        Self::builder(authenticator, options).build()
    }

    /// Start building a client.
    pub fn builder(authenticator: Authenticator, options: JobOptions) -> BulkJobClientBuilder {
        BulkJobClientBuilder {
            authenticator,
            options,
            http: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
            failed_record_policy: FailedRecordPolicy::default(),
        }
    }

    /// The job options.
    pub fn options(&self) -> &JobOptions {
        &self.inner.options
    }

    /// The polling interval.
    pub fn poll_interval(&self) -> Duration {
        self.inner.poll_interval
    }

    /// The per-record failure policy.
    pub fn failed_record_policy(&self) -> FailedRecordPolicy {
        self.inner.failed_record_policy
    }

    /// Copy of the current job state.
    pub fn snapshot(&self) -> JobSnapshot {
        self.state().snapshot()
    }

    /// [`JobSnapshot::is_error_with`] under this client's policy.
    pub fn is_error(&self) -> bool {
        self.snapshot().is_error_with(self.inner.failed_record_policy)
    }

    pub(crate) fn state(&self) -> MutexGuard<'_, ClientState> {
        // State updates are single assignments, so a poisoned lock still
        // holds consistent data
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // =========================================================================
    // Session
    // =========================================================================

    /// Log in once; later calls return the memoized session.
    pub async fn authenticate(&self) -> Result<SessionInfo> {
        Ok(self.session().await?.info.clone())
    }

    async fn session(&self) -> Result<&Session> {
        let inner = &self.inner;
        inner
            .session
            .get_or_try_init(|| async {
                let info = inner.authenticator.login(&inner.http).await?;
                let api = SessionClient::with_http(
                    inner.http.clone(),
                    &info.instance_url,
                    &info.session_id,
                )
                .with_api_version(inner.authenticator.api_version());
                Ok::<_, Error>(Session { info, api })
            })
            .await
    }

    async fn api(&self) -> Result<&SessionClient> {
        Ok(&self.session().await?.api)
    }

    fn job_id(&self) -> Result<String> {
        self.state()
            .job
            .as_ref()
            .map(|job| job.id.clone())
            .ok_or_else(|| Error::new(ErrorKind::InvalidState("no job has been created".to_string())))
    }

    // =========================================================================
    // Job Operations
    // =========================================================================

    /// Create the job if it does not exist yet.
    #[instrument(skip(self), fields(object = %self.inner.options.object, operation = %self.inner.options.operation))]
    pub async fn ensure_job(&self) -> Result<JobInfo> {
        let _guard = self.inner.lifecycle.lock().await;
        if let Some(job) = self.state().job.clone() {
            return Ok(job);
        }

        let api = self.api().await?;
        let url = api.async_url("job");
        let request = CreateJobRequest::from(&self.inner.options);
        let job: JobInfo = api.post_json(&url, &request).await?;

        info!(job_id = %job.id, state = %job.state, "Job created");
        self.state().job = Some(job.clone());
        Ok(job)
    }

    /// Submit one batch of records.
    ///
    /// An empty slice is a no-op: no job is created and `None` is returned.
    #[instrument(skip(self, records), fields(records = records.len()))]
    pub async fn submit_batch(&self, records: &[Record]) -> Result<Option<BatchInfo>> {
        if records.is_empty() {
            return Ok(None);
        }

        let job = self.ensure_job().await?;
        let state = self.state().job_state_or(job.state);
        if state != JobState::Open {
            return Err(Error::new(ErrorKind::InvalidState(format!(
                "Invalid job state: {state}"
            ))));
        }

        let api = self.api().await?;
        let url = api.async_url(&format!("job/{}/batch", job.id));
        let batch: BatchInfo = api.post_json(&url, &records).await?;

        info!(job_id = %job.id, batch_id = %batch.id, records = records.len(), "Batch submitted");
        self.state().batches.push(batch.clone());
        Ok(Some(batch))
    }

    /// Submit a SOQL query as the job's single batch, then close the job.
    #[instrument(skip(self, soql))]
    pub async fn submit_query(&self, soql: &str) -> Result<BatchInfo> {
        if !self.inner.options.operation.is_query() {
            return Err(Error::new(ErrorKind::Config(format!(
                "cannot submit a query to a {} job",
                self.inner.options.operation
            ))));
        }

        let job = self.ensure_job().await?;
        let api = self.api().await?;
        let url = api.async_url(&format!("job/{}/batch", job.id));
        let batch: BatchInfo = api.post_soql_json(&url, soql).await?;

        info!(job_id = %job.id, batch_id = %batch.id, "Query submitted");
        self.state().batches.push(batch.clone());
        self.close_job().await?;
        Ok(batch)
    }

    /// Refresh the job info unless there is no job or it is already terminal.
    #[instrument(skip(self))]
    pub async fn refresh_job_info(&self) -> Result<Option<JobInfo>> {
        let current = self.state().job.clone();
        let Some(job) = current else {
            return Ok(None);
        };
        if job.state.is_terminal() {
            return Ok(Some(job));
        }
        self.fetch_job_info(&job.id).await.map(Some)
    }

    async fn fetch_job_info(&self, job_id: &str) -> Result<JobInfo> {
        let api = self.api().await?;
        let url = api.async_url(&format!("job/{job_id}"));
        let job: JobInfo = api.get_json(&url).await?;
        debug!(job_id = %job.id, state = %job.state, "Job info refreshed");
        self.state().job = Some(job.clone());
        Ok(job)
    }

    /// Refresh all batch infos unless there are none or everything is final.
    #[instrument(skip(self))]
    pub async fn refresh_batch_infos(&self) -> Result<Vec<BatchInfo>> {
        let snapshot = self.snapshot();
        if snapshot.batches.is_empty() || snapshot.is_terminal() {
            return Ok(snapshot.batches);
        }
        let Some(job) = snapshot.job else {
            return Ok(snapshot.batches);
        };

        let api = self.api().await?;
        let url = api.async_url(&format!("job/{}/batch", job.id));
        let list: BatchInfoList = api.get_json(&url).await?;
        debug!(job_id = %job.id, batches = list.batch_info.len(), "Batch infos refreshed");
        self.state().batches = list.batch_info.clone();
        Ok(list.batch_info)
    }

    /// Fetch a batch result. For query jobs the result-set ids are kept.
    #[instrument(skip(self))]
    pub async fn fetch_batch_result(&self, batch_id: &str) -> Result<BatchResult> {
        let job_id = self.job_id()?;
        let api = self.api().await?;
        let url = api.async_url(&format!("job/{job_id}/batch/{batch_id}/result"));
        let result: BatchResult = api.get_json(&url).await?;

        if self.inner.options.operation.is_query() {
            if let BatchResult::ResultIds(ids) = &result {
                self.state().query_result_ids = ids.clone();
            }
        }
        Ok(result)
    }

    /// Fetch the records a batch was submitted with.
    #[instrument(skip(self))]
    pub async fn fetch_batch_request(&self, batch_id: &str) -> Result<Vec<Record>> {
        let job_id = self.job_id()?;
        let api = self.api().await?;
        let url = api.async_url(&format!("job/{job_id}/batch/{batch_id}/request"));
        let records: Vec<Record> = api.get_json(&url).await?;
        Ok(records)
    }

    /// Stream the rows of one query result set.
    ///
    /// Defaults to the first batch and the first known result id.
    #[instrument(skip(self))]
    pub async fn fetch_query_result_rows(
        &self,
        batch_id: Option<&str>,
        result_id: Option<&str>,
    ) -> Result<RecordStream> {
        let body = self.open_query_result(batch_id, result_id).await?;
        Ok(record_stream(body))
    }

    pub(crate) async fn open_query_result(
        &self,
        batch_id: Option<&str>,
        result_id: Option<&str>,
    ) -> Result<BodyStream> {
        let (job_id, batch_id, result_id) = {
            let state = self.state();
            let job_id = state.job.as_ref().map(|job| job.id.clone());
            let batch_id = batch_id
                .map(str::to_string)
                .or_else(|| state.batches.first().map(|b| b.id.clone()));
            let result_id = result_id
                .map(str::to_string)
                .or_else(|| state.query_result_ids.first().cloned());
            (job_id, batch_id, result_id)
        };
        let (Some(job_id), Some(batch_id), Some(result_id)) = (job_id, batch_id, result_id) else {
            return Err(Error::new(ErrorKind::InvalidState(
                "no query result is available yet".to_string(),
            )));
        };

        let api = self.api().await?;
        let url = api.async_url(&format!("job/{job_id}/batch/{batch_id}/result/{result_id}"));
        Ok(api.get_stream(&url).await?)
    }

    /// Close the job: no further batches are accepted.
    pub async fn close_job(&self) -> Result<Transition> {
        self.close_or_abort(JobState::Closed).await
    }

    /// Abort the job: unprocessed batches are dropped.
    pub async fn abort_job(&self) -> Result<Transition> {
        self.close_or_abort(JobState::Aborted).await
    }

    #[instrument(skip(self))]
    async fn close_or_abort(&self, target: JobState) -> Result<Transition> {
        let _guard = self.inner.lifecycle.lock().await;

        loop {
            let current = self.state().job.clone();
            let Some(job) = current else {
                info!("No job exists. Nothing to do.");
                return Ok(Transition::NoJob);
            };

            match job.state {
                JobState::Queued => {
                    sleep(QUEUED_RETRY_DELAY).await;
                    self.fetch_job_info(&job.id).await?;
                }
                JobState::Open => {
                    let api = self.api().await?;
                    let url = api.async_url(&format!("job/{}", job.id));
                    let updated: JobInfo =
                        api.post_json(&url, &JobStateChange { state: target }).await?;

                    info!(job_id = %updated.id, state = %updated.state, "Job state changed");
                    self.state().job = Some(updated.clone());
                    return Ok(Transition::Changed(updated));
                }
                state => {
                    info!(job_id = %job.id, %state, "Job is already final");
                    return Ok(Transition::AlreadyFinal(state));
                }
            }
        }
    }

    /// Wait for the first chunk of the first query result set.
    pub(crate) async fn prime_query_result(&self) -> Result<()> {
        let batch_id = self.snapshot().batches.first().map(|b| b.id.clone());
        let Some(batch_id) = batch_id else {
            return Ok(());
        };
        self.fetch_batch_result(&batch_id).await?;
        let mut body = self.open_query_result(Some(&batch_id), None).await?;
        if let Some(chunk) = body.next().await {
            chunk?;
        }
        Ok(())
    }
}

impl ClientState {
    fn job_state_or(&self, fallback: JobState) -> JobState {
        self.job.as_ref().map_or(fallback, |job| job.state)
    }
}
