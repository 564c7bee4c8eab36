//! Streaming reader for query jobs.

use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::OnceCell;
use tracing::{info, instrument, warn};

use crate::client::BulkJobClient;
use crate::decode::RecordStream;
use crate::error::{Error, ErrorKind, Result};
use crate::monitor::JobEvent;
use crate::state::JobSnapshot;
use crate::types::BatchInfo;

/// Runs one SOQL query as a query job and streams its rows.
///
/// # Example
///
/// ```rust,ignore
/// use futures::TryStreamExt;
/// use sfpipe_bulk::{BulkJobClient, JobOptions, Operation, QueryResultReader};
///
/// let client = BulkJobClient::new(auth, JobOptions::new("Account", Operation::Query))?;
/// let reader = QueryResultReader::new(client, "SELECT Id, Name FROM Account");
/// let mut rows = reader.into_records().await?;
/// while let Some(row) = rows.try_next().await? {
///     println!("{}", row["Name"]);
/// }
/// ```
#[derive(Debug)]
pub struct QueryResultReader {
    client: BulkJobClient,
    soql: String,
    batch: OnceCell<BatchInfo>,
}

impl QueryResultReader {
    /// Create a reader. Nothing is submitted until [`open`](Self::open).
    pub fn new(client: BulkJobClient, soql: impl Into<String>) -> Self {
        Self {
            client,
            soql: soql.into(),
            batch: OnceCell::new(),
        }
    }

    /// The client running the query job.
    pub fn client(&self) -> &BulkJobClient {
        &self.client
    }

    /// Submit the query. Later calls return the same batch.
    #[instrument(skip(self))]
    pub async fn open(&self) -> Result<&BatchInfo> {
        self.batch
            .get_or_try_init(|| self.client.submit_query(&self.soql))
            .await
    }

    /// Wait for the job to finish and stream the rows of the first result
    /// set in remote order, without the `attributes` envelope.
    ///
    /// Fails if the job ends in error or if its result cannot be opened
    /// once the job is terminal.
    pub async fn into_records(self) -> Result<RecordStream> {
        self.open().await?;
        let mut events = self.client.subscribe();
        let snapshot = tokio::select! {
            snapshot = self.client.wait_for_completion() => snapshot,
            err = result_unavailable(&self.client, &mut events) => {
                self.client.stop_monitoring();
                warn!(error = %err, "Query result unavailable");
                return Err(err);
            }
        };
        if snapshot.is_error_with(self.client.failed_record_policy()) {
            return Err(failure(&snapshot));
        }
        info!(results = snapshot.query_result_ids.len(), "Streaming query result");
        self.client.fetch_query_result_rows(None, None).await
    }
}

/// Resolves with the first polling error reported after the job is terminal.
/// Refreshes make no calls by then, so the error comes from opening the
/// result set.
async fn result_unavailable(
    client: &BulkJobClient,
    events: &mut broadcast::Receiver<JobEvent>,
) -> Error {
    loop {
        match events.recv().await {
            Ok(JobEvent::PollingError(err)) if client.snapshot().is_terminal() => {
                return Error::with_source(err.kind.clone(), err);
            }
            Ok(_) | Err(RecvError::Lagged(_)) => {}
            Err(RecvError::Closed) => return std::future::pending().await,
        }
    }
}

/// Remote error for a failed query job. Batch state messages look like
/// `"InvalidBatch : Failed to process query"`.
fn failure(snapshot: &JobSnapshot) -> Error {
    let message = snapshot
        .batches
        .iter()
        .find_map(|batch| batch.state_message.clone());

    let (code, message) = match message {
        Some(message) => match message.split_once(" : ") {
            Some((code, rest)) => (code.trim().to_string(), rest.trim().to_string()),
            None => ("BatchFailed".to_string(), message),
        },
        None => {
            let state = snapshot
                .job_state()
                .map(|state| state.to_string())
                .unwrap_or_default();
            (
                format!("Job{state}"),
                format!("query job ended in state {state}"),
            )
        }
    };
    Error::new(ErrorKind::Remote { code, message })
}
