//! Record batching for ingest jobs.

use futures::{Stream, StreamExt};
use serde_json::Value;
use tracing::{debug, instrument};

use crate::client::BulkJobClient;
use crate::error::{Error, ErrorKind, Result};
use crate::state::Transition;
use crate::types::{BatchOptions, Record};

/// Buffers records and submits them as batches of `batch_size`.
///
/// At most one batch is in flight: [`accept`](Self::accept) awaits the
/// submit round trip before returning. The first submit failure poisons
/// the accumulator.
///
/// # Example
///
/// ```rust,ignore
/// let mut accumulator = BatchAccumulator::new(client.clone(), BatchOptions::default())?;
/// for record in records {
///     accumulator.accept(record).await?;
/// }
/// accumulator.finish().await?;
/// ```
#[derive(Debug)]
pub struct BatchAccumulator {
    client: BulkJobClient,
    options: BatchOptions,
    buffer: Vec<Record>,
    records_accepted: usize,
    batches_submitted: usize,
    poisoned: bool,
    finished: bool,
}

impl BatchAccumulator {
    /// Create an accumulator feeding `client`'s job.
    pub fn new(client: BulkJobClient, options: BatchOptions) -> Result<Self> {
        options.validate()?;
        Ok(Self {
            client,
            options,
            buffer: Vec::new(),
            records_accepted: 0,
            batches_submitted: 0,
            poisoned: false,
            finished: false,
        })
    }

    /// The client this accumulator submits through.
    pub fn client(&self) -> &BulkJobClient {
        &self.client
    }

    /// Records accepted so far.
    pub fn records_accepted(&self) -> usize {
        self.records_accepted
    }

    /// Batches successfully submitted so far.
    pub fn batches_submitted(&self) -> usize {
        self.batches_submitted
    }

    /// Normalize and buffer a record, submitting a batch when the buffer is full.
    pub async fn accept(&mut self, record: Record) -> Result<()> {
        self.check_usable()?;
        self.buffer.push(normalize_record(record));
        self.records_accepted += 1;
        if self.buffer.len() >= self.options.batch_size {
            self.flush().await?;
        }
        Ok(())
    }

    /// Submit what is left, then close the job.
    #[instrument(skip(self), fields(records = self.records_accepted))]
    pub async fn finish(&mut self) -> Result<Transition> {
        self.check_usable()?;
        self.flush().await?;
        self.finished = true;
        self.client.close_job().await
    }

    /// Accept every record of `records`, then [`finish`](Self::finish).
    ///
    /// An input error stops the run as a `Decode` error; the job is left open.
    pub async fn accept_all<S, E>(&mut self, records: S) -> Result<Transition>
    where
        S: Stream<Item = std::result::Result<Record, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        futures::pin_mut!(records);
        while let Some(record) = records.next().await {
            let record =
                record.map_err(|e| Error::with_source(ErrorKind::Decode(e.to_string()), e))?;
            self.accept(record).await?;
        }
        self.finish().await
    }

    async fn flush(&mut self) -> Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let batch = std::mem::take(&mut self.buffer);
        match self.client.submit_batch(&batch).await {
            Ok(_) => {
                self.batches_submitted += 1;
                debug!(
                    batches = self.batches_submitted,
                    records = batch.len(),
                    "Batch flushed"
                );
                Ok(())
            }
            Err(e) => {
                self.poisoned = true;
                Err(e)
            }
        }
    }

    fn check_usable(&self) -> Result<()> {
        if self.poisoned {
            return Err(Error::new(ErrorKind::InvalidState(
                "a previous batch submission failed".to_string(),
            )));
        }
        if self.finished {
            return Err(Error::new(ErrorKind::InvalidState(
                "the accumulator is already finished".to_string(),
            )));
        }
        Ok(())
    }
}

/// Normalize CSV-style values: blank strings become null and the exact
/// strings `"true"`/`"false"` become booleans.
pub fn normalize_record(record: Record) -> Record {
    record
        .into_iter()
        .map(|(key, value)| (key, normalize_value(value)))
        .collect()
}

fn normalize_value(value: Value) -> Value {
    match value {
        Value::String(s) if s.trim().is_empty() => Value::Null,
        Value::String(s) if s == "true" => Value::Bool(true),
        Value::String(s) if s == "false" => Value::Bool(false),
        other => other,
    }
}
