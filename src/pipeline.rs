//! CSV load and export runs, as driven by the `sfpipe` binary.

use std::io::{Read, Write};

use futures::{Stream, TryStreamExt};
use sfpipe_bulk::{
    BatchAccumulator, BatchOptions, BulkJobClient, JobEvent, JobSnapshot, QueryResultReader,
    Record,
};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use crate::csv_io::{csv_records, CsvRecordWriter};
use crate::error::{Error, ErrorKind, Result};

/// Parsed rows buffered between the CSV reader thread and the accumulator.
const CSV_CHANNEL_CAPACITY: usize = 1024;

/// Settings for [`load_csv`].
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    pub batch: BatchOptions,
    /// Write one JSON progress line per snapshot.
    pub show_progress: bool,
    /// Abort the job and fail as soon as a snapshot is in error.
    pub fail_on_error: bool,
}

/// Load CSV rows into the client's job, then follow the job to completion.
///
/// The input is read on the blocking pool, so the returned future stays
/// responsive (for example to an interrupt) while the input stalls. On an
/// input or submit failure the job is aborted (best effort) before the
/// error is returned.
#[instrument(skip_all, fields(object = %client.options().object))]
pub async fn load_csv<R, W>(
    client: &BulkJobClient,
    input: R,
    options: &LoadOptions,
    mut progress: W,
) -> Result<JobSnapshot>
where
    R: Read + Send + 'static,
    W: Write,
{
    let mut events = client.subscribe();
    let mut accumulator = BatchAccumulator::new(client.clone(), options.batch)?;

    let submitted = accumulator.accept_all(read_csv(input)).await;
    if let Err(e) = submitted {
        abort_quietly(client).await;
        return Err(e.into());
    }
    info!(
        records = accumulator.records_accepted(),
        batches = accumulator.batches_submitted(),
        "All records submitted"
    );

    client.start_monitoring();
    let policy = client.failed_record_policy();
    loop {
        let (snapshot, finished) = match events.recv().await {
            Ok(JobEvent::Progress(snapshot)) => (snapshot, false),
            Ok(JobEvent::Finished(snapshot)) => (snapshot, true),
            Ok(JobEvent::PollingError(err)) => {
                warn!(error = %err, "Polling error, retrying");
                continue;
            }
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "Progress events dropped");
                continue;
            }
            Err(RecvError::Closed) => (client.snapshot(), true),
        };

        if options.show_progress {
            write_progress(&mut progress, &snapshot)?;
        }
        if options.fail_on_error && snapshot.is_error_with(policy) {
            client.stop_monitoring();
            abort_quietly(client).await;
            return Err(Error::new(ErrorKind::JobFailed(describe(&snapshot))));
        }
        if finished {
            if snapshot.is_error_with(policy) {
                warn!(summary = %describe(&snapshot), "Job finished with errors");
            }
            return Ok(snapshot);
        }
    }
}

/// Run a query job and write its rows as CSV. Returns the row count.
#[instrument(skip_all, fields(object = %client.options().object))]
pub async fn export_csv<W: Write>(client: &BulkJobClient, soql: &str, output: W) -> Result<usize> {
    let mut rows = QueryResultReader::new(client.clone(), soql)
        .into_records()
        .await?;
    let mut writer = CsvRecordWriter::new(output);
    while let Some(row) = rows.try_next().await? {
        writer.write_record(&row)?;
    }
    writer.flush()?;
    info!(rows = writer.rows_written(), "Export finished");
    Ok(writer.rows_written())
}

/// Stream CSV records parsed on the blocking pool, in input order. Parsing
/// stops after the first error, which is the last item.
fn read_csv<R>(input: R) -> impl Stream<Item = Result<Record>>
where
    R: Read + Send + 'static,
{
    let (tx, rx) = mpsc::channel(CSV_CHANNEL_CAPACITY);
    tokio::task::spawn_blocking(move || {
        let records = match csv_records(input) {
            Ok(records) => records,
            Err(e) => {
                let _ = tx.blocking_send(Err(e));
                return;
            }
        };
        for record in records {
            let failed = record.is_err();
            if tx.blocking_send(record).is_err() {
                debug!("CSV consumer gone, stopping reader");
                return;
            }
            if failed {
                return;
            }
        }
    });

    futures::stream::unfold(rx, |mut rx| async move {
        let item = rx.recv().await?;
        Some((item, rx))
    })
}

fn write_progress<W: Write>(out: &mut W, snapshot: &JobSnapshot) -> Result<()> {
    let line = serde_json::to_string(&snapshot.progress())
        .map_err(|e| Error::with_source(ErrorKind::Io(e.to_string()), e))?;
    writeln!(out, "{line}")?;
    out.flush()?;
    Ok(())
}

async fn abort_quietly(client: &BulkJobClient) {
    if let Err(e) = client.abort_job().await {
        warn!(error = %e, "Abort failed");
    }
}

fn describe(snapshot: &JobSnapshot) -> String {
    let progress = snapshot.progress();
    format!(
        "job {} is {}; {} records processed, {} failed",
        progress.job_id.unwrap_or_default(),
        progress
            .state
            .map(|state| state.to_string())
            .unwrap_or_else(|| "missing".to_string()),
        progress.records_processed,
        progress.records_failed
    )
}
