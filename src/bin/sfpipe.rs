//! `sfpipe`: load CSV into Salesforce or export query results as CSV.
//!
//! ```sh
//! sfpipe load insert --object Account --input accounts.csv --show-progress
//! sfpipe upsert Contact External_Id__c < contacts.csv
//! sfpipe export "SELECT Id, Name FROM Account" > accounts.csv
//! ```
//!
//! Exit codes: 0 success, 6 usage or configuration error, 9 runtime error,
//! 130 interrupted.

use std::future::Future;
use std::io::Read;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use sfpipe::bulk::{BulkJobClient, ConcurrencyMode, JobOptions, Operation};
use sfpipe::pipeline::{export_csv, load_csv, LoadOptions};
use sfpipe::{soql_object_name, Config, Error, ErrorKind, Result};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const EXIT_CONFIG: u8 = 6;
const EXIT_RUNTIME: u8 = 9;
const EXIT_INTERRUPTED: u8 = 130;

/// How long an interrupt waits for the abort request.
const ABORT_GRACE: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(name = "sfpipe", version, about = "Salesforce Bulk API CSV pipe")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load CSV records with any ingest operation
    Load {
        /// insert, update, upsert, delete or hardDelete
        operation: String,
        #[arg(long)]
        object: String,
        /// External ID field (upsert only)
        #[arg(long)]
        external_id: Option<String>,
        #[command(flatten)]
        run: LoadArgs,
    },
    /// Upsert CSV records by external ID
    Upsert {
        object: String,
        external_id_field: String,
        #[command(flatten)]
        run: LoadArgs,
    },
    /// Export query results as CSV on stdout
    Export {
        soql: String,
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[derive(Args, Debug)]
struct LoadArgs {
    /// CSV input file (stdin if omitted)
    #[arg(long)]
    input: Option<PathBuf>,
    /// Config file (default ./sfpipe.json)
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    batch_size: Option<usize>,
    /// Parallel or Serial
    #[arg(long)]
    concurrency_mode: Option<String>,
    /// Print one JSON progress line per status check
    #[arg(long)]
    show_progress: bool,
    /// Abort and exit non-zero as soon as the job reports an error
    #[arg(long)]
    fail_on_error: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) if !e.use_stderr() => e.exit(),
        Err(e) => {
            let _ = e.print();
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    let prepared = match cli.command {
        Command::Load {
            operation,
            object,
            external_id,
            run,
        } => operation
            .parse::<Operation>()
            .map_err(Error::from)
            .and_then(|operation| prepare_load(operation, object, external_id, run)),
        Command::Upsert {
            object,
            external_id_field,
            run,
        } => prepare_load(Operation::Upsert, object, Some(external_id_field), run),
        Command::Export { soql, config } => prepare_export(soql, config),
    };

    let job = match prepared {
        Ok(job) => job,
        Err(e) => {
            error!("{e}");
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    match job {
        Job::Load {
            client,
            input,
            options,
        } => {
            let run = load_csv(&client, input, &options, std::io::stdout());
            supervise(&client, run).await
        }
        Job::Export { client, soql } => {
            let run = export_csv(&client, &soql, std::io::stdout());
            supervise(&client, run).await
        }
    }
}

enum Job {
    Load {
        client: BulkJobClient,
        input: Box<dyn Read + Send>,
        options: LoadOptions,
    },
    Export {
        client: BulkJobClient,
        soql: String,
    },
}

fn prepare_load(
    operation: Operation,
    object: String,
    external_id: Option<String>,
    args: LoadArgs,
) -> Result<Job> {
    if operation.is_query() {
        return Err(Error::new(ErrorKind::Config(
            "use `sfpipe export` for queries".to_string(),
        )));
    }
    let config = Config::load(args.config.as_deref())?;

    let concurrency_mode = match &args.concurrency_mode {
        Some(mode) => mode.parse::<ConcurrencyMode>()?,
        None => config.concurrency_mode()?,
    };
    let mut job_options =
        JobOptions::new(object, operation).with_concurrency_mode(concurrency_mode);
    if let Some(field) = external_id {
        job_options = job_options.with_external_id_field(field);
    }

    let mut batch = config.batch_options()?;
    if let Some(size) = args.batch_size {
        batch.batch_size = size;
        batch.validate()?;
    }

    let input: Box<dyn Read + Send> = match &args.input {
        Some(path) => Box::new(std::fs::File::open(path).map_err(|e| {
            Error::with_source(
                ErrorKind::Config(format!("cannot open {}: {e}", path.display())),
                e,
            )
        })?),
        None => Box::new(std::io::stdin()),
    };

    let client = BulkJobClient::builder(config.authenticator()?, job_options)
        .with_http_client(config.http_client()?)
        .build()?;
    Ok(Job::Load {
        client,
        input,
        options: LoadOptions {
            batch,
            show_progress: args.show_progress,
            fail_on_error: args.fail_on_error,
        },
    })
}

fn prepare_export(soql: String, config: Option<PathBuf>) -> Result<Job> {
    let object = soql_object_name(&soql).ok_or_else(|| {
        Error::new(ErrorKind::Config(
            "cannot find the object name after FROM".to_string(),
        ))
    })?;
    let config = Config::load(config.as_deref())?;
    let job_options = JobOptions::new(object, Operation::Query)
        .with_concurrency_mode(config.concurrency_mode()?);
    let client = BulkJobClient::builder(config.authenticator()?, job_options)
        .with_http_client(config.http_client()?)
        .build()?;
    Ok(Job::Export { client, soql })
}

/// Run `work`, aborting the job once on Ctrl-C.
async fn supervise<T>(client: &BulkJobClient, work: impl Future<Output = Result<T>>) -> ExitCode {
    tokio::select! {
        result = work => match result {
            Ok(_) => ExitCode::SUCCESS,
            Err(e) if e.is_config() => {
                error!("{e}");
                ExitCode::from(EXIT_CONFIG)
            }
            Err(e) => {
                error!("{e}");
                ExitCode::from(EXIT_RUNTIME)
            }
        },
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, aborting job");
            client.stop_monitoring();
            match tokio::time::timeout(ABORT_GRACE, client.abort_job()).await {
                Ok(Ok(transition)) => info!(?transition, "Abort finished"),
                Ok(Err(e)) => warn!(error = %e, "Abort failed"),
                Err(_) => warn!("Abort timed out"),
            }
            ExitCode::from(EXIT_INTERRUPTED)
        }
    }
}
