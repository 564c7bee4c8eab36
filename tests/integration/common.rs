use std::time::Duration;

use sfpipe::auth::{Authenticator, SessionInfo};
use sfpipe::bulk::{BulkJobClient, JobOptions};
use sfpipe::Config;
use wiremock::MockServer;

pub const JOB_ID: &str = "750xx00000000AB";

/// Async API path under the mock server.
pub fn async_path(path: &str) -> String {
    format!("/services/async/62.0/{path}")
}

pub fn job_json(state: &str, operation: &str) -> serde_json::Value {
    serde_json::json!({
        "id": JOB_ID,
        "state": state,
        "operation": operation,
        "object": "Account",
        "contentType": "JSON",
        "concurrencyMode": "Parallel",
        "apiVersion": "62.0"
    })
}

pub fn batch_json(id: &str, state: &str, processed: i64, failed: i64) -> serde_json::Value {
    serde_json::json!({
        "id": id,
        "jobId": JOB_ID,
        "state": state,
        "numberRecordsProcessed": processed,
        "numberRecordsFailed": failed
    })
}

/// A client using a pre-issued session against the mock server.
pub fn mock_client(server: &MockServer, options: JobOptions) -> BulkJobClient {
    BulkJobClient::builder(
        Authenticator::session(SessionInfo::new(server.uri(), "00Dxx!mock-session")),
        options,
    )
    .with_poll_interval(Duration::from_millis(20))
    .build()
    .expect("client options are valid")
}

/// Credentials for the live tests, or `None` when none are configured.
///
/// Set `SF_AUTH_URL` (an SFDX `force://` URL) or `SF_USERNAME`/`SF_PASSWORD`.
pub fn live_authenticator() -> Option<Authenticator> {
    let configured = ["SF_AUTH_URL", "SF_USERNAME"]
        .iter()
        .any(|name| std::env::var(name).is_ok_and(|v| !v.is_empty()));
    if !configured {
        return None;
    }
    match Config::default().authenticator() {
        Ok(auth) => Some(auth),
        Err(e) => panic!("live test credentials are set but unusable: {e}"),
    }
}

/// Live client with a relaxed poll interval.
pub fn live_client(auth: Authenticator, options: JobOptions) -> BulkJobClient {
    BulkJobClient::builder(auth, options)
        .with_poll_interval(Duration::from_secs(2))
        .build()
        .expect("client options are valid")
}
