//! Job status polling.
//!
//! Each client embeds one monitor. Once started it refreshes the job and its
//! batches every poll interval, broadcasting a [`JobEvent`] per tick until
//! the job and all batches are terminal.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::client::BulkJobClient;
use crate::error::{Error, Result};
use crate::state::JobSnapshot;

const EVENT_CAPACITY: usize = 64;

/// Lifecycle of the polling loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MonitorState {
    Idle,
    Polling,
    /// The terminal snapshot was reported; polling never resumes.
    Terminal,
}

/// Event emitted by the polling loop.
#[derive(Debug, Clone)]
pub enum JobEvent {
    /// A non-terminal snapshot.
    Progress(JobSnapshot),
    /// The terminal snapshot. Emitted at most once per client.
    Finished(JobSnapshot),
    /// A refresh failed; polling continues. The error has kind
    /// [`Polling`](crate::ErrorKind::Polling) and wraps the failed call.
    PollingError(Arc<Error>),
}

struct Control {
    state: MonitorState,
    task: Option<JoinHandle<()>>,
}

pub(crate) struct Monitor {
    control: Mutex<Control>,
    events: broadcast::Sender<JobEvent>,
    finished: watch::Sender<Option<JobSnapshot>>,
}

impl Monitor {
    pub(crate) fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (finished, _) = watch::channel(None);
        Self {
            control: Mutex::new(Control {
                state: MonitorState::Idle,
                task: None,
            }),
            events,
            finished,
        }
    }

    fn control(&self) -> MutexGuard<'_, Control> {
        self.control.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: JobEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    /// Move to Terminal and report the snapshot, at most once.
    fn finish(&self, snapshot: JobSnapshot) {
        {
            let mut control = self.control();
            if control.state == MonitorState::Terminal {
                return;
            }
            control.state = MonitorState::Terminal;
            control.task = None;
        }
        self.emit(JobEvent::Finished(snapshot.clone()));
        self.finished.send_replace(Some(snapshot));
    }
}

impl Drop for Monitor {
    fn drop(&mut self) {
        if let Some(task) = self.control().task.take() {
            task.abort();
        }
    }
}

impl BulkJobClient {
    /// Register for job events. Has no side effects; call
    /// [`start_monitoring`](Self::start_monitoring) to begin polling.
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.inner.monitor.events.subscribe()
    }

    /// Current state of the polling loop.
    pub fn monitor_state(&self) -> MonitorState {
        self.inner.monitor.control().state
    }

    /// Start polling. No-op unless the monitor is idle.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start_monitoring(&self) {
        let mut control = self.inner.monitor.control();
        if control.state != MonitorState::Idle {
            return;
        }
        control.state = MonitorState::Polling;

        let client = Arc::downgrade(&self.inner);
        let period = self.poll_interval();
        debug!(?period, "Monitoring started");

        control.task = Some(tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                // Stop once every client handle is gone
                let Some(inner) = client.upgrade() else {
                    break;
                };
                if (BulkJobClient { inner }).poll_tick().await {
                    break;
                }
            }
        }));
    }

    /// Stop polling without reporting a terminal snapshot.
    pub fn stop_monitoring(&self) {
        let mut control = self.inner.monitor.control();
        if control.state != MonitorState::Polling {
            return;
        }
        control.state = MonitorState::Idle;
        if let Some(task) = control.task.take() {
            task.abort();
        }
        debug!("Monitoring stopped");
    }

    /// Start monitoring and wait for the terminal snapshot.
    ///
    /// Returns immediately if the job already finished. Polling errors are
    /// logged and otherwise ignored; use [`subscribe`](Self::subscribe) to
    /// act on them. Never returns if monitoring is stopped before the job
    /// finishes.
    pub async fn wait_for_completion(&self) -> JobSnapshot {
        let mut finished = self.inner.monitor.finished.subscribe();
        self.start_monitoring();

        let snapshot = match finished.wait_for(Option::is_some).await {
            Ok(snapshot) => snapshot.clone().unwrap_or_default(),
            Err(_) => self.snapshot(),
        };
        snapshot
    }

    /// One polling step. Returns true once the terminal snapshot is reported.
    async fn poll_tick(&self) -> bool {
        let monitor = &self.inner.monitor;

        if self.snapshot().job.is_none() {
            info!("No job exists. Reporting success.");
            monitor.finish(self.snapshot());
            return true;
        }

        if let Err(e) = self.refresh().await {
            warn!(error = %e, "Polling failed");
            monitor.emit(JobEvent::PollingError(Arc::new(Error::polling(e))));
            return false;
        }

        let snapshot = self.snapshot();
        if !snapshot.is_terminal() {
            monitor.emit(JobEvent::Progress(snapshot));
            return false;
        }

        let policy = self.failed_record_policy();
        if self.options().operation.is_query() && !snapshot.is_error_with(policy) {
            if let Err(e) = self.prime_query_result().await {
                warn!(error = %e, "Opening the query result failed");
                monitor.emit(JobEvent::PollingError(Arc::new(Error::polling(e))));
                return false;
            }
        }

        let snapshot = self.snapshot();
        info!(
            job_id = snapshot.job.as_ref().map(|job| job.id.as_str()).unwrap_or_default(),
            error = snapshot.is_error(),
            "Job finished"
        );
        monitor.finish(snapshot);
        true
    }

    async fn refresh(&self) -> Result<()> {
        self.refresh_job_info().await?;
        self.refresh_batch_infos().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::test_support::*;
    use crate::error::ErrorKind;
    use crate::state::fixtures::{batch, job};
    use crate::types::*;
    use std::time::Duration;
    use tokio::sync::broadcast::error::TryRecvError;
    use tokio::time::timeout;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const WAIT: Duration = Duration::from_secs(5);

    async fn next_event(rx: &mut broadcast::Receiver<JobEvent>) -> JobEvent {
        timeout(WAIT, rx.recv()).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_no_job_is_vacuous_success() {
        let server = MockServer::start().await;
        let client = client(&server, JobOptions::new("Account", Operation::Insert));
        let mut rx = client.subscribe();
        assert_eq!(client.monitor_state(), MonitorState::Idle);

        let snapshot = timeout(WAIT, client.wait_for_completion()).await.unwrap();
        assert!(snapshot.job.is_none());
        assert!(!snapshot.is_error());
        assert!(matches!(next_event(&mut rx).await, JobEvent::Finished(_)));
        assert_eq!(client.monitor_state(), MonitorState::Terminal);
    }

    #[tokio::test]
    async fn test_subscribe_does_not_start_polling() {
        let server = MockServer::start().await;
        let client = client(&server, JobOptions::new("Account", Operation::Insert));
        let mut rx = client.subscribe();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(client.monitor_state(), MonitorState::Idle);
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test]
    async fn test_progress_then_single_finished() {
        let server = MockServer::start().await;
        let batch_list = format!("/services/async/62.0/job/{JOB_ID}/batch");
        Mock::given(method("GET"))
            .and(path(batch_list.as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "batchInfo": [batch_json("751x1", "InProgress", 0)]
            })))
            .up_to_n_times(1)
            .with_priority(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(batch_list.as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "batchInfo": [batch_json("751x1", "Completed", 0)]
            })))
            .mount(&server)
            .await;

        let client = client(&server, JobOptions::new("Account", Operation::Insert));
        {
            let mut state = client.state();
            state.job = Some(job(JobState::Closed));
            state.batches = vec![batch("751x1", BatchState::Queued, 0)];
        }

        let mut rx = client.subscribe();
        client.start_monitoring();
        client.start_monitoring();

        let mut progress = 0;
        let finished = loop {
            match next_event(&mut rx).await {
                JobEvent::Progress(snapshot) => {
                    assert!(!snapshot.is_terminal());
                    progress += 1;
                }
                JobEvent::Finished(snapshot) => break snapshot,
                JobEvent::PollingError(e) => panic!("unexpected polling error: {e}"),
            }
        };

        assert_eq!(progress, 1);
        assert!(finished.is_terminal());
        assert!(!finished.is_error());

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
        assert_eq!(client.monitor_state(), MonitorState::Terminal);

        // Late callers get the retained snapshot
        let late = timeout(WAIT, client.wait_for_completion()).await.unwrap();
        assert_eq!(late, finished);
    }

    #[tokio::test]
    async fn test_polling_error_keeps_polling() {
        let server = MockServer::start().await;
        let job_path = format!("/services/async/62.0/job/{JOB_ID}");
        Mock::given(method("GET"))
            .and(path(job_path.as_str()))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .up_to_n_times(1)
            .with_priority(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(job_path.as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_json(job_json("Aborted", "insert")))
            .mount(&server)
            .await;

        let client = client(&server, JobOptions::new("Account", Operation::Insert));
        client.state().job = Some(job(JobState::Open));

        let mut rx = client.subscribe();
        client.start_monitoring();

        match next_event(&mut rx).await {
            JobEvent::PollingError(err) => {
                assert!(matches!(err.kind, ErrorKind::Polling(_)));
                assert!(err.source.is_some());
            }
            other => panic!("expected PollingError, got {other:?}"),
        }
        match next_event(&mut rx).await {
            JobEvent::Finished(snapshot) => {
                assert_eq!(snapshot.job_state(), Some(JobState::Aborted));
                assert!(snapshot.is_error());
            }
            other => panic!("expected Finished, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_query_job_opens_first_result() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(format!("/services/async/62.0/job/{JOB_ID}/batch/751q/result")))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!(["752r"])))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(format!("/services/async/62.0/job/{JOB_ID}/batch/751q/result/752r")))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {"attributes": {"type": "Account"}, "Id": "001"}
            ])))
            .expect(1)
            .mount(&server)
            .await;

        let client = client(&server, JobOptions::new("Account", Operation::Query));
        {
            let mut state = client.state();
            state.job = Some(job(JobState::Closed));
            state.batches = vec![batch("751q", BatchState::Completed, 0)];
        }

        let snapshot = timeout(WAIT, client.wait_for_completion()).await.unwrap();
        assert_eq!(snapshot.query_result_ids, vec!["752r".to_string()]);
    }

    #[tokio::test]
    async fn test_query_result_error_carries_exception_code() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(format!("/services/async/62.0/job/{JOB_ID}/batch/751q/result")))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "exceptionCode": "InvalidSessionId",
                "exceptionMessage": "Invalid session id"
            })))
            .mount(&server)
            .await;

        let client = client(&server, JobOptions::new("Account", Operation::Query));
        {
            let mut state = client.state();
            state.job = Some(job(JobState::Closed));
            state.batches = vec![batch("751q", BatchState::Completed, 0)];
        }

        let mut rx = client.subscribe();
        client.start_monitoring();
        match next_event(&mut rx).await {
            JobEvent::PollingError(err) => {
                assert_eq!(err.exception_code(), Some("InvalidSessionId"));
            }
            other => panic!("expected PollingError, got {other:?}"),
        }
        assert_eq!(client.monitor_state(), MonitorState::Polling);
        client.stop_monitoring();
    }

    #[tokio::test]
    async fn test_failed_query_job_skips_result() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&server)
            .await;

        let client = client(&server, JobOptions::new("Account", Operation::Query));
        {
            let mut state = client.state();
            state.job = Some(job(JobState::Closed));
            state.batches = vec![batch("751q", BatchState::Failed, 0)];
        }

        let snapshot = timeout(WAIT, client.wait_for_completion()).await.unwrap();
        assert!(snapshot.is_error());
        assert!(snapshot.query_result_ids.is_empty());
    }

    #[tokio::test]
    async fn test_stop_monitoring() {
        let server = MockServer::start().await;
        let client = client(&server, JobOptions::new("Account", Operation::Insert));
        let mut rx = client.subscribe();

        client.start_monitoring();
        assert_eq!(client.monitor_state(), MonitorState::Polling);
        client.stop_monitoring();
        assert_eq!(client.monitor_state(), MonitorState::Idle);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
    }
}
