//! End-to-end runs against a mock Bulk API.

use std::io::Read;
use std::time::{Duration, Instant};

use super::common::*;
use sfpipe::bulk::{BatchOptions, JobOptions, Operation};
use sfpipe::pipeline::{export_csv, load_csv, LoadOptions};
use sfpipe::ErrorKind;
use wiremock::matchers::{body_json, body_string, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn mount_job_lifecycle(server: &MockServer, operation: &str) {
    Mock::given(method("POST"))
        .and(path(async_path("job")))
        .and(header("X-SFDC-Session", "00Dxx!mock-session"))
        .respond_with(ResponseTemplate::new(201).set_body_json(job_json("Open", operation)))
        .expect(1)
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path(async_path(&format!("job/{JOB_ID}"))))
        .and(body_json(serde_json::json!({"state": "Closed"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(job_json("Closed", operation)))
        .expect(1)
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_load_csv_batches_and_reports_progress() {
    let server = MockServer::start().await;
    mount_job_lifecycle(&server, "insert").await;

    Mock::given(method("POST"))
        .and(path(async_path(&format!("job/{JOB_ID}/batch"))))
        .and(body_json(serde_json::json!([
            {"Name": "Acme", "Active": true, "Note": null},
            {"Name": "Globex", "Active": false, "Note": "key account"}
        ])))
        .respond_with(ResponseTemplate::new(201).set_body_json(batch_json("751b1", "Queued", 0, 0)))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(async_path(&format!("job/{JOB_ID}/batch"))))
        .and(body_json(serde_json::json!([
            {"Name": "Initech", "Active": "yes", "Note": null}
        ])))
        .respond_with(ResponseTemplate::new(201).set_body_json(batch_json("751b2", "Queued", 0, 0)))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(async_path(&format!("job/{JOB_ID}/batch"))))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "batchInfo": [
                batch_json("751b1", "Completed", 2, 0),
                batch_json("751b2", "Completed", 1, 0)
            ]
        })))
        .mount(&server)
        .await;

    let client = mock_client(&server, JobOptions::new("Account", Operation::Insert));
    let input = "Name,Active,Note\nAcme,true,\nGlobex,false,key account\nInitech,yes,  \n";
    let options = LoadOptions {
        batch: BatchOptions::with_batch_size(2),
        show_progress: true,
        fail_on_error: true,
    };

    let mut progress = Vec::new();
    let snapshot = load_csv(&client, input.as_bytes(), &options, &mut progress)
        .await
        .unwrap();

    assert!(snapshot.is_terminal());
    assert!(!snapshot.is_error());

    let lines: Vec<serde_json::Value> = String::from_utf8(progress)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    let last = lines.last().unwrap();
    assert_eq!(last["state"], "Closed");
    assert_eq!(last["recordsProcessed"], 3);
    assert_eq!(last["batches"]["Completed"], 2);
}

#[tokio::test]
async fn test_load_fail_on_error() {
    let server = MockServer::start().await;
    mount_job_lifecycle(&server, "insert").await;
    Mock::given(method("POST"))
        .and(path(async_path(&format!("job/{JOB_ID}/batch"))))
        .respond_with(ResponseTemplate::new(201).set_body_json(batch_json("751b1", "Queued", 0, 0)))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(async_path(&format!("job/{JOB_ID}/batch"))))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "batchInfo": [batch_json("751b1", "Completed", 1, 1)]
        })))
        .mount(&server)
        .await;

    let client = mock_client(&server, JobOptions::new("Account", Operation::Insert));
    let options = LoadOptions {
        fail_on_error: true,
        ..LoadOptions::default()
    };
    let err = load_csv(&client, "Name\nAcme\n".as_bytes(), &options, std::io::sink())
        .await
        .unwrap_err();
    assert!(matches!(err.kind, ErrorKind::JobFailed(_)));
}

#[tokio::test]
async fn test_load_header_only_makes_no_calls() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;

    let client = mock_client(&server, JobOptions::new("Account", Operation::Insert));
    let snapshot = load_csv(
        &client,
        "Name,Industry\n".as_bytes(),
        &LoadOptions::default(),
        std::io::sink(),
    )
    .await
    .unwrap();
    assert!(snapshot.job.is_none());
    assert!(!snapshot.is_error());
}

/// Yields a header, then blocks before reporting end of input.
struct StalledInput {
    header: Option<&'static [u8]>,
    stall: Duration,
}

impl Read for StalledInput {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if let Some(header) = self.header.take() {
            buf[..header.len()].copy_from_slice(header);
            return Ok(header.len());
        }
        std::thread::sleep(self.stall);
        Ok(0)
    }
}

#[tokio::test]
async fn test_load_yields_while_input_stalls() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;

    let client = mock_client(&server, JobOptions::new("Account", Operation::Insert));
    let input = StalledInput {
        header: Some(b"Name\n"),
        stall: Duration::from_secs(1),
    };
    let options = LoadOptions::default();
    let started = Instant::now();
    tokio::select! {
        _ = load_csv(&client, input, &options, std::io::sink()) => {
            panic!("load finished before the input did");
        }
        _ = tokio::time::sleep(Duration::from_millis(100)) => {}
    }
    assert!(
        started.elapsed() < Duration::from_millis(800),
        "interrupt branch ran after {:?}",
        started.elapsed()
    );
}

#[tokio::test]
async fn test_load_bad_csv_aborts_job() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(async_path("job")))
        .respond_with(ResponseTemplate::new(201).set_body_json(job_json("Open", "insert")))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(async_path(&format!("job/{JOB_ID}/batch"))))
        .respond_with(ResponseTemplate::new(201).set_body_json(batch_json("751b1", "Queued", 0, 0)))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(async_path(&format!("job/{JOB_ID}"))))
        .and(body_json(serde_json::json!({"state": "Aborted"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(job_json("Aborted", "insert")))
        .expect(1)
        .mount(&server)
        .await;

    let client = mock_client(&server, JobOptions::new("Account", Operation::Insert));
    let options = LoadOptions {
        batch: BatchOptions::with_batch_size(1),
        ..LoadOptions::default()
    };
    let err = load_csv(
        &client,
        "Name,Industry\nAcme,Tech\nGlobex\n".as_bytes(),
        &options,
        std::io::sink(),
    )
    .await
    .unwrap_err();
    assert!(matches!(err.kind, ErrorKind::Bulk(_)));
}

#[tokio::test]
async fn test_export_writes_csv() {
    let server = MockServer::start().await;
    mount_job_lifecycle(&server, "query").await;
    Mock::given(method("POST"))
        .and(path(async_path(&format!("job/{JOB_ID}/batch"))))
        .and(body_string("SELECT Id, Name, IsActive__c FROM Account"))
        .respond_with(ResponseTemplate::new(201).set_body_json(batch_json("751q", "Queued", 0, 0)))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(async_path(&format!("job/{JOB_ID}/batch"))))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "batchInfo": [batch_json("751q", "Completed", 2, 0)]
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(async_path(&format!("job/{JOB_ID}/batch/751q/result"))))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!(["752r"])))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(async_path(&format!("job/{JOB_ID}/batch/751q/result/752r"))))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"[{"attributes":{"type":"Account","url":"/x/001"},"Id":"001","Name":"Acme, Inc","IsActive__c":true},
                {"attributes":{"type":"Account","url":"/x/002"},"Id":"002","Name":"Globex","IsActive__c":null}]"#,
        ))
        .mount(&server)
        .await;

    let client = mock_client(&server, JobOptions::new("Account", Operation::Query));
    let mut out = Vec::new();
    let rows = export_csv(&client, "SELECT Id, Name, IsActive__c FROM Account", &mut out)
        .await
        .unwrap();

    assert_eq!(rows, 2);
    assert_eq!(
        String::from_utf8(out).unwrap(),
        "Id,Name,IsActive__c\n001,\"Acme, Inc\",true\n002,Globex,\n"
    );
}

#[tokio::test]
async fn test_export_reports_remote_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(async_path("job")))
        .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
            "exceptionCode": "InvalidSessionId",
            "exceptionMessage": "Invalid session id"
        })))
        .mount(&server)
        .await;

    let client = mock_client(&server, JobOptions::new("Account", Operation::Query));
    let err = export_csv(&client, "SELECT Id FROM Account", std::io::sink())
        .await
        .unwrap_err();
    assert!(matches!(err.kind, ErrorKind::Bulk(ref m) if m.contains("InvalidSessionId")));
}
