//! Bulk API 1.0 tests against a real org.

use super::common::{live_authenticator, live_client};
use futures::TryStreamExt;
use sfpipe::bulk::{
    BatchAccumulator, BatchOptions, JobOptions, Operation, QueryResultReader, Record, Transition,
};

#[tokio::test]
async fn test_live_query_users() {
    let Some(auth) = live_authenticator() else { return; };
    let client = live_client(auth, JobOptions::new("User", Operation::Query));

    let rows: Vec<Record> = QueryResultReader::new(client, "SELECT Id, Username FROM User LIMIT 5")
        .into_records()
        .await
        .expect("query should succeed")
        .try_collect()
        .await
        .expect("rows should decode");

    assert!(!rows.is_empty(), "every org has at least one user");
    assert!(rows.iter().all(|row| !row.contains_key("attributes")));
}

#[tokio::test]
async fn test_live_insert_then_delete() {
    let Some(auth) = live_authenticator() else { return; };
    let marker = format!(
        "SfpipeIntTest_{}",
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default()
    );

    // Insert
    let client = live_client(auth.clone(), JobOptions::new("Account", Operation::Insert));
    let mut accumulator =
        BatchAccumulator::new(client.clone(), BatchOptions::with_batch_size(2)).unwrap();
    for i in 0..3 {
        let mut record = Record::new();
        record.insert("Name".to_string(), format!("{marker} {i}").into());
        accumulator.accept(record).await.expect("submit should succeed");
    }
    let transition = accumulator.finish().await.expect("close should succeed");
    assert!(matches!(transition, Transition::Changed(_)));

    let snapshot = client.wait_for_completion().await;
    assert!(!snapshot.is_error(), "insert failed: {:?}", snapshot.progress());
    assert_eq!(snapshot.batches.len(), 2);

    // Find them again
    let reader_client = live_client(auth.clone(), JobOptions::new("Account", Operation::Query));
    let ids: Vec<Record> = QueryResultReader::new(
        reader_client,
        format!("SELECT Id FROM Account WHERE Name LIKE '{marker}%'"),
    )
    .into_records()
    .await
    .expect("query should succeed")
    .try_collect()
    .await
    .expect("rows should decode");
    assert_eq!(ids.len(), 3);

    // Clean up
    let cleanup = live_client(auth, JobOptions::new("Account", Operation::Delete));
    let mut accumulator = BatchAccumulator::new(cleanup.clone(), BatchOptions::default()).unwrap();
    accumulator
        .accept_all(futures::stream::iter(
            ids.into_iter().map(Ok::<_, std::io::Error>),
        ))
        .await
        .expect("delete should be submitted");
    assert!(!cleanup.wait_for_completion().await.is_error());
}

#[tokio::test]
async fn test_live_abort_open_job() {
    let Some(auth) = live_authenticator() else { return; };
    let client = live_client(auth, JobOptions::new("Account", Operation::Insert));

    client.ensure_job().await.expect("job should be created");
    let transition = client.abort_job().await.expect("abort should succeed");
    assert!(matches!(transition, Transition::Changed(ref job) if job.state.is_terminal()));
    assert!(client.wait_for_completion().await.is_error());
}
