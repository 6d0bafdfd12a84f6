//! Publishing scrapes and status through Zenoh.
//!
//! Zenoh requires a multi-thread tokio runtime. Each test uses its own key
//! prefix to avoid interference.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use execsight_common::{Format, decode, decode_auto};
use execsight_receiver::subprocess::{ProcessStatus, SupervisorState};
use execsight_receiver::{MetricsIntake, ReceiverStatus, ScrapedBatch, StatusPublisher, ZenohIntake};

fn unique_prefix() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    format!("test_{}", nanos)
}

async fn open_session() -> Arc<zenoh::Session> {
    Arc::new(
        zenoh::open(zenoh::Config::default())
            .await
            .expect("Failed to open Zenoh session"),
    )
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_intake_publishes_batch_to_metrics_key() {
    let prefix = unique_prefix();
    let session = open_session().await;

    let subscriber = session
        .declare_subscriber(format!("{}/mysqld/metrics", prefix))
        .await
        .expect("Failed to create subscriber");
    tokio::time::sleep(Duration::from_millis(100)).await;

    let intake = ZenohIntake::new(session.clone(), &prefix, Format::Cbor);
    let batch = ScrapedBatch::new("mysqld", "http://localhost:9104/metrics", "mysql_up 1\n")
        .with_content_type("text/plain; version=0.0.4");
    intake.deliver(batch.clone()).await.unwrap();

    let sample = tokio::time::timeout(Duration::from_secs(5), subscriber.recv_async())
        .await
        .expect("Timeout waiting for scrape")
        .expect("Failed to receive scrape");

    assert_eq!(sample.encoding().to_string(), Format::Cbor.mime_type());
    let received: ScrapedBatch = decode(&sample.payload().to_bytes(), Format::Cbor).unwrap();
    assert_eq!(received, batch);

    drop(subscriber);
    session.close().await.expect("Failed to close session");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_status_published_as_json() {
    let prefix = unique_prefix();
    let session = open_session().await;

    let subscriber = session
        .declare_subscriber(format!("{}/**/@/status", prefix))
        .await
        .expect("Failed to create subscriber");
    tokio::time::sleep(Duration::from_millis(100)).await;

    let intake = ZenohIntake::new(session.clone(), &prefix, Format::Json);
    let status = StatusPublisher::new(intake, "prometheus_exec/pg", "pg");

    let process = ProcessStatus {
        state: SupervisorState::Running,
        pid: Some(1234),
        ..Default::default()
    };
    status.publish_running(9187, Some(process.clone())).await.unwrap();
    status.publish_offline().await.unwrap();

    let mut received = Vec::new();
    for _ in 0..2 {
        let sample = tokio::time::timeout(Duration::from_secs(5), subscriber.recv_async())
            .await
            .expect("Timeout waiting for status")
            .expect("Failed to receive status");
        assert_eq!(sample.key_expr().as_str(), format!("{}/pg/@/status", prefix));
        let status: ReceiverStatus = decode_auto(&sample.payload().to_bytes()).unwrap();
        received.push(status);
    }

    assert_eq!(received[0].status, "running");
    assert_eq!(received[0].port, Some(9187));
    assert_eq!(received[0].process, Some(process));
    assert_eq!(received[1].status, "offline");

    drop(subscriber);
    session.close().await.expect("Failed to close session");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_status_republished_on_each_launch() {
    let prefix = unique_prefix();
    let session = open_session().await;

    let subscriber = session
        .declare_subscriber(format!("{}/node/@/status", prefix))
        .await
        .expect("Failed to create subscriber");
    tokio::time::sleep(Duration::from_millis(100)).await;

    let intake = ZenohIntake::new(session.clone(), &prefix, Format::Json);
    let status = StatusPublisher::new(intake, "prometheus_exec/node", "node");

    let (process_tx, process_rx) = watch::channel(ProcessStatus::default());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let tracker = tokio::spawn(async move { status.track(9100, process_rx, shutdown_rx).await });

    let running = |pid, crash_count| ProcessStatus {
        state: SupervisorState::Running,
        pid: Some(pid),
        crash_count,
        ..Default::default()
    };

    process_tx.send_modify(|s| s.state = SupervisorState::Starting);
    process_tx.send(running(41, 0)).unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    // same child, nothing new to report
    process_tx.send(running(41, 0)).unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    process_tx.send_modify(|s| {
        s.state = SupervisorState::Exited;
        s.pid = None;
    });
    process_tx.send(running(42, 1)).unwrap();

    let mut pids = Vec::new();
    for _ in 0..2 {
        let sample = tokio::time::timeout(Duration::from_secs(5), subscriber.recv_async())
            .await
            .expect("Timeout waiting for status")
            .expect("Failed to receive status");
        let status: ReceiverStatus = decode_auto(&sample.payload().to_bytes()).unwrap();
        assert_eq!(status.status, "running");
        assert_eq!(status.port, Some(9100));
        pids.push(status.process.and_then(|p| p.pid));
    }
    assert_eq!(pids, vec![Some(41), Some(42)]);

    shutdown_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(2), tracker)
        .await
        .expect("tracker should stop")
        .unwrap();

    drop(subscriber);
    session.close().await.expect("Failed to close session");
}
