//! Scraping a fake exporter served by axum.

use std::net::SocketAddr;
use std::time::Duration;

use axum::Router;
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use axum::routing::get;
use tokio::sync::{mpsc, watch};

use execsight_receiver::{ReceiverError, ScrapeCoordinator, ScrapeTarget, ScrapedBatch};

const EXPOSITION: &str = "# HELP mysql_up Whether the MySQL server is up.\n\
                          # TYPE mysql_up gauge\n\
                          mysql_up 1\n\
                          mysql_global_status_uptime 4242\n";

async fn metrics() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        EXPOSITION,
    )
}

async fn broken() -> impl IntoResponse {
    (StatusCode::INTERNAL_SERVER_ERROR, "boom")
}

/// Serve the fake exporter on an ephemeral port.
async fn spawn_exporter() -> SocketAddr {
    let router = Router::new()
        .route("/metrics", get(metrics))
        .route("/broken", get(broken));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

fn coordinator(
    addr: SocketAddr,
    path: &str,
    interval: Duration,
) -> (ScrapeCoordinator<mpsc::Sender<ScrapedBatch>>, mpsc::Receiver<ScrapedBatch>) {
    let (tx, rx) = mpsc::channel(16);
    let coordinator = ScrapeCoordinator::new(
        ScrapeTarget::new("mysqld", addr.port(), path),
        interval,
        Duration::from_secs(2),
        tx,
    )
    .unwrap();
    (coordinator, rx)
}

#[tokio::test]
async fn test_scrape_once_returns_body_verbatim() {
    let addr = spawn_exporter().await;
    let (coordinator, _rx) = coordinator(addr, "/metrics", Duration::from_secs(60));

    let batch = coordinator.scrape_once().await.unwrap();

    assert_eq!(batch.job, "mysqld");
    assert_eq!(batch.target, format!("http://localhost:{}/metrics", addr.port()));
    assert_eq!(batch.body, EXPOSITION);
    assert_eq!(batch.content_type.as_deref(), Some("text/plain; version=0.0.4"));
    assert_eq!(
        batch.samples().collect::<Vec<_>>(),
        vec!["mysql_up 1", "mysql_global_status_uptime 4242"]
    );
}

#[tokio::test]
async fn test_scrape_non_success_status_is_error() {
    let addr = spawn_exporter().await;
    let (coordinator, _rx) = coordinator(addr, "/broken", Duration::from_secs(60));

    let err = coordinator.scrape_once().await.unwrap_err();
    match err {
        ReceiverError::Scrape { message, .. } => assert!(message.contains("500")),
        other => panic!("unexpected error: {}", other),
    }
}

#[tokio::test]
async fn test_scrape_loop_delivers_every_tick() {
    let addr = spawn_exporter().await;
    let (coordinator, mut rx) = coordinator(addr, "/metrics", Duration::from_millis(50));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(coordinator.run(shutdown_rx));

    for _ in 0..3 {
        let batch = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timeout waiting for scrape")
            .expect("intake closed");
        assert_eq!(batch.sample_count(), 2);
    }

    shutdown_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("scrape loop should stop")
        .unwrap();
}

#[tokio::test]
async fn test_scrape_loop_picks_up_late_listener() {
    // Reserve a port, release it, and only start serving after a few failed ticks.
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };

    let (tx, mut rx) = mpsc::channel(16);
    let coordinator = ScrapeCoordinator::new(
        ScrapeTarget::new("late", port, "/metrics"),
        Duration::from_millis(50),
        Duration::from_secs(1),
        tx,
    )
    .unwrap();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(coordinator.run(shutdown_rx));

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(rx.try_recv().is_err());

    let listener = tokio::net::TcpListener::bind(("127.0.0.1", port)).await.unwrap();
    tokio::spawn(async move {
        axum::serve(listener, Router::new().route("/metrics", get(metrics)))
            .await
            .unwrap();
    });

    let batch = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("scrape should succeed once the exporter listens")
        .unwrap();
    assert_eq!(batch.job, "late");

    shutdown_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .unwrap()
        .unwrap();
}
