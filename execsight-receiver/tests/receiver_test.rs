//! End-to-end receiver runs with real `sh` children.

use std::time::Duration;

use tokio::sync::mpsc;

use execsight_receiver::config::EnvVar;
use execsight_receiver::{ExecReceiver, FixedPort, ReceiverConfig, SupervisorEvent, SupervisorState};

fn config(exec: &str) -> ReceiverConfig {
    let mut config = ReceiverConfig::new("prometheus_exec/e2e", exec);
    config.env = vec![EnvVar::new("PATH", "/usr/bin:/bin")];
    config.scrape_interval_secs = 1;
    config.scrape_timeout_secs = 1;
    config.restart.initial_delay_ms = 50;
    config.restart.healthy_crash_count = 0;
    config.restart.termination_grace_ms = 500;
    config
}

async fn wait_for<F>(events: &mut mpsc::UnboundedReceiver<SupervisorEvent>, mut matches: F) -> SupervisorEvent
where
    F: FnMut(&SupervisorEvent) -> bool,
{
    loop {
        let event = tokio::time::timeout(Duration::from_secs(10), events.recv())
            .await
            .expect("timeout waiting for supervisor event")
            .expect("event channel closed");
        if matches(&event) {
            return event;
        }
    }
}

#[tokio::test]
async fn test_port_reaches_command_and_environment() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("port.txt");

    let mut config = config(&format!(
        "sh -c 'echo \"$1 $EXPORTER_PORT\" > {}; sleep 30' exporter --web.listen-address=:{{{{port}}}}",
        out.display()
    ));
    config.env.push(EnvVar::new("EXPORTER_PORT", "{{port}}"));

    let (tx, _rx) = mpsc::channel(4);
    let (events_tx, mut events) = mpsc::unbounded_channel();
    let mut receiver = ExecReceiver::new(config, tx)
        .unwrap()
        .with_port_allocator(FixedPort(19187))
        .with_events(events_tx);

    assert_eq!(receiver.start().await.unwrap(), 19187);
    wait_for(&mut events, |e| matches!(e, SupervisorEvent::Launched { .. })).await;

    let mut written = String::new();
    for _ in 0..50 {
        written = std::fs::read_to_string(&out).unwrap_or_default();
        if !written.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert_eq!(written.trim(), "--web.listen-address=:19187 19187");

    receiver.shutdown().await;
}

#[tokio::test]
async fn test_crashing_exporter_is_restarted_on_same_port() {
    let (tx, _rx) = mpsc::channel(4);
    let (events_tx, mut events) = mpsc::unbounded_channel();
    let mut receiver = ExecReceiver::new(config("sh -c 'exit 2'"), tx)
        .unwrap()
        .with_port_allocator(FixedPort(19188))
        .with_events(events_tx);

    receiver.start().await.unwrap();

    let mut ports = Vec::new();
    let mut delays = Vec::new();
    while ports.len() < 3 {
        match wait_for(&mut events, |e| {
            matches!(e, SupervisorEvent::Launched { .. } | SupervisorEvent::Backoff { .. })
        })
        .await
        {
            SupervisorEvent::Launched { port, .. } => ports.push(port),
            SupervisorEvent::Backoff { delay, .. } => delays.push(delay),
            _ => unreachable!(),
        }
    }

    assert!(ports.iter().all(|&p| p == 19188));
    assert!(delays.windows(2).all(|w| w[1] >= w[0]));

    let status = receiver.process_status().unwrap();
    assert!(status.crash_count >= 2);
    assert!(status.restarts >= 2);

    tokio::time::timeout(Duration::from_secs(5), receiver.shutdown())
        .await
        .expect("shutdown should be bounded");
    assert_eq!(receiver.process_status().unwrap().state, SupervisorState::Stopped);
}

#[tokio::test]
async fn test_shutdown_is_bounded_for_stubborn_exporter() {
    let (tx, _rx) = mpsc::channel(4);
    let (events_tx, mut events) = mpsc::unbounded_channel();
    let mut receiver = ExecReceiver::new(config("sh -c 'trap \"\" TERM; sleep 30'"), tx)
        .unwrap()
        .with_port_allocator(FixedPort(19189))
        .with_events(events_tx);

    receiver.start().await.unwrap();
    wait_for(&mut events, |e| matches!(e, SupervisorEvent::Launched { .. })).await;
    // let sh install the trap
    tokio::time::sleep(Duration::from_millis(200)).await;

    let started = std::time::Instant::now();
    receiver.shutdown().await;

    assert!(started.elapsed() < Duration::from_secs(4));
    assert!(!receiver.is_running());
    wait_for(&mut events, |e| matches!(e, SupervisorEvent::Stopped)).await;
}
