//! Periodic scraping of the exporter's metrics endpoint.

use std::time::Duration;

use reqwest::header::CONTENT_TYPE;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use crate::error::{ReceiverError, Result};
use crate::intake::{MetricsIntake, ScrapedBatch};
use crate::shutdown;

/// The endpoint a job is scraped from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScrapeTarget {
    pub job: String,
    pub port: u16,
    pub metrics_path: String,
}

impl ScrapeTarget {
    pub fn new(job: impl Into<String>, port: u16, metrics_path: impl Into<String>) -> Self {
        Self {
            job: job.into(),
            port,
            metrics_path: metrics_path.into(),
        }
    }

    /// `http://localhost:{port}{metrics_path}`
    pub fn url(&self) -> String {
        format!("http://localhost:{}{}", self.port, self.metrics_path)
    }
}

/// Scrapes one target on a fixed interval and hands each payload to an intake.
pub struct ScrapeCoordinator<I> {
    target: ScrapeTarget,
    interval: Duration,
    client: reqwest::Client,
    intake: I,
}

impl<I: MetricsIntake> ScrapeCoordinator<I> {
    pub fn new(target: ScrapeTarget, interval: Duration, timeout: Duration, intake: I) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ReceiverError::config(format!("HTTP client: {}", e)))?;

        Ok(Self {
            target,
            interval,
            client,
            intake,
        })
    }

    pub fn target(&self) -> &ScrapeTarget {
        &self.target
    }

    /// Fetch the target once.
    pub async fn scrape_once(&self) -> Result<ScrapedBatch> {
        let url = self.target.url();

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() {
                    ReceiverError::Unreachable {
                        target: url.clone(),
                        message: e.to_string(),
                    }
                } else {
                    ReceiverError::scrape(&url, e)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ReceiverError::scrape(&url, format!("HTTP {}", status)));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let body = response
            .text()
            .await
            .map_err(|e| ReceiverError::scrape(&url, e))?;

        let mut batch = ScrapedBatch::new(&self.target.job, url, body);
        if let Some(content_type) = content_type {
            batch = batch.with_content_type(content_type);
        }
        Ok(batch)
    }

    /// Scrape until shutdown. Failures are logged and never end the loop.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut scraped: u64 = 0;
        let mut failed: u64 = 0;

        tracing::info!(
            job = %self.target.job,
            target = %self.target.url(),
            interval_secs = self.interval.as_secs(),
            "Starting scrape loop"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown::requested(&mut shutdown) => break,
            }

            match self.scrape_once().await {
                Ok(batch) => {
                    scraped += 1;
                    tracing::debug!(
                        job = %self.target.job,
                        samples = batch.sample_count(),
                        "Scraped target"
                    );
                    if let Err(e) = self.intake.deliver(batch).await {
                        tracing::warn!(job = %self.target.job, error = %e, "Failed to deliver scrape");
                    }
                }
                Err(e) => {
                    failed += 1;
                    if matches!(e, ReceiverError::Unreachable { .. }) {
                        // exporter restarting or not listening yet
                        tracing::debug!(job = %self.target.job, error = %e, "Target unreachable");
                    } else {
                        tracing::warn!(job = %self.target.job, error = %e, "Scrape failed");
                    }
                }
            }
        }

        tracing::info!(job = %self.target.job, scraped, failed, "Scrape loop stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, TcpListener};
    use tokio::sync::mpsc;

    fn closed_port() -> u16 {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        listener.local_addr().unwrap().port()
    }

    #[test]
    fn test_target_url() {
        let target = ScrapeTarget::new("mysqld", 9104, "/metrics");
        assert_eq!(target.url(), "http://localhost:9104/metrics");

        let target = ScrapeTarget::new("custom", 8080, "/exporter/metrics");
        assert_eq!(target.url(), "http://localhost:8080/exporter/metrics");
    }

    #[tokio::test]
    async fn test_scrape_unreachable_target_is_error() {
        let (tx, _rx) = mpsc::channel(1);
        let coordinator = ScrapeCoordinator::new(
            ScrapeTarget::new("down", closed_port(), "/metrics"),
            Duration::from_secs(1),
            Duration::from_millis(500),
            tx,
        )
        .unwrap();

        let err = coordinator.scrape_once().await.unwrap_err();
        assert!(matches!(err, ReceiverError::Unreachable { .. }));
    }

    #[tokio::test]
    async fn test_run_survives_failures_and_stops_on_shutdown() {
        let (tx, mut rx) = mpsc::channel(1);
        let coordinator = ScrapeCoordinator::new(
            ScrapeTarget::new("down", closed_port(), "/metrics"),
            Duration::from_millis(20),
            Duration::from_millis(100),
            tx,
        )
        .unwrap();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(coordinator.run(shutdown_rx));

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(!handle.is_finished());

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("scrape loop should stop")
            .unwrap();
        assert!(rx.try_recv().is_err());
    }
}
