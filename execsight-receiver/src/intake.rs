//! Where scraped metrics go.

use std::future::Future;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::{ReceiverError, Result};

/// One scrape of an exporter, as fetched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrapedBatch {
    /// Scrape job name.
    pub job: String,
    /// URL that was scraped.
    pub target: String,
    /// Unix timestamp in milliseconds taken when the response arrived.
    pub timestamp: i64,
    /// `Content-Type` reported by the exporter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    /// Exposition-format body, unparsed.
    pub body: String,
}

impl ScrapedBatch {
    /// Create a batch stamped with the current time.
    pub fn new(job: impl Into<String>, target: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            job: job.into(),
            target: target.into(),
            timestamp: chrono::Utc::now().timestamp_millis(),
            content_type: None,
            body: body.into(),
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Sample lines of the body, skipping `#` comments and blank lines.
    pub fn samples(&self) -> impl Iterator<Item = &str> {
        self.body
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
    }

    pub fn sample_count(&self) -> usize {
        self.samples().count()
    }
}

/// Consumer of scraped batches.
///
/// The scrape loop owns one intake and calls [`deliver`](Self::deliver)
/// once per successful scrape. Errors are logged by the caller and never
/// stop scraping.
pub trait MetricsIntake: Send + Sync + 'static {
    fn deliver(&self, batch: ScrapedBatch) -> impl Future<Output = Result<()>> + Send;
}

impl MetricsIntake for mpsc::Sender<ScrapedBatch> {
    async fn deliver(&self, batch: ScrapedBatch) -> Result<()> {
        self.send(batch).await.map_err(|e| ReceiverError::Publish {
            key: e.0.job,
            message: "intake channel closed".to_string(),
        })
    }
}
