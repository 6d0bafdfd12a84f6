//! Zenoh-backed metrics intake.

use std::sync::Arc;

use execsight_common::{Format, KeyExprBuilder, encode};
use zenoh::bytes::Encoding;

use crate::error::{ReceiverError, Result};
use crate::intake::{MetricsIntake, ScrapedBatch};

/// Publishes scraped batches to `{prefix}/{job}/metrics`.
///
/// Cheap to clone; all clones share the same session.
#[derive(Clone, Debug)]
pub struct ZenohIntake {
    session: Arc<zenoh::Session>,
    keys: KeyExprBuilder,
    format: Format,
}

impl ZenohIntake {
    pub fn new(session: Arc<zenoh::Session>, key_prefix: impl Into<String>, format: Format) -> Self {
        Self {
            session,
            keys: KeyExprBuilder::new(key_prefix),
            format,
        }
    }

    /// Key expression builder for this intake's prefix.
    pub fn keys(&self) -> &KeyExprBuilder {
        &self.keys
    }

    pub fn format(&self) -> Format {
        self.format
    }

    /// Publish bytes already encoded as `format` to a key.
    ///
    /// The Zenoh encoding is set from the format's MIME type.
    pub async fn publish_raw(&self, key: &str, payload: Vec<u8>, format: Format) -> Result<()> {
        self.session
            .put(key, payload)
            .encoding(Encoding::from(format.mime_type()))
            .await
            .map_err(|e| ReceiverError::Publish {
                key: key.to_string(),
                message: e.to_string(),
            })
    }

    /// Publish a JSON value to a key (status messages).
    pub async fn publish_json<T: serde::Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let payload =
            serde_json::to_vec(value).map_err(|e| ReceiverError::Serialization(e.to_string()))?;
        self.publish_raw(key, payload, Format::Json).await
    }
}

impl MetricsIntake for ZenohIntake {
    async fn deliver(&self, batch: ScrapedBatch) -> Result<()> {
        let key = self.keys.metrics_key(&batch.job);
        let payload = encode(&batch, self.format)?;

        tracing::trace!(
            key = %key,
            samples = batch.sample_count(),
            bytes = payload.len(),
            "Publishing scrape"
        );
        self.publish_raw(&key, payload, self.format).await
    }
}
