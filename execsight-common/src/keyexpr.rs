//! Key expressions used when publishing receiver output to Zenoh.
//!
//! ```text
//! <prefix>/<job>/metrics      scraped payloads
//! <prefix>/<job>/@/status     receiver status documents
//! ```

/// Default key expression prefix.
pub const KEY_PREFIX: &str = "execsight";

/// Builder for execsight key expressions.
#[derive(Debug, Clone)]
pub struct KeyExprBuilder {
    prefix: String,
}

impl Default for KeyExprBuilder {
    fn default() -> Self {
        Self::new(KEY_PREFIX)
    }
}

impl KeyExprBuilder {
    /// Create a builder with a custom prefix. Trailing slashes are dropped.
    pub fn new(prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        Self {
            prefix: prefix.trim_end_matches('/').to_string(),
        }
    }

    /// The configured prefix.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Key for scraped payloads of a job.
    ///
    /// # Example
    /// ```
    /// use execsight_common::keyexpr::KeyExprBuilder;
    ///
    /// let builder = KeyExprBuilder::default();
    /// assert_eq!(builder.metrics_key("mysqld"), "execsight/mysqld/metrics");
    /// ```
    pub fn metrics_key(&self, job: &str) -> String {
        format!("{}/{}/metrics", self.prefix, sanitize_job(job))
    }

    /// Key for the status document of a job.
    ///
    /// # Example
    /// ```
    /// use execsight_common::keyexpr::KeyExprBuilder;
    ///
    /// let builder = KeyExprBuilder::new("lab/exec");
    /// assert_eq!(builder.status_key("postgres/test"), "lab/exec/postgres/test/@/status");
    /// ```
    pub fn status_key(&self, job: &str) -> String {
        format!("{}/{}/@/status", self.prefix, sanitize_job(job))
    }
}

/// Replace characters Zenoh reserves in key expressions.
///
/// Slashes are kept so that hierarchical job names map onto key chunks;
/// empty chunks are collapsed.
pub fn sanitize_job(job: &str) -> String {
    job.split('/')
        .filter(|chunk| !chunk.is_empty())
        .map(|chunk| {
            chunk
                .chars()
                .map(|c| match c {
                    '*' | '$' | '?' | '#' | '@' => '_',
                    c if c.is_whitespace() => '_',
                    c => c,
                })
                .collect::<String>()
        })
        .collect::<Vec<_>>()
        .join("/")
}
