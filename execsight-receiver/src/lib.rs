//! execsight receiver
//!
//! Runs Prometheus exporters as supervised subprocesses and scrapes them:
//!
//! - [`subprocess`] - Command formatting, restart backoff, process running and the supervisor loop
//! - [`scrape`] - Periodic HTTP scraping of the exporter
//! - [`intake`] - Destination for scraped payloads
//! - [`publisher`] - Zenoh-backed intake
//! - [`receiver`] - Lifecycle of one supervised exporter
//! - [`status`] - Status documents published to Zenoh
//! - [`port`] - Port auto-assignment
//! - [`config`] - Configuration
//!
//! # Example
//!
//! ```ignore
//! use execsight_receiver::{ExecReceiver, ReceiverConfig};
//!
//! let (tx, mut rx) = tokio::sync::mpsc::channel(16);
//! let config = ReceiverConfig::new(
//!     "prometheus_exec/mysqld",
//!     "mysqld_exporter --web.listen-address=:{{port}}",
//! );
//!
//! let mut receiver = ExecReceiver::new(config, tx)?;
//! let port = receiver.start().await?;
//!
//! while let Some(batch) = rx.recv().await {
//!     println!("{} samples from :{}", batch.sample_count(), port);
//! }
//! ```

pub mod args;
pub mod config;
pub mod error;
pub mod intake;
pub mod port;
pub mod publisher;
pub mod receiver;
pub mod scrape;
pub mod shutdown;
pub mod status;
pub mod subprocess;

pub use args::ReceiverArgs;
pub use config::{ExecBridgeConfig, ExecConfig, ReceiverConfig, RestartConfig};
pub use error::{ReceiverError, Result};
pub use intake::{MetricsIntake, ScrapedBatch};
pub use port::{EphemeralPortAllocator, FixedPort, PortAllocator};
pub use publisher::ZenohIntake;
pub use receiver::ExecReceiver;
pub use scrape::{ScrapeCoordinator, ScrapeTarget};
pub use status::{ReceiverStatus, StatusPublisher};
pub use subprocess::{ProcessStatus, Supervisor, SupervisorEvent, SupervisorState};
