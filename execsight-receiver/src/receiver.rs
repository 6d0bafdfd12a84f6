//! Receiver lifecycle.
//!
//! An [`ExecReceiver`] ties one supervised exporter to one scrape loop. The
//! two run as independent tasks and share nothing but the port number,
//! which is settled before either starts.

use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::config::ReceiverConfig;
use crate::error::{ReceiverError, Result};
use crate::intake::MetricsIntake;
use crate::port::{EphemeralPortAllocator, PortAllocator};
use crate::scrape::{ScrapeCoordinator, ScrapeTarget};
use crate::subprocess::{ProcessStatus, Supervisor, SupervisorEvent};

/// Extra time allowed on top of the termination grace before tasks are aborted.
const SHUTDOWN_SLACK: Duration = Duration::from_secs(3);

/// A Prometheus exporter run as a subprocess and scraped on an interval.
pub struct ExecReceiver<I> {
    config: ReceiverConfig,
    intake: Option<I>,
    allocator: Box<dyn PortAllocator>,
    events: Option<mpsc::UnboundedSender<SupervisorEvent>>,
    port: Option<u16>,
    status: Option<watch::Receiver<ProcessStatus>>,
    shutdown: Option<watch::Sender<bool>>,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}

impl<I: MetricsIntake> ExecReceiver<I> {
    /// Create a receiver. Fails on an invalid config, nothing is started.
    pub fn new(config: ReceiverConfig, intake: I) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            config,
            intake: Some(intake),
            allocator: Box::new(EphemeralPortAllocator),
            events: None,
            port: None,
            status: None,
            shutdown: None,
            tasks: Vec::new(),
        })
    }

    /// Use a different source of ports when the config asks for auto-assignment.
    pub fn with_port_allocator(mut self, allocator: impl PortAllocator + 'static) -> Self {
        self.allocator = Box::new(allocator);
        self
    }

    /// Forward supervisor events to `events`.
    pub fn with_events(mut self, events: mpsc::UnboundedSender<SupervisorEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn config(&self) -> &ReceiverConfig {
        &self.config
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Port the exporter runs on, once started.
    pub fn port(&self) -> Option<u16> {
        self.port
    }

    /// Supervisor status, once started.
    pub fn status(&self) -> Option<watch::Receiver<ProcessStatus>> {
        self.status.clone()
    }

    /// Latest supervisor snapshot, once started.
    pub fn process_status(&self) -> Option<ProcessStatus> {
        self.status.as_ref().map(|status| status.borrow().clone())
    }

    pub fn is_running(&self) -> bool {
        self.tasks.iter().any(|(_, task)| !task.is_finished())
    }

    /// Settle the port, then spawn the supervisor and the scrape loop.
    ///
    /// Returns the port the exporter is launched on.
    pub async fn start(&mut self) -> Result<u16> {
        let Some(intake) = self.intake.take() else {
            return Err(ReceiverError::config(format!(
                "Receiver '{}' already started",
                self.config.name
            )));
        };

        let port = match self.config.port {
            0 => self.allocator.allocate()?,
            port => port,
        };

        let job = self.config.job_name();
        let scraper = ScrapeCoordinator::new(
            ScrapeTarget::new(&job, port, &self.config.metrics_path),
            self.config.scrape_interval(),
            self.config.scrape_timeout(),
            intake,
        )?;

        let mut supervisor = Supervisor::new(
            self.config.subprocess(),
            port,
            self.config.restart.policy(),
            self.config.restart.termination_grace(),
        );
        if let Some(events) = self.events.clone() {
            supervisor = supervisor.with_events(events);
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        self.status = Some(supervisor.status());
        self.tasks
            .push(("supervisor", tokio::spawn(supervisor.run(shutdown_rx.clone()))));
        self.tasks.push(("scraper", tokio::spawn(scraper.run(shutdown_rx))));
        self.shutdown = Some(shutdown_tx);
        self.port = Some(port);

        tracing::info!(receiver = %self.config.name, job = %job, port, "Receiver started");
        Ok(port)
    }

    /// Stop the child process and both loops.
    ///
    /// Waits at most the termination grace plus a few seconds; tasks still
    /// running after that are aborted.
    pub async fn shutdown(&mut self) {
        let Some(shutdown) = self.shutdown.take() else {
            return;
        };
        let _ = shutdown.send(true);

        let limit = self.config.restart.termination_grace() + SHUTDOWN_SLACK;
        for (task_name, mut task) in self.tasks.drain(..) {
            match tokio::time::timeout(limit, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::error!(receiver = %self.config.name, task = task_name, error = %e, "Task failed");
                }
                Err(_) => {
                    tracing::warn!(receiver = %self.config.name, task = task_name, "Task did not stop in time, aborting");
                    task.abort();
                }
            }
        }

        tracing::info!(receiver = %self.config.name, "Receiver stopped");
    }
}
