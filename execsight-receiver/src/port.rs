//! Port allocation for exporters configured without a port.

use std::net::{Ipv4Addr, TcpListener};

use crate::error::{ReceiverError, Result};

/// Source of a free TCP port.
pub trait PortAllocator: Send + Sync {
    fn allocate(&self) -> Result<u16>;
}

/// Asks the OS for an ephemeral port on the loopback interface.
///
/// The listener is closed before returning, so there is a window in which
/// another process may grab the port. Exporters that fail to bind simply
/// crash and go through the restart backoff.
#[derive(Debug, Clone, Copy, Default)]
pub struct EphemeralPortAllocator;

impl PortAllocator for EphemeralPortAllocator {
    fn allocate(&self) -> Result<u16> {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
            .map_err(|e| ReceiverError::Port(e.to_string()))?;
        let port = listener
            .local_addr()
            .map_err(|e| ReceiverError::Port(e.to_string()))?
            .port();

        tracing::debug!(port, "Allocated ephemeral port");
        Ok(port)
    }
}

/// Always hands out the same port.
#[derive(Debug, Clone, Copy)]
pub struct FixedPort(pub u16);

impl PortAllocator for FixedPort {
    fn allocate(&self) -> Result<u16> {
        if self.0 == 0 {
            return Err(ReceiverError::Port("fixed port must not be 0".to_string()));
        }
        Ok(self.0)
    }
}
