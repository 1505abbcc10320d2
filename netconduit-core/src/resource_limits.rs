//! Connection limits for preventing resource exhaustion

use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Resource limit errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum ResourceLimitError {
    #[error("maximum connections reached ({max})")]
    MaxConnectionsReached { max: usize },
}

/// Caps the number of live connections on a server
#[derive(Debug, Clone)]
pub struct ConnectionLimiter {
    semaphore: Arc<Semaphore>,
    max_connections: usize,
}

impl ConnectionLimiter {
    #[must_use]
    pub fn new(max_connections: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_connections)),
            max_connections,
        }
    }

    /// Try to acquire a connection slot
    /// Returns a permit that must be held for the connection's lifetime
    pub fn try_acquire(&self) -> Result<ConnectionPermit, ResourceLimitError> {
        match self.semaphore.clone().try_acquire_owned() {
            Ok(permit) => Ok(ConnectionPermit { _permit: permit }),
            Err(_) => Err(ResourceLimitError::MaxConnectionsReached {
                max: self.max_connections,
            }),
        }
    }

    /// Get current available connection slots
    #[must_use]
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    #[must_use]
    pub fn max_connections(&self) -> usize {
        self.max_connections
    }
}

/// Permit for holding a connection slot
#[derive(Debug)]
pub struct ConnectionPermit {
    _permit: OwnedSemaphorePermit,
}
