use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use super::ConversionError;

/// RAII guard that releases a converter slot when dropped.
///
/// Callers must hold this until the child process has exited.
pub struct Permit {
    /// Owned permit; dropping this struct releases it back to the semaphore.
    #[allow(dead_code)]
    permit: OwnedSemaphorePermit,
}

impl std::fmt::Debug for Permit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Permit").finish()
    }
}

/// Bounds how many converter processes run at once.
///
/// Requests past the limit queue on the semaphore for at most `queue_timeout`,
/// then fail with [`ConversionError::Busy`].
#[derive(Debug, Clone)]
pub struct Admission {
    semaphore: Arc<Semaphore>,
    queue_timeout: Duration,
}

impl Admission {
    /// `capacity` is clamped to `1..=Semaphore::MAX_PERMITS`.
    pub fn new(capacity: usize, queue_timeout: Duration) -> Self {
        let capacity = capacity.clamp(1, Semaphore::MAX_PERMITS);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            queue_timeout,
        }
    }

    /// Wait for a free slot.
    pub async fn acquire(&self) -> Result<Permit, ConversionError> {
        let acquire = Arc::clone(&self.semaphore).acquire_owned();
        match tokio::time::timeout(self.queue_timeout, acquire).await {
            Ok(Ok(permit)) => Ok(Permit { permit }),
            // The semaphore is never closed, but treat it like exhaustion.
            Ok(Err(_)) | Err(_) => Err(ConversionError::Busy {
                waited: self.queue_timeout,
            }),
        }
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }
}
