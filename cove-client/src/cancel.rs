//! A cancellation signal callers can attach to requests.

use std::sync::Arc;

use tokio::sync::Semaphore;

/// A multi-producer, multi-consumer cancellation signal.
///
/// Features:
///
/// - Clone to get another handle; all clones observe the same signal.
/// - Consumers see signals that were sent before they started waiting.
/// - Cancelling more than once is harmless.
///
/// The underlying implementation (ab)uses the fact that calling [`acquire`]
/// on a [`Semaphore`] with 0 permits only returns once the [`Semaphore`] has
/// been closed: closing is "cancel", an [`AcquireError`] is "cancelled".
///
/// [`acquire`]: Semaphore::acquire
/// [`AcquireError`]: tokio::sync::AcquireError
#[derive(Clone, Debug)]
pub struct CancelSignal {
    inner: Arc<Semaphore>,
}

impl CancelSignal {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Semaphore::new(0)),
        }
    }

    /// Fire the signal. All pending and future `cancelled()` calls resolve.
    pub fn cancel(&self) {
        self.inner.close()
    }

    /// Wait for the signal to fire.
    /// If it already fired, this returns immediately.
    pub async fn cancelled(&self) {
        self.inner
            .acquire()
            .await
            .map_err(|_| ())
            .expect_err("Shouldn't've been able to acquire a permit")
    }

    /// Immediately returns whether the signal has fired.
    pub fn is_cancelled(&self) -> bool {
        self.inner.is_closed()
    }
}
