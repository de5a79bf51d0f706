//! One-shot broadcast completion events.

use std::fmt;
use std::sync::{Arc, OnceLock};

use tokio_util::sync::CancellationToken;

use crate::Error;

/// A completion event carrying the error that caused it.
///
/// The first [`Signal::set`] wins; later calls are ignored. Any number of
/// tasks can wait on a clone of the signal.
#[derive(Clone, Default)]
pub struct Signal {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    cause: OnceLock<Error>,
    fired: CancellationToken,
}

impl Signal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the signal. Returns false if it was already set.
    pub fn set(&self, cause: Error) -> bool {
        if self.inner.cause.set(cause).is_err() {
            return false;
        }
        self.inner.fired.cancel();
        true
    }

    /// Returns true once the signal has been set.
    pub fn is_set(&self) -> bool {
        self.inner.fired.is_cancelled()
    }

    /// The recorded cause, if set.
    pub fn err(&self) -> Option<Error> {
        self.inner.cause.get().cloned()
    }

    /// Wait until the signal is set and return its cause.
    pub async fn wait(&self) -> Error {
        self.inner.fired.cancelled().await;
        // the cause is stored before the token fires
        self.err().unwrap_or(Error::Canceled)
    }
}

impl fmt::Debug for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("cause", &self.inner.cause.get())
            .finish()
    }
}
