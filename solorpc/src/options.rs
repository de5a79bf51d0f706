//! Options for managers and streams.
//!
//! This module provides [`ManagerOptions`] and [`StreamOptions`]. Both are
//! plain values built with chained setters and fixed when the manager is
//! created.

use std::time::Duration;

use solorpc_core::{ReaderOptions, WriterOptions};

/// Capacity of a stream's inbound message queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1;

/// How long a canceled stream waits to send its Cancel packet.
pub const DEFAULT_CANCEL_TIMEOUT: Duration = Duration::from_millis(250);

/// Options for every stream a manager admits.
///
/// # Example
///
/// ```ignore
/// use solorpc::StreamOptions;
///
/// // Send every message as a single frame.
/// let opts = StreamOptions::new().split_size(-1);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StreamOptions {
    /// Maximum frame payload. `0` selects the default, negative disables
    /// splitting.
    pub(crate) split_size: isize,
    /// Reassembled messages buffered before the read loop blocks.
    pub(crate) queue_capacity: usize,
    /// Longest wait for the writer when sending Cancel. On expiry the
    /// connection is closed.
    pub(crate) cancel_timeout: Duration,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            split_size: 0,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            cancel_timeout: DEFAULT_CANCEL_TIMEOUT,
        }
    }
}

impl StreamOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum frame payload size.
    pub fn split_size(mut self, n: isize) -> Self {
        self.split_size = n;
        self
    }

    /// Set how many received messages may wait for the application.
    ///
    /// Values below one are raised to one.
    pub fn queue_capacity(mut self, n: usize) -> Self {
        self.queue_capacity = n.max(1);
        self
    }

    /// Set how long a cancellation may wait to send its Cancel packet
    /// before the whole connection is closed instead.
    pub fn cancel_timeout(mut self, timeout: Duration) -> Self {
        self.cancel_timeout = timeout;
        self
    }

    pub fn get_split_size(&self) -> isize {
        self.split_size
    }

    pub fn get_queue_capacity(&self) -> usize {
        self.queue_capacity
    }

    pub fn get_cancel_timeout(&self) -> Duration {
        self.cancel_timeout
    }
}

/// Options for a [`Manager`](crate::Manager).
#[derive(Clone, Copy, Debug, Default)]
pub struct ManagerOptions {
    pub(crate) reader: ReaderOptions,
    pub(crate) writer: WriterOptions,
    pub(crate) stream: StreamOptions,
    /// Close the connection after this long with no stream and no traffic.
    pub(crate) inactivity_timeout: Option<Duration>,
}

impl ManagerOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reader(mut self, opts: ReaderOptions) -> Self {
        self.reader = opts;
        self
    }

    pub fn writer(mut self, opts: WriterOptions) -> Self {
        self.writer = opts;
        self
    }

    pub fn stream(mut self, opts: StreamOptions) -> Self {
        self.stream = opts;
        self
    }

    /// Close the connection once it has been idle this long.
    ///
    /// Idle means no stream is live and no packet has arrived.
    pub fn inactivity_timeout(mut self, timeout: Duration) -> Self {
        self.inactivity_timeout = Some(timeout);
        self
    }

    pub fn get_stream(&self) -> &StreamOptions {
        &self.stream
    }

    pub fn get_inactivity_timeout(&self) -> Option<Duration> {
        self.inactivity_timeout
    }
}
