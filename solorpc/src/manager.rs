//! Connection manager: one live stream at a time over one transport.
//!
//! The manager owns the transport. A single read loop task reassembles
//! packets and routes them to the live stream; each admitted stream gets a
//! pump task that feeds it packets and watches its context.
//!
//! Admission uses a semaphore with two permits. The read loop holds one for
//! the manager's lifetime, leaving exactly one for a stream. Closing the
//! semaphore on termination wakes every caller waiting in
//! [`Manager::new_stream`].

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use solorpc_core::{Kind, Packet, Reader, Status, Writer};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{OwnedSemaphorePermit, Semaphore, mpsc};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::context::Context;
use crate::handler::Handler;
use crate::options::ManagerOptions;
use crate::signal::Signal;
use crate::stream::{BoxedWrite, SharedWriter, Stream};
use crate::Error;

type BoxedRead = Box<dyn AsyncRead + Send + Unpin>;

/// Total admission permits; the read loop keeps one.
const PERMITS: usize = 2;

/// Any bidirectional byte stream a manager can run over.
pub trait Transport: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> Transport for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

#[derive(Clone)]
struct Slot {
    id: u64,
    stream: Stream,
    packets: mpsc::Sender<Packet>,
}

struct State {
    current: Option<Slot>,
    /// Highest stream ID admitted so far, in either role.
    last_stream_id: u64,
    /// When the connection last became idle; `None` while a stream is live.
    idle_since: Option<Instant>,
}

struct Inner {
    writer: SharedWriter,
    sem: Arc<Semaphore>,
    done: Signal,
    closing: AtomicBool,
    /// Set once the semaphore is closed and the transport shut down.
    torn_down: AtomicBool,
    opts: ManagerOptions,
    handler: Option<Arc<dyn Handler>>,
    state: Mutex<State>,
    read_loop: Mutex<Option<JoinHandle<()>>>,
}

/// Runs streams over a transport, one at a time.
///
/// A manager without a handler only opens streams ([`Manager::new_stream`]).
/// A manager with a handler also accepts streams the peer invokes.
///
/// Must be created inside a tokio runtime.
pub struct Manager {
    inner: Arc<Inner>,
}

impl Manager {
    pub fn new<T: Transport>(transport: T) -> Self {
        Self::with_options(transport, ManagerOptions::default())
    }

    pub fn with_options<T: Transport>(transport: T, opts: ManagerOptions) -> Self {
        Self::start(transport, None, opts)
    }

    /// Create a manager that serves peer-invoked RPCs with `handler`.
    pub fn with_handler<T: Transport>(
        transport: T,
        handler: Arc<dyn Handler>,
        opts: ManagerOptions,
    ) -> Self {
        Self::start(transport, Some(handler), opts)
    }

    fn start<T: Transport>(
        transport: T,
        handler: Option<Arc<dyn Handler>>,
        opts: ManagerOptions,
    ) -> Self {
        let (rd, wr) = tokio::io::split(transport);
        let writer = Arc::new(Writer::with_options(Box::new(wr) as BoxedWrite, opts.writer));
        let reader = Reader::with_options(Box::new(rd) as BoxedRead, opts.reader);

        let sem = Arc::new(Semaphore::new(PERMITS));
        let lease = sem.clone().try_acquire_owned().ok();

        let inner = Arc::new(Inner {
            writer,
            sem,
            done: Signal::new(),
            closing: AtomicBool::new(false),
            torn_down: AtomicBool::new(false),
            opts,
            handler,
            state: Mutex::new(State {
                current: None,
                last_stream_id: 0,
                idle_since: Some(Instant::now()),
            }),
            read_loop: Mutex::new(None),
        });

        let handle = tokio::spawn(read_loop(inner.clone(), reader, lease));
        *lock(&inner.read_loop) = Some(handle);
        Self { inner }
    }

    /// Open a new stream once the previous one has finished.
    ///
    /// Waits for admission, racing manager termination and `ctx`. The
    /// stream is canceled when `ctx` ends.
    pub async fn new_stream(&self, ctx: &Context) -> Result<Stream, Error> {
        let inner = &self.inner;
        if let Some(err) = inner.done.err() {
            return Err(err);
        }
        if let Some(err) = ctx.err() {
            return Err(err);
        }

        let permit = tokio::select! {
            biased;
            err = inner.done.wait() => return Err(err),
            err = ctx.done() => return Err(err),
            permit = inner.sem.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => return Err(inner.closed_cause()),
            },
        };

        let id = {
            let mut state = inner.state();
            state.last_stream_id += 1;
            state.last_stream_id
        };
        Ok(inner.admit(id, permit, ctx.clone()))
    }

    /// Tear down the connection. Idempotent.
    ///
    /// Shuts down the transport, wakes every waiter, and terminates the live
    /// stream with [`Error::ManagerClosed`]. Concurrent callers return once
    /// the teardown has happened.
    pub async fn close(&self) -> Result<(), Error> {
        if self.inner.closing.swap(true, Ordering::AcqRel) {
            self.inner.done.wait().await;
            return Ok(());
        }
        self.inner.terminate(Error::ManagerClosed).await;
        if let Some(handle) = lock(&self.inner.read_loop).take() {
            handle.abort();
        }
        Ok(())
    }

    /// Returns true once the manager has terminated.
    pub fn is_closed(&self) -> bool {
        self.inner.done.is_set()
    }

    /// The termination cause, or `None` while running.
    pub fn err(&self) -> Option<Error> {
        self.inner.done.err()
    }

    /// Wait for the manager to terminate and return the cause.
    pub async fn closed(&self) -> Error {
        self.inner.done.wait().await
    }

    /// The manager's termination signal.
    pub fn done(&self) -> Signal {
        self.inner.done.clone()
    }

    /// ID of the live stream, if any.
    pub fn active_stream(&self) -> Option<u64> {
        self.inner.state().current.as_ref().map(|slot| slot.id)
    }
}

impl Drop for Manager {
    fn drop(&mut self) {
        self.inner.done.set(Error::ManagerClosed);
        if !self.inner.torn_down.swap(true, Ordering::AcqRel) {
            self.inner.sem.close();
            if let Some(slot) = self.inner.state().current.clone() {
                slot.stream.kill(self.inner.closed_cause());
            }
        }
        if let Some(handle) = lock(&self.inner.read_loop).take() {
            handle.abort();
        }
    }
}

impl fmt::Debug for Manager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Manager")
            .field("active_stream", &self.active_stream())
            .field("closed", &self.err())
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, State> {
        lock(&self.state)
    }

    fn closed_cause(&self) -> Error {
        self.done.err().unwrap_or(Error::ManagerClosed)
    }

    /// Install a stream as the live one and start its pump.
    fn admit(self: &Arc<Self>, id: u64, permit: OwnedSemaphorePermit, ctx: Context) -> Stream {
        let stream = Stream::new(id, self.writer.clone(), self.done.clone(), self.opts.stream);
        let (packets, rx) = mpsc::channel(1);
        {
            let mut state = self.state();
            state.current = Some(Slot {
                id,
                stream: stream.clone(),
                packets,
            });
            state.idle_since = None;
        }
        debug!(stream_id = id, "stream admitted");
        tokio::spawn(pump(self.clone(), stream.clone(), rx, ctx, permit));
        stream
    }

    /// Clear the live slot once its stream has finished.
    fn release(&self, id: u64) {
        let mut state = self.state();
        if state.current.as_ref().is_some_and(|slot| slot.id == id) {
            state.current = None;
            state.idle_since = Some(Instant::now());
        }
    }

    /// Terminate the manager with `cause` and tear it down.
    ///
    /// The first cause recorded wins, even when a stream set it directly on
    /// a transport failure. Teardown runs once.
    async fn terminate(&self, cause: Error) {
        self.done.set(cause);
        if self.torn_down.swap(true, Ordering::AcqRel) {
            return;
        }
        let cause = self.closed_cause();
        self.sem.close();
        let current = self.state().current.clone();
        if let Some(slot) = current {
            slot.stream.kill(cause);
        }
        if let Err(err) = self.writer.close().await {
            debug!(%err, "transport shutdown failed");
        }
    }

    async fn route(self: &Arc<Self>, pkt: Packet) -> Result<(), Error> {
        let (current, last) = {
            let mut state = self.state();
            if state.idle_since.is_some() {
                state.idle_since = Some(Instant::now());
            }
            (state.current.clone(), state.last_stream_id)
        };

        match current {
            Some(slot) if slot.id == pkt.id.stream => {
                if pkt.kind == Kind::Invoke {
                    return Err(Error::protocol(format!(
                        "duplicate invoke for stream {}",
                        slot.id
                    )));
                }
                if slot.packets.send(pkt).await.is_err() {
                    trace!(stream_id = slot.id, "stream finished before delivery");
                }
                Ok(())
            }
            current if pkt.kind == Kind::Invoke => self.accept(pkt, current, last).await,
            _ if pkt.id.stream <= last => {
                debug!(id = %pkt.id, kind = %pkt.kind, "dropping packet for finished stream");
                Ok(())
            }
            _ => Err(Error::protocol(format!(
                "packet for unknown stream {}",
                pkt.id.stream
            ))),
        }
    }

    /// Admit a peer-invoked stream and dispatch it to the handler.
    async fn accept(
        self: &Arc<Self>,
        pkt: Packet,
        previous: Option<Slot>,
        last: u64,
    ) -> Result<(), Error> {
        let Some(handler) = self.handler.clone() else {
            return Err(Error::protocol("invoke received without a handler"));
        };
        let id = pkt.id.stream;
        if id <= last {
            return Err(Error::protocol(format!("invoke for finished stream {}", id)));
        }
        let rpc = String::from_utf8(pkt.data.to_vec())
            .map_err(|_| Error::protocol("rpc name is not valid UTF-8"))?;

        if let Some(prev) = previous {
            debug!(stream_id = prev.id, "invoke preempts unfinished stream");
            prev.stream.kill(Error::Canceled);
        }

        let permit = tokio::select! {
            biased;
            err = self.done.wait() => return Err(err),
            permit = self.sem.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => return Err(self.closed_cause()),
            },
        };

        self.state().last_stream_id = id;
        let stream = self.admit(id, permit, Context::new());
        debug!(stream_id = id, rpc = %rpc, "inbound invoke");
        tokio::spawn(serve_rpc(handler, stream, rpc));
        Ok(())
    }

    /// Wait for the next packet, enforcing the inactivity timeout.
    async fn next_packet(&self, reader: &mut Reader<BoxedRead>) -> Result<Packet, Error> {
        let Some(limit) = self.opts.inactivity_timeout else {
            return Ok(reader.read_packet().await?);
        };

        let read = reader.read_packet();
        tokio::pin!(read);
        loop {
            let wake = match self.state().idle_since {
                Some(since) => since + limit,
                None => Instant::now() + limit,
            };
            tokio::select! {
                res = &mut read => return Ok(res?),
                _ = tokio::time::sleep_until(wake) => {
                    let expired = self
                        .state()
                        .idle_since
                        .is_some_and(|since| since.elapsed() >= limit);
                    if expired {
                        return Err(Error::InactivityTimeout);
                    }
                }
            }
        }
    }
}

async fn read_loop(
    inner: Arc<Inner>,
    mut reader: Reader<BoxedRead>,
    _lease: Option<OwnedSemaphorePermit>,
) {
    let cause = loop {
        let next = tokio::select! {
            biased;
            // a stream hit a transport failure
            err = inner.done.wait() => break err,
            next = inner.next_packet(&mut reader) => next,
        };
        let pkt = match next {
            Ok(pkt) => pkt,
            Err(err) => break err,
        };
        trace!(id = %pkt.id, kind = %pkt.kind, len = pkt.data.len(), "packet received");
        if let Err(err) = inner.route(pkt).await {
            break err;
        }
    };

    if cause.is_eof() || matches!(cause, Error::InactivityTimeout | Error::ManagerClosed) {
        debug!(%cause, "manager terminated");
    } else {
        warn!(%cause, "manager terminated");
    }
    inner.terminate(cause).await;
}

/// Feed packets to one stream until it finishes, then free the slot.
async fn pump(
    inner: Arc<Inner>,
    stream: Stream,
    mut packets: mpsc::Receiver<Packet>,
    ctx: Context,
    permit: OwnedSemaphorePermit,
) {
    loop {
        let pkt = tokio::select! {
            biased;
            err = inner.done.wait() => {
                stream.kill(err);
                break;
            }
            _ = stream.done() => break,
            err = ctx.done() => {
                stream.cancel(err).await;
                break;
            }
            pkt = packets.recv() => pkt,
        };
        let Some(pkt) = pkt else {
            break;
        };
        tokio::select! {
            biased;
            err = inner.done.wait() => {
                stream.kill(err);
                break;
            }
            err = ctx.done() => {
                stream.cancel(err).await;
                break;
            }
            res = stream.handle_packet(pkt) => {
                if let Err(err) = res {
                    warn!(stream_id = stream.id(), %err, "peer violated stream protocol");
                }
            }
        }
    }

    inner.release(stream.id());
    debug!(stream_id = stream.id(), cause = ?stream.err(), "stream finished");
    drop(permit);
}

/// Run a handler and finish the stream with its result.
async fn serve_rpc(handler: Arc<dyn Handler>, stream: Stream, rpc: String) {
    let task = tokio::spawn(handler.handle_rpc(stream.clone(), rpc));
    let result = match task.await {
        Ok(result) => result,
        Err(err) => Err(Error::Status(Status::internal(format!(
            "handler failed: {}",
            err
        )))),
    };

    let finished = match result {
        Ok(()) => stream.close().await,
        Err(err) => {
            debug!(stream_id = stream.id(), %err, "handler returned error");
            stream.send_error(&err).await
        }
    };
    if let Err(err) = finished {
        debug!(stream_id = stream.id(), %err, "failed to finish stream");
    }
}
