//! A single RPC's bidirectional message stream.
//!
//! A [`Stream`] owns the send and receive state of one RPC. Sends are written
//! straight to the connection's shared writer; received packets are pushed
//! into the stream by the manager's read loop and queued until the
//! application asks for them.
//!
//! Termination is one-shot. The first event that ends the stream (local
//! close, local error, cancellation, or a terminal packet from the peer)
//! records a cause that every later operation observes.

use std::fmt;
use std::io;
use std::sync::{Arc, OnceLock};

use bytes::Bytes;
use solorpc_core::{Id, Kind, Packet, Writer, marshal_error, split, unmarshal_error};
use tokio::io::AsyncWrite;
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, warn};

use crate::encoding::Encoding;
use crate::options::StreamOptions;
use crate::signal::Signal;
use crate::Error;

pub(crate) type BoxedWrite = Box<dyn AsyncWrite + Send + Unpin>;
pub(crate) type SharedWriter = Arc<Writer<BoxedWrite>>;

/// What the receive side reports once the stream has terminated.
#[derive(Clone, Debug)]
pub(crate) enum RecvEnd {
    /// Deliver queued messages, then end of stream.
    Eof,
    /// Deliver queued messages, then this error.
    Drain(Error),
    /// Fail at once, discarding queued messages.
    Fail(Error),
}

struct Termination {
    cause: Error,
    /// What sends report, when it differs from `cause`.
    send: Option<Error>,
    recv: RecvEnd,
}

struct Inner {
    id: u64,
    opts: StreamOptions,
    writer: SharedWriter,
    /// The connection's termination signal. Set on transport failure.
    conn: Signal,
    /// Serializes packet writes. Holds the last message ID used.
    write: Mutex<u64>,
    term: OnceLock<Termination>,
    done: Signal,
    send_closed: Signal,
    /// The peer sent CloseSend, Close or Error.
    recv_closed: Signal,
    queue_tx: mpsc::Sender<Bytes>,
    queue_rx: Mutex<mpsc::Receiver<Bytes>>,
}

/// One RPC on a connection.
///
/// Cloning a `Stream` yields another handle to the same stream, so one task
/// can send while another receives.
#[derive(Clone)]
pub struct Stream {
    inner: Arc<Inner>,
}

impl Stream {
    pub(crate) fn new(id: u64, writer: SharedWriter, conn: Signal, opts: StreamOptions) -> Self {
        let (queue_tx, queue_rx) = mpsc::channel(opts.queue_capacity.max(1));
        Self {
            inner: Arc::new(Inner {
                id,
                opts,
                writer,
                conn,
                write: Mutex::new(0),
                term: OnceLock::new(),
                done: Signal::new(),
                send_closed: Signal::new(),
                recv_closed: Signal::new(),
                queue_tx,
                queue_rx: Mutex::new(queue_rx),
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Returns true once the stream has terminated.
    pub fn is_done(&self) -> bool {
        self.inner.term.get().is_some()
    }

    /// The termination cause, or `None` while the stream is live.
    pub fn err(&self) -> Option<Error> {
        self.inner.term.get().map(|t| t.cause.clone())
    }

    /// Wait for the stream to terminate and return the cause.
    pub async fn done(&self) -> Error {
        self.inner.done.wait().await
    }

    /// Returns true once this side has sent CloseSend.
    pub fn is_send_closed(&self) -> bool {
        self.inner.send_closed.is_set()
    }

    /// Returns true once the peer will send no more messages.
    pub fn is_recv_closed(&self) -> bool {
        self.inner.recv_closed.is_set()
    }

    /// Record the termination cause. Returns false if already terminated.
    pub(crate) fn terminate(&self, cause: Error, recv: RecvEnd) -> bool {
        self.terminate_with(cause, None, recv)
    }

    fn terminate_with(&self, cause: Error, send: Option<Error>, recv: RecvEnd) -> bool {
        let term = Termination {
            cause: cause.clone(),
            send,
            recv,
        };
        if self.inner.term.set(term).is_err() {
            return false;
        }
        debug!(stream_id = self.inner.id, %cause, "stream terminated");
        self.inner.done.set(cause);
        true
    }

    /// Terminate without telling the peer.
    pub(crate) fn kill(&self, cause: Error) {
        self.terminate(cause.clone(), RecvEnd::Fail(cause));
    }

    fn check_send(&self) -> Result<(), Error> {
        if let Some(term) = self.inner.term.get() {
            return Err(term.send.clone().unwrap_or_else(|| term.cause.clone()));
        }
        if self.inner.send_closed.is_set() {
            return Err(Error::SendClosed);
        }
        Ok(())
    }

    /// Write one packet under the write lock.
    ///
    /// When `guarded`, the packet is abandoned at the next frame boundary if
    /// the stream terminates or send is closed mid-packet. The peer discards
    /// the partial packet once a packet with a higher ID arrives.
    async fn write_locked(
        &self,
        last: &mut u64,
        kind: Kind,
        data: Bytes,
        guarded: bool,
    ) -> Result<(), Error> {
        *last += 1;
        let pkt = Packet::new(Id::new(self.inner.id, *last), kind, data);
        for fr in split(pkt, self.inner.opts.split_size) {
            if guarded {
                self.check_send()?;
            }
            if let Err(err) = self.inner.writer.write_frame(&fr).await {
                return Err(self.write_failed(err));
            }
        }
        Ok(())
    }

    async fn flush_locked(&self) -> Result<(), Error> {
        self.inner
            .writer
            .flush()
            .await
            .map_err(|err| self.write_failed(err))
    }

    /// A failed transport write breaks the whole connection.
    ///
    /// The connection signal is set before the stream terminates, so the
    /// admission slot is never handed out over a broken transport.
    fn write_failed(&self, err: io::Error) -> Error {
        let err = Error::from(err);
        self.inner.conn.set(err.clone());
        self.kill(err.clone());
        self.err().unwrap_or(err)
    }

    /// Write a packet of `kind` without flushing.
    pub async fn raw_write(&self, kind: Kind, data: Bytes) -> Result<(), Error> {
        let mut last = self.inner.write.lock().await;
        self.check_send()?;
        self.write_locked(&mut last, kind, data, true).await
    }

    /// Flush buffered packets to the transport.
    pub async fn raw_flush(&self) -> Result<(), Error> {
        let _last = self.inner.write.lock().await;
        self.flush_locked().await
    }

    /// Receive the next message payload.
    ///
    /// Returns `Ok(None)` at end of stream, including once the peer has sent
    /// CloseSend and every earlier message was received. After a local
    /// termination the cause is returned; after the peer ends the stream,
    /// messages already queued are delivered first.
    pub async fn raw_recv(&self) -> Result<Option<Bytes>, Error> {
        let mut queue = self.inner.queue_rx.lock().await;
        if let Some(term) = self.inner.term.get() {
            return finish_recv(&mut queue, term);
        }
        tokio::select! {
            biased;
            data = queue.recv() => Ok(data),
            _ = self.inner.done.wait() => match self.inner.term.get() {
                Some(term) => finish_recv(&mut queue, term),
                None => Ok(None),
            },
            // everything the peer sent before CloseSend is already queued
            _ = self.inner.recv_closed.wait() => Ok(queue.try_recv().ok()),
        }
    }

    /// Marshal `msg` with `enc`, send it and flush.
    pub async fn msg_send<M, E>(&self, msg: &M, enc: &E) -> Result<(), Error>
    where
        E: Encoding<M> + ?Sized,
    {
        let data = enc.marshal(msg)?;
        let mut last = self.inner.write.lock().await;
        self.check_send()?;
        self.write_locked(&mut last, Kind::Message, data, true).await?;
        self.flush_locked().await
    }

    /// Receive the next message and unmarshal it with `enc`.
    pub async fn msg_recv<M, E>(&self, enc: &E) -> Result<Option<M>, Error>
    where
        E: Encoding<M> + ?Sized,
    {
        match self.raw_recv().await? {
            Some(data) => enc.unmarshal(&data).map(Some),
            None => Ok(None),
        }
    }

    /// Send Close and terminate the stream. A no-op once terminated.
    pub async fn close(&self) -> Result<(), Error> {
        let mut last = self.inner.write.lock().await;
        if self.is_done() {
            return Ok(());
        }
        self.write_locked(&mut last, Kind::Close, Bytes::new(), false)
            .await?;
        self.flush_locked().await?;
        self.terminate(Error::Closed, RecvEnd::Fail(Error::Closed));
        Ok(())
    }

    /// Send CloseSend. Receiving continues until the peer finishes.
    ///
    /// Once both sides have closed send, the stream terminates.
    pub async fn close_send(&self) -> Result<(), Error> {
        let mut last = self.inner.write.lock().await;
        if self.is_done() || self.inner.send_closed.is_set() {
            return Ok(());
        }
        self.write_locked(&mut last, Kind::CloseSend, Bytes::new(), false)
            .await?;
        self.flush_locked().await?;
        self.inner.send_closed.set(Error::SendClosed);
        if self.inner.recv_closed.is_set() {
            self.terminate(Error::BothClosed, RecvEnd::Eof);
        }
        Ok(())
    }

    /// Send `err` to the peer and terminate. A no-op once terminated.
    pub async fn send_error(&self, err: &Error) -> Result<(), Error> {
        let mut last = self.inner.write.lock().await;
        if self.is_done() {
            return Ok(());
        }
        let data = marshal_error(err.wire_code(), &err.to_string());
        self.write_locked(&mut last, Kind::Error, data, false).await?;
        self.flush_locked().await?;
        self.terminate(Error::ErrorSent, RecvEnd::Fail(Error::ErrorSent));
        Ok(())
    }

    /// Terminate with `cause` at once, then tell the peer with a Cancel packet.
    ///
    /// A packet being written concurrently stops at its next frame boundary.
    /// If the Cancel packet cannot be written within
    /// [`StreamOptions::cancel_timeout`], the writer is wedged and the
    /// connection is closed instead.
    pub async fn cancel(&self, cause: Error) {
        if !self.terminate(cause.clone(), RecvEnd::Fail(cause)) {
            return;
        }
        let sent = tokio::time::timeout(self.inner.opts.cancel_timeout, async {
            let mut last = self.inner.write.lock().await;
            self.write_locked(&mut last, Kind::Cancel, Bytes::new(), false)
                .await?;
            self.flush_locked().await
        })
        .await;
        match sent {
            Ok(Ok(())) => {}
            Ok(Err(err)) => debug!(stream_id = self.inner.id, %err, "failed to send cancel"),
            Err(_) => {
                warn!(stream_id = self.inner.id, "timed out sending cancel, closing connection");
                let err = io::Error::new(io::ErrorKind::TimedOut, "timed out sending cancel");
                self.inner.conn.set(err.into());
            }
        }
    }

    /// Cancel with [`Error::Canceled`].
    pub async fn send_cancel(&self) {
        self.cancel(Error::Canceled).await
    }

    /// Apply a packet received from the peer.
    ///
    /// Blocks while the inbound queue is full, which in turn stalls the
    /// connection's read loop.
    pub(crate) async fn handle_packet(&self, pkt: Packet) -> Result<(), Error> {
        match pkt.kind {
            Kind::Invoke => {
                let err = Error::protocol("invoke on existing stream");
                self.kill(err.clone());
                Err(err)
            }
            Kind::Message => {
                if self.is_done() {
                    return Ok(());
                }
                if self.inner.recv_closed.is_set() {
                    return Err(Error::protocol("message send after SendClose"));
                }
                tokio::select! {
                    biased;
                    _ = self.inner.done.wait() => {}
                    _ = self.inner.queue_tx.send(pkt.data) => {}
                }
                Ok(())
            }
            Kind::Error => {
                let err = Error::Status(unmarshal_error(&pkt.data));
                self.terminate_with(
                    err.clone(),
                    Some(Error::RemoteClosed),
                    RecvEnd::Drain(err),
                );
                self.inner.recv_closed.set(Error::RemoteClosed);
                Ok(())
            }
            Kind::Cancel => {
                self.terminate(Error::Canceled, RecvEnd::Eof);
                Ok(())
            }
            Kind::Close => {
                self.terminate(Error::RemoteClosed, RecvEnd::Eof);
                self.inner.recv_closed.set(Error::RemoteClosed);
                Ok(())
            }
            Kind::CloseSend => {
                self.inner.recv_closed.set(Error::RemoteClosed);
                if self.inner.send_closed.is_set() {
                    self.terminate(Error::BothClosed, RecvEnd::Eof);
                }
                Ok(())
            }
            Kind::Reserved(kind) => {
                debug!(stream_id = self.inner.id, kind, "ignoring reserved packet kind");
                Ok(())
            }
        }
    }
}

fn finish_recv(
    queue: &mut mpsc::Receiver<Bytes>,
    term: &Termination,
) -> Result<Option<Bytes>, Error> {
    match &term.recv {
        RecvEnd::Fail(err) => Err(err.clone()),
        RecvEnd::Eof => Ok(queue.try_recv().ok()),
        RecvEnd::Drain(err) => match queue.try_recv() {
            Ok(data) => Ok(Some(data)),
            Err(_) => Err(err.clone()),
        },
    }
}

impl fmt::Debug for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stream")
            .field("id", &self.inner.id)
            .field("done", &self.err())
            .field("send_closed", &self.is_send_closed())
            .field("recv_closed", &self.is_recv_closed())
            .finish()
    }
}
