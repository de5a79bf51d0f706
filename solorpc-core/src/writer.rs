//! Buffered frame writer shared by everything that sends on a connection.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::BytesMut;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::frame::{Frame, append_frame};
use crate::packet::Packet;

/// Default flush threshold (4 KiB).
pub const DEFAULT_BUFFER_SIZE: usize = 4 * 1024;

/// Configuration for a [`Writer`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WriterOptions {
    /// Buffered bytes that trigger an immediate flush.
    pub buffer_size: usize,
}

impl Default for WriterOptions {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }
}

impl WriterOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the flush threshold in bytes.
    pub fn buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size;
        self
    }
}

struct State<W> {
    wr: W,
    buf: BytesMut,
}

/// Coalesces encoded frames and writes them to the transport.
///
/// All methods take `&self`; one internal lock serializes encoding and the
/// transport write so frames from different tasks never interleave.
pub struct Writer<W> {
    state: Mutex<State<W>>,
    size: usize,
    empty: AtomicBool,
    closed: CancellationToken,
}

impl<W> Writer<W> {
    pub fn new(wr: W) -> Self {
        Self::with_options(wr, WriterOptions::default())
    }

    pub fn with_options(wr: W, opts: WriterOptions) -> Self {
        Self {
            state: Mutex::new(State {
                wr,
                buf: BytesMut::with_capacity(opts.buffer_size),
            }),
            size: opts.buffer_size,
            empty: AtomicBool::new(true),
            closed: CancellationToken::new(),
        }
    }

    /// Best-effort check for buffered bytes. Advisory only.
    pub fn is_empty(&self) -> bool {
        self.empty.load(Ordering::Acquire)
    }

    /// Returns true once [`Writer::close`] has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}

impl<W: AsyncWrite + Unpin> Writer<W> {
    /// Buffer one frame, flushing if the buffer reached its threshold.
    pub async fn write_frame(&self, fr: &Frame) -> io::Result<()> {
        let mut state = self.state.lock().await;
        if self.closed.is_cancelled() {
            return Err(closed_error());
        }
        append_frame(&mut state.buf, fr);
        self.empty.store(false, Ordering::Release);
        if state.buf.len() >= self.size {
            self.flush_locked(&mut state).await?;
        }
        Ok(())
    }

    /// Buffer a whole packet as a single `done` frame, without splitting.
    pub async fn write_packet(&self, pkt: &Packet) -> io::Result<()> {
        let fr = Frame {
            data: pkt.data.clone(),
            id: pkt.id,
            kind: pkt.kind,
            done: true,
            control: false,
        };
        self.write_frame(&fr).await
    }

    /// Write any buffered bytes to the transport.
    pub async fn flush(&self) -> io::Result<()> {
        let mut state = self.state.lock().await;
        self.flush_locked(&mut state).await
    }

    async fn flush_locked(&self, state: &mut State<W>) -> io::Result<()> {
        if state.buf.is_empty() {
            return Ok(());
        }
        let State { wr, buf } = state;
        tokio::select! {
            res = async {
                wr.write_all(&buf[..]).await?;
                wr.flush().await
            } => res?,
            _ = self.closed.cancelled() => return Err(closed_error()),
        }
        buf.clear();
        self.empty.store(true, Ordering::Release);
        Ok(())
    }

    /// Stop accepting writes and shut down the transport's write side.
    ///
    /// A write blocked on the transport is abandoned with a `BrokenPipe`
    /// error. Buffered bytes are discarded.
    pub async fn close(&self) -> io::Result<()> {
        self.closed.cancel();
        let mut state = self.state.lock().await;
        state.buf.clear();
        self.empty.store(true, Ordering::Release);
        state.wr.shutdown().await
    }
}

fn closed_error() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "writer closed")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{Id, Kind, parse_frame};
    use bytes::Bytes;
    use std::sync::Arc;
    use tokio::io::AsyncReadExt;

    fn message(data: &'static [u8]) -> Frame {
        Frame {
            data: Bytes::from_static(data),
            id: Id::new(1, 1),
            kind: Kind::Message,
            done: false,
            control: false,
        }
    }

    #[tokio::test]
    async fn test_buffers_until_flush() {
        let wr = Writer::new(Vec::new());
        wr.write_frame(&message(b"abc")).await.unwrap();
        assert!(!wr.is_empty());
        assert!(wr.state.lock().await.wr.is_empty());

        wr.flush().await.unwrap();
        assert!(wr.is_empty());
        let out = wr.state.lock().await.wr.clone();
        let (rest, fr) = parse_frame(&out).unwrap().unwrap();
        assert!(rest.is_empty());
        assert_eq!(fr, message(b"abc"));
    }

    #[tokio::test]
    async fn test_flushes_at_threshold() {
        let wr = Writer::with_options(Vec::new(), WriterOptions::new().buffer_size(8));
        wr.write_frame(&message(b"0123456789")).await.unwrap();
        assert!(wr.is_empty());
        assert!(!wr.state.lock().await.wr.is_empty());
    }

    #[tokio::test]
    async fn test_flush_empty_is_noop() {
        let wr = Writer::new(Vec::new());
        wr.flush().await.unwrap();
        assert!(wr.state.lock().await.wr.is_empty());
    }

    #[tokio::test]
    async fn test_write_packet_is_single_done_frame() {
        let wr = Writer::new(Vec::new());
        let pkt = Packet::new(Id::new(2, 4), Kind::Close, Bytes::new());
        wr.write_packet(&pkt).await.unwrap();
        wr.flush().await.unwrap();
        let out = wr.state.lock().await.wr.clone();
        let (_, fr) = parse_frame(&out).unwrap().unwrap();
        assert!(fr.done);
        assert_eq!(fr.kind, Kind::Close);
        assert_eq!(fr.id, Id::new(2, 4));
    }

    #[tokio::test]
    async fn test_concurrent_writers_do_not_interleave() {
        let (tx, mut rx) = tokio::io::duplex(64 * 1024);
        let wr = Arc::new(Writer::with_options(tx, WriterOptions::new().buffer_size(0)));

        let mut tasks = Vec::new();
        for i in 0..8u64 {
            let wr = wr.clone();
            tasks.push(tokio::spawn(async move {
                let fr = Frame {
                    data: Bytes::from(vec![i as u8; 300]),
                    id: Id::new(1, i + 1),
                    kind: Kind::Message,
                    done: true,
                    control: false,
                };
                wr.write_frame(&fr).await.unwrap();
            }));
        }
        for t in tasks {
            t.await.unwrap();
        }
        wr.close().await.unwrap();

        let mut out = Vec::new();
        rx.read_to_end(&mut out).await.unwrap();
        let mut rest = &out[..];
        let mut count = 0;
        while let Some((next, fr)) = parse_frame(rest).unwrap() {
            let tag = fr.data[0];
            assert!(fr.data.iter().all(|b| *b == tag));
            rest = next;
            count += 1;
        }
        assert_eq!(count, 8);
    }

    #[tokio::test]
    async fn test_write_after_close_fails() {
        let (tx, _rx) = tokio::io::duplex(1024);
        let wr = Writer::new(tx);
        wr.close().await.unwrap();
        assert!(wr.is_closed());
        let err = wr.write_frame(&message(b"x")).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }
}
