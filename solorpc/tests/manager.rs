//! Manager behavior against a hand-driven peer.

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::Poll;
use std::time::Duration;

use bytes::Bytes;
use solorpc::solorpc_core::{Reader, Writer};
use solorpc::{Context, Error, Id, Kind, Manager, ManagerOptions, Packet, RawEncoding};
use tokio::io::{AsyncRead, AsyncWrite, DuplexStream, ReadBuf, ReadHalf, WriteHalf};
use tokio::time::timeout;

struct Peer {
    rd: Reader<ReadHalf<DuplexStream>>,
    wr: Writer<WriteHalf<DuplexStream>>,
}

impl Peer {
    async fn send(&self, stream: u64, message: u64, kind: Kind, data: &'static [u8]) {
        let pkt = Packet::new(Id::new(stream, message), kind, Bytes::from_static(data));
        self.wr.write_packet(&pkt).await.unwrap();
        self.wr.flush().await.unwrap();
    }
}

fn connect() -> (Manager, Peer) {
    connect_with(ManagerOptions::default())
}

fn connect_with(opts: ManagerOptions) -> (Manager, Peer) {
    let (local, remote) = tokio::io::duplex(64 * 1024);
    let (rd, wr) = tokio::io::split(remote);
    let peer = Peer {
        rd: Reader::new(rd),
        wr: Writer::new(wr),
    };
    (Manager::with_options(local, opts), peer)
}

#[tokio::test]
async fn test_second_stream_waits_for_first() {
    let (manager, _peer) = connect();
    let manager = Arc::new(manager);

    let first = manager.new_stream(&Context::new()).await.unwrap();
    assert_eq!(first.id(), 1);
    assert_eq!(manager.active_stream(), Some(1));

    let waiter = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.new_stream(&Context::new()).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!waiter.is_finished());

    first.close().await.unwrap();
    let second = timeout(Duration::from_secs(1), waiter)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(second.id(), 2);
}

#[tokio::test]
async fn test_blocked_new_stream_unblocks_on_cancel() {
    let (manager, _peer) = connect();
    let manager = Arc::new(manager);
    let _first = manager.new_stream(&Context::new()).await.unwrap();

    let ctx = Context::new();
    let waiter = {
        let manager = manager.clone();
        let ctx = ctx.clone();
        tokio::spawn(async move { manager.new_stream(&ctx).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    ctx.cancel();

    let result = timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap();
    assert!(matches!(result, Err(Error::Canceled)));
    assert!(!manager.is_closed());
}

#[tokio::test]
async fn test_blocked_new_stream_unblocks_on_deadline() {
    let (manager, _peer) = connect();
    let _first = manager.new_stream(&Context::new()).await.unwrap();

    let ctx = Context::with_timeout(Duration::from_millis(30));
    let result = timeout(Duration::from_secs(1), manager.new_stream(&ctx))
        .await
        .unwrap();
    assert!(matches!(result, Err(Error::DeadlineExceeded)));
}

#[tokio::test]
async fn test_close_is_idempotent() {
    let (manager, _peer) = connect();
    let manager = Arc::new(manager);
    let stream = manager.new_stream(&Context::new()).await.unwrap();

    let waiter = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.new_stream(&Context::new()).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    let closers: Vec<_> = (0..3)
        .map(|_| {
            let manager = manager.clone();
            tokio::spawn(async move { manager.close().await })
        })
        .collect();
    for closer in closers {
        closer.await.unwrap().unwrap();
    }
    manager.close().await.unwrap();

    assert!(manager.is_closed());
    assert!(matches!(manager.closed().await, Error::ManagerClosed));
    assert!(matches!(waiter.await.unwrap(), Err(Error::ManagerClosed)));
    assert!(matches!(
        manager.new_stream(&Context::new()).await,
        Err(Error::ManagerClosed)
    ));
    assert!(matches!(stream.err(), Some(Error::ManagerClosed)));
    assert!(matches!(
        stream.raw_write(Kind::Message, Bytes::new()).await,
        Err(Error::ManagerClosed)
    ));
}

#[tokio::test]
async fn test_message_after_close_send_keeps_stream_open() {
    let (manager, mut peer) = connect();
    let stream = manager.new_stream(&Context::new()).await.unwrap();

    peer.send(1, 1, Kind::CloseSend, b"").await;
    peer.send(1, 2, Kind::Message, b"late").await;

    // the local side may still send
    stream
        .msg_send(&Bytes::from_static(b"reply"), &RawEncoding)
        .await
        .unwrap();
    let pkt = peer.rd.read_packet().await.unwrap();
    assert_eq!(pkt.kind, Kind::Message);
    assert_eq!(&pkt.data[..], b"reply");

    // the late message was never delivered
    assert!(stream.raw_recv().await.unwrap().is_none());
    assert!(!stream.is_done());
    assert!(!manager.is_closed());

    peer.send(1, 3, Kind::Close, b"").await;
    assert!(matches!(stream.done().await, Error::RemoteClosed));
}

#[tokio::test]
async fn test_stale_packets_are_dropped() {
    let (manager, peer) = connect();
    let first = manager.new_stream(&Context::new()).await.unwrap();
    first.close().await.unwrap();
    let second = manager.new_stream(&Context::new()).await.unwrap();
    assert_eq!(second.id(), 2);

    peer.send(1, 5, Kind::Close, b"").await;
    peer.send(2, 1, Kind::Message, b"fresh").await;

    let got = second.raw_recv().await.unwrap();
    assert_eq!(got.as_deref(), Some(&b"fresh"[..]));
    assert!(!manager.is_closed());
}

#[tokio::test]
async fn test_packet_for_unknown_stream_is_fatal() {
    let (manager, peer) = connect();
    peer.send(7, 1, Kind::Message, b"who").await;

    let cause = timeout(Duration::from_secs(1), manager.closed()).await.unwrap();
    assert!(matches!(cause, Error::Protocol(_)));
    assert!(matches!(
        manager.new_stream(&Context::new()).await,
        Err(Error::Protocol(_))
    ));
}

#[tokio::test]
async fn test_invoke_without_handler_is_fatal() {
    let (manager, peer) = connect();
    peer.send(1, 1, Kind::Invoke, b"/svc/Method").await;

    let cause = timeout(Duration::from_secs(1), manager.closed()).await.unwrap();
    assert!(matches!(cause, Error::Protocol(_)));
}

#[tokio::test]
async fn test_malformed_frames_terminate_the_manager() {
    let (manager, peer) = connect();
    let stream = manager.new_stream(&Context::new()).await.unwrap();

    peer.send(1, 2, Kind::Message, b"a").await;
    assert!(stream.raw_recv().await.unwrap().is_some());
    // lower ID after a higher one
    peer.send(1, 1, Kind::Message, b"b").await;

    let cause = timeout(Duration::from_secs(1), manager.closed()).await.unwrap();
    assert!(matches!(&cause, Error::Protocol(msg) if msg == "id monotonicity violation"));
    assert!(matches!(stream.raw_recv().await, Err(Error::Protocol(_))));
}

#[tokio::test]
async fn test_peer_hangup_terminates_with_eof() {
    let (manager, peer) = connect();
    let stream = manager.new_stream(&Context::new()).await.unwrap();
    drop(peer);

    let cause = timeout(Duration::from_secs(1), manager.closed()).await.unwrap();
    assert!(cause.is_eof());
    assert!(stream.raw_recv().await.unwrap_err().is_eof());
}

#[tokio::test]
async fn test_context_cancel_sends_cancel_and_frees_slot() {
    let (manager, mut peer) = connect();
    let ctx = Context::new();
    let stream = manager.new_stream(&ctx).await.unwrap();
    ctx.cancel();

    assert!(matches!(stream.done().await, Error::Canceled));
    let pkt = peer.rd.read_packet().await.unwrap();
    assert_eq!(pkt.kind, Kind::Cancel);
    assert_eq!(pkt.id.stream, 1);

    let next = timeout(Duration::from_secs(1), manager.new_stream(&Context::new()))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(next.id(), 2);
}

#[tokio::test]
async fn test_inactivity_timeout_closes_idle_manager() {
    let opts = ManagerOptions::new().inactivity_timeout(Duration::from_millis(50));
    let (manager, _peer) = connect_with(opts);

    let cause = timeout(Duration::from_secs(2), manager.closed()).await.unwrap();
    assert!(matches!(cause, Error::InactivityTimeout));
}

#[tokio::test]
async fn test_inactivity_timeout_waits_for_live_stream() {
    let opts = ManagerOptions::new().inactivity_timeout(Duration::from_millis(50));
    let (manager, _peer) = connect_with(opts);
    let stream = manager.new_stream(&Context::new()).await.unwrap();

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(!manager.is_closed());

    stream.close().await.unwrap();
    let cause = timeout(Duration::from_secs(2), manager.closed()).await.unwrap();
    assert!(matches!(cause, Error::InactivityTimeout));
}

/// Never delivers data; every write fails.
struct BrokenTransport;

impl AsyncRead for BrokenTransport {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut std::task::Context<'_>,
        _buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Poll::Pending
    }
}

impl AsyncWrite for BrokenTransport {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut std::task::Context<'_>,
        _buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Poll::Ready(Err(io::ErrorKind::BrokenPipe.into()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut std::task::Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(
        self: Pin<&mut Self>,
        _cx: &mut std::task::Context<'_>,
    ) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

#[tokio::test]
async fn test_write_failure_closes_manager() {
    let manager = Manager::new(BrokenTransport);
    let stream = manager.new_stream(&Context::new()).await.unwrap();

    stream
        .raw_write(Kind::Invoke, Bytes::from_static(b"/svc/Method"))
        .await
        .unwrap();
    let err = stream.raw_flush().await.unwrap_err();
    assert!(matches!(err, Error::Transport(_)));

    let cause = timeout(Duration::from_secs(1), manager.closed()).await.unwrap();
    assert!(matches!(cause, Error::Transport(_)));
    assert!(matches!(
        manager.new_stream(&Context::new()).await,
        Err(Error::Transport(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn test_cancel_with_stuck_writer_frees_admission() {
    // the peer never reads, so a large write fills the pipe and blocks
    let (local, _remote) = tokio::io::duplex(64);
    let manager = Manager::new(local);
    let ctx = Context::new();
    let stream = manager.new_stream(&ctx).await.unwrap();

    let blocked = {
        let stream = stream.clone();
        tokio::spawn(async move {
            stream
                .raw_write(Kind::Message, Bytes::from(vec![0u8; 100_000]))
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(!blocked.is_finished());

    ctx.cancel();
    let next = timeout(Duration::from_secs(1), manager.new_stream(&Context::new()))
        .await
        .unwrap();
    assert!(matches!(next, Err(Error::Transport(_))));
    assert!(matches!(stream.err(), Some(Error::Canceled)));
    assert!(manager.is_closed());
    assert!(blocked.await.unwrap().is_err());
}
