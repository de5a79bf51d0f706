//! Packet reassembly from a byte stream.

use std::io;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::WireError;
use crate::frame::{Frame, Id, Kind, MAX_FRAME_HEADER_SIZE, frame_size_hint};
use crate::packet::Packet;

/// Default maximum packet size (4 MiB).
pub const DEFAULT_MAXIMUM_BUFFER_SIZE: usize = 4 * 1024 * 1024;

/// Smallest amount the read buffer grows by.
const GROW_INCREMENT: usize = 4096;

/// Configuration for a [`Reader`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReaderOptions {
    /// Largest packet, and largest single frame, the reader accepts.
    pub maximum_buffer_size: usize,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        Self {
            maximum_buffer_size: DEFAULT_MAXIMUM_BUFFER_SIZE,
        }
    }
}

impl ReaderOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum packet size in bytes.
    pub fn maximum_buffer_size(mut self, size: usize) -> Self {
        self.maximum_buffer_size = size;
        self
    }
}

/// Reads frames from a transport and folds them into packets.
///
/// Only one packet is reassembled at a time. A frame with a higher ID than
/// the packet in progress abandons that packet and starts a new one; a lower
/// ID, or a repeat of an ID that already completed, is a protocol violation.
pub struct Reader<R> {
    rd: R,
    /// Bytes read from the transport but not yet parsed.
    buf: BytesMut,
    /// Highest ID accepted so far.
    id: Id,
    opts: ReaderOptions,
}

impl<R> Reader<R> {
    pub fn new(rd: R) -> Self {
        Self::with_options(rd, ReaderOptions::default())
    }

    pub fn with_options(rd: R, opts: ReaderOptions) -> Self {
        Self {
            rd,
            buf: BytesMut::new(),
            id: Id::default(),
            opts,
        }
    }

    /// Highest packet ID accepted so far.
    pub fn last_id(&self) -> Id {
        self.id
    }

    pub fn get_ref(&self) -> &R {
        &self.rd
    }

    pub fn into_inner(self) -> R {
        self.rd
    }

    /// Largest buffered size a single frame may need.
    fn limit(&self) -> usize {
        self.opts
            .maximum_buffer_size
            .saturating_add(MAX_FRAME_HEADER_SIZE)
    }
}

impl<R: AsyncRead + Unpin> Reader<R> {
    /// Read the next complete packet.
    pub async fn read_packet(&mut self) -> Result<Packet, WireError> {
        self.read_packet_using(BytesMut::new()).await
    }

    /// Read the next complete packet, accumulating its data in `buf`.
    ///
    /// `buf` is cleared first; passing a buffer from an earlier packet avoids
    /// a fresh allocation.
    pub async fn read_packet_using(&mut self, mut buf: BytesMut) -> Result<Packet, WireError> {
        buf.clear();
        let mut current: Option<Kind> = None;

        loop {
            let Some(fr) = Frame::decode(&mut self.buf)? else {
                self.fill().await?;
                continue;
            };
            if fr.control {
                continue;
            }

            if fr.id < self.id {
                return Err(WireError::IdMonotonicity);
            } else if fr.id > self.id {
                self.id = fr.id;
                buf.clear();
                current = Some(fr.kind);
            } else {
                match current {
                    Some(kind) if kind != fr.kind => return Err(WireError::KindChange),
                    Some(_) => {}
                    // the packet under this ID already completed
                    None => return Err(WireError::IdMonotonicity),
                }
            }

            if buf.len() + fr.data.len() > self.opts.maximum_buffer_size {
                return Err(WireError::DataOverflow);
            }
            buf.extend_from_slice(&fr.data);

            if fr.done {
                return Ok(Packet {
                    data: buf.freeze(),
                    id: fr.id,
                    kind: fr.kind,
                });
            }
        }
    }

    /// Read more bytes from the transport into the unparsed buffer.
    ///
    /// Everything buffered belongs to the one incomplete frame at the front,
    /// so its declared size bounds how large the buffer may grow.
    async fn fill(&mut self) -> Result<(), WireError> {
        let limit = self.limit();
        if let Some(size) = frame_size_hint(&self.buf)? {
            if size > limit {
                return Err(WireError::DataOverflow);
            }
        }
        if self.buf.len() >= limit {
            return Err(WireError::DataOverflow);
        }

        let room = limit - self.buf.len();
        let spare = self.buf.capacity() - self.buf.len();
        if spare < GROW_INCREMENT.min(room) {
            let grow = self.buf.len().max(GROW_INCREMENT).min(room);
            self.buf.reserve(grow);
        }

        let n = self.rd.read_buf(&mut self.buf).await?;
        if n == 0 {
            return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::append_frame;
    use crate::packet::split;
    use bytes::Bytes;
    use tokio::io::AsyncWriteExt;

    fn frame(id: Id, kind: Kind, data: &'static [u8], done: bool) -> Frame {
        Frame {
            data: Bytes::from_static(data),
            id,
            kind,
            done,
            control: false,
        }
    }

    fn wire(frames: &[Frame]) -> Vec<u8> {
        let mut buf = Vec::new();
        for fr in frames {
            append_frame(&mut buf, fr);
        }
        buf
    }

    #[tokio::test]
    async fn test_reassembles_hello_world() {
        let id = Id::new(1, 1);
        let bytes = wire(&[
            frame(id, Kind::Message, b"hel", false),
            frame(id, Kind::Message, b"lo ", false),
            frame(id, Kind::Message, b"world", true),
        ]);
        let mut rd = Reader::new(&bytes[..]);
        let pkt = rd.read_packet().await.unwrap();
        assert_eq!(pkt.id, id);
        assert_eq!(pkt.kind, Kind::Message);
        assert_eq!(&pkt.data[..], b"hello world");
    }

    #[tokio::test]
    async fn test_split_then_reassemble_over_short_reads() {
        let data: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        let pkt = Packet::new(Id::new(7, 3), Kind::Message, data);
        let frames: Vec<_> = split(pkt.clone(), 333).collect();
        let bytes = wire(&frames);

        // a tiny pipe forces many partial reads
        let (mut tx, rx) = tokio::io::duplex(5);
        tokio::spawn(async move {
            tx.write_all(&bytes).await.unwrap();
        });

        let mut rd = Reader::new(rx);
        assert_eq!(rd.read_packet().await.unwrap(), pkt);
    }

    #[tokio::test]
    async fn test_skips_control_frames() {
        let id = Id::new(1, 1);
        let mut ctl = frame(Id::new(9, 9), Kind::Reserved(12), b"ignored", true);
        ctl.control = true;
        let bytes = wire(&[ctl, frame(id, Kind::Invoke, b"/a/b", true)]);
        let mut rd = Reader::new(&bytes[..]);
        let pkt = rd.read_packet().await.unwrap();
        assert_eq!(pkt.kind, Kind::Invoke);
        assert_eq!(rd.last_id(), id);
    }

    #[tokio::test]
    async fn test_lower_id_is_violation() {
        let bytes = wire(&[
            frame(Id::new(2, 1), Kind::Message, b"a", true),
            frame(Id::new(1, 5), Kind::Message, b"b", true),
        ]);
        let mut rd = Reader::new(&bytes[..]);
        rd.read_packet().await.unwrap();
        let err = rd.read_packet().await.unwrap_err();
        assert!(matches!(err, WireError::IdMonotonicity));
    }

    #[tokio::test]
    async fn test_replayed_id_is_violation() {
        let id = Id::new(1, 1);
        let bytes = wire(&[
            frame(id, Kind::Message, b"a", true),
            frame(id, Kind::Message, b"a", true),
        ]);
        let mut rd = Reader::new(&bytes[..]);
        rd.read_packet().await.unwrap();
        assert!(matches!(
            rd.read_packet().await,
            Err(WireError::IdMonotonicity)
        ));
    }

    #[tokio::test]
    async fn test_higher_id_abandons_partial_packet() {
        let bytes = wire(&[
            frame(Id::new(1, 1), Kind::Message, b"stale", false),
            frame(Id::new(1, 2), Kind::Cancel, b"", true),
        ]);
        let mut rd = Reader::new(&bytes[..]);
        let pkt = rd.read_packet().await.unwrap();
        assert_eq!(pkt.id, Id::new(1, 2));
        assert_eq!(pkt.kind, Kind::Cancel);
        assert!(pkt.data.is_empty());
    }

    #[tokio::test]
    async fn test_kind_change_is_violation() {
        let id = Id::new(1, 1);
        let bytes = wire(&[
            frame(id, Kind::Message, b"a", false),
            frame(id, Kind::Error, b"b", true),
        ]);
        let mut rd = Reader::new(&bytes[..]);
        assert!(matches!(rd.read_packet().await, Err(WireError::KindChange)));
    }

    #[tokio::test]
    async fn test_accumulated_overflow() {
        let id = Id::new(1, 1);
        let bytes = wire(&[
            frame(id, Kind::Message, b"0123456789", false),
            frame(id, Kind::Message, b"0123456789", true),
        ]);
        let opts = ReaderOptions::new().maximum_buffer_size(15);
        let mut rd = Reader::with_options(&bytes[..], opts);
        assert!(matches!(rd.read_packet().await, Err(WireError::DataOverflow)));
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected_before_buffering() {
        // header claims a 1 GiB payload; only the header is ever sent
        let mut bytes = vec![(2 << 1) | 1, 1, 1];
        crate::varint::append_varint(&mut bytes, 1 << 30);
        let opts = ReaderOptions::new().maximum_buffer_size(1024);
        let mut rd = Reader::with_options(&bytes[..], opts);
        assert!(matches!(rd.read_packet().await, Err(WireError::DataOverflow)));
    }

    #[tokio::test]
    async fn test_eof_is_returned_verbatim() {
        let bytes = wire(&[frame(Id::new(1, 1), Kind::Message, b"part", false)]);
        let mut rd = Reader::new(&bytes[..]);
        let err = rd.read_packet().await.unwrap_err();
        assert!(err.is_eof());
    }

    #[tokio::test]
    async fn test_reuses_caller_buffer() {
        let bytes = wire(&[frame(Id::new(1, 1), Kind::Message, b"abc", true)]);
        let mut rd = Reader::new(&bytes[..]);
        let scratch = BytesMut::from(&b"leftover"[..]);
        let pkt = rd.read_packet_using(scratch).await.unwrap();
        assert_eq!(&pkt.data[..], b"abc");
    }
}
