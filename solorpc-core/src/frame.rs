//! Frame encoding and decoding.
//!
//! A frame is the smallest unit on the wire:
//!
//! ```text
//! [control:1][stream id:varint][message id:varint][length:varint][payload:length]
//! ```
//!
//! The control byte packs the frame kind and two flags:
//!
//! ```text
//! bit 7     bits 6..1   bit 0
//! control   kind        done
//! ```

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::WireError;
use crate::varint::{MAX_VARINT_LEN, append_varint, read_varint, varint_len};

/// Largest possible frame header: control byte plus three varints.
pub const MAX_FRAME_HEADER_SIZE: usize = 1 + 3 * MAX_VARINT_LEN;

const DONE_BIT: u8 = 0b0000_0001;
const CONTROL_BIT: u8 = 0b1000_0000;
const KIND_MASK: u8 = 0b0011_1111;

/// Identifies a packet: the stream it belongs to and its sequence number.
///
/// IDs order lexicographically, stream first.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Id {
    pub stream: u64,
    pub message: u64,
}

impl Id {
    pub fn new(stream: u64, message: u64) -> Self {
        Self { stream, message }
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<s:{} m:{}>", self.stream, self.message)
    }
}

/// What a packet means to the stream receiving it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Kind {
    /// Starts a call; the payload is the RPC name.
    Invoke,
    /// An application message.
    Message,
    /// Terminates the call with an error payload.
    Error,
    /// The sender canceled the call.
    Cancel,
    /// The sender is done with the call entirely.
    Close,
    /// The sender will send no more messages.
    CloseSend,
    /// Zero or a value this version does not know.
    Reserved(u8),
}

impl Kind {
    /// Decode the six kind bits of a control byte.
    pub fn from_u8(value: u8) -> Self {
        match value & KIND_MASK {
            1 => Kind::Invoke,
            2 => Kind::Message,
            3 => Kind::Error,
            4 => Kind::Cancel,
            5 => Kind::Close,
            6 => Kind::CloseSend,
            other => Kind::Reserved(other),
        }
    }

    /// The numeric kind value written on the wire.
    pub fn as_u8(&self) -> u8 {
        match self {
            Kind::Invoke => 1,
            Kind::Message => 2,
            Kind::Error => 3,
            Kind::Cancel => 4,
            Kind::Close => 5,
            Kind::CloseSend => 6,
            Kind::Reserved(v) => v & KIND_MASK,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Kind::Invoke => "invoke",
            Kind::Message => "message",
            Kind::Error => "error",
            Kind::Cancel => "cancel",
            Kind::Close => "close",
            Kind::CloseSend => "close_send",
            Kind::Reserved(_) => "reserved",
        }
    }
}

impl Default for Kind {
    fn default() -> Self {
        Kind::Reserved(0)
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single frame as it travels on the wire.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Frame {
    pub data: Bytes,
    pub id: Id,
    pub kind: Kind,
    /// Last frame of its packet.
    pub done: bool,
    /// Frames with this bit set are skipped by receivers that don't know them.
    pub control: bool,
}

impl Frame {
    /// Number of bytes [`append_frame`] writes for this frame.
    pub fn encoded_len(&self) -> usize {
        1 + varint_len(self.id.stream)
            + varint_len(self.id.message)
            + varint_len(self.data.len() as u64)
            + self.data.len()
    }

    /// Split one complete frame off the front of `buf` without copying its
    /// payload.
    ///
    /// Returns `Ok(None)` and leaves `buf` untouched when more bytes are
    /// needed.
    pub fn decode(buf: &mut BytesMut) -> Result<Option<Frame>, WireError> {
        let Some(header) = parse_header(buf)? else {
            return Ok(None);
        };
        let _ = buf.split_to(header.header_len);
        let data = buf.split_to(header.data_len).freeze();
        Ok(Some(header.into_frame(data)))
    }
}

/// Decoded frame header.
struct Header {
    id: Id,
    kind: Kind,
    done: bool,
    control: bool,
    header_len: usize,
    data_len: usize,
}

impl Header {
    fn into_frame(self, data: Bytes) -> Frame {
        Frame {
            data,
            id: self.id,
            kind: self.kind,
            done: self.done,
            control: self.control,
        }
    }
}

/// Parse a header and make sure the whole payload is present.
fn parse_header(buf: &[u8]) -> Result<Option<Header>, WireError> {
    let Some((header, rest)) = parse_header_only(buf)? else {
        return Ok(None);
    };
    if rest.len() < header.data_len {
        return Ok(None);
    }
    Ok(Some(header))
}

fn parse_header_only(buf: &[u8]) -> Result<Option<(Header, &[u8])>, WireError> {
    if buf.len() < 2 {
        return Ok(None);
    }
    let control = buf[0];
    let rest = &buf[1..];
    let Some((rest, stream)) = read_varint(rest)? else {
        return Ok(None);
    };
    let Some((rest, message)) = read_varint(rest)? else {
        return Ok(None);
    };
    let Some((rest, len)) = read_varint(rest)? else {
        return Ok(None);
    };
    let data_len = usize::try_from(len).map_err(|_| WireError::DataOverflow)?;
    let header = Header {
        id: Id::new(stream, message),
        kind: Kind::from_u8(control >> 1),
        done: control & DONE_BIT != 0,
        control: control & CONTROL_BIT != 0,
        header_len: buf.len() - rest.len(),
        data_len,
    };
    Ok(Some((header, rest)))
}

/// Total encoded size of the frame at the front of `buf`, once its header is
/// complete, whether or not the payload has arrived yet.
pub fn frame_size_hint(buf: &[u8]) -> Result<Option<usize>, WireError> {
    Ok(parse_header_only(buf)?.map(|(h, _)| h.header_len.saturating_add(h.data_len)))
}

/// Append the encoding of `fr` to `buf`.
pub fn append_frame<B: BufMut>(buf: &mut B, fr: &Frame) {
    let mut control = fr.kind.as_u8() << 1;
    if fr.done {
        control |= DONE_BIT;
    }
    if fr.control {
        control |= CONTROL_BIT;
    }
    buf.put_u8(control);
    append_varint(buf, fr.id.stream);
    append_varint(buf, fr.id.message);
    append_varint(buf, fr.data.len() as u64);
    buf.put_slice(&fr.data);
}

/// Parse one frame from the front of `buf`.
///
/// Returns `Ok(None)` when `buf` does not yet hold a whole frame. That is the
/// "need more data" signal, not a protocol violation.
pub fn parse_frame(buf: &[u8]) -> Result<Option<(&[u8], Frame)>, WireError> {
    let Some(header) = parse_header(buf)? else {
        return Ok(None);
    };
    let end = header.header_len + header.data_len;
    let data = Bytes::copy_from_slice(&buf[header.header_len..end]);
    Ok(Some((&buf[end..], header.into_frame(data))))
}
