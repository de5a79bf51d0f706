//! Packets and splitting them into frames.

use bytes::Bytes;

use crate::frame::{Frame, Id, Kind};

/// Frame payload size used when a caller asks for the default (`0`).
pub const DEFAULT_SPLIT_SIZE: usize = 1024;

/// A fully reassembled message.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Packet {
    pub data: Bytes,
    pub id: Id,
    pub kind: Kind,
}

impl Packet {
    pub fn new(id: Id, kind: Kind, data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            id,
            kind,
        }
    }
}

/// Resolve a requested split size.
///
/// - `0` selects [`DEFAULT_SPLIT_SIZE`]
/// - a negative value disables splitting
/// - a positive value is used as is
pub fn split_size(n: isize) -> Option<usize> {
    match n {
        0 => Some(DEFAULT_SPLIT_SIZE),
        n if n < 0 => None,
        n => Some(n as usize),
    }
}

/// Iterator over the frames of a packet, each carrying at most `n` bytes.
///
/// Always yields at least one frame; only the last one has `done` set.
/// Payload chunks share the packet's buffer.
#[derive(Debug)]
pub struct Split {
    id: Id,
    kind: Kind,
    rest: Bytes,
    chunk: Option<usize>,
    finished: bool,
}

impl Iterator for Split {
    type Item = Frame;

    fn next(&mut self) -> Option<Frame> {
        if self.finished {
            return None;
        }
        let take = match self.chunk {
            Some(n) => n.min(self.rest.len()),
            None => self.rest.len(),
        };
        let data = self.rest.split_to(take);
        self.finished = self.rest.is_empty();
        Some(Frame {
            data,
            id: self.id,
            kind: self.kind,
            done: self.finished,
            control: false,
        })
    }
}

/// Frames for `pkt`, at most `n` bytes each (see [`split_size`] for `n`).
pub fn split(pkt: Packet, n: isize) -> Split {
    Split {
        id: pkt.id,
        kind: pkt.kind,
        rest: pkt.data,
        chunk: split_size(n),
        finished: false,
    }
}

/// Call `cb` with each frame of `pkt`, stopping at the first error.
pub fn split_n<E, F>(pkt: Packet, n: isize, mut cb: F) -> Result<(), E>
where
    F: FnMut(Frame) -> Result<(), E>,
{
    for fr in split(pkt, n) {
        cb(fr)?;
    }
    Ok(())
}
