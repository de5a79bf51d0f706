//! Wire codec for solorpc.
//!
//! This crate provides the framing layer shared by both ends of a solorpc
//! connection. It knows nothing about streams or calls; it only turns
//! packets into bytes and back.
//!
//! ## Modules
//!
//! - [`varint`]: base-128 integers used for IDs and lengths
//! - [`frame`]: frame encoding and decoding
//! - [`packet`]: packets and splitting them into frames
//! - [`reader`]: packet reassembly from a byte stream
//! - [`writer`]: buffered, lock-protected frame writer
//! - [`error`]: wire errors, status codes and the error payload

pub mod error;
pub mod frame;
pub mod packet;
pub mod reader;
pub mod varint;
pub mod writer;

pub use error::*;
pub use frame::{Frame, Id, Kind, append_frame, parse_frame};
pub use packet::{DEFAULT_SPLIT_SIZE, Packet, Split, split, split_n};
pub use reader::{DEFAULT_MAXIMUM_BUFFER_SIZE, Reader, ReaderOptions};
pub use varint::{append_varint, read_varint};
pub use writer::{DEFAULT_BUFFER_SIZE, Writer, WriterOptions};
