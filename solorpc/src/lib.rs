//! # solorpc
//!
//! A minimal RPC transport that runs one stream at a time over any
//! bidirectional byte stream.
//!
//! Messages are split into frames, reassembled by the receiver, and carried
//! on [`Stream`]s. A [`Manager`] owns the transport and admits a single live
//! stream; a second stream waits until the first is done. Streams support
//! half-close, remote errors with numeric codes, and per-call cancellation
//! through a [`Context`].
//!
//! The wire codec lives in [`solorpc_core`] and is re-exported here.
//!
//! ## Example
//!
//! ```ignore
//! use solorpc::{Conn, Context, Error, JsonEncoding, Server, Stream};
//!
//! // Server
//! let server = Server::new(|stream: Stream, _rpc: String| async move {
//!     let name: String = stream.msg_recv(&JsonEncoding).await?.unwrap_or_default();
//!     stream.msg_send(&format!("hello {name}"), &JsonEncoding).await
//! });
//! let (client_io, server_io) = tokio::io::duplex(64 * 1024);
//! tokio::spawn(async move { server.serve_transport(server_io).await });
//!
//! // Client
//! let conn = Conn::new(client_io);
//! let reply: String = conn
//!     .invoke(&Context::new(), "/greet.Greeter/Hello", &JsonEncoding, &"solo".to_string())
//!     .await?;
//! assert_eq!(reply, "hello solo");
//! ```

mod conn;
mod context;
mod encoding;
mod error;
mod handler;
mod manager;
mod options;
mod server;
mod signal;
mod stream;

pub use conn::Conn;
pub use context::Context;
pub use encoding::{Encoding, JsonEncoding, ProstEncoding, RawEncoding};
pub use error::Error;
pub use handler::Handler;
pub use manager::{Manager, Transport};
pub use options::{DEFAULT_CANCEL_TIMEOUT, DEFAULT_QUEUE_CAPACITY, ManagerOptions, StreamOptions};
pub use server::Server;
pub use signal::Signal;
pub use stream::Stream;

pub use solorpc_core;
pub use solorpc_core::{
    Code, Id, Kind, Packet, ReaderOptions, Status, WriterOptions,
};
