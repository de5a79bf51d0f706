//! Client connections.
//!
//! A [`Conn`] wraps a [`Manager`] without a handler and adds the calls a
//! client needs: opening a stream for a named RPC and the unary
//! request/response helper.

use bytes::Bytes;
use solorpc_core::Kind;
use tracing::debug;

use crate::context::Context;
use crate::encoding::Encoding;
use crate::manager::{Manager, Transport};
use crate::options::ManagerOptions;
use crate::stream::Stream;
use crate::Error;

/// Client side of a connection. Runs one RPC at a time.
///
/// # Example
///
/// ```ignore
/// use solorpc::{Conn, Context, JsonEncoding};
///
/// let socket = tokio::net::TcpStream::connect("127.0.0.1:8080").await?;
/// let conn = Conn::new(socket);
///
/// let reply: String = conn
///     .invoke(&Context::new(), "/echo.Echo/Say", &JsonEncoding, &"hi".to_string())
///     .await?;
/// ```
#[derive(Debug)]
pub struct Conn {
    manager: Manager,
}

impl Conn {
    pub fn new<T: Transport>(transport: T) -> Self {
        Self::with_options(transport, ManagerOptions::default())
    }

    pub fn with_options<T: Transport>(transport: T, opts: ManagerOptions) -> Self {
        Self {
            manager: Manager::with_options(transport, opts),
        }
    }

    /// Open a stream for `rpc` and send its Invoke packet.
    pub async fn new_stream(&self, ctx: &Context, rpc: &str) -> Result<Stream, Error> {
        let stream = self.manager.new_stream(ctx).await?;
        stream
            .raw_write(Kind::Invoke, Bytes::copy_from_slice(rpc.as_bytes()))
            .await?;
        stream.raw_flush().await?;
        Ok(stream)
    }

    /// Make a unary call: send `input`, then wait for a single reply.
    pub async fn invoke<I, O, E>(
        &self,
        ctx: &Context,
        rpc: &str,
        enc: &E,
        input: &I,
    ) -> Result<O, Error>
    where
        E: Encoding<I> + Encoding<O> + ?Sized,
    {
        let data = <E as Encoding<I>>::marshal(enc, input)?;
        let stream = self.manager.new_stream(ctx).await?;

        let result = async {
            let sent = async {
                stream
                    .raw_write(Kind::Invoke, Bytes::copy_from_slice(rpc.as_bytes()))
                    .await?;
                stream.raw_write(Kind::Message, data).await?;
                stream.close_send().await
            }
            .await;
            match sent {
                // the server may answer before reading the request
                Err(Error::RemoteClosed) | Ok(()) => {}
                Err(err) => return Err(err),
            }

            let reply = match stream.raw_recv().await? {
                Some(reply) => <E as Encoding<O>>::unmarshal(enc, &reply)?,
                None => return Err(Error::protocol("stream ended without a reply")),
            };
            drain(&stream).await?;
            Ok(reply)
        }
        .await;

        if let Err(err) = stream.close().await {
            debug!(stream_id = stream.id(), %err, "failed to close stream");
        }
        result
    }

    /// Close the connection.
    pub async fn close(&self) -> Result<(), Error> {
        self.manager.close().await
    }

    /// Wait for the connection to terminate and return the cause.
    pub async fn closed(&self) -> Error {
        self.manager.closed().await
    }

    pub fn is_closed(&self) -> bool {
        self.manager.is_closed()
    }

    pub fn manager(&self) -> &Manager {
        &self.manager
    }
}

/// Consume the rest of a unary response stream.
///
/// A status sent after the reply is returned; any other termination is not.
async fn drain(stream: &Stream) -> Result<(), Error> {
    loop {
        match stream.raw_recv().await {
            Ok(Some(_)) => {}
            Ok(None) => return Ok(()),
            Err(err @ Error::Status(_)) => return Err(err),
            Err(_) => return Ok(()),
        }
    }
}
