//! Server-side RPC handlers.

use std::future::Future;

use futures::future::BoxFuture;

use crate::{Error, Stream};

/// Handles an incoming RPC on an accepted stream.
///
/// When the returned future resolves to `Ok`, the stream is closed. When it
/// resolves to `Err`, the error is sent to the caller with its code.
///
/// Any `Fn(Stream, String) -> impl Future<Output = Result<(), Error>>`
/// closure is a handler.
///
/// # Example
///
/// ```ignore
/// use solorpc::{Error, JsonEncoding, Server, Stream};
///
/// let server = Server::new(|stream: Stream, rpc: String| async move {
///     let req: String = stream.msg_recv(&JsonEncoding).await?.unwrap_or_default();
///     stream.msg_send(&format!("{rpc}: {req}"), &JsonEncoding).await
/// });
/// ```
pub trait Handler: Send + Sync + 'static {
    fn handle_rpc(&self, stream: Stream, rpc: String) -> BoxFuture<'static, Result<(), Error>>;
}

impl<F, Fut> Handler for F
where
    F: Fn(Stream, String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), Error>> + Send + 'static,
{
    fn handle_rpc(&self, stream: Stream, rpc: String) -> BoxFuture<'static, Result<(), Error>> {
        Box::pin(self(stream, rpc))
    }
}
