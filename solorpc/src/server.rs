//! Serving RPCs over accepted connections.

use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{debug, warn};

use crate::context::Context;
use crate::handler::Handler;
use crate::manager::{Manager, Transport};
use crate::options::ManagerOptions;
use crate::Error;

/// Dispatches every inbound RPC to one [`Handler`].
///
/// Each connection gets its own [`Manager`], so each connection runs one
/// RPC at a time while separate connections proceed in parallel.
#[derive(Clone)]
pub struct Server {
    handler: Arc<dyn Handler>,
    opts: ManagerOptions,
}

impl Server {
    pub fn new<H: Handler>(handler: H) -> Self {
        Self {
            handler: Arc::new(handler),
            opts: ManagerOptions::default(),
        }
    }

    /// Set the options used for every connection.
    pub fn options(mut self, opts: ManagerOptions) -> Self {
        self.opts = opts;
        self
    }

    /// Serve one connection until it terminates, returning the cause.
    pub async fn serve_transport<T: Transport>(&self, transport: T) -> Error {
        let manager = Manager::with_handler(transport, self.handler.clone(), self.opts);
        manager.closed().await
    }

    /// Accept TCP connections until `ctx` ends.
    ///
    /// Connections still open when `ctx` ends are closed.
    pub async fn serve(&self, listener: TcpListener, ctx: &Context) -> Result<(), Error> {
        loop {
            let (socket, addr) = tokio::select! {
                _ = ctx.done() => return Ok(()),
                accepted = listener.accept() => accepted?,
            };
            if let Err(err) = socket.set_nodelay(true) {
                warn!(%addr, %err, "failed to set TCP_NODELAY");
            }
            debug!(%addr, "connection accepted");

            let manager = Manager::with_handler(socket, self.handler.clone(), self.opts);
            let ctx = ctx.child();
            tokio::spawn(async move {
                tokio::select! {
                    cause = manager.closed() => {
                        debug!(%addr, %cause, "connection finished");
                    }
                    _ = ctx.done() => {
                        if let Err(err) = manager.close().await {
                            debug!(%addr, %err, "failed to close connection");
                        }
                    }
                }
            });
        }
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server").field("opts", &self.opts).finish()
    }
}
