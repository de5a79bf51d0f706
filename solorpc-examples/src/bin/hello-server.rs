//! Greeter and echo server.
//!
//! Serves unary, server-streaming and bidirectional RPCs, one RPC at a time
//! per connection. Stops on Ctrl-C.
//!
//! Run with: cargo run --bin hello-server
//! Verbose: RUST_LOG=solorpc=debug cargo run --bin hello-server

use solorpc::{Context, Server};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let addr = solorpc_examples::server_addr();
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "server listening");

    let ctx = Context::new();
    let shutdown = ctx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutting down");
        }
        shutdown.cancel();
    });

    Server::new(solorpc_examples::route)
        .serve(listener, &ctx)
        .await?;
    Ok(())
}
