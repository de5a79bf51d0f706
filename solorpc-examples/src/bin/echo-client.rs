//! Bidirectional echo: sends each line of stdin and prints the echo.
//!
//! Closing stdin half-closes the stream; the server then finishes it.
//!
//! Run the server first: cargo run --bin hello-server
//! Then: cargo run --bin echo-client

use bytes::Bytes;
use solorpc::{Conn, Context, RawEncoding};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let socket = tokio::net::TcpStream::connect(solorpc_examples::server_addr()).await?;
    let conn = Conn::new(socket);
    let stream = conn.new_stream(&Context::new(), solorpc_examples::ECHO).await?;

    let sender = {
        let stream = stream.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            while let Some(line) = lines.next_line().await? {
                stream.msg_send(&Bytes::from(line), &RawEncoding).await?;
            }
            stream.close_send().await?;
            anyhow::Ok(())
        })
    };

    while let Some(msg) = stream.raw_recv().await? {
        println!("echo: {}", String::from_utf8_lossy(&msg));
    }
    sender.await??;
    conn.close().await?;
    Ok(())
}
