//! Calls the greeter: one unary call, then one server-streaming call.
//!
//! Run the server first: cargo run --bin hello-server
//! Then: cargo run --bin hello-client -- Alice

use std::time::Duration;

use solorpc::{Conn, Context, JsonEncoding};
use solorpc_examples::{HelloRequest, HelloResponse, SAY_HELLO, SAY_HELLO_STREAM};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let name = std::env::args().nth(1);
    let socket = tokio::net::TcpStream::connect(solorpc_examples::server_addr()).await?;
    socket.set_nodelay(true)?;
    let conn = Conn::new(socket);

    let req = HelloRequest {
        name: name.clone(),
        hobbies: vec![],
    };
    let ctx = Context::with_timeout(Duration::from_secs(5));
    let res: HelloResponse = conn.invoke(&ctx, SAY_HELLO, &JsonEncoding, &req).await?;
    println!("{}", res.message);

    let req = HelloRequest {
        name,
        hobbies: vec!["reading".into(), "climbing".into()],
    };
    let stream = conn.new_stream(&Context::new(), SAY_HELLO_STREAM).await?;
    stream.msg_send(&req, &JsonEncoding).await?;
    stream.close_send().await?;
    while let Some(res) = stream.msg_recv::<HelloResponse, _>(&JsonEncoding).await? {
        println!("{}", res.message);
    }

    conn.close().await?;
    Ok(())
}
