use std::net::SocketAddr;

use serde::{Deserialize, Serialize};
use solorpc::{Error, JsonEncoding, RawEncoding, Status, Stream};

pub const SAY_HELLO: &str = "/hello.HelloWorldService/SayHello";
pub const SAY_HELLO_STREAM: &str = "/hello.HelloWorldService/SayHelloStream";
pub const ECHO: &str = "/echo.EchoService/Echo";

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct HelloRequest {
    pub name: Option<String>,
    #[serde(default)]
    pub hobbies: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HelloResponse {
    pub message: String,
}

/// Returns the server address from PORT env var, defaulting to 3000.
pub fn server_addr() -> SocketAddr {
    let port = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(3000);
    SocketAddr::from(([127, 0, 0, 1], port))
}

/// Dispatch every example RPC by name.
pub async fn route(stream: Stream, rpc: String) -> Result<(), Error> {
    match rpc.as_str() {
        SAY_HELLO => say_hello(stream).await,
        SAY_HELLO_STREAM => say_hello_stream(stream).await,
        ECHO => echo(stream).await,
        _ => Err(Status::unimplemented(format!("unknown rpc {}", rpc)).into()),
    }
}

async fn read_request(stream: &Stream) -> Result<HelloRequest, Error> {
    stream
        .msg_recv(&JsonEncoding)
        .await?
        .ok_or_else(|| Status::invalid_argument("missing request").into())
}

async fn say_hello(stream: Stream) -> Result<(), Error> {
    let req = read_request(&stream).await?;
    let name = req.name.unwrap_or_else(|| "World".to_string());
    tracing::info!(%name, "say hello");

    let res = HelloResponse {
        message: format!("Hello, {}!", name),
    };
    stream.msg_send(&res, &JsonEncoding).await
}

async fn say_hello_stream(stream: Stream) -> Result<(), Error> {
    let req = read_request(&stream).await?;
    let name = req.name.unwrap_or_else(|| "World".to_string());

    stream
        .msg_send(
            &HelloResponse {
                message: format!("Hello, {}! Starting stream...", name),
            },
            &JsonEncoding,
        )
        .await?;
    for (idx, hobby) in req.hobbies.iter().enumerate() {
        stream
            .msg_send(
                &HelloResponse {
                    message: format!("Hobby #{}: {} - nice!", idx + 1, hobby),
                },
                &JsonEncoding,
            )
            .await?;
    }
    stream
        .msg_send(
            &HelloResponse {
                message: format!("Stream complete. Goodbye, {}!", name),
            },
            &JsonEncoding,
        )
        .await
}

async fn echo(stream: Stream) -> Result<(), Error> {
    while let Some(msg) = stream.raw_recv().await? {
        stream.msg_send(&msg, &RawEncoding).await?;
    }
    Ok(())
}
