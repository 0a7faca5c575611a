//! Chat server demo.
//!
//! Run with `RUST_LOG=info cargo run --example chat_server`, then start
//! `chat_client` in another terminal.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use socketio_channel::Server;
use tokio::net::TcpListener;

#[derive(Debug, Deserialize)]
struct Join {
    channel: String,
}

#[derive(Debug, Serialize)]
struct Message {
    id: u32,
    channel: String,
    text: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .init();

    let server = Server::builder()
        .on_connection(|channel| {
            tracing::info!("Connected {}", channel.id());

            let direct = Message {
                id: 10,
                channel: "main".to_string(),
                text: "using emit".to_string(),
            };
            if let Err(e) = channel.emit("/message", &direct) {
                tracing::warn!("Emit failed: {}", e);
            }

            let broadcast = Message {
                id: 10,
                channel: "main".to_string(),
                text: "using broadcast".to_string(),
            };
            let joined = channel
                .join("test")
                .and_then(|_| channel.broadcast_to("test", "/message", &broadcast));
            if let Err(e) = joined {
                tracing::warn!("Broadcast failed: {}", e);
            }
        })
        .on_disconnection(|channel| {
            tracing::info!("Disconnected {}", channel.id());
        })
        .on("/join", |join: Join, _channel| async move {
            tokio::time::sleep(Duration::from_secs(2)).await;
            tracing::info!("Client joined to {}", join.channel);
            Ok(format!("joined to {}", join.channel))
        })
        .build();

    let listener = TcpListener::bind("0.0.0.0:3811").await?;
    tracing::info!("Starting server...");
    server.serve(listener).await?;
    Ok(())
}
