//! Chat client demo.
//!
//! Connects to the `chat_server` demo, asks to join a channel five times
//! concurrently and prints every chat message for a minute.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use socketio_channel::transport::WebSocketTransport;
use socketio_channel::{get_url, Channel, Client};

#[derive(Debug, Serialize)]
struct Join {
    channel: String,
}

#[derive(Debug, Deserialize)]
struct Message {
    id: u32,
    channel: String,
    text: String,
}

async fn send_join(channel: Channel) {
    tracing::info!("Acking /join");
    let join = Join {
        channel: "main".to_string(),
    };
    match channel.ack("/join", &join, Duration::from_secs(5)).await {
        Ok(result) => tracing::info!("Ack result to /join: {}", result),
        Err(e) => tracing::error!("Ack to /join failed: {}", e),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .init();

    let client = Client::builder()
        .on("/message", |msg: Message, _channel| async move {
            tracing::info!("--- Got chat message #{} on {}: {}", msg.id, msg.channel, msg.text);
            Ok(())
        })
        .on_connection(|_| tracing::info!("Connected"))
        .on_disconnection(|_| tracing::info!("Disconnected"))
        .dial(
            &get_url("localhost", 3811, false),
            &WebSocketTransport::default(),
        )
        .await?;

    tokio::time::sleep(Duration::from_secs(1)).await;

    for _ in 0..5 {
        tokio::spawn(send_join(client.channel().clone()));
    }

    tokio::time::sleep(Duration::from_secs(60)).await;
    client.close();
    client.wait_for_shutdown().await;

    tracing::info!(" [x] Complete");
    Ok(())
}
