//! # socketio-channel
//!
//! Bidirectional message channels speaking the engine.io v3 / socket.io v2
//! text protocol over web sockets.
//!
//! ## Architecture
//!
//! Every connection is a [`Channel`] driven by independent tasks:
//!
//! - **Inbound loop**: reads frames, answers pings, routes events
//! - **Worker loop**: dispatches events in arrival order (sequential mode)
//! - **Outbound loop**: writes queued frames, watches backpressure
//! - **Pinger**: queues a ping every keepalive interval
//!
//! Any terminal error closes the channel through one idempotent path that
//! fires the disconnection callback exactly once.
//!
//! ## Example
//!
//! ```no_run
//! use socketio_channel::transport::WebSocketTransport;
//! use socketio_channel::{get_url, Client};
//!
//! #[tokio::main]
//! async fn main() -> socketio_channel::Result<()> {
//!     let client = Client::builder()
//!         .on_connection(|channel| println!("connected as {}", channel.id()))
//!         .on("/message", |msg: serde_json::Value, _channel| async move {
//!             println!("{}", msg);
//!             Ok(())
//!         })
//!         .dial(&get_url("localhost", 3811, false), &WebSocketTransport::default())
//!         .await?;
//!
//!     client.emit("/message", "hello")?;
//!     client.wait_for_shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod ack;
pub mod backpressure;
pub mod error;
pub mod handler;
pub mod protocol;
pub mod queue;
pub mod transport;

mod channel;
mod client;
mod loops;
mod server;

pub use backpressure::OverflowRegistry;
pub use channel::{
    Channel, ChannelConfig, DEFAULT_MAX_CONCURRENT_HANDLERS, DEFAULT_QUEUE_CAPACITY,
};
pub use client::{get_url, Client, ClientBuilder};
pub use error::{ChannelError, Result};
pub use handler::LoopEvent;
pub use server::{Server, ServerBuilder};
