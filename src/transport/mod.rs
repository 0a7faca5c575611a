//! Transport module - framed duplex connections.
//!
//! Provides:
//! - [`Connection`] / [`Transport`] - the interface the channel loops consume
//! - [`WebSocketTransport`] - web socket transport (tokio-tungstenite)
//! - [`MemoryConnection`] - in-process connection pair

mod memory;
mod websocket;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;

pub use memory::{MemoryConnection, DEFAULT_MEMORY_BUFFER};
pub use websocket::{
    WebSocketConfig, WebSocketConnection, WebSocketTransport, DEFAULT_PING_INTERVAL,
    DEFAULT_PING_TIMEOUT, DEFAULT_WS_QUEUE_SIZE,
};

/// Boxed future used at the object-safe seams.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// One established, framed duplex connection.
///
/// Reads and writes may run concurrently from different tasks. `close` must
/// be idempotent and make pending and future reads/writes fail.
pub trait Connection: Send + Sync + 'static {
    /// Wait for the next text frame.
    fn read_message(&self) -> BoxFuture<'_, Result<String>>;

    /// Write one text frame.
    fn write_message(&self, frame: String) -> BoxFuture<'_, Result<()>>;

    /// Close the connection (best-effort).
    fn close(&self);

    /// Keepalive `(interval, timeout)`.
    fn ping_params(&self) -> (Duration, Duration);
}

/// Factory for client connections.
pub trait Transport: Send + Sync {
    /// Open a connection to `url`.
    fn connect<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<Arc<dyn Connection>>>;
}
