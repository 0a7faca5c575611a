//! Client builder and runtime.
//!
//! The [`ClientBuilder`] provides a fluent API for registering handlers and
//! tuning the channel. [`ClientBuilder::dial`] then:
//! 1. Connects through the given [`Transport`]
//! 2. Creates the channel
//! 3. Spawns the inbound, outbound and pinger loops (plus the worker loop
//!    in sequential mode)
//!
//! The handshake completes asynchronously: the connection callback fires
//! once the server's Open packet arrived.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use socketio_channel::transport::WebSocketTransport;
//! use socketio_channel::{get_url, Client};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = Client::builder()
//!         .on("/message", |text: String, _channel| async move {
//!             println!("{}", text);
//!             Ok(())
//!         })
//!         .dial(&get_url("localhost", 3811, false), &WebSocketTransport::default())
//!         .await?;
//!
//!     let reply = client.ack("/join", "main", Duration::from_secs(5)).await?;
//!     println!("{}", reply);
//!
//!     client.wait_for_shutdown().await;
//!     Ok(())
//! }
//! ```

use std::future::Future;
use std::ops::Deref;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::backpressure::OverflowRegistry;
use crate::channel::{Channel, ChannelConfig};
use crate::error::{ChannelError, Result};
use crate::handler::{HandlerRegistry, LoopEvent};
use crate::loops::{spawn_loops, LoopHandles};
use crate::transport::{Connection, Transport};

/// Build the socket.io web socket url for `host:port`.
pub fn get_url(host: &str, port: u16, secure: bool) -> String {
    let scheme = if secure { "wss" } else { "ws" };
    format!(
        "{}://{}:{}/socket.io/?EIO=3&transport=websocket",
        scheme, host, port
    )
}

/// Builder for configuring and creating a [`Client`].
pub struct ClientBuilder {
    registry: HandlerRegistry,
    config: ChannelConfig,
    overflow: Option<Arc<OverflowRegistry>>,
}

impl ClientBuilder {
    /// Create a new client builder.
    pub fn new() -> Self {
        Self {
            registry: HandlerRegistry::new(),
            config: ChannelConfig::default(),
            overflow: None,
        }
    }

    /// Register an event handler.
    ///
    /// The handler receives the decoded argument and the channel. Its return
    /// value answers the server when the event asked for an acknowledgment.
    pub fn on<F, T, R, Fut>(mut self, event: &str, handler: F) -> Self
    where
        F: Fn(T, Channel) -> Fut + Send + Sync + 'static,
        T: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        Fut: Future<Output = Result<R>> + Send + 'static,
    {
        self.registry.register(event, handler);
        self
    }

    /// Called once the handshake completed.
    pub fn on_connection<F>(mut self, callback: F) -> Self
    where
        F: Fn(&Channel) + Send + Sync + 'static,
    {
        self.registry.on_loop_event(LoopEvent::Connection, callback);
        self
    }

    /// Called once when the channel closes, whatever the reason.
    pub fn on_disconnection<F>(mut self, callback: F) -> Self
    where
        F: Fn(&Channel) + Send + Sync + 'static,
    {
        self.registry.on_loop_event(LoopEvent::Disconnection, callback);
        self
    }

    /// Called when a handler fails or its argument cannot be decoded.
    pub fn on_error<F>(mut self, callback: F) -> Self
    where
        F: Fn(&Channel, &ChannelError) + Send + Sync + 'static,
    {
        self.registry.on_error(callback);
        self
    }

    /// Dispatch events one at a time, in arrival order.
    ///
    /// Default: false
    pub fn sequential(mut self, sequential: bool) -> Self {
        self.config.sequential = sequential;
        self
    }

    /// Set the capacity of the inbound and outbound queues.
    ///
    /// Default: 500
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.config.queue_capacity = capacity;
        self
    }

    /// Set the maximum number of concurrent handlers.
    ///
    /// When this limit is reached, the inbound loop waits for a handler to
    /// finish before reading the next frame.
    /// Default: 256
    pub fn max_concurrent_handlers(mut self, limit: usize) -> Self {
        self.config.max_concurrent_handlers = limit;
        self
    }

    /// Record backpressure in a shared registry instead of a private one.
    pub fn overflow_registry(mut self, registry: Arc<OverflowRegistry>) -> Self {
        self.overflow = Some(registry);
        self
    }

    /// Connect to `url` and start the channel.
    pub async fn dial<T>(self, url: &str, transport: &T) -> Result<Client>
    where
        T: Transport + ?Sized,
    {
        let connection = transport.connect(url).await?;
        tracing::info!("Connected to {}", url);
        Ok(self.attach(connection))
    }

    /// Start the channel over an already established connection.
    pub fn attach(self, connection: Arc<dyn Connection>) -> Client {
        let channel = Channel::new(
            connection,
            Arc::new(self.registry),
            self.overflow.unwrap_or_default(),
            self.config,
            None,
        );
        let loops = spawn_loops(&channel);
        Client { channel, loops }
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A running client. Derefs to its [`Channel`].
pub struct Client {
    channel: Channel,
    loops: LoopHandles,
}

impl Client {
    /// Create a new client builder.
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// The client's channel. Clones stay usable after the client is consumed.
    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    /// Wait until the channel closed and every loop and handler finished.
    ///
    /// This consumes the client.
    pub async fn wait_for_shutdown(self) {
        self.loops.join().await;
    }
}

impl Deref for Client {
    type Target = Channel;

    fn deref(&self) -> &Channel {
        &self.channel
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::transport::MemoryConnection;

    #[test]
    fn test_get_url() {
        assert_eq!(
            get_url("localhost", 3811, false),
            "ws://localhost:3811/socket.io/?EIO=3&transport=websocket"
        );
        assert_eq!(
            get_url("example.com", 443, true),
            "wss://example.com:443/socket.io/?EIO=3&transport=websocket"
        );
    }

    #[test]
    fn test_builder_default() {
        let builder = ClientBuilder::default();
        assert!(builder.registry.is_empty());
        assert!(builder.overflow.is_none());
    }

    #[test]
    fn test_builder_method_chaining() {
        let builder = Client::builder()
            .on("/message", |_: String, _channel| async { Ok(()) })
            .on("/join", |room: String, _channel| async move { Ok(room) })
            .on_connection(|_| {})
            .on_disconnection(|_| {});

        assert!(builder.registry.has_handler("/message"));
        assert!(builder.registry.has_handler("/join"));
        assert_eq!(builder.registry.len(), 2);
    }

    #[test]
    fn test_builder_configuration() {
        let builder = Client::builder()
            .sequential(true)
            .queue_capacity(64)
            .max_concurrent_handlers(8);

        assert!(builder.config.sequential);
        assert_eq!(builder.config.queue_capacity, 64);
        assert_eq!(builder.config.max_concurrent_handlers, 8);
    }

    #[tokio::test]
    async fn test_wait_for_shutdown_after_peer_close() {
        let (local, peer) = MemoryConnection::pair(Duration::from_secs(25), Duration::from_secs(60));
        let client = Client::builder().attach(Arc::new(local));
        let channel = client.channel().clone();

        peer.write_message("1".to_string()).await.unwrap();

        tokio::time::timeout(Duration::from_secs(5), client.wait_for_shutdown())
            .await
            .unwrap();
        assert!(!channel.is_alive());
    }
}
