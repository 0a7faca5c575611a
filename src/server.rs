//! Server side: accepting connections and room bookkeeping.
//!
//! [`Server::accept`] turns an established [`Connection`] into a running
//! [`Channel`]:
//! 1. Generate a session id and build the handshake header
//! 2. Queue the Open packet and the socket.io connect packet
//! 3. Fire the connection callback
//! 4. Spawn the channel loops
//!
//! # Example
//!
//! ```no_run
//! use socketio_channel::Server;
//! use tokio::net::TcpListener;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = Server::builder()
//!         .on_connection(|channel| {
//!             let _ = channel.join("lobby");
//!         })
//!         .on("/join", |room: String, _channel| async move {
//!             Ok(format!("joined to {}", room))
//!         })
//!         .build();
//!
//!     let listener = TcpListener::bind("127.0.0.1:3811").await?;
//!     server.serve(listener).await?;
//!     Ok(())
//! }
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::net::{TcpListener, TcpStream};

use crate::backpressure::OverflowRegistry;
use crate::channel::{Channel, ChannelConfig, ServerLink};
use crate::error::{ChannelError, Result};
use crate::handler::{HandlerRegistry, LoopEvent};
use crate::loops::spawn_loops;
use crate::protocol::{encode, Header, Message, EMPTY_MESSAGE};
use crate::transport::{Connection, WebSocketConfig, WebSocketTransport};

/// Room membership and the session id table of one server.
#[derive(Default)]
pub(crate) struct Rooms {
    state: Mutex<RoomState>,
}

#[derive(Default)]
struct RoomState {
    sids: HashMap<String, Channel>,
    rooms: HashMap<String, HashMap<u64, Channel>>,
}

impl Rooms {
    fn add_channel(&self, channel: &Channel) {
        self.state
            .lock()
            .sids
            .insert(channel.id().to_string(), channel.clone());
    }

    /// Forget a channel: its session id and every room membership.
    pub(crate) fn remove_channel(&self, channel: &Channel) {
        let mut state = self.state.lock();
        state.sids.remove(channel.id());
        state.rooms.retain(|_, members| {
            members.remove(&channel.local_id());
            !members.is_empty()
        });
    }

    pub(crate) fn join(&self, room: &str, channel: &Channel) {
        // a closed channel would never be removed again
        if !channel.is_alive() {
            return;
        }
        let mut state = self.state.lock();
        state
            .rooms
            .entry(room.to_string())
            .or_default()
            .insert(channel.local_id(), channel.clone());

        // close may have run its room cleanup between the check and the insert
        if !channel.is_alive() {
            if let Some(members) = state.rooms.get_mut(room) {
                members.remove(&channel.local_id());
                if members.is_empty() {
                    state.rooms.remove(room);
                }
            }
        }
    }

    pub(crate) fn leave(&self, room: &str, channel: &Channel) {
        let mut state = self.state.lock();
        if let Some(members) = state.rooms.get_mut(room) {
            members.remove(&channel.local_id());
            if members.is_empty() {
                state.rooms.remove(room);
            }
        }
    }

    pub(crate) fn amount(&self, room: &str) -> usize {
        self.state.lock().rooms.get(room).map_or(0, HashMap::len)
    }

    pub(crate) fn list(&self, room: &str) -> Vec<Channel> {
        self.state
            .lock()
            .rooms
            .get(room)
            .map(|members| members.values().cloned().collect())
            .unwrap_or_default()
    }

    pub(crate) fn broadcast_to<T: Serialize + ?Sized>(
        &self,
        room: &str,
        event: &str,
        args: &T,
    ) -> Result<()> {
        let frame = encode(&Message::emit(event, serde_json::to_string(args)?));
        send_to_all(&self.list(room), &frame);
        Ok(())
    }

    fn broadcast_to_all<T: Serialize + ?Sized>(&self, event: &str, args: &T) -> Result<()> {
        let frame = encode(&Message::emit(event, serde_json::to_string(args)?));
        let channels: Vec<_> = self.state.lock().sids.values().cloned().collect();
        send_to_all(&channels, &frame);
        Ok(())
    }

    fn get_channel(&self, sid: &str) -> Option<Channel> {
        self.state.lock().sids.get(sid).cloned()
    }

    fn amount_of_sids(&self) -> usize {
        self.state.lock().sids.len()
    }

    fn amount_of_rooms(&self) -> usize {
        self.state.lock().rooms.len()
    }
}

// sends happen outside the room lock
fn send_to_all(channels: &[Channel], frame: &str) {
    for channel in channels {
        if let Err(e) = channel.send_frame(frame.to_string()) {
            tracing::warn!("Broadcast to channel {} failed: {}", channel.local_id(), e);
        }
    }
}

/// Builder for configuring and creating a [`Server`].
pub struct ServerBuilder {
    registry: HandlerRegistry,
    config: ChannelConfig,
    overflow: Option<Arc<OverflowRegistry>>,
    websocket: WebSocketConfig,
}

impl ServerBuilder {
    /// Create a new server builder.
    pub fn new() -> Self {
        Self {
            registry: HandlerRegistry::new(),
            config: ChannelConfig::default(),
            overflow: None,
            websocket: WebSocketConfig::default(),
        }
    }

    /// Register an event handler.
    ///
    /// The return value is sent back when the client asked for an
    /// acknowledgment.
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

    /// Called once per accepted channel, before its loops start.
    pub fn on_connection<F>(mut self, callback: F) -> Self
    where
        F: Fn(&Channel) + Send + Sync + 'static,
    {
        self.registry.on_loop_event(LoopEvent::Connection, callback);
        self
    }

    /// Called once per channel when it closes.
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

    /// Dispatch each channel's events one at a time, in arrival order.
    ///
    /// Default: false
    pub fn sequential(mut self, sequential: bool) -> Self {
        self.config.sequential = sequential;
        self
    }

    /// Set the capacity of each channel's queues.
    ///
    /// Default: 500
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.config.queue_capacity = capacity;
        self
    }

    /// Set the maximum number of concurrent handlers per channel.
    ///
    /// Default: 256
    pub fn max_concurrent_handlers(mut self, limit: usize) -> Self {
        self.config.max_concurrent_handlers = limit;
        self
    }

    /// Share an overflow registry with other servers or clients.
    pub fn overflow_registry(mut self, registry: Arc<OverflowRegistry>) -> Self {
        self.overflow = Some(registry);
        self
    }

    /// Set the web socket configuration used by [`Server::accept_websocket`].
    pub fn websocket_config(mut self, config: WebSocketConfig) -> Self {
        self.websocket = config;
        self
    }

    /// Build the server.
    pub fn build(self) -> Server {
        Server {
            inner: Arc::new(ServerInner {
                registry: Arc::new(self.registry),
                config: self.config,
                overflow: self.overflow.unwrap_or_default(),
                rooms: Arc::new(Rooms::default()),
                transport: WebSocketTransport::new(self.websocket),
            }),
        }
    }
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

struct ServerInner {
    registry: Arc<HandlerRegistry>,
    config: ChannelConfig,
    overflow: Arc<OverflowRegistry>,
    rooms: Arc<Rooms>,
    transport: WebSocketTransport,
}

/// A socket.io server. Cheap to clone.
#[derive(Clone)]
pub struct Server {
    inner: Arc<ServerInner>,
}

impl Server {
    /// Create a new server builder.
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    /// Start a channel over an established connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the handshake cannot be queued.
    pub fn accept(
        &self,
        connection: Arc<dyn Connection>,
        remote_addr: Option<SocketAddr>,
    ) -> Result<Channel> {
        let (interval, timeout) = connection.ping_params();
        let header = Header {
            sid: generate_sid(),
            upgrades: Vec::new(),
            ping_interval: interval.as_millis() as u64,
            ping_timeout: timeout.as_millis() as u64,
        };
        let open = Message::open(header.to_json()?);

        let inner = &self.inner;
        let channel = Channel::new(
            connection,
            inner.registry.clone(),
            inner.overflow.clone(),
            inner.config.clone(),
            Some(ServerLink {
                rooms: inner.rooms.clone(),
                remote_addr,
            }),
        );
        channel.set_header(header);

        channel.send_message(&open)?;
        channel.send_frame(EMPTY_MESSAGE.to_string())?;

        inner.rooms.add_channel(&channel);
        tracing::info!(
            "Accepted channel {} (sid {}) from {:?}",
            channel.local_id(),
            channel.id(),
            remote_addr
        );

        inner
            .registry
            .call_loop_event(&channel, LoopEvent::Connection);

        // loops are detached, the channel ends through close
        let _ = spawn_loops(&channel);
        Ok(channel)
    }

    /// Run the web socket handshake on `stream`, then [`accept`](Self::accept) it.
    pub async fn accept_websocket(&self, stream: TcpStream) -> Result<Channel> {
        let remote_addr = stream.peer_addr().ok();
        let connection = self.inner.transport.accept(stream).await?;
        self.accept(connection, remote_addr)
    }

    /// Accept web socket connections from `listener` until it fails.
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        tracing::info!("Serving on {:?}", listener.local_addr().ok());
        loop {
            let (stream, addr) = listener.accept().await?;
            let server = self.clone();
            tokio::spawn(async move {
                if let Err(e) = server.accept_websocket(stream).await {
                    tracing::warn!("Failed to accept {}: {}", addr, e);
                }
            });
        }
    }

    /// Channel by session id.
    pub fn get_channel(&self, sid: &str) -> Option<Channel> {
        self.inner.rooms.get_channel(sid)
    }

    /// Number of open channels.
    pub fn amount_of_sids(&self) -> usize {
        self.inner.rooms.amount_of_sids()
    }

    /// Number of non-empty rooms.
    pub fn amount_of_rooms(&self) -> usize {
        self.inner.rooms.amount_of_rooms()
    }

    /// Number of channels in a room.
    pub fn amount(&self, room: &str) -> usize {
        self.inner.rooms.amount(room)
    }

    /// Channels in a room.
    pub fn list(&self, room: &str) -> Vec<Channel> {
        self.inner.rooms.list(room)
    }

    /// Emit an event to every channel in a room.
    pub fn broadcast_to<T: Serialize + ?Sized>(
        &self,
        room: &str,
        event: &str,
        args: &T,
    ) -> Result<()> {
        self.inner.rooms.broadcast_to(room, event, args)
    }

    /// Emit an event to every open channel.
    pub fn broadcast_to_all<T: Serialize + ?Sized>(&self, event: &str, args: &T) -> Result<()> {
        self.inner.rooms.broadcast_to_all(event, args)
    }

    /// Overflow registry shared by this server's channels.
    pub fn overflow_registry(&self) -> &Arc<OverflowRegistry> {
        &self.inner.overflow
    }
}

/// Random-looking, process-unique session id.
fn generate_sid() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};

    static SEQ: AtomicU64 = AtomicU64::new(0);

    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);
    let pid = std::process::id() as u64;
    let seq = SEQ.fetch_add(1, Ordering::Relaxed);

    format!("{:016x}{:x}", nanos.wrapping_mul(0x517cc1b727220a95) ^ pid, seq)
}
