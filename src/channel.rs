//! The per-connection channel.
//!
//! A [`Channel`] is a cheap, clonable handle over the state shared by the
//! four channel loops (see [`crate::loops`]) and by application code:
//!
//! - the transport [`Connection`], closed exactly once
//! - the inbound queue feeding the worker loop in sequential mode
//! - the outbound [`FrameQueue`] drained by the outbound loop
//! - the handshake [`Header`], written at most once
//! - the alive flag, flipped to `false` exactly once by [`Channel::close`]
//!
//! Every terminal error funnels into the same close path, so any number of
//! loops may fail at the same time and teardown still runs once.

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{mpsc, watch, Semaphore};

use crate::ack::Correlator;
use crate::backpressure::OverflowRegistry;
use crate::error::{ChannelError, Result};
use crate::handler::{HandlerRegistry, LoopEvent};
use crate::protocol::{encode, Header, Message, CLOSE_MESSAGE};
use crate::queue::FrameQueue;
use crate::server::Rooms;
use crate::transport::Connection;

/// Default capacity of the inbound and outbound queues.
pub const DEFAULT_QUEUE_CAPACITY: usize = 500;

/// Default maximum concurrent handlers in concurrent mode.
pub const DEFAULT_MAX_CONCURRENT_HANDLERS: usize = 256;

/// Smallest usable queue capacity. Below this every depth is saturated.
const MIN_QUEUE_CAPACITY: usize = 2;

static NEXT_CHANNEL_ID: AtomicU64 = AtomicU64::new(1);

/// Channel configuration.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Capacity of the inbound and outbound queues.
    /// Default: 500
    pub queue_capacity: usize,
    /// Dispatch inbound messages one at a time, in arrival order.
    /// Default: false
    pub sequential: bool,
    /// Maximum handlers running at once in concurrent mode.
    /// Default: 256
    pub max_concurrent_handlers: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            sequential: false,
            max_concurrent_handlers: DEFAULT_MAX_CONCURRENT_HANDLERS,
        }
    }
}

/// Server side of a channel: room table and peer address.
pub(crate) struct ServerLink {
    pub(crate) rooms: Arc<Rooms>,
    pub(crate) remote_addr: Option<SocketAddr>,
}

struct Inner {
    id: u64,
    connection: Arc<dyn Connection>,
    inbound_tx: Mutex<Option<mpsc::Sender<Message>>>,
    inbound_rx: Mutex<Option<mpsc::Receiver<Message>>>,
    outbound: FrameQueue<String>,
    header: OnceLock<Header>,
    alive: Mutex<bool>,
    config: ChannelConfig,
    correlator: Correlator,
    registry: Arc<HandlerRegistry>,
    overflow: Arc<OverflowRegistry>,
    handler_slots: Arc<Semaphore>,
    closed: watch::Sender<bool>,
    server: Option<ServerLink>,
}

/// One logical socket.io connection.
#[derive(Clone)]
pub struct Channel {
    inner: Arc<Inner>,
}

impl Channel {
    /// Create a channel over an established connection. Starts no loop.
    pub(crate) fn new(
        connection: Arc<dyn Connection>,
        registry: Arc<HandlerRegistry>,
        overflow: Arc<OverflowRegistry>,
        mut config: ChannelConfig,
        server: Option<ServerLink>,
    ) -> Self {
        config.queue_capacity = config.queue_capacity.max(MIN_QUEUE_CAPACITY);
        config.max_concurrent_handlers = config.max_concurrent_handlers.max(1);

        let (inbound_tx, inbound_rx) = mpsc::channel(config.queue_capacity);
        let (closed, _) = watch::channel(false);

        Self {
            inner: Arc::new(Inner {
                id: NEXT_CHANNEL_ID.fetch_add(1, Ordering::Relaxed),
                connection,
                inbound_tx: Mutex::new(Some(inbound_tx)),
                inbound_rx: Mutex::new(Some(inbound_rx)),
                outbound: FrameQueue::new(config.queue_capacity),
                header: OnceLock::new(),
                alive: Mutex::new(true),
                handler_slots: Arc::new(Semaphore::new(config.max_concurrent_handlers)),
                config,
                correlator: Correlator::new(),
                registry,
                overflow,
                closed,
                server,
            }),
        }
    }

    /// Process-unique numeric id, available before the handshake.
    #[inline]
    pub fn local_id(&self) -> u64 {
        self.inner.id
    }

    /// Session id from the handshake, empty before it completed.
    pub fn id(&self) -> &str {
        self.inner
            .header
            .get()
            .map(|h| h.sid.as_str())
            .unwrap_or_default()
    }

    /// Handshake header, once received (client) or sent (server).
    pub fn header(&self) -> Option<&Header> {
        self.inner.header.get()
    }

    /// Check that the channel was not closed yet.
    pub fn is_alive(&self) -> bool {
        *self.inner.alive.lock()
    }

    /// Wait until the channel is closed.
    pub async fn closed(&self) {
        let mut rx = self.inner.closed.subscribe();
        let _ = rx.wait_for(|closed| *closed).await;
    }

    /// Peer address, when accepted by a server that knew it.
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.inner.server.as_ref().and_then(|s| s.remote_addr)
    }

    /// Channel configuration.
    pub fn config(&self) -> &ChannelConfig {
        &self.inner.config
    }

    /// Send a fire-and-forget event.
    ///
    /// Sending on a closed channel does nothing.
    ///
    /// # Errors
    ///
    /// - [`ChannelError::Json`] if `args` cannot be serialized
    /// - [`ChannelError::Overflow`] if the outbound queue is full
    pub fn emit<T: Serialize + ?Sized>(&self, event: &str, args: &T) -> Result<()> {
        if !self.is_alive() {
            return Ok(());
        }
        let args = serde_json::to_string(args)?;
        self.send_message(&Message::emit(event, args))
    }

    /// Send an event and wait for the peer's acknowledgment.
    ///
    /// Returns the raw JSON text of the reply arguments.
    ///
    /// # Errors
    ///
    /// - [`ChannelError::ConnectionClosed`] if the channel is or gets closed
    /// - [`ChannelError::Timeout`] if no reply arrived within `timeout`
    /// - [`ChannelError::Overflow`] if the outbound queue is full
    pub async fn ack<T: Serialize + ?Sized>(
        &self,
        event: &str,
        args: &T,
        timeout: Duration,
    ) -> Result<String> {
        if !self.is_alive() {
            return Err(ChannelError::ConnectionClosed);
        }
        let args = serde_json::to_string(args)?;

        let correlator = &self.inner.correlator;
        let (id, waiter) = correlator.register();
        let frame = encode(&Message::ack_request(id, event, args));
        if let Err(e) = self.inner.outbound.try_push(frame) {
            correlator.cancel(id);
            return Err(e);
        }

        correlator.await_reply(id, waiter, timeout).await
    }

    /// Close the channel. Safe to call any number of times.
    pub fn close(&self) {
        self.shutdown(None);
    }

    /// Close the channel because of `cause`.
    pub(crate) fn close_with(&self, cause: ChannelError) {
        self.shutdown(Some(cause));
    }

    fn shutdown(&self, cause: Option<ChannelError>) {
        {
            let mut alive = self.inner.alive.lock();
            if !*alive {
                return;
            }
            *alive = false;
        }

        let id = self.inner.id;
        match &cause {
            Some(e) => tracing::warn!("Closing channel {}: {}", id, e),
            None => tracing::debug!("Closing channel {}", id),
        }

        self.inner.connection.close();
        self.inner.inbound_tx.lock().take();
        let discarded = self.inner.outbound.close_with(CLOSE_MESSAGE.to_string());
        if discarded > 0 {
            tracing::debug!("Discarded {} outbound frames of channel {}", discarded, id);
        }
        self.inner.correlator.cancel_all();
        self.inner.closed.send_replace(true);

        self.inner
            .registry
            .call_loop_event(self, LoopEvent::Disconnection);

        self.inner.overflow.remove(id);
        if let Some(server) = &self.inner.server {
            server.rooms.remove_channel(self);
        }
    }

    /// Queue an encoded frame.
    ///
    /// A frame queued on a closed channel is dropped.
    pub(crate) fn send_frame(&self, frame: String) -> Result<()> {
        match self.inner.outbound.try_push(frame) {
            Err(ChannelError::ConnectionClosed) => Ok(()),
            other => other,
        }
    }

    pub(crate) fn send_message(&self, msg: &Message) -> Result<()> {
        self.send_frame(encode(msg))
    }

    /// Store the handshake header. Returns `false` if one was already set.
    pub(crate) fn set_header(&self, header: Header) -> bool {
        self.inner.header.set(header).is_ok()
    }

    /// Keepalive interval: the handshake's when it carries one, the
    /// transport's otherwise.
    pub(crate) fn ping_interval(&self) -> Duration {
        match self.inner.header.get() {
            Some(header) if header.ping_interval > 0 => header.ping_interval(),
            _ => self.inner.connection.ping_params().0,
        }
    }

    pub(crate) fn connection(&self) -> &Arc<dyn Connection> {
        &self.inner.connection
    }

    pub(crate) fn outbound(&self) -> &FrameQueue<String> {
        &self.inner.outbound
    }

    pub(crate) fn correlator(&self) -> &Correlator {
        &self.inner.correlator
    }

    pub(crate) fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.inner.registry
    }

    pub(crate) fn overflow(&self) -> &OverflowRegistry {
        &self.inner.overflow
    }

    pub(crate) fn handler_slots(&self) -> &Arc<Semaphore> {
        &self.inner.handler_slots
    }

    /// Sender side of the inbound queue, `None` once closed.
    pub(crate) fn inbound_sender(&self) -> Option<mpsc::Sender<Message>> {
        self.inner.inbound_tx.lock().clone()
    }

    /// Receiver side of the inbound queue. Can be taken once.
    pub(crate) fn take_inbound_receiver(&self) -> Option<mpsc::Receiver<Message>> {
        self.inner.inbound_rx.lock().take()
    }

    fn rooms(&self) -> Result<&Arc<Rooms>> {
        self.inner
            .server
            .as_ref()
            .map(|s| &s.rooms)
            .ok_or(ChannelError::ServerNotSet)
    }

    /// Join a room.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::ServerNotSet`] on client channels.
    pub fn join(&self, room: &str) -> Result<()> {
        self.rooms()?.join(room, self);
        Ok(())
    }

    /// Leave a room.
    pub fn leave(&self, room: &str) -> Result<()> {
        self.rooms()?.leave(room, self);
        Ok(())
    }

    /// Number of channels in a room.
    pub fn amount(&self, room: &str) -> Result<usize> {
        Ok(self.rooms()?.amount(room))
    }

    /// Channels in a room.
    pub fn list(&self, room: &str) -> Result<Vec<Channel>> {
        Ok(self.rooms()?.list(room))
    }

    /// Emit an event to every channel in a room.
    pub fn broadcast_to<T: Serialize + ?Sized>(
        &self,
        room: &str,
        event: &str,
        args: &T,
    ) -> Result<()> {
        self.rooms()?.broadcast_to(room, event, args)
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.inner.id)
            .field("sid", &self.id())
            .field("alive", &self.is_alive())
            .finish()
    }
}

/// Channel over one end of a memory pair; returns the channel and the peer end.
#[cfg(test)]
pub(crate) fn test_channel(
    registry: HandlerRegistry,
) -> (Channel, Arc<crate::transport::MemoryConnection>) {
    use crate::transport::MemoryConnection;

    let (local, peer) = MemoryConnection::pair(Duration::from_secs(25), Duration::from_secs(60));
    let channel = Channel::new(
        Arc::new(local),
        Arc::new(registry),
        Arc::new(OverflowRegistry::new()),
        ChannelConfig::default(),
        None,
    );
    (channel, Arc::new(peer))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    use crate::protocol::decode;
    use crate::transport::MemoryConnection;

    fn channel_over(
        conn: Arc<MemoryConnection>,
        registry: HandlerRegistry,
        config: ChannelConfig,
    ) -> Channel {
        Channel::new(
            conn,
            Arc::new(registry),
            Arc::new(OverflowRegistry::new()),
            config,
            None,
        )
    }

    #[test]
    fn test_config_default() {
        let config = ChannelConfig::default();
        assert_eq!(config.queue_capacity, DEFAULT_QUEUE_CAPACITY);
        assert!(!config.sequential);
        assert_eq!(config.max_concurrent_handlers, DEFAULT_MAX_CONCURRENT_HANDLERS);
    }

    #[tokio::test]
    async fn test_new_channel_is_alive() {
        let (channel, _peer) = test_channel(HandlerRegistry::new());
        assert!(channel.is_alive());
        assert_eq!(channel.id(), "");
        assert!(channel.header().is_none());
        assert!(channel.remote_addr().is_none());
        assert_eq!(channel.outbound().capacity(), DEFAULT_QUEUE_CAPACITY);
    }

    #[tokio::test]
    async fn test_local_ids_are_unique() {
        let (a, _pa) = test_channel(HandlerRegistry::new());
        let (b, _pb) = test_channel(HandlerRegistry::new());
        assert_ne!(a.local_id(), b.local_id());
    }

    #[tokio::test]
    async fn test_tiny_capacity_is_clamped() {
        let (local, _peer) = MemoryConnection::pair(Duration::from_secs(1), Duration::from_secs(1));
        let config = ChannelConfig {
            queue_capacity: 0,
            ..Default::default()
        };
        let channel = channel_over(Arc::new(local), HandlerRegistry::new(), config);
        assert_eq!(channel.outbound().capacity(), MIN_QUEUE_CAPACITY);
    }

    #[tokio::test]
    async fn test_header_written_once() {
        let (channel, _peer) = test_channel(HandlerRegistry::new());
        let first = Header {
            sid: "abc".to_string(),
            ..Default::default()
        };
        let second = Header {
            sid: "xyz".to_string(),
            ..Default::default()
        };

        assert!(channel.set_header(first));
        assert!(!channel.set_header(second));
        assert_eq!(channel.id(), "abc");
    }

    #[tokio::test]
    async fn test_ping_interval_prefers_header() {
        let (channel, _peer) = test_channel(HandlerRegistry::new());
        assert_eq!(channel.ping_interval(), Duration::from_secs(25));

        channel.set_header(Header {
            sid: "abc".to_string(),
            ping_interval: 1500,
            ..Default::default()
        });
        assert_eq!(channel.ping_interval(), Duration::from_millis(1500));
    }

    #[tokio::test]
    async fn test_emit_queues_frame() {
        let (channel, _peer) = test_channel(HandlerRegistry::new());
        channel.emit("/message", &serde_json::json!({"text": "hi"})).unwrap();

        let frame = channel.outbound().pop().await.unwrap();
        let msg = decode(&frame).unwrap();
        assert_eq!(msg.event, "/message");
        assert_eq!(msg.args, r#"{"text":"hi"}"#);
    }

    #[tokio::test]
    async fn test_emit_on_full_queue_overflows() {
        let (local, _peer) = MemoryConnection::pair(Duration::from_secs(1), Duration::from_secs(1));
        let config = ChannelConfig {
            queue_capacity: 2,
            ..Default::default()
        };
        let channel = channel_over(Arc::new(local), HandlerRegistry::new(), config);

        channel.emit("a", &1).unwrap();
        channel.emit("a", &2).unwrap();
        assert!(matches!(channel.emit("a", &3), Err(ChannelError::Overflow)));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let disconnects = Arc::new(AtomicUsize::new(0));
        let mut registry = HandlerRegistry::new();
        let counter = disconnects.clone();
        registry.on_loop_event(LoopEvent::Disconnection, move |channel| {
            // callbacks may inspect the channel
            assert!(!channel.is_alive());
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let local = Arc::new(
            MemoryConnection::pair(Duration::from_secs(1), Duration::from_secs(1)).0,
        );
        let channel = channel_over(local.clone(), registry, ChannelConfig::default());

        channel.close();
        channel.close();
        channel.close_with(ChannelError::Overflow);

        assert!(!channel.is_alive());
        assert_eq!(local.close_count(), 1);
        assert_eq!(disconnects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_concurrent_closes_tear_down_once() {
        let disconnects = Arc::new(AtomicUsize::new(0));
        let mut registry = HandlerRegistry::new();
        let counter = disconnects.clone();
        registry.on_loop_event(LoopEvent::Disconnection, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let local = Arc::new(
            MemoryConnection::pair(Duration::from_secs(1), Duration::from_secs(1)).0,
        );
        let channel = channel_over(local.clone(), registry, ChannelConfig::default());

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let channel = channel.clone();
                tokio::spawn(async move { channel.close_with(ChannelError::ConnectionClosed) })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(local.close_count(), 1);
        assert_eq!(disconnects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_close_drains_outbound_and_leaves_sentinel() {
        let (channel, _peer) = test_channel(HandlerRegistry::new());
        channel.emit("a", &1).unwrap();
        channel.emit("b", &2).unwrap();

        channel.close();

        assert_eq!(channel.outbound().len(), 1);
        assert_eq!(channel.outbound().pop().await.as_deref(), Some(CLOSE_MESSAGE));
        assert!(channel.inbound_sender().is_none());
    }

    #[tokio::test]
    async fn test_send_after_close() {
        let (channel, _peer) = test_channel(HandlerRegistry::new());
        channel.close();

        // emit is a silent no-op, ack fails fast
        assert!(channel.emit("a", &1).is_ok());
        let result = channel.ack("a", &1, Duration::from_secs(1)).await;
        assert!(matches!(result, Err(ChannelError::ConnectionClosed)));
    }

    #[tokio::test]
    async fn test_close_fails_pending_ack() {
        let (channel, _peer) = test_channel(HandlerRegistry::new());

        let waiting = {
            let channel = channel.clone();
            tokio::spawn(async move { channel.ack("/join", "main", Duration::from_secs(30)).await })
        };
        while channel.correlator().pending() == 0 {
            tokio::task::yield_now().await;
        }

        channel.close();
        let result = waiting.await.unwrap();
        assert!(matches!(result, Err(ChannelError::ConnectionClosed)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ack_times_out() {
        let (channel, _peer) = test_channel(HandlerRegistry::new());

        let result = channel.ack("/join", "main", Duration::from_secs(5)).await;
        assert!(matches!(result, Err(ChannelError::Timeout)));
        assert!(channel.is_alive());
        assert_eq!(channel.correlator().pending(), 0);
    }

    #[tokio::test]
    async fn test_closed_resolves_after_close() {
        let (channel, _peer) = test_channel(HandlerRegistry::new());

        let waiter = {
            let channel = channel.clone();
            tokio::spawn(async move { channel.closed().await })
        };
        channel.close();

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_rooms_need_server() {
        let (channel, _peer) = test_channel(HandlerRegistry::new());
        assert!(matches!(channel.join("test"), Err(ChannelError::ServerNotSet)));
        assert!(matches!(channel.amount("test"), Err(ChannelError::ServerNotSet)));
        assert!(matches!(
            channel.broadcast_to("test", "/message", &1),
            Err(ChannelError::ServerNotSet)
        ));
    }
}
