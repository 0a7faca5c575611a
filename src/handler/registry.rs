//! Handler registry for dispatching events by name.
//!
//! The registry maps event names to async handlers and holds the lifecycle
//! callbacks fired by the channel loops.
//!
//! # Example
//!
//! ```
//! use socketio_channel::handler::{HandlerRegistry, LoopEvent};
//!
//! let mut registry = HandlerRegistry::new();
//!
//! registry.register("/join", |room: String, _channel| async move {
//!     Ok(format!("joined to {}", room))
//! });
//! registry.on_loop_event(LoopEvent::Connection, |channel| {
//!     println!("connected: {}", channel.id());
//! });
//!
//! assert!(registry.has_handler("/join"));
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::channel::Channel;
use crate::error::{ChannelError, Result};
use crate::transport::BoxFuture;

/// Result of a handler: the JSON text of its return value.
pub type HandlerResult = Result<String>;

/// Callback for connection and disconnection.
pub type LoopCallback = Arc<dyn Fn(&Channel) + Send + Sync>;

/// Callback for handler failures.
pub type ErrorCallback = Arc<dyn Fn(&Channel, &ChannelError) + Send + Sync>;

/// Lifecycle events fired by the channel loops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoopEvent {
    /// Handshake completed.
    Connection,
    /// Channel torn down. Fired exactly once per channel.
    Disconnection,
}

/// Trait for event handlers.
pub trait Handler: Send + Sync + 'static {
    /// Handle an event with its raw JSON argument (empty when absent).
    fn call(&self, args: &str, channel: Channel) -> BoxFuture<'static, HandlerResult>;
}

/// Wrapper that decodes the JSON argument and encodes the return value.
pub struct TypedHandler<F, T, R, Fut>
where
    F: Fn(T, Channel) -> Fut + Send + Sync + 'static,
    T: DeserializeOwned + Send + 'static,
    R: Serialize + Send + 'static,
    Fut: Future<Output = Result<R>> + Send + 'static,
{
    handler: F,
    _phantom: PhantomData<fn(T) -> (Fut, R)>,
}

impl<F, T, R, Fut> TypedHandler<F, T, R, Fut>
where
    F: Fn(T, Channel) -> Fut + Send + Sync + 'static,
    T: DeserializeOwned + Send + 'static,
    R: Serialize + Send + 'static,
    Fut: Future<Output = Result<R>> + Send + 'static,
{
    /// Create a new typed handler.
    pub fn new(handler: F) -> Self {
        Self {
            handler,
            _phantom: PhantomData,
        }
    }
}

impl<F, T, R, Fut> Handler for TypedHandler<F, T, R, Fut>
where
    F: Fn(T, Channel) -> Fut + Send + Sync + 'static,
    T: DeserializeOwned + Send + 'static,
    R: Serialize + Send + 'static,
    Fut: Future<Output = Result<R>> + Send + 'static,
{
    fn call(&self, args: &str, channel: Channel) -> BoxFuture<'static, HandlerResult> {
        // an event without argument decodes like an explicit null
        let text = if args.is_empty() { "null" } else { args };
        let parsed: T = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(e) => return Box::pin(async move { Err(e.into()) }),
        };

        let fut = (self.handler)(parsed, channel);
        Box::pin(async move {
            let reply = fut.await?;
            Ok(serde_json::to_string(&reply)?)
        })
    }
}

/// Registry mapping event names to handlers.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Box<dyn Handler>>,
    loop_callbacks: HashMap<LoopEvent, LoopCallback>,
    error_callback: Option<ErrorCallback>,
}

impl HandlerRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for `event`, replacing any earlier one.
    ///
    /// The handler receives the decoded argument and the channel the event
    /// arrived on. Its return value is sent back when the peer asked for an
    /// acknowledgment and discarded otherwise.
    pub fn register<F, T, R, Fut>(&mut self, event: &str, handler: F)
    where
        F: Fn(T, Channel) -> Fut + Send + Sync + 'static,
        T: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        Fut: Future<Output = Result<R>> + Send + 'static,
    {
        self.handlers
            .insert(event.to_string(), Box::new(TypedHandler::new(handler)));
    }

    /// Set the callback for a lifecycle event.
    pub fn on_loop_event<F>(&mut self, event: LoopEvent, callback: F)
    where
        F: Fn(&Channel) + Send + Sync + 'static,
    {
        self.loop_callbacks.insert(event, Arc::new(callback));
    }

    /// Set the callback for failed handlers.
    pub fn on_error<F>(&mut self, callback: F)
    where
        F: Fn(&Channel, &ChannelError) + Send + Sync + 'static,
    {
        self.error_callback = Some(Arc::new(callback));
    }

    /// Get a handler by event name.
    pub fn get_handler(&self, event: &str) -> Option<&dyn Handler> {
        self.handlers.get(event).map(|h| h.as_ref())
    }

    /// Check if a handler is registered for `event`.
    pub fn has_handler(&self, event: &str) -> bool {
        self.handlers.contains_key(event)
    }

    /// Number of registered handlers.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Check if no handler is registered.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub(crate) fn loop_callback(&self, event: LoopEvent) -> Option<&LoopCallback> {
        self.loop_callbacks.get(&event)
    }

    pub(crate) fn error_callback(&self) -> Option<&ErrorCallback> {
        self.error_callback.as_ref()
    }
}
