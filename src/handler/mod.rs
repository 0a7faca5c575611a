//! Handler module - event handlers and dispatch.
//!
//! Provides:
//! - [`HandlerRegistry`] - maps event names to handlers, holds lifecycle callbacks
//! - [`HandlerRegistry::process_incoming_message`] - routes data messages
//! - [`HandlerRegistry::call_loop_event`] - fires connection/disconnection callbacks

mod dispatch;
mod registry;

pub use registry::{
    ErrorCallback, Handler, HandlerRegistry, HandlerResult, LoopCallback, LoopEvent, TypedHandler,
};
