//! Routing of decoded data messages and lifecycle events.

use crate::channel::Channel;
use crate::error::ChannelError;
use crate::protocol::{Message, MessageType};

use super::{HandlerRegistry, LoopEvent};

impl HandlerRegistry {
    /// Fire the callback registered for a lifecycle event, if any.
    pub fn call_loop_event(&self, channel: &Channel, event: LoopEvent) {
        if let Some(callback) = self.loop_callback(event) {
            callback(channel);
        }
    }

    /// Handle one data message arriving on `channel`.
    ///
    /// - `Emit` runs the handler and drops its result
    /// - `AckRequest` runs the handler and sends its result back
    /// - `AckResponse` resolves the matching pending acknowledgment
    /// - `Close` closes the channel
    ///
    /// Handler failures are logged and reported to the error callback; they
    /// never close the channel.
    pub async fn process_incoming_message(&self, channel: &Channel, msg: Message) {
        match msg.kind {
            MessageType::Emit | MessageType::AckRequest => {
                let Some(handler) = self.get_handler(&msg.event) else {
                    tracing::debug!("No handler for event {:?}", msg.event);
                    return;
                };

                match handler.call(&msg.args, channel.clone()).await {
                    Ok(reply) if msg.kind == MessageType::AckRequest => {
                        let response = Message::ack_response(msg.ack_id, reply);
                        if let Err(e) = channel.send_message(&response) {
                            tracing::warn!("Failed to send ack {}: {}", msg.ack_id, e);
                        }
                    }
                    Ok(_) => {}
                    Err(e) => self.report_error(channel, &msg.event, &e),
                }
            }
            MessageType::AckResponse => {
                channel.correlator().resolve(msg.ack_id, msg.args);
            }
            MessageType::Close => {
                tracing::debug!("Peer closed channel {}", channel.local_id());
                channel.close_with(ChannelError::ConnectionClosed);
            }
            MessageType::Empty => {}
            // handled by the inbound loop
            MessageType::Open | MessageType::Ping | MessageType::Pong => {
                tracing::debug!("Ignoring control frame {:?} in dispatch", msg.kind);
            }
        }
    }

    fn report_error(&self, channel: &Channel, event: &str, err: &ChannelError) {
        tracing::error!("Handler error for event {:?}: {}", event, err);
        if let Some(callback) = self.error_callback() {
            callback(channel, err);
        }
    }
}
