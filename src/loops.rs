//! The channel loops.
//!
//! ```text
//!                 ┌──────────────┐  sequential   ┌─────────────┐
//! Connection ───► │ inbound loop │ ─── mpsc ───► │ worker loop │ ──► dispatch
//!                 └──────────────┘               └─────────────┘
//!                        │ concurrent: JoinSet + Semaphore ─────────► dispatch
//!                        │ pong
//!                        ▼
//!   emit/ack ───► FrameQueue ───► outbound loop ───► Connection
//!   pinger   ───►
//! ```
//!
//! Each loop is an independent task. A loop that hits a terminal error
//! closes the channel; the other loops notice through the closed connection,
//! the closed queues or the closed signal and exit on their own.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};

use crate::backpressure::{classify, Pressure};
use crate::channel::Channel;
use crate::error::ChannelError;
use crate::handler::LoopEvent;
use crate::protocol::{
    decode, Header, Message, MessageType, CLOSE_MESSAGE, PING_MESSAGE, PONG_MESSAGE,
};

/// Lower bound for the keepalive interval; a zero interval would flood the
/// outbound queue with pings.
const MIN_PING_INTERVAL: Duration = Duration::from_millis(100);

/// Handles of the spawned loops of one channel.
pub(crate) struct LoopHandles {
    tasks: Vec<JoinHandle<()>>,
}

impl LoopHandles {
    /// Wait for every loop to finish.
    pub(crate) async fn join(self) {
        for task in self.tasks {
            if let Err(e) = task.await {
                tracing::error!("Channel loop panicked: {}", e);
            }
        }
    }
}

/// Spawn the loops of `channel`. The worker loop only runs in sequential mode.
pub(crate) fn spawn_loops(channel: &Channel) -> LoopHandles {
    let mut tasks = vec![
        tokio::spawn(inbound_loop(channel.clone())),
        tokio::spawn(outbound_loop(channel.clone())),
        tokio::spawn(pinger(channel.clone())),
    ];

    if channel.config().sequential {
        if let Some(inbound) = channel.take_inbound_receiver() {
            tasks.push(tokio::spawn(worker_loop(channel.clone(), inbound)));
        }
    }

    LoopHandles { tasks }
}

/// Read frames, answer control frames inline and route data frames.
async fn inbound_loop(channel: Channel) {
    let id = channel.local_id();
    tracing::debug!("Start inbound loop for channel {}", id);

    let sequential = channel.config().sequential;
    let mut dispatches = JoinSet::new();

    loop {
        // reap finished dispatches so the set stays small
        while dispatches.try_join_next().is_some() {}

        let frame = match channel.connection().read_message().await {
            Ok(frame) => frame,
            Err(e) => {
                if channel.is_alive() {
                    tracing::error!("Failed to get message: {}", e);
                }
                channel.close_with(e);
                break;
            }
        };

        let msg = match decode(&frame) {
            Ok(msg) => msg,
            Err(e) => {
                tracing::error!("Failed to decode message {:?}: {}", frame, e);
                channel.close_with(ChannelError::WrongPacket);
                break;
            }
        };

        tracing::trace!("Received {:?} on channel {}", msg.kind, id);

        if msg.kind.is_control() {
            if !handle_control(&channel, &msg) {
                break;
            }
            continue;
        }

        // replies never wait behind handlers, those handlers may be awaiting them
        if msg.kind == MessageType::AckResponse {
            channel.correlator().resolve(msg.ack_id, msg.args);
            continue;
        }

        if sequential {
            let Some(inbound) = channel.inbound_sender() else {
                break;
            };
            if inbound.send(msg).await.is_err() {
                break;
            }
        } else {
            let permit = match channel.handler_slots().clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };
            let channel = channel.clone();
            dispatches.spawn(async move {
                // held until the handler completes
                let _permit = permit;
                let registry = channel.registry().clone();
                registry.process_incoming_message(&channel, msg).await;
            });
        }
    }

    while let Some(result) = dispatches.join_next().await {
        if let Err(e) = result {
            tracing::error!("Dispatch task panicked: {}", e);
        }
    }

    tracing::debug!("Exit inbound loop for channel {}", id);
}

/// Answer a control frame. Returns `false` when the channel was closed.
fn handle_control(channel: &Channel, msg: &Message) -> bool {
    match msg.kind {
        MessageType::Open => handle_open(channel, msg),
        MessageType::Ping => {
            if let Err(e) = channel.send_frame(PONG_MESSAGE.to_string()) {
                tracing::warn!("Failed to queue pong on channel {}: {}", channel.local_id(), e);
            }
            true
        }
        _ => true,
    }
}

/// Store the handshake header and fire the connection callback.
fn handle_open(channel: &Channel, msg: &Message) -> bool {
    let header = match Header::parse(&msg.args) {
        Ok(header) => header,
        Err(e) => {
            tracing::error!("Failed to decode handshake {:?}", msg.args);
            channel.close_with(e);
            return false;
        }
    };

    if !channel.set_header(header) {
        tracing::warn!("Ignoring repeated handshake on channel {}", channel.local_id());
        return true;
    }

    channel
        .registry()
        .call_loop_event(channel, LoopEvent::Connection);
    true
}

/// Dispatch inbound messages one at a time, in arrival order.
async fn worker_loop(channel: Channel, mut inbound: mpsc::Receiver<Message>) {
    tracing::debug!("Start worker loop for channel {}", channel.local_id());

    let registry = channel.registry().clone();
    while let Some(msg) = inbound.recv().await {
        registry.process_incoming_message(&channel, msg).await;
    }

    tracing::debug!("Exit worker loop for channel {}", channel.local_id());
}

/// Drain the outbound queue to the connection and track backpressure.
async fn outbound_loop(channel: Channel) {
    let id = channel.local_id();
    tracing::debug!("Start outbound loop for channel {}", id);

    let queue = channel.outbound();
    loop {
        match classify(queue.len(), queue.capacity()) {
            Pressure::Saturated => {
                tracing::error!("Outbound queue of channel {} saturated", id);
                channel.close_with(ChannelError::Overflow);
                break;
            }
            pressure => channel.overflow().observe(id, pressure),
        }

        let Some(frame) = queue.pop().await else {
            break;
        };
        if frame == CLOSE_MESSAGE {
            break;
        }

        if let Err(e) = channel.connection().write_message(frame).await {
            if channel.is_alive() {
                tracing::error!("Failed to write message: {}", e);
            }
            channel.close_with(e);
            break;
        }
    }

    channel.overflow().remove(id);
    tracing::debug!("Exit outbound loop for channel {}", id);
}

/// Queue a ping every keepalive interval until the channel closes.
async fn pinger(channel: Channel) {
    loop {
        // re-read each cycle, the handshake may arrive after the first sleep began
        let interval = channel.ping_interval().max(MIN_PING_INTERVAL);
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = channel.closed() => break,
        }

        if !channel.is_alive() {
            break;
        }
        if let Err(e) = channel.send_frame(PING_MESSAGE.to_string()) {
            tracing::debug!("Failed to queue ping on channel {}: {}", channel.local_id(), e);
        }
    }
}
