//! Web socket transport on top of `tokio-tungstenite`.
//!
//! Each connection is split into a cheap handle ([`WebSocketConnection`])
//! and a driver task that owns the socket:
//!
//! ```text
//! write_message ─► mpsc ─┐
//!                        ├─► driver task ◄─► WebSocketStream
//! read_message  ◄─ mpsc ─┘        ▲
//! close ──────────► watch ────────┘
//! ```
//!
//! Closing the handle stops the driver, which sends a close frame to the
//! peer and drops the inbound sender so pending reads fail.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, watch, Mutex};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::WebSocketStream;

use super::{BoxFuture, Connection, Transport};
use crate::error::{ChannelError, Result};

/// Default keepalive interval (engine.io default).
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(25);

/// Default keepalive timeout (engine.io default).
pub const DEFAULT_PING_TIMEOUT: Duration = Duration::from_secs(60);

/// Default number of frames buffered between handle and driver.
pub const DEFAULT_WS_QUEUE_SIZE: usize = 256;

/// Configuration for web socket connections.
#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    /// Keepalive interval reported to the channel.
    pub ping_interval: Duration,
    /// Keepalive timeout reported to the channel.
    pub ping_timeout: Duration,
    /// Frames buffered from the driver to the reader.
    pub read_queue_size: usize,
    /// Frames buffered from writers to the driver.
    pub write_queue_size: usize,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            ping_interval: DEFAULT_PING_INTERVAL,
            ping_timeout: DEFAULT_PING_TIMEOUT,
            read_queue_size: DEFAULT_WS_QUEUE_SIZE,
            write_queue_size: DEFAULT_WS_QUEUE_SIZE,
        }
    }
}

/// Web socket transport.
#[derive(Debug, Clone, Default)]
pub struct WebSocketTransport {
    config: WebSocketConfig,
}

impl WebSocketTransport {
    /// Create a transport with custom configuration.
    pub fn new(config: WebSocketConfig) -> Self {
        Self { config }
    }

    /// Transport configuration.
    pub fn config(&self) -> &WebSocketConfig {
        &self.config
    }

    /// Run the server side of the web socket handshake on an accepted stream.
    pub async fn accept<S>(&self, stream: S) -> Result<Arc<WebSocketConnection>>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let ws = tokio_tungstenite::accept_async(stream).await?;
        Ok(Arc::new(WebSocketConnection::spawn(ws, &self.config)))
    }
}

impl Transport for WebSocketTransport {
    fn connect<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<Arc<dyn Connection>>> {
        Box::pin(async move {
            let (ws, _response) = tokio_tungstenite::connect_async(url).await?;
            tracing::debug!("WebSocket connected to {}", url);
            let conn = WebSocketConnection::spawn(ws, &self.config);
            Ok(Arc::new(conn) as Arc<dyn Connection>)
        })
    }
}

/// Handle to a web socket driven by a background task.
pub struct WebSocketConnection {
    out_tx: mpsc::Sender<String>,
    in_rx: Mutex<mpsc::Receiver<Result<String>>>,
    shutdown: watch::Sender<bool>,
    ping_interval: Duration,
    ping_timeout: Duration,
}

impl WebSocketConnection {
    /// Spawn the driver task for `ws` and return its handle.
    pub fn spawn<S>(ws: WebSocketStream<S>, config: &WebSocketConfig) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (out_tx, out_rx) = mpsc::channel(config.write_queue_size);
        let (in_tx, in_rx) = mpsc::channel(config.read_queue_size);
        let (shutdown, shutdown_rx) = watch::channel(false);

        tokio::spawn(drive(ws, out_rx, in_tx, shutdown_rx));

        Self {
            out_tx,
            in_rx: Mutex::new(in_rx),
            shutdown,
            ping_interval: config.ping_interval,
            ping_timeout: config.ping_timeout,
        }
    }
}

impl Connection for WebSocketConnection {
    fn read_message(&self) -> BoxFuture<'_, Result<String>> {
        Box::pin(async move {
            let mut rx = self.in_rx.lock().await;
            match rx.recv().await {
                Some(frame) => frame,
                None => Err(ChannelError::ConnectionClosed),
            }
        })
    }

    fn write_message(&self, frame: String) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            if *self.shutdown.borrow() {
                return Err(ChannelError::ConnectionClosed);
            }
            self.out_tx
                .send(frame)
                .await
                .map_err(|_| ChannelError::ConnectionClosed)
        })
    }

    fn close(&self) {
        self.shutdown.send_replace(true);
    }

    fn ping_params(&self) -> (Duration, Duration) {
        (self.ping_interval, self.ping_timeout)
    }
}

/// Driver loop - owns the socket until shutdown, peer close or an error.
async fn drive<S>(
    ws: WebSocketStream<S>,
    mut out_rx: mpsc::Receiver<String>,
    in_tx: mpsc::Sender<Result<String>>,
    mut shutdown: watch::Receiver<bool>,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut sink, mut stream) = ws.split();

    loop {
        tokio::select! {
            // fires on close() and when the handle is dropped
            _ = shutdown.changed() => {
                let _ = sink.send(WsMessage::Close(None)).await;
                break;
            }
            frame = out_rx.recv() => {
                let Some(text) = frame else {
                    let _ = sink.send(WsMessage::Close(None)).await;
                    break;
                };
                if let Err(e) = sink.send(WsMessage::Text(text)).await {
                    tracing::debug!("WebSocket write failed: {}", e);
                    let _ = in_tx.send(Err(e.into())).await;
                    break;
                }
            }
            incoming = stream.next() => match incoming {
                Some(Ok(WsMessage::Text(text))) => {
                    if in_tx.send(Ok(text)).await.is_err() {
                        break;
                    }
                }
                Some(Ok(WsMessage::Close(_))) | None => break,
                // protocol-level ping/pong is answered by tungstenite
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!("WebSocket read failed: {}", e);
                    let _ = in_tx.send(Err(e.into())).await;
                    break;
                }
            },
        }
    }

    tracing::debug!("WebSocket driver stopped");
}
