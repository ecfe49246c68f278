//! Reconnecting WebSocket implementation of the sync channel.
//!
//! One channel instance is owned by one session and scoped to one attempt;
//! there is no shared process-wide connection. Inbound frames are decoded
//! and pushed through the event sender injected at construction; outbound
//! sends are best-effort and dropped while disconnected.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use invigil_core::error::ChannelError;
use invigil_core::traits::{OutboundMessage, SyncChannel, SyncEvent};

use crate::wire::{InboundFrame, OutboundFrame};

/// Connection behavior of the sync channel.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// WebSocket endpoint of the exam server.
    pub url: String,
    /// Fixed delay between reconnect attempts.
    pub reconnect_delay: Duration,
    /// Consecutive failed attempts tolerated before giving up.
    pub max_reconnect_attempts: u32,
    /// Bound on connection establishment.
    pub connect_timeout: Duration,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            url: "ws://localhost:5000/ws".to_string(),
            reconnect_delay: Duration::from_secs(1),
            max_reconnect_attempts: 10,
            connect_timeout: Duration::from_secs(20),
        }
    }
}

/// WebSocket sync channel with bounded-backoff reconnection.
pub struct WsSyncChannel {
    config: ChannelConfig,
    events: mpsc::UnboundedSender<SyncEvent>,
    connected: Arc<AtomicBool>,
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    attempt_id: Option<String>,
    task: Option<JoinHandle<()>>,
    out_tx: Option<mpsc::UnboundedSender<OutboundFrame>>,
}

impl WsSyncChannel {
    pub fn new(config: ChannelConfig, events: mpsc::UnboundedSender<SyncEvent>) -> Self {
        Self {
            config,
            events,
            connected: Arc::new(AtomicBool::new(false)),
            inner: Mutex::new(Inner::default()),
        }
    }
}

#[async_trait]
impl SyncChannel for WsSyncChannel {
    async fn connect(&self, attempt_id: &str, student_id: &str) -> Result<(), ChannelError> {
        let mut inner = self.inner.lock().unwrap();

        if inner.attempt_id.as_deref() == Some(attempt_id) {
            if let Some(task) = &inner.task {
                if !task.is_finished() {
                    debug!(attempt_id, "already connected to this attempt");
                    return Ok(());
                }
            }
        }

        // A different attempt (or a dead task): tear the old one down.
        if let Some(task) = inner.task.take() {
            task.abort();
        }
        self.connected.store(false, Ordering::SeqCst);

        let url = format!(
            "{}?attempt_id={}&user_id={}",
            self.config.url, attempt_id, student_id
        );
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(connection_task(
            self.config.clone(),
            url,
            attempt_id.to_string(),
            self.events.clone(),
            Arc::clone(&self.connected),
            out_rx,
        ));

        inner.attempt_id = Some(attempt_id.to_string());
        inner.out_tx = Some(out_tx);
        inner.task = Some(task);
        Ok(())
    }

    fn try_send(&self, message: OutboundMessage) -> bool {
        if !self.connected.load(Ordering::SeqCst) {
            return false;
        }
        let inner = self.inner.lock().unwrap();
        match &inner.out_tx {
            Some(out_tx) => out_tx.send(message.into()).is_ok(),
            None => false,
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn disconnect(&self) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(task) = inner.task.take() {
            task.abort();
        }
        inner.out_tx = None;
        inner.attempt_id = None;
        self.connected.store(false, Ordering::SeqCst);
    }
}

/// Owns the socket for the lifetime of one attempt: connect, join, pump
/// frames both ways, reconnect with a fixed delay until the cap.
async fn connection_task(
    config: ChannelConfig,
    url: String,
    attempt_id: String,
    events: mpsc::UnboundedSender<SyncEvent>,
    connected: Arc<AtomicBool>,
    mut out_rx: mpsc::UnboundedReceiver<OutboundFrame>,
) {
    let mut failures = 0u32;

    loop {
        match establish(&config, &url, &attempt_id).await {
            Ok(mut socket) => {
                failures = 0;
                info!(attempt_id = %attempt_id, "sync channel connected");
                connected.store(true, Ordering::SeqCst);
                let _ = events.send(SyncEvent::Connected);

                pump(&mut socket, &events, &mut out_rx).await;

                connected.store(false, Ordering::SeqCst);
                let _ = events.send(SyncEvent::Disconnected);
                warn!(attempt_id = %attempt_id, "sync channel disconnected");
            }
            Err(err) => {
                debug!(error = %err, "sync channel connect failed");
            }
        }

        failures += 1;
        if failures >= config.max_reconnect_attempts {
            let err = ChannelError::RetriesExhausted { attempts: failures };
            warn!(error = %err, "giving up on sync channel reconnection");
            return;
        }
        tokio::time::sleep(config.reconnect_delay).await;
    }
}

/// One connection attempt: dial within the timeout, then lead with the
/// `join_attempt` frame.
async fn establish(
    config: &ChannelConfig,
    url: &str,
    attempt_id: &str,
) -> Result<WebSocketStream<MaybeTlsStream<TcpStream>>, ChannelError> {
    let (mut socket, _response) =
        tokio::time::timeout(config.connect_timeout, connect_async(url))
            .await
            .map_err(|_| ChannelError::Timeout(config.connect_timeout.as_secs()))?
            .map_err(|err| ChannelError::ConnectFailed(err.to_string()))?;

    let join = OutboundFrame::JoinAttempt {
        attempt_id: attempt_id.to_string(),
    };
    let text = serde_json::to_string(&join)
        .map_err(|err| ChannelError::ConnectFailed(err.to_string()))?;
    socket
        .send(Message::Text(text))
        .await
        .map_err(|err| ChannelError::ConnectFailed(err.to_string()))?;
    Ok(socket)
}

/// Pump frames until the socket drops or the channel is torn down.
async fn pump(
    socket: &mut WebSocketStream<MaybeTlsStream<TcpStream>>,
    events: &mpsc::UnboundedSender<SyncEvent>,
    out_rx: &mut mpsc::UnboundedReceiver<OutboundFrame>,
) {
    loop {
        tokio::select! {
            inbound = socket.next() => match inbound {
                Some(Ok(Message::Text(text))) => match serde_json::from_str::<InboundFrame>(&text) {
                    Ok(frame) => {
                        if events.send(frame.into_event()).is_err() {
                            return;
                        }
                    }
                    Err(err) => debug!(error = %err, "unrecognized inbound frame"),
                },
                Some(Ok(Message::Close(_))) | None => return,
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    debug!(error = %err, "socket read error");
                    return;
                }
            },
            outbound = out_rx.recv() => match outbound {
                Some(frame) => {
                    if let Ok(text) = serde_json::to_string(&frame) {
                        if socket.send(Message::Text(text)).await.is_err() {
                            return;
                        }
                    }
                }
                // Sender side dropped: the channel is being torn down.
                None => return,
            },
        }
    }
}
