//! WebSocket client transport for the relay server.
//!
//! A background task owns the socket and reconnects with exponential
//! backoff (1s doubling to 10s). Every lost connection is reported to the
//! session as a locally synthesized `session:disconnected`; the relay greets
//! each new connection with `session:connected`. While the socket is down,
//! `send` fails with `Unavailable` and the session's outbox holds the frame.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use super::{Transport, TransportError};
use crate::frame::{Data, Frame, SESSION_DISCONNECTED};
use crate::ids::ClientId;

const RECONNECT_BASE_MS: u64 = 1_000;
const RECONNECT_MAX_MS: u64 = 10_000;

pub struct WsTransport {
    client: ClientId,
    out: mpsc::Sender<Frame>,
    up: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl WsTransport {
    /// Start connecting to the relay at `base_url` (e.g. `ws://host:3000`).
    /// Returns immediately; inbound frames, liveness included, arrive on the
    /// returned receiver.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::InvalidUrl`] if `base_url` does not parse.
    pub fn connect(
        base_url: &str,
        client: ClientId,
        display_name: &str,
        queue: usize,
    ) -> Result<(Self, mpsc::Receiver<Frame>), TransportError> {
        let url = relay_url(base_url, &client, display_name)?;
        let (out, out_rx) = mpsc::channel(queue.max(1));
        let (inbound, inbound_rx) = mpsc::channel(queue.max(1));
        let up = Arc::new(AtomicBool::new(false));

        let task = tokio::spawn(connection_loop(url, client.clone(), Arc::clone(&up), out_rx, inbound));
        Ok((Self { client, out, up, task }, inbound_rx))
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.up.load(Ordering::SeqCst)
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[async_trait::async_trait]
impl Transport for WsTransport {
    fn client_id(&self) -> &ClientId {
        &self.client
    }

    async fn send(&self, frame: Frame) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::Unavailable);
        }
        self.out.send(frame).await.map_err(|_| TransportError::Closed)
    }
}

/// Build `{base_url}/ws?client_id=…&name=…`.
///
/// # Errors
///
/// Returns [`TransportError::InvalidUrl`] if `base_url` does not parse.
pub fn relay_url(base_url: &str, client: &ClientId, display_name: &str) -> Result<String, TransportError> {
    let mut url = reqwest::Url::parse(&format!("{}/ws", base_url.trim_end_matches('/')))
        .map_err(|e| TransportError::InvalidUrl(e.to_string()))?;
    url.query_pairs_mut()
        .append_pair("client_id", client.as_str())
        .append_pair("name", display_name);
    Ok(url.to_string())
}

// =============================================================================
// CONNECTION LOOP
// =============================================================================

async fn connection_loop(
    url: String,
    client: ClientId,
    up: Arc<AtomicBool>,
    mut out_rx: mpsc::Receiver<Frame>,
    inbound: mpsc::Sender<Frame>,
) {
    let mut backoff_ms = RECONNECT_BASE_MS;

    loop {
        match connect_and_run(&url, &up, &mut out_rx, &inbound).await {
            Ok(()) => info!(%client, "ws transport: disconnected"),
            Err(e) => warn!(%client, error = %e, "ws transport: connection error"),
        }

        if up.swap(false, Ordering::SeqCst) {
            backoff_ms = RECONNECT_BASE_MS;
            if inbound.send(Frame::request(SESSION_DISCONNECTED, Data::new())).await.is_err() {
                debug!(%client, "ws transport: receiver dropped before disconnect notice");
            }
        }
        if inbound.is_closed() {
            debug!(%client, "ws transport: receiver dropped, stopping");
            return;
        }

        tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
        backoff_ms = (backoff_ms * 2).min(RECONNECT_MAX_MS);
    }
}

/// Connect and pump frames until the socket closes.
async fn connect_and_run(
    url: &str,
    up: &AtomicBool,
    out_rx: &mut mpsc::Receiver<Frame>,
    inbound: &mpsc::Sender<Frame>,
) -> Result<(), String> {
    let (stream, _) = tokio_tungstenite::connect_async(url).await.map_err(|e| e.to_string())?;
    let (mut write, mut read) = stream.split();
    up.store(true, Ordering::SeqCst);

    loop {
        tokio::select! {
            msg = read.next() => {
                let Some(msg) = msg else { return Ok(()) };
                match msg.map_err(|e| e.to_string())? {
                    Message::Text(text) => match serde_json::from_str::<Frame>(text.as_str()) {
                        Ok(frame) => {
                            if inbound.send(frame).await.is_err() {
                                return Ok(());
                            }
                        }
                        Err(e) => warn!(error = %e, "ws transport: invalid inbound frame"),
                    },
                    Message::Close(_) => return Ok(()),
                    _ => {}
                }
            }
            Some(frame) = out_rx.recv() => {
                let json = serde_json::to_string(&frame).map_err(|e| e.to_string())?;
                write.send(Message::Text(json.into())).await.map_err(|e| e.to_string())?;
            }
        }
    }
}
