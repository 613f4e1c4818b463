//! In-process relay.
//!
//! `MemoryRelay` runs the same `RelayCore` as the WebSocket server, minus the
//! socket. Each `connect` yields a `MemoryTransport` plus the receiver the
//! relay delivers into. `sever` and `restore` simulate a dropped and
//! re-established connection: the relay performs the ungraceful leave, the
//! client sees `session:disconnected`, and sends fail with `Unavailable`
//! until the link is restored. A client the relay evicted learns of it on
//! its next send and is restored the same way.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{Mutex, mpsc};
use tracing::{info, warn};

use super::{Transport, TransportError};
use crate::config::RelayConfig;
use crate::frame::{Data, Frame, SESSION_DISCONNECTED};
use crate::ids::{ClientId, RoomId};
use crate::relay::{RelayCore, RelayError};
use crate::services::membership::{Member, MembershipError};

#[derive(Clone)]
pub struct MemoryRelay {
    core: Arc<Mutex<RelayCore>>,
    queue: usize,
}

impl MemoryRelay {
    #[must_use]
    pub fn new(config: &RelayConfig) -> Self {
        Self { core: Arc::new(Mutex::new(RelayCore::new())), queue: config.client_queue.max(1) }
    }

    /// Open a connection for `client`.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::DuplicateClient`] if the id is already connected.
    pub async fn connect(
        &self,
        client: ClientId,
        display_name: &str,
    ) -> Result<(MemoryTransport, mpsc::Receiver<Frame>), RelayError> {
        let (tx, rx) = mpsc::channel(self.queue);
        self.core.lock().await.connect(&client, display_name, tx.clone())?;
        let transport = MemoryTransport {
            client,
            display_name: display_name.to_owned(),
            core: Arc::clone(&self.core),
            tx,
            up: Arc::new(AtomicBool::new(true)),
        };
        Ok((transport, rx))
    }

    /// Drop the connection without a graceful leave.
    pub async fn sever(&self, transport: &MemoryTransport) {
        transport.up.store(false, Ordering::SeqCst);
        self.core.lock().await.disconnect(&transport.client);
        if let Err(e) = transport.tx.try_send(Frame::request(SESSION_DISCONNECTED, Data::new())) {
            warn!(client = %transport.client, error = %e, "memory relay: disconnect notice dropped");
        }
        info!(client = %transport.client, "memory relay: connection severed");
    }

    /// Re-establish a severed connection.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::DuplicateClient`] if the connection is live.
    pub async fn restore(&self, transport: &MemoryTransport) -> Result<(), RelayError> {
        self.core
            .lock()
            .await
            .connect(&transport.client, &transport.display_name, transport.tx.clone())?;
        transport.up.store(true, Ordering::SeqCst);
        info!(client = %transport.client, "memory relay: connection restored");
        Ok(())
    }

    /// # Errors
    ///
    /// Returns [`MembershipError::RoomNotFound`] for unknown rooms.
    pub async fn members(&self, room: &RoomId) -> Result<Vec<Member>, MembershipError> {
        self.core.lock().await.members(room)
    }

    pub async fn room_count(&self) -> usize {
        self.core.lock().await.room_count()
    }
}

/// Client end of an in-process connection.
pub struct MemoryTransport {
    client: ClientId,
    display_name: String,
    core: Arc<Mutex<RelayCore>>,
    tx: mpsc::Sender<Frame>,
    up: Arc<AtomicBool>,
}

#[async_trait::async_trait]
impl Transport for MemoryTransport {
    fn client_id(&self) -> &ClientId {
        &self.client
    }

    async fn send(&self, frame: Frame) -> Result<(), TransportError> {
        if !self.up.load(Ordering::SeqCst) {
            return Err(TransportError::Unavailable);
        }
        let mut core = self.core.lock().await;
        if !core.is_connected(&self.client) {
            // Evicted for falling behind: report the link as lost.
            self.up.store(false, Ordering::SeqCst);
            if let Err(e) = self.tx.try_send(Frame::request(SESSION_DISCONNECTED, Data::new())) {
                warn!(client = %self.client, error = %e, "memory relay: eviction notice dropped");
            }
            return Err(TransportError::Unavailable);
        }
        core.dispatch(&self.client, frame);
        Ok(())
    }
}
