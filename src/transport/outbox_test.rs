use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use super::*;
use crate::frame::{CANVAS_DRAW, Data};
use crate::ids::ClientId;

struct FlakyTransport {
    id: ClientId,
    up: AtomicBool,
    sent: Mutex<Vec<Frame>>,
}

impl FlakyTransport {
    fn new(up: bool) -> Self {
        Self { id: ClientId::from("alice"), up: AtomicBool::new(up), sent: Mutex::new(Vec::new()) }
    }

    fn sent_ids(&self) -> Vec<uuid::Uuid> {
        self.sent.lock().unwrap().iter().map(|f| f.id).collect()
    }
}

#[async_trait::async_trait]
impl Transport for FlakyTransport {
    fn client_id(&self) -> &ClientId {
        &self.id
    }

    async fn send(&self, frame: Frame) -> Result<(), TransportError> {
        if !self.up.load(Ordering::SeqCst) {
            return Err(TransportError::Unavailable);
        }
        self.sent.lock().unwrap().push(frame);
        Ok(())
    }
}

fn config() -> BackoffConfig {
    BackoffConfig {
        base: Duration::from_millis(100),
        max: Duration::from_millis(800),
        jitter: Duration::ZERO,
        max_failures: 3,
    }
}

fn frame(room: &str) -> Frame {
    Frame::request(CANVAS_DRAW, Data::new()).with_room(RoomId::from(room))
}

#[test]
fn backoff_doubles_and_caps() {
    let c = config();
    assert_eq!(backoff_delay(&c, 1), Duration::from_millis(100));
    assert_eq!(backoff_delay(&c, 2), Duration::from_millis(200));
    assert_eq!(backoff_delay(&c, 4), Duration::from_millis(800));
    assert_eq!(backoff_delay(&c, 30), Duration::from_millis(800));
}

#[test]
fn jitter_stays_within_bound() {
    let c = BackoffConfig { jitter: Duration::from_millis(50), ..config() };
    for _ in 0..20 {
        let d = backoff_delay(&c, 1);
        assert!(d >= Duration::from_millis(100) && d <= Duration::from_millis(150));
    }
}

#[tokio::test]
async fn frames_are_sent_in_order_when_transport_is_up() {
    let transport = FlakyTransport::new(true);
    let mut outbox = Outbox::new(config());
    let (a, b) = (frame("R1"), frame("R1"));
    let expected = vec![a.id, b.id];
    outbox.push(a);
    outbox.push(b);

    let status = outbox.flush(&transport, Instant::now()).await;
    assert_eq!(status, ConnectionStatus::Connected);
    assert!(outbox.is_empty());
    assert_eq!(transport.sent_ids(), expected);
}

#[tokio::test]
async fn sustained_failure_reports_disconnected_then_recovers() {
    let transport = FlakyTransport::new(false);
    let mut outbox = Outbox::new(config());
    let queued = frame("R1");
    let queued_id = queued.id;
    outbox.push(queued);

    let mut now = Instant::now();
    assert_eq!(outbox.flush(&transport, now).await, ConnectionStatus::Reconnecting);

    // Before the retry time nothing is attempted.
    assert_eq!(outbox.flush(&transport, now).await, ConnectionStatus::Reconnecting);
    assert_eq!(outbox.failures(), 1);

    for _ in 0..2 {
        now += Duration::from_secs(1);
        outbox.flush(&transport, now).await;
    }
    assert_eq!(outbox.status(), ConnectionStatus::Disconnected);
    assert_eq!(outbox.len(), 1);

    transport.up.store(true, Ordering::SeqCst);
    now += Duration::from_secs(1);
    assert_eq!(outbox.flush(&transport, now).await, ConnectionStatus::Connected);
    assert_eq!(transport.sent_ids(), vec![queued_id]);
}

#[tokio::test]
async fn reset_allows_immediate_retry() {
    let transport = FlakyTransport::new(false);
    let mut outbox = Outbox::new(config());
    outbox.push(frame("R1"));
    let now = Instant::now();
    outbox.flush(&transport, now).await;

    transport.up.store(true, Ordering::SeqCst);
    outbox.reset();
    assert_eq!(outbox.flush(&transport, now).await, ConnectionStatus::Connected);
    assert!(outbox.is_empty());
}

#[test]
fn drain_room_drops_only_that_room() {
    let mut outbox = Outbox::new(config());
    outbox.push(frame("R1"));
    outbox.push(frame("R2"));
    outbox.push(frame("R1"));

    assert_eq!(outbox.drain_room(&RoomId::from("R1")), 2);
    assert_eq!(outbox.len(), 1);
}
