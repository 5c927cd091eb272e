//! Broadcast Hub (C10): fans out [`EventFrame`]s to every connected
//! WebSocket subscriber, with heartbeat liveness and a bounded subscriber
//! count.
//!
//! Grounded on the teacher's `EventBroadcaster` (a `tokio::sync::broadcast`
//! channel per event class, one task per socket split into a send half and
//! a receive half), generalized to a single frame channel shared by every
//! subscriber and a per-subscriber liveness flag driven by heartbeats
//! rather than channel-per-topic fan-out.

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use uuid::Uuid;

use crate::metrics;
use crate::types::{EventFrame, InboundControlFrame};

const POLICY_VIOLATION: u16 = 1008;
const GOING_AWAY: u16 = 1001;

struct SubscriberHandle {
    alive: Arc<AtomicBool>,
    outbound: mpsc::UnboundedSender<Message>,
}

/// Subscriber registry plus the single frame channel every accepted socket
/// forwards onto the wire. C5 (batch writer) and the periodic snapshot
/// timer hold a clone of the sender side and never touch the registry
/// directly.
pub struct BroadcastHub {
    subscribers: DashMap<Uuid, SubscriberHandle>,
    tx: broadcast::Sender<EventFrame>,
    max_subscribers: usize,
}

impl BroadcastHub {
    pub fn new(max_subscribers: usize, channel_capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(channel_capacity);
        Self {
            subscribers: DashMap::new(),
            tx,
            max_subscribers,
        }
    }

    pub fn sender(&self) -> broadcast::Sender<EventFrame> {
        self.tx.clone()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Upgrades the connection, rejecting beyond `max_subscribers` with
    /// policy-violation close code 1008. `welcome` is a snapshot of
    /// current dashboard state sent as the connection's welcome frame.
    pub fn accept(self: &Arc<Self>, ws: WebSocketUpgrade, welcome: EventFrame) -> Response {
        if self.subscribers.len() >= self.max_subscribers {
            return ws.on_upgrade(|mut socket| async move {
                let _ = socket
                    .send(Message::Close(Some(CloseFrame {
                        code: POLICY_VIOLATION,
                        reason: "max subscribers reached".into(),
                    })))
                    .await;
            });
        }

        let hub = Arc::clone(self);
        ws.on_upgrade(move |socket| hub.handle_socket(socket, welcome))
    }

    async fn handle_socket(self: Arc<Self>, socket: WebSocket, welcome: EventFrame) {
        let id = Uuid::new_v4();
        let alive = Arc::new(AtomicBool::new(true));
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel();

        self.subscribers.insert(
            id,
            SubscriberHandle { alive: alive.clone(), outbound: outbound_tx.clone() },
        );
        metrics::BROADCAST_SUBSCRIBERS.set(self.subscribers.len() as i64);

        send_frame(&outbound_tx, &welcome);

        let (mut ws_sink, mut ws_stream) = socket.split();

        let mut broadcast_rx = self.tx.subscribe();
        let forward_tx = outbound_tx.clone();
        let mut forward_task = tokio::spawn(async move {
            loop {
                match broadcast_rx.recv().await {
                    Ok(frame) => send_frame(&forward_tx, &frame),
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        let mut outbound_task = tokio::spawn(async move {
            while let Some(msg) = outbound_rx.recv().await {
                if ws_sink.send(msg).await.is_err() {
                    break;
                }
            }
        });

        let inbound_alive = alive.clone();
        let inbound_tx = outbound_tx.clone();
        let mut inbound_task = tokio::spawn(async move {
            while let Some(Ok(msg)) = ws_stream.next().await {
                match msg {
                    Message::Text(text) => {
                        match serde_json::from_str::<InboundControlFrame>(&text) {
                            Ok(InboundControlFrame::Ping) | Ok(InboundControlFrame::Heartbeat) => {
                                inbound_alive.store(true, Ordering::Release);
                                send_frame(&inbound_tx, &EventFrame::Pong);
                            }
                            Ok(InboundControlFrame::Subscribe { .. })
                            | Ok(InboundControlFrame::Unsubscribe { .. }) => {
                                inbound_alive.store(true, Ordering::Release);
                                // Acknowledged but delivery is unchanged: every
                                // subscriber receives every frame.
                            }
                            Err(_) => {
                                tracing::debug!("unsupported inbound frame, ignoring");
                            }
                        }
                    }
                    Message::Pong(_) => {
                        inbound_alive.store(true, Ordering::Release);
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
        });

        tokio::select! {
            _ = &mut forward_task => { outbound_task.abort(); inbound_task.abort(); }
            _ = &mut outbound_task => { forward_task.abort(); inbound_task.abort(); }
            _ = &mut inbound_task => { forward_task.abort(); outbound_task.abort(); }
        }

        self.subscribers.remove(&id);
        metrics::BROADCAST_SUBSCRIBERS.set(self.subscribers.len() as i64);
    }

    /// Best-effort point-to-point send; returns `false` if the subscriber
    /// is unknown or its outbound channel is closed.
    pub fn send(&self, id: Uuid, frame: &EventFrame) -> bool {
        match self.subscribers.get(&id) {
            Some(handle) => send_frame(&handle.outbound, frame),
            None => false,
        }
    }

    /// Fans a frame out to every subscriber via the shared broadcast
    /// channel. Best-effort: a channel with no live receivers is not an
    /// error.
    pub fn broadcast(&self, frame: EventFrame) {
        let frame_type = frame.type_label();
        let _ = self.tx.send(frame);
        metrics::BROADCAST_FRAMES_SENT.with_label_values(&[frame_type]).inc();
    }

    /// Pings every subscriber and terminates any still marked not-alive
    /// since the previous cycle (no pong or inbound ping/heartbeat frame
    /// received in between).
    pub async fn run_heartbeat(self: Arc<Self>, interval: Duration) {
        loop {
            tokio::time::sleep(interval).await;
            let mut to_remove = Vec::new();
            for entry in self.subscribers.iter() {
                let id = *entry.key();
                let handle = entry.value();
                if !handle.alive.swap(false, Ordering::AcqRel) {
                    to_remove.push(id);
                } else {
                    let _ = handle.outbound.send(Message::Ping(Vec::new().into()));
                }
            }
            for id in to_remove {
                if let Some((_, handle)) = self.subscribers.remove(&id) {
                    let _ = handle.outbound.send(Message::Close(Some(CloseFrame {
                        code: GOING_AWAY,
                        reason: "heartbeat timeout".into(),
                    })));
                }
            }
            metrics::BROADCAST_SUBSCRIBERS.set(self.subscribers.len() as i64);
        }
    }

    /// Notifies every subscriber of shutdown and closes cleanly with code
    /// 1001, per the lifecycle supervisor's shutdown sequence.
    pub async fn shutdown(&self) {
        self.broadcast(EventFrame::Disconnected { reason: "server shutting down".to_string() });
        for entry in self.subscribers.iter() {
            let _ = entry.value().outbound.send(Message::Close(Some(CloseFrame {
                code: GOING_AWAY,
                reason: "server shutting down".into(),
            })));
        }
    }
}

/// Wraps a frame with the top-level `timestamp` field required by the
/// `{type, data, timestamp}` wire shape; `type`/`data` come from
/// [`EventFrame`]'s own tagged serialization via `#[serde(flatten)]`.
#[derive(serde::Serialize)]
struct WireFrame<'a> {
    #[serde(flatten)]
    frame: &'a EventFrame,
    timestamp: chrono::DateTime<chrono::Utc>,
}

fn send_frame(tx: &mpsc::UnboundedSender<Message>, frame: &EventFrame) -> bool {
    let wire = WireFrame { frame, timestamp: chrono::Utc::now() };
    match serde_json::to_string(&wire) {
        Ok(json) => tx.send(Message::Text(json.into())).is_ok(),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_beyond_capacity_is_checked_before_upgrade() {
        let hub = BroadcastHub::new(0, 16);
        assert_eq!(hub.subscriber_count(), 0);
        assert!(hub.subscribers.len() >= hub.max_subscribers);
    }

    #[test]
    fn broadcast_without_subscribers_does_not_panic() {
        let hub = BroadcastHub::new(10, 16);
        hub.broadcast(EventFrame::Pong);
    }

    #[test]
    fn send_to_unknown_subscriber_returns_false() {
        let hub = BroadcastHub::new(10, 16);
        assert!(!hub.send(Uuid::new_v4(), &EventFrame::Pong));
    }
}
