//! Outbound message fan-out and rate-limited world snapshots.

use std::sync::Mutex;

use log::debug;
use realm_shared::{ServerMessage, SessionId};
use tokio::sync::broadcast;

use crate::utils::lock;
use crate::world::World;

/// Fire-and-forget delivery. Implementations must not block the caller on
/// slow or absent receivers.
pub trait BroadcastTransport: Send + Sync {
    fn broadcast_to_all(&self, message: &ServerMessage);

    fn send_to_session(&self, session_id: SessionId, message: &ServerMessage);
}

#[derive(Debug, Clone, PartialEq)]
pub struct Outbound {
    /// `None` addresses every connected session.
    pub session_id: Option<SessionId>,
    pub message: ServerMessage,
}

/// Transport backed by a tokio broadcast channel. The network sender task
/// subscribes and relays each [`Outbound`] to the matching sockets.
pub struct ChannelTransport {
    sender: broadcast::Sender<Outbound>,
}

impl ChannelTransport {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Outbound> {
        self.sender.subscribe()
    }

    fn publish(&self, outbound: Outbound) {
        if let Err(e) = self.sender.send(outbound) {
            debug!("Dropped {} message, no subscribers", e.0.message.kind());
        }
    }
}

impl BroadcastTransport for ChannelTransport {
    fn broadcast_to_all(&self, message: &ServerMessage) {
        self.publish(Outbound {
            session_id: None,
            message: message.clone(),
        });
    }

    fn send_to_session(&self, session_id: SessionId, message: &ServerMessage) {
        self.publish(Outbound {
            session_id: Some(session_id),
            message: message.clone(),
        });
    }
}

/// Emits `worldState` no more often than once per interval, independent of
/// how often it is asked.
pub struct BroadcastCoalescer {
    interval_ms: u64,
    last_sent: Mutex<Option<u64>>,
}

impl BroadcastCoalescer {
    pub fn new(interval_ms: u64) -> Self {
        Self {
            interval_ms,
            last_sent: Mutex::new(None),
        }
    }

    pub fn is_due(&self, now: u64) -> bool {
        match *lock(&self.last_sent) {
            Some(last) => now.saturating_sub(last) >= self.interval_ms,
            None => true,
        }
    }

    pub fn snapshot(world: &World, now: u64) -> ServerMessage {
        ServerMessage::WorldState {
            timestamp: now,
            players: world.all_players(),
            monsters: world.all_monsters(),
        }
    }

    /// Sends a snapshot if the interval has elapsed. Returns whether it did.
    pub fn maybe_broadcast(&self, world: &World, transport: &dyn BroadcastTransport, now: u64) -> bool {
        {
            let mut last_sent = lock(&self.last_sent);
            if let Some(last) = *last_sent {
                if now.saturating_sub(last) < self.interval_ms {
                    return false;
                }
            }
            *last_sent = Some(now);
        }

        transport.broadcast_to_all(&Self::snapshot(world, now));
        true
    }
}
