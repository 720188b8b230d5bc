//! Session bookkeeping for connected UDP clients
//!
//! This module tracks which socket address belongs to which session:
//! - Session lifecycle (connect, disconnect, timeout)
//! - Capacity enforcement
//! - Activity tracking for timeout detection
//!
//! It knows nothing about players. The network layer pairs a session with a
//! player through the command handler once the connect packet is accepted.

use log::info;
use realm_shared::SessionId;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// Silence longer than this ends a session.
pub const CLIENT_TIMEOUT: Duration = Duration::from_secs(5);

/// A connected client session
#[derive(Debug)]
pub struct Client {
    /// Session identifier assigned by the server
    pub session_id: SessionId,
    /// Network address for outgoing datagrams
    pub addr: SocketAddr,
    /// Last time any packet arrived from this client
    pub last_seen: Instant,
    /// Packets accepted from this client, for diagnostics
    pub packets_received: u64,
}

impl Client {
    pub fn new(session_id: SessionId, addr: SocketAddr) -> Self {
        Self {
            session_id,
            addr,
            last_seen: Instant::now(),
            packets_received: 0,
        }
    }

    /// Records activity from this client.
    pub fn touch(&mut self) {
        self.last_seen = Instant::now();
        self.packets_received += 1;
    }

    /// Returns true if nothing was received within `timeout`.
    pub fn is_timed_out(&self, timeout: Duration) -> bool {
        self.last_seen.elapsed() > timeout
    }
}

/// Manages all connected sessions
///
/// Session ids are never reused within one server run, so a late packet for
/// a closed session cannot be mistaken for a new one.
pub struct ClientManager {
    clients: HashMap<SessionId, Client>,
    next_session_id: SessionId,
    max_clients: usize,
    timeout: Duration,
}

impl ClientManager {
    pub fn new(max_clients: usize) -> Self {
        Self::with_timeout(max_clients, CLIENT_TIMEOUT)
    }

    pub fn with_timeout(max_clients: usize, timeout: Duration) -> Self {
        Self {
            clients: HashMap::new(),
            next_session_id: 1,
            max_clients,
            timeout,
        }
    }

    /// Attempts to open a session for `addr`
    ///
    /// Returns None if the server is at capacity.
    pub fn add_client(&mut self, addr: SocketAddr) -> Option<SessionId> {
        if self.clients.len() >= self.max_clients {
            return None;
        }

        let session_id = self.next_session_id;
        self.next_session_id += 1;

        info!("Session {} opened from {}", session_id, addr);
        self.clients.insert(session_id, Client::new(session_id, addr));
        Some(session_id)
    }

    /// Closes a session. Returns false if it was already gone.
    pub fn remove_client(&mut self, session_id: &SessionId) -> bool {
        if let Some(client) = self.clients.remove(session_id) {
            info!("Session {} closed ({})", client.session_id, client.addr);
            true
        } else {
            false
        }
    }

    pub fn find_client_by_addr(&self, addr: SocketAddr) -> Option<SessionId> {
        self.clients
            .iter()
            .find(|(_, client)| client.addr == addr)
            .map(|(id, _)| *id)
    }

    pub fn addr_of(&self, session_id: SessionId) -> Option<SocketAddr> {
        self.clients.get(&session_id).map(|client| client.addr)
    }

    /// Marks a session as active. Returns false for unknown sessions.
    pub fn touch(&mut self, session_id: SessionId) -> bool {
        match self.clients.get_mut(&session_id) {
            Some(client) => {
                client.touch();
                true
            }
            None => false,
        }
    }

    /// Removes and returns every session silent for longer than the timeout
    ///
    /// The caller is responsible for despawning the players those sessions
    /// owned.
    pub fn check_timeouts(&mut self) -> Vec<SessionId> {
        let timeout = self.timeout;
        let timed_out: Vec<SessionId> = self
            .clients
            .iter()
            .filter(|(_, client)| client.is_timed_out(timeout))
            .map(|(id, _)| *id)
            .collect();

        for session_id in &timed_out {
            self.remove_client(session_id);
        }

        timed_out
    }

    /// All session ids with their addresses, for broadcasting.
    pub fn get_client_addrs(&self) -> Vec<(SessionId, SocketAddr)> {
        self.clients
            .iter()
            .map(|(id, client)| (*id, client.addr))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}
