//! Server network layer: JSON datagrams over UDP
//!
//! Three background tasks feed and drain the main event loop:
//! - the receiver decodes [`ClientPacket`]s and forwards them as events
//! - the sender relays every [`Outbound`] published by the simulation
//! - the timeout checker closes silent sessions
//!
//! The event loop itself only touches the world through [`CommandHandler`].

use crate::broadcast::Outbound;
use crate::client_manager::ClientManager;
use crate::commands::CommandHandler;
use crate::error::NetworkError;
use crate::utils::get_timestamp;
use log::{debug, error, info, warn};
use realm_shared::{ClientPacket, ServerMessage, SessionId};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, RwLock};

const MAX_DATAGRAM_SIZE: usize = 8192;

/// Events sent from network tasks to the main server loop
#[derive(Debug)]
pub enum NetworkEvent {
    PacketReceived { packet: ClientPacket, addr: SocketAddr },
    ClientTimeout { session_id: SessionId },
    Shutdown,
}

/// UDP front end for the simulation
pub struct Server {
    socket: Arc<UdpSocket>,
    clients: Arc<RwLock<ClientManager>>,
    handler: Arc<CommandHandler>,
    outbound: Option<broadcast::Receiver<Outbound>>,

    event_tx: mpsc::UnboundedSender<NetworkEvent>,
    event_rx: mpsc::UnboundedReceiver<NetworkEvent>,
}

impl Server {
    /// Binds `addr`. `outbound` must be subscribed to the transport the
    /// handler's services publish on.
    pub async fn new(
        addr: &str,
        handler: Arc<CommandHandler>,
        outbound: broadcast::Receiver<Outbound>,
        max_clients: usize,
    ) -> Result<Self, NetworkError> {
        let socket = Arc::new(UdpSocket::bind(addr).await?);
        info!("Server listening on {}", socket.local_addr()?);

        let (event_tx, event_rx) = mpsc::unbounded_channel();

        Ok(Server {
            socket,
            clients: Arc::new(RwLock::new(ClientManager::new(max_clients))),
            handler,
            outbound: Some(outbound),
            event_tx,
            event_rx,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, NetworkError> {
        Ok(self.socket.local_addr()?)
    }

    /// Handle for stopping [`Server::run`] from another task.
    pub fn shutdown_handle(&self) -> mpsc::UnboundedSender<NetworkEvent> {
        self.event_tx.clone()
    }

    /// Spawns task that continuously listens for incoming packets
    fn spawn_network_receiver(&self) {
        let socket = Arc::clone(&self.socket);
        let event_tx = self.event_tx.clone();

        tokio::spawn(async move {
            let mut buffer = vec![0u8; MAX_DATAGRAM_SIZE];

            loop {
                match socket.recv_from(&mut buffer).await {
                    Ok((len, addr)) => match serde_json::from_slice::<ClientPacket>(&buffer[..len]) {
                        Ok(packet) => {
                            if event_tx
                                .send(NetworkEvent::PacketReceived { packet, addr })
                                .is_err()
                            {
                                break;
                            }
                        }
                        Err(e) => warn!("Malformed packet from {}: {}", addr, e),
                    },
                    Err(e) => {
                        error!("Error receiving packet: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        });
    }

    /// Spawns task that relays simulation output to the matching sockets
    fn spawn_network_sender(&mut self) {
        let Some(mut outbound) = self.outbound.take() else {
            return;
        };
        let socket = Arc::clone(&self.socket);
        let clients = Arc::clone(&self.clients);

        tokio::spawn(async move {
            loop {
                let Outbound {
                    session_id,
                    message,
                } = match outbound.recv().await {
                    Ok(outbound) => outbound,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Network sender lagged, {} messages dropped", skipped);
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                };

                let addrs: Vec<SocketAddr> = {
                    let clients = clients.read().await;
                    match session_id {
                        Some(session_id) => clients.addr_of(session_id).into_iter().collect(),
                        None => clients
                            .get_client_addrs()
                            .into_iter()
                            .map(|(_, addr)| addr)
                            .collect(),
                    }
                };
                if addrs.is_empty() {
                    continue;
                }

                let data = match message.encode() {
                    Ok(data) => data,
                    Err(e) => {
                        error!("Failed to encode {} message: {}", message.kind(), e);
                        continue;
                    }
                };
                for addr in addrs {
                    if let Err(e) = socket.send_to(&data, addr).await {
                        error!("Failed to send to {}: {}", addr, e);
                    }
                }
            }
        });
    }

    /// Spawns task that monitors client timeouts
    fn spawn_timeout_checker(&self) {
        let clients = Arc::clone(&self.clients);
        let event_tx = self.event_tx.clone();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));

            loop {
                interval.tick().await;

                let timed_out = clients.write().await.check_timeouts();
                for session_id in timed_out {
                    if event_tx
                        .send(NetworkEvent::ClientTimeout { session_id })
                        .is_err()
                    {
                        return;
                    }
                }
            }
        });
    }

    /// Replies to an address that has no session.
    async fn send_direct(&self, message: &ServerMessage, addr: SocketAddr) {
        match message.encode() {
            Ok(data) => {
                if let Err(e) = self.socket.send_to(&data, addr).await {
                    error!("Failed to send to {}: {}", addr, e);
                }
            }
            Err(e) => error!("Failed to encode {} message: {}", message.kind(), e),
        }
    }

    async fn handle_packet(&self, packet: ClientPacket, addr: SocketAddr) {
        let now = get_timestamp();
        let session_id = self.clients.read().await.find_client_by_addr(addr);

        match packet {
            ClientPacket::Connect { name, class } => {
                info!("Client '{}' connecting from {} as {:?}", name, addr, class);

                if let Some(existing) = session_id {
                    info!("Replacing session {} from {}", existing, addr);
                    self.clients.write().await.remove_client(&existing);
                    self.handler.leave(existing);
                }

                let session_id = self.clients.write().await.add_client(addr);
                match session_id {
                    Some(session_id) => {
                        let player_id = self.handler.join(session_id, &name, class, now);
                        self.handler.services().transport.send_to_session(
                            session_id,
                            &ServerMessage::Connected {
                                session_id,
                                player_id,
                            },
                        );
                    }
                    None => {
                        let response = ServerMessage::Disconnected {
                            reason: "Server full".to_string(),
                        };
                        self.send_direct(&response, addr).await;
                    }
                }
            }

            ClientPacket::Command { command } => match session_id {
                Some(session_id) => {
                    self.clients.write().await.touch(session_id);
                    self.handler.handle(session_id, command, now);
                }
                None => debug!("Command from unknown address {}", addr),
            },

            ClientPacket::Heartbeat => {
                if let Some(session_id) = session_id {
                    self.clients.write().await.touch(session_id);
                }
            }

            ClientPacket::Disconnect => {
                if let Some(session_id) = session_id {
                    self.clients.write().await.remove_client(&session_id);
                    self.handler.leave(session_id);
                }
            }
        }
    }

    /// Main network loop. Returns after a [`NetworkEvent::Shutdown`].
    pub async fn run(&mut self) -> Result<(), NetworkError> {
        self.spawn_network_receiver();
        self.spawn_network_sender();
        self.spawn_timeout_checker();

        info!("Network started");

        while let Some(event) = self.event_rx.recv().await {
            match event {
                NetworkEvent::PacketReceived { packet, addr } => {
                    self.handle_packet(packet, addr).await;
                }
                NetworkEvent::ClientTimeout { session_id } => {
                    info!("Session {} timed out", session_id);
                    self.handler.leave(session_id);
                }
                NetworkEvent::Shutdown => {
                    info!("Network shutting down");
                    break;
                }
            }
        }

        Ok(())
    }
}
