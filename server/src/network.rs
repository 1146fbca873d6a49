//! UDP dispatcher and send path.
//!
//! A single receive loop reads datagrams, decompresses, parses and hands them
//! to the per-message handlers; keeping dispatch inline preserves arrival
//! order for each client. The per-match tick loops run as their own tasks and
//! meet the dispatcher only through the shared maps.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::net::UdpSocket;
use tokio::sync::Notify;

use shared::codec;
use shared::compression;
use shared::messages::{ClientPayload, ServerMessage, ServerPayload};

use crate::error::ServerError;
use crate::game_match::MatchState;
use crate::player::PlayerInfo;
use crate::provisioning::MatchProvisioner;
use crate::sync_map::SharedMap;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// UDP port to bind.
    pub port: u16,
    /// Upper bound on the per-match player count a provisioning response may
    /// request.
    pub max_players: u8,
    /// When set, the server is a non-host proxy: datagrams are forwarded
    /// verbatim between the local client and this endpoint, nothing is
    /// parsed.
    pub proxy_host: Option<SocketAddr>,
    /// Probes per ping-calibration phase.
    pub ping_phase_total: u32,
    /// Spacing between calibration probes.
    pub ping_phase_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 41234,
            max_players: 2,
            proxy_host: None,
            ping_phase_total: 65,
            ping_phase_interval: Duration::from_millis(50),
        }
    }
}

/// The match server: one socket, two registries, one task per running match.
pub struct Server {
    pub(crate) socket: UdpSocket,
    pub(crate) config: ServerConfig,
    /// match_id → match.
    pub(crate) matches: SharedMap<String, Arc<MatchState>>,
    /// "ip:port" → player, across all matches.
    pub(crate) players: SharedMap<String, Arc<PlayerInfo>>,
    pub(crate) provisioner: Arc<dyn MatchProvisioner>,
    running: AtomicBool,
    shutdown: Notify,
    /// Learned endpoint of the local client in proxy mode.
    proxy_client: parking_lot::RwLock<Option<SocketAddr>>,
}

/// Canonical registry key for a remote endpoint.
pub(crate) fn player_key(addr: &SocketAddr) -> String {
    format!("{}:{}", addr.ip(), addr.port())
}

impl Server {
    /// Binds the UDP socket and builds the server. A bind failure here is the
    /// only fatal socket error.
    pub async fn bind(
        config: ServerConfig,
        provisioner: Arc<dyn MatchProvisioner>,
    ) -> Result<Arc<Self>, ServerError> {
        let socket = UdpSocket::bind(("0.0.0.0", config.port)).await?;
        info!("listening on {}", socket.local_addr()?);
        Ok(Arc::new(Self {
            socket,
            config,
            matches: SharedMap::new(),
            players: SharedMap::new(),
            provisioner,
            running: AtomicBool::new(true),
            shutdown: Notify::new(),
            proxy_client: parking_lot::RwLock::new(None),
        }))
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.socket.local_addr()?)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Matches currently held in the registry.
    pub fn active_matches(&self) -> usize {
        self.matches.len()
    }

    /// Players currently held in the registry, across all matches.
    pub fn connected_players(&self) -> usize {
        self.players.len()
    }

    /// Flags every task to exit at its next suspension point and unblocks the
    /// receive loop.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.shutdown.notify_waiters();
    }

    /// Runs the receive loop until [`Server::stop`] is called.
    pub async fn run(self: Arc<Self>) -> Result<(), ServerError> {
        let mut buf = vec![0u8; 2048];
        while self.is_running() {
            tokio::select! {
                _ = self.shutdown.notified() => break,
                received = self.socket.recv_from(&mut buf) => match received {
                    Ok((len, addr)) => {
                        if let Some(host) = self.config.proxy_host {
                            self.forward_proxy(&buf[..len], addr, host).await;
                            continue;
                        }
                        if let Err(e) = Server::handle_datagram(&self, &buf[..len], addr).await {
                            debug!("dropping datagram from {}: {}", addr, e);
                        }
                    }
                    Err(e) => {
                        error!("receive error: {}", e);
                        if !self.is_running() {
                            break;
                        }
                    }
                },
            }
        }
        info!("receive loop stopped");
        Ok(())
    }

    /// Decompress → parse → route. Any error here is packet-scoped.
    async fn handle_datagram(
        server: &Arc<Server>,
        data: &[u8],
        addr: SocketAddr,
    ) -> Result<(), ServerError> {
        let payload = compression::decompress_unbounded(data)?;
        let message = codec::parse_client_message(&payload)?;
        let sequence = message.sequence;

        match message.payload {
            ClientPayload::NewConnection(payload) => {
                Server::handle_new_connection(server, payload, addr).await
            }
            payload => {
                let key = player_key(&addr);
                let player = server
                    .players
                    .find(&key)
                    .ok_or(ServerError::UnknownPlayer(addr))?;
                let game = server
                    .matches
                    .find(&player.match_id)
                    .ok_or_else(|| ServerError::UnknownMatch(player.match_id.clone()))?;

                {
                    let mut net = player.net.write();
                    if sequence > net.last_seq_recv {
                        net.last_seq_recv = sequence;
                    }
                }

                match payload {
                    ClientPayload::Input(p) => server.handle_input(&game, &player, p).await,
                    ClientPayload::PlayerInputAck(p) => {
                        server.handle_input_ack(&player, p);
                        Ok(())
                    }
                    ClientPayload::QualityData(p) => {
                        server.handle_quality_data(&player, p);
                        Ok(())
                    }
                    ClientPayload::ReadyToStartMatch(p) => {
                        Server::handle_ready(server, &game, &player, p.ready == 1).await
                    }
                    ClientPayload::MatchResult(p) => {
                        info!(
                            "match {}: player {} reports result (winning team {}, checksum {:#010x})",
                            game.match_id, player.player_index, p.winning_team_index,
                            p.last_frame_checksum
                        );
                        player.net.write().finished = true;
                        Ok(())
                    }
                    ClientPayload::Disconnecting(p) => {
                        info!(
                            "match {}: player {} disconnecting (reason {})",
                            game.match_id, player.player_index, p.reason
                        );
                        player.net.write().disconnected = true;
                        Ok(())
                    }
                    ClientPayload::PlayerDisconnectedAck(p) => {
                        debug!(
                            "player {} acked disconnect slot {}",
                            player.player_index, p.array_index
                        );
                        Ok(())
                    }
                    ClientPayload::NewConnection(_) => unreachable!("handled above"),
                }
            }
        }
    }

    /// Serialises, compresses and sends one message to `player`, stamping the
    /// match's next sequence number. Returns the sequence used, or 0 if the
    /// player is disconnected and nothing was sent.
    pub(crate) async fn send_to_player(
        &self,
        game: &MatchState,
        player: &PlayerInfo,
        payload: ServerPayload,
    ) -> Result<u32, ServerError> {
        if player.net.read().disconnected {
            return Ok(0);
        }
        let sequence = game.next_sequence();
        let message = ServerMessage { sequence, payload };
        let raw = codec::serialize_server_message(&message, game.max_players as usize)?;
        let packet = compression::compress(&raw)?;
        self.socket.send_to(&packet, player.addr).await?;
        player.net.write().last_seq_sent = sequence;
        Ok(sequence)
    }

    /// Sends a reply to an endpoint that never made it into the registries
    /// (refused handshakes). Carries sequence 0.
    pub(crate) async fn send_unregistered(
        &self,
        addr: SocketAddr,
        payload: ServerPayload,
        max_players: usize,
    ) {
        let message = ServerMessage {
            sequence: 0,
            payload,
        };
        let result = codec::serialize_server_message(&message, max_players)
            .and_then(|raw| compression::compress(&raw));
        match result {
            Ok(packet) => {
                if let Err(e) = self.socket.send_to(&packet, addr).await {
                    warn!("reply to {} failed: {}", addr, e);
                }
            }
            Err(e) => warn!("could not encode reply to {}: {}", addr, e),
        }
    }

    /// Proxy path: no parsing, no state beyond remembering the local client.
    async fn forward_proxy(&self, data: &[u8], from: SocketAddr, host: SocketAddr) {
        if from == host {
            let client = *self.proxy_client.read();
            match client {
                Some(client) => {
                    if let Err(e) = self.socket.send_to(data, client).await {
                        warn!("proxy: forward to client {} failed: {}", client, e);
                    }
                }
                None => debug!("proxy: datagram from host before any client traffic"),
            }
        } else {
            *self.proxy_client.write() = Some(from);
            if let Err(e) = self.socket.send_to(data, host).await {
                warn!("proxy: forward to host {} failed: {}", host, e);
            }
        }
    }
}
