//! Connection handshake, ping-calibration phase and match start gating.

use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;

use log::{info, warn};

use shared::messages::{
    NewConnectionPayload, NewConnectionReply, PlayersConfigurationData, RequestQualityData,
    ServerPayload,
};

use crate::error::ServerError;
use crate::game_match::MatchState;
use crate::network::{player_key, Server};
use crate::player::PlayerInfo;

fn refusal() -> ServerPayload {
    ServerPayload::NewConnectionReply(NewConnectionReply {
        success: 0,
        match_num_players: 0,
        player_index: 0,
        match_duration_in_frames: 0,
        is_validation_server_debug_mode: 0,
    })
}

impl Server {
    /// Handles a `NewConnection` datagram.
    ///
    /// Provisioning is consulted before anything is registered; a failure
    /// produces a `success = 0` reply and the sender is forgotten.
    pub(crate) async fn handle_new_connection(
        server: &Arc<Server>,
        payload: NewConnectionPayload,
        addr: SocketAddr,
    ) -> Result<(), ServerError> {
        let key = player_key(&addr);

        // Retransmitted handshake: answer again, never double-register.
        if let Some(existing) = server.players.find(&key) {
            if let Some(game) = server.matches.find(&existing.match_id) {
                let reply = ServerPayload::NewConnectionReply(NewConnectionReply {
                    success: 1,
                    match_num_players: game.max_players,
                    player_index: existing.player_index,
                    match_duration_in_frames: game.duration_in_frames,
                    is_validation_server_debug_mode: 0,
                });
                server.send_to_player(&game, &existing, reply).await?;
            }
            return Ok(());
        }

        let match_id = payload.match_data.match_id.clone();
        let game = match server.matches.find(&match_id) {
            Some(game) => game,
            None => {
                let config = match server
                    .provisioner
                    .fetch_match_config(&match_id, &payload.match_data.key)
                    .await
                {
                    Ok(config) if config.max_players <= server.config.max_players => config,
                    Ok(config) => {
                        warn!(
                            "match {}: provisioned for {} players, server bound at {}",
                            match_id, config.max_players, server.config.max_players
                        );
                        server
                            .send_unregistered(addr, refusal(), server.config.max_players as usize)
                            .await;
                        return Ok(());
                    }
                    Err(e) => {
                        warn!("match {}: provisioning failed: {}", match_id, e);
                        server
                            .send_unregistered(addr, refusal(), server.config.max_players as usize)
                            .await;
                        return Ok(());
                    }
                };
                let game = Arc::new(MatchState::new(
                    match_id.clone(),
                    payload.match_data.key.clone(),
                    config.max_players,
                    config.match_duration,
                    server.config.ping_phase_total,
                ));
                server.matches.insert_or_assign(match_id.clone(), game.clone());
                info!(
                    "match {} created: {} players, {} frames",
                    match_id, config.max_players, config.match_duration
                );
                game
            }
        };

        let player_index = payload.player_data.player_index;
        if game.players.len() >= game.max_players as usize
            || player_index >= game.max_players as u16
        {
            warn!(
                "match {}: refusing {} (index {}, {} of {} slots taken)",
                match_id,
                addr,
                player_index,
                game.players.len(),
                game.max_players
            );
            server
                .send_unregistered(addr, refusal(), game.max_players as usize)
                .await;
            return Ok(());
        }

        let player = Arc::new(PlayerInfo::new(
            addr,
            player_index as u8,
            match_id.clone(),
            game.max_players as usize,
        ));
        game.players.insert_or_assign(key.clone(), player.clone());
        server.players.insert_or_assign(key, player.clone());
        info!("match {}: player {} joined from {}", match_id, player_index, addr);

        let reply = ServerPayload::NewConnectionReply(NewConnectionReply {
            success: 1,
            match_num_players: game.max_players,
            player_index: player.player_index,
            match_duration_in_frames: game.duration_in_frames,
            is_validation_server_debug_mode: 0,
        });
        server.send_to_player(&game, &player, reply).await?;

        if game.players.len() == game.max_players as usize {
            Server::start_ping_phase(server, game);
        }
        Ok(())
    }

    /// Spawns the calibration task: `ping_phase_total` probe rounds at a
    /// fixed interval, then a start attempt in case everyone is already
    /// ready.
    fn start_ping_phase(server: &Arc<Server>, game: Arc<MatchState>) {
        let server = Arc::clone(server);
        tokio::spawn(async move {
            info!("match {}: ping calibration started", game.match_id);
            let mut timer = tokio::time::interval(server.config.ping_phase_interval);
            for _ in 0..game.ping_phase_total {
                if !server.is_running() {
                    return;
                }
                timer.tick().await;
                server.broadcast_request_quality(&game).await;
                game.ping_phase_count.fetch_add(1, Ordering::SeqCst);
            }
            info!("match {}: ping calibration complete", game.match_id);
            Server::try_start_match(&server, &game).await;
        });
    }

    /// One probe round: a `RequestQualityData` to every connected player,
    /// with the send time remembered against the sequence for RTT matching.
    pub(crate) async fn broadcast_request_quality(&self, game: &Arc<MatchState>) {
        let now = Instant::now();
        for (_, player) in game.players.snapshot() {
            let ping = {
                let net = player.net.read();
                if net.disconnected {
                    continue;
                }
                net.rift.ping_ms().max(0) as u16
            };
            let payload = ServerPayload::RequestQualityData(RequestQualityData {
                ping,
                packets_loss_percent: 0,
            });
            match self.send_to_player(game, &player, payload).await {
                Ok(0) => {}
                Ok(sequence) => player.pending_pings.insert_or_assign(sequence, now),
                Err(e) => warn!(
                    "match {}: probe to player {} failed: {}",
                    game.match_id, player.player_index, e
                ),
            }
        }
    }

    pub(crate) async fn handle_ready(
        server: &Arc<Server>,
        game: &Arc<MatchState>,
        player: &Arc<PlayerInfo>,
        ready: bool,
    ) -> Result<(), ServerError> {
        player.net.write().ready = ready;
        info!(
            "match {}: player {} ready = {}",
            game.match_id, player.player_index, ready
        );
        Server::try_start_match(server, game).await;
        Ok(())
    }

    /// Starts the match once every slot is filled, every player is ready and
    /// the calibration phase has run its course. Safe to call from both the
    /// ready handler and the calibration task; only the first caller that
    /// finds all gates open actually starts it.
    pub(crate) async fn try_start_match(server: &Arc<Server>, game: &Arc<MatchState>) {
        if !game.ping_phase_complete() {
            return;
        }
        if game.players.len() < game.max_players as usize {
            return;
        }
        let mut all_ready = true;
        game.players.for_each_read(|_, player| {
            if !player.net.read().ready {
                all_ready = false;
            }
        });
        if !all_ready {
            return;
        }
        if game.tick_running.swap(true, Ordering::SeqCst) {
            return;
        }

        info!("match {}: all players ready, starting", game.match_id);
        let players = game.players.snapshot();
        for (_, player) in &players {
            let config = ServerPayload::PlayersConfigurationData(PlayersConfigurationData {
                num_players: players.len() as u8,
            });
            if let Err(e) = server.send_to_player(game, player, config).await {
                warn!(
                    "match {}: configuration to player {} failed: {}",
                    game.match_id, player.player_index, e
                );
            }
        }
        for (_, player) in &players {
            if let Err(e) = server
                .send_to_player(game, player, ServerPayload::StartGame)
                .await
            {
                warn!(
                    "match {}: start to player {} failed: {}",
                    game.match_id, player.player_index, e
                );
            }
        }
        Server::spawn_tick_loop(server, game.clone());
    }
}
