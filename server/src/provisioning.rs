//! Match provisioning and end-of-match reporting.
//!
//! The HTTP service owns the authoritative player list; the server only ever
//! asks it two things: "is this match/key pair real, and who plays in it" at
//! connect time, and "it's over" at the end. Both calls go through a trait so
//! tests can provision matches without a network.

use async_trait::async_trait;
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::ServerError;

/// Default duration handed out when running without a provisioning service.
pub const DEFAULT_MATCH_DURATION: u32 = 36_000;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PlayerSlot {
    pub player_index: u16,
    pub ip: String,
    pub is_host: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MatchConfig {
    pub max_players: u8,
    pub match_duration: u32,
    #[serde(default)]
    pub players: Vec<PlayerSlot>,
}

#[async_trait]
pub trait MatchProvisioner: Send + Sync {
    /// Validates `(match_id, key)` and returns the match parameters.
    async fn fetch_match_config(
        &self,
        match_id: &str,
        key: &str,
    ) -> Result<MatchConfig, ServerError>;

    /// Notifies the external service that the match ended. Best effort.
    async fn report_match_end(&self, match_id: &str, key: &str);
}

/// Production provisioner talking to the HTTP service.
pub struct HttpProvisioner {
    base_url: String,
    client: reqwest::Client,
}

impl HttpProvisioner {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl MatchProvisioner for HttpProvisioner {
    async fn fetch_match_config(
        &self,
        match_id: &str,
        key: &str,
    ) -> Result<MatchConfig, ServerError> {
        let url = format!("{}/mvsi_register", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&json!({ "matchId": match_id, "key": key }))
            .send()
            .await
            .map_err(|e| ServerError::MatchProvisioningFailed(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ServerError::MatchProvisioningFailed(format!(
                "{} returned {}",
                url,
                response.status()
            )));
        }

        response
            .json::<MatchConfig>()
            .await
            .map_err(|e| ServerError::MatchProvisioningFailed(e.to_string()))
    }

    async fn report_match_end(&self, match_id: &str, key: &str) {
        let url = format!("{}/mvsi_end_match", self.base_url);
        let result = self
            .client
            .post(&url)
            .json(&json!({ "matchId": match_id, "key": key }))
            .send()
            .await;
        match result {
            Ok(response) if response.status().is_success() => {
                info!("match {} reported as ended", match_id);
            }
            Ok(response) => {
                warn!("end-of-match report for {}: {}", match_id, response.status());
            }
            Err(e) => {
                error!("end-of-match report for {} failed: {}", match_id, e);
            }
        }
    }
}

/// Fixed-answer provisioner for tests and for running without the HTTP
/// service.
pub struct StaticProvisioner {
    config: MatchConfig,
}

impl StaticProvisioner {
    pub fn new(max_players: u8, match_duration: u32) -> Self {
        Self {
            config: MatchConfig {
                max_players,
                match_duration,
                players: Vec::new(),
            },
        }
    }
}

#[async_trait]
impl MatchProvisioner for StaticProvisioner {
    async fn fetch_match_config(
        &self,
        _match_id: &str,
        _key: &str,
    ) -> Result<MatchConfig, ServerError> {
        Ok(self.config.clone())
    }

    async fn report_match_end(&self, match_id: &str, _key: &str) {
        info!("match {} ended (static provisioning)", match_id);
    }
}
