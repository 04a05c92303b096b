mod worker;

pub use worker::WorkerPipeline;

use std::sync::Arc;

use serde::Serialize;

use crate::config::{Config, RunMode};
use crate::error::Result;
use crate::federation::{ConfigType, FederationClient, VpnRequestParams};

/// What a `/vpn` request resolves to, regardless of which role served it.
#[derive(Debug, Clone, Serialize)]
pub struct VpnResponse {
    pub config: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub peer_id: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub peer_slots: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub cancelled: bool,
}

impl VpnResponse {
    pub fn cancelled() -> Self {
        Self {
            config: String::new(),
            peer_id: None,
            peer_slots: None,
            expires_at: None,
            cancelled: true,
        }
    }
}

/// Role-dispatched entry point for "get config" requests. Workers provision
/// in-process; miners race their workers; validators go through pools.
pub struct RequestPipeline {
    config: Arc<Config>,
    worker: Arc<WorkerPipeline>,
    client: Arc<FederationClient>,
}

impl RequestPipeline {
    pub fn new(
        config: Arc<Config>,
        worker: Arc<WorkerPipeline>,
        client: Arc<FederationClient>,
    ) -> Self {
        Self {
            config,
            worker,
            client,
        }
    }

    pub fn run_mode(&self) -> RunMode {
        self.config.run_mode
    }

    pub async fn handle_vpn_request(
        &self,
        params: &VpnRequestParams,
        feedback_url: Option<&str>,
    ) -> Result<VpnResponse> {
        match self.config.run_mode {
            RunMode::Worker => match params.config_type {
                ConfigType::Wireguard => {
                    self.worker
                        .get_valid_wireguard_config(
                            params.priority,
                            params.lease_seconds,
                            feedback_url,
                        )
                        .await
                }
                ConfigType::Socks5 => {
                    self.worker
                        .get_valid_socks5_config(params.lease_seconds, params.priority)
                        .await
                }
            },
            RunMode::Miner => {
                let provisioned = self.client.get_worker_config_as_miner(params).await?;
                Ok(VpnResponse {
                    config: provisioned.config,
                    peer_id: provisioned.peer_id,
                    peer_slots: None,
                    expires_at: provisioned.expires_at,
                    cancelled: false,
                })
            }
            RunMode::Validator => {
                let provisioned = self.client.get_worker_config_as_validator(params).await?;
                Ok(VpnResponse {
                    config: provisioned.config,
                    peer_id: provisioned.peer_id,
                    peer_slots: None,
                    expires_at: provisioned.expires_at,
                    cancelled: false,
                })
            }
        }
    }
}

impl std::fmt::Debug for RequestPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestPipeline")
            .field("run_mode", &self.config.run_mode)
            .finish()
    }
}
