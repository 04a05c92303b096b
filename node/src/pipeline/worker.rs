use std::sync::Arc;
use std::time::Duration;

use crate::container::WireGuardDriver;
use crate::error::{NodeError, Result};
use crate::federation::{FederationClient, TicketStatus};
use crate::lease::{Socks5LeaseStore, WireGuardLeaseStore};
use crate::pipeline::VpnResponse;
use crate::utils::time::now_ms;

const SERVER_READY_BUDGET: Duration = Duration::from_secs(60);
const SERVER_READY_POLL: Duration = Duration::from_millis(500);
const CONF_READ_RETRIES: u32 = 2;
const CONF_READ_COOLDOWN: Duration = Duration::from_secs(5);

/// Worker-side provisioning: turn a lease into a config artifact, honouring
/// the fan-out feedback protocol so losing racers release their slot.
pub struct WorkerPipeline {
    driver: Arc<WireGuardDriver>,
    wg_leases: Arc<WireGuardLeaseStore>,
    socks_leases: Arc<Socks5LeaseStore>,
    client: Arc<FederationClient>,
}

impl WorkerPipeline {
    pub fn new(
        driver: Arc<WireGuardDriver>,
        wg_leases: Arc<WireGuardLeaseStore>,
        socks_leases: Arc<Socks5LeaseStore>,
        client: Arc<FederationClient>,
    ) -> Self {
        Self {
            driver,
            wg_leases,
            socks_leases,
            client,
        }
    }

    pub async fn get_valid_wireguard_config(
        &self,
        priority: bool,
        lease_seconds: u64,
        feedback_url: Option<&str>,
    ) -> Result<VpnResponse> {
        let ready = self
            .driver
            .server_ready(None, SERVER_READY_BUDGET, SERVER_READY_POLL)
            .await?;
        if !ready {
            return Err(NodeError::NotReady {
                what: "wireguard server".to_string(),
                budget: SERVER_READY_BUDGET,
            });
        }
        let peer_slots = self.driver.count_configs().await?;

        let (start_id, end_id) = self.wg_leases.range_for(priority);
        let expires_at = now_ms() + (lease_seconds as i64) * 1000;
        let peer_id = self
            .wg_leases
            .register_wireguard_lease(start_id, end_id, expires_at)
            .await?;

        let config = self.read_conf_with_retries(peer_id).await?;

        // The race may already be over: if another worker won, give the
        // slot back instead of stranding it until expiry.
        if let Some(url) = feedback_url {
            if self.client.check_feedback(url).await == Some(TicketStatus::Complete) {
                tracing::info!(peer_id, "request already satisfied elsewhere, releasing lease");
                self.wg_leases.mark_config_as_free(peer_id).await?;
                return Ok(VpnResponse::cancelled());
            }
        }

        Ok(VpnResponse {
            config,
            peer_id: Some(peer_id),
            peer_slots: Some(peer_slots),
            expires_at: Some(expires_at),
            cancelled: false,
        })
    }

    async fn read_conf_with_retries(&self, peer_id: i32) -> Result<String> {
        let mut last_error = None;

        for attempt in 0..=CONF_READ_RETRIES {
            match self.driver.read_client_conf(peer_id).await {
                Ok(text) if !text.trim().is_empty() => return Ok(text),
                Ok(_) => {
                    last_error = Some(NodeError::internal(format!(
                        "peer{peer_id} conf is empty"
                    )));
                }
                Err(e) => last_error = Some(e),
            }

            if attempt < CONF_READ_RETRIES {
                tokio::time::sleep(CONF_READ_COOLDOWN).await;
            }
        }

        Err(last_error.unwrap_or_else(|| NodeError::internal("conf read failed")))
    }

    pub async fn get_valid_socks5_config(
        &self,
        lease_seconds: u64,
        priority: bool,
    ) -> Result<VpnResponse> {
        let sock = self
            .socks_leases
            .get_valid_socks5_config(lease_seconds, priority)
            .await?;

        Ok(VpnResponse {
            config: format!(
                "socks5://{}:{}@{}:{}",
                sock.username, sock.password, sock.ip_address, sock.port
            ),
            peer_id: None,
            peer_slots: None,
            expires_at: Some(sock.expires_at),
            cancelled: false,
        })
    }

    /// Exposed for explicit releases outside the feedback path.
    pub async fn mark_config_as_free(&self, peer_id: i32) -> Result<()> {
        self.wg_leases.mark_config_as_free(peer_id).await
    }
}

impl std::fmt::Debug for WorkerPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPipeline").finish()
    }
}
