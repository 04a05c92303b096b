use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use sea_orm::DatabaseConnection;
use tokio::net::UdpSocket;

use tpn_model::entities::wireguard_leases;

use crate::config::WireGuardConfig;
use crate::container::runtime::ContainerRuntime;
use crate::error::{NodeError, Result};
use crate::services::caching::TtlCache;
use crate::wireguard::WireGuardConfigFile;

const CONFIG_COUNT_CACHE_TTL: Duration = Duration::from_secs(10);
const READY_MARKER: &str = ".wg_ready";
/// Mount point of the config volume inside the container; key-file paths
/// passed to `wg set` must use this root, not the host path.
const CONTAINER_CONFIG_ROOT: &str = "/config";

/// Freshly generated peer keys after a successful rotation.
#[derive(Debug, Clone)]
pub struct RotatedKeys {
    pub private_key: String,
    pub public_key: String,
    pub preshared_key: String,
}

#[derive(Debug)]
pub struct RotationOutcome {
    pub peer_id: i32,
    pub success: bool,
    pub new_keys: Option<RotatedKeys>,
}

/// Everything needed to undo a partial rotation.
struct RotationSnapshot {
    client_conf: String,
    server_conf: String,
    old_private: String,
    old_public: String,
    old_preshared: String,
}

/// Drives the WireGuard daemon: readiness, per-peer key rotation with
/// rollback, config counting, restarts. The only mutator of the live
/// interface; bulk operations are sequential on purpose.
pub struct WireGuardDriver {
    runtime: Arc<dyn ContainerRuntime>,
    db: DatabaseConnection,
    config: WireGuardConfig,
    public_host: String,
    count_cache: TtlCache<u8, usize>,
}

impl WireGuardDriver {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        db: DatabaseConnection,
        config: WireGuardConfig,
        public_host: String,
    ) -> Self {
        Self {
            runtime,
            db,
            config,
            public_host,
            count_cache: TtlCache::new(CONFIG_COUNT_CACHE_TTL),
        }
    }

    fn peer_dir(&self, peer_id: i32) -> PathBuf {
        self.config.config_dir.join(format!("peer{peer_id}"))
    }

    fn client_conf_path(&self, peer_id: i32) -> PathBuf {
        self.peer_dir(peer_id).join(format!("peer{peer_id}.conf"))
    }

    fn key_path(&self, peer_id: i32, kind: &str) -> PathBuf {
        self.peer_dir(peer_id).join(format!("{kind}-peer{peer_id}"))
    }

    fn server_conf_path(&self) -> PathBuf {
        self.config
            .config_dir
            .join("wg_confs")
            .join(format!("{}.conf", self.config.interface))
    }

    /// In-container path of the peer's preshared-key file.
    fn container_psk_path(&self, peer_id: i32) -> String {
        format!("{CONTAINER_CONFIG_ROOT}/peer{peer_id}/presharedkey-peer{peer_id}")
    }

    /// True iff the config volume, the readiness marker, and (when given)
    /// the specific peer conf all exist. Polls until ready or budget.
    pub async fn server_ready(
        &self,
        peer_id: Option<i32>,
        budget: Duration,
        poll: Duration,
    ) -> Result<bool> {
        let deadline = tokio::time::Instant::now() + budget;

        loop {
            if self.ready_now(peer_id).await {
                return Ok(true);
            }

            if tokio::time::Instant::now() >= deadline {
                tracing::warn!(?peer_id, ?budget, "wireguard server not ready within budget");
                return Ok(false);
            }

            tokio::time::sleep(poll).await;
        }
    }

    async fn ready_now(&self, peer_id: Option<i32>) -> bool {
        let dir = &self.config.config_dir;
        if !tokio::fs::try_exists(dir).await.unwrap_or(false) {
            return false;
        }
        if !tokio::fs::try_exists(dir.join(READY_MARKER)).await.unwrap_or(false) {
            return false;
        }
        match peer_id {
            None => true,
            Some(id) => tokio::fs::try_exists(self.client_conf_path(id))
                .await
                .unwrap_or(false),
        }
    }

    /// UDP reachability probe against the declared public endpoint. Silence
    /// is success (WireGuard does not answer unsolicited datagrams); an ICMP
    /// rejection surfaces as an io error and means unreachable.
    pub async fn check_reachable(&self) -> bool {
        let endpoint = format!("{}:{}", self.public_host, self.config.server_port);

        let probe = async {
            let socket = UdpSocket::bind("0.0.0.0:0").await?;
            socket.connect(&endpoint).await?;
            socket.send(&[0u8; 8]).await?;

            let mut buf = [0u8; 64];
            match tokio::time::timeout(Duration::from_secs(1), socket.recv(&mut buf)).await {
                Ok(Ok(_)) => Ok::<bool, std::io::Error>(true),
                Ok(Err(e)) => Err(e),
                Err(_) => Ok(true),
            }
        };

        match probe.await {
            Ok(reachable) => reachable,
            Err(e) => {
                tracing::warn!(endpoint, error = %e, "wireguard endpoint unreachable");
                false
            }
        }
    }

    /// Count `peerK/peerK.conf` files with `K` in range. Cached for 10 s.
    pub async fn count_configs(&self) -> Result<usize> {
        if let Some(count) = self.count_cache.get(&0) {
            return Ok(count);
        }

        let ids = self.existing_peer_ids().await?;
        let count = ids.len();
        self.count_cache.put(0, count);

        Ok(count)
    }

    /// Peer ids with an on-disk conf, ascending.
    pub async fn existing_peer_ids(&self) -> Result<Vec<i32>> {
        let mut ids = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.config.config_dir).await {
            Ok(entries) => entries,
            Err(_) => return Ok(ids),
        };

        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let Some(suffix) = name.strip_prefix("peer") else { continue };
            let Ok(id) = suffix.parse::<i32>() else { continue };

            if id < 1 || id > i32::from(self.config.peer_count) {
                continue;
            }
            if tokio::fs::try_exists(self.client_conf_path(id)).await.unwrap_or(false) {
                ids.push(id);
            }
        }

        ids.sort_unstable();
        Ok(ids)
    }

    /// Contents of `peerK/peerK.conf`.
    pub async fn read_client_conf(&self, peer_id: i32) -> Result<String> {
        Ok(tokio::fs::read_to_string(self.client_conf_path(peer_id)).await?)
    }

    async fn exec(&self, command: &[&str]) -> Result<String> {
        self.runtime.exec(&self.config.container_name, command).await
    }

    async fn exec_sh(&self, script: &str) -> Result<String> {
        self.exec(&["sh", "-c", script]).await
    }

    async fn generate_keys(&self) -> Result<RotatedKeys> {
        let private_key = self.exec_sh("wg genkey").await?.trim().to_string();
        let public_key = self
            .exec_sh(&format!("printf '%s' '{private_key}' | wg pubkey"))
            .await?
            .trim()
            .to_string();
        let preshared_key = self.exec_sh("wg genpsk").await?.trim().to_string();

        if private_key.is_empty() || public_key.is_empty() || preshared_key.is_empty() {
            return Err(NodeError::internal("key generation returned empty output"));
        }

        Ok(RotatedKeys {
            private_key,
            public_key,
            preshared_key,
        })
    }

    async fn snapshot(&self, peer_id: i32) -> Result<RotationSnapshot> {
        Ok(RotationSnapshot {
            client_conf: tokio::fs::read_to_string(self.client_conf_path(peer_id)).await?,
            server_conf: tokio::fs::read_to_string(self.server_conf_path()).await?,
            old_private: tokio::fs::read_to_string(self.key_path(peer_id, "privatekey")).await?,
            old_public: tokio::fs::read_to_string(self.key_path(peer_id, "publickey")).await?,
            old_preshared: tokio::fs::read_to_string(self.key_path(peer_id, "presharedkey"))
                .await?,
        })
    }

    /// Atomic key rotation for one peer. On any mid-flight failure the
    /// key files, client conf, server conf, and live peer entry are restored
    /// and the outcome reports `success = false`. The lease row is deleted
    /// only after the new keys are fully in place.
    pub async fn replace_config(&self, peer_id: i32) -> Result<RotationOutcome> {
        let snapshot = self.snapshot(peer_id).await?;
        let mut generated: Option<RotatedKeys> = None;

        match self.rotate(peer_id, &snapshot, &mut generated).await {
            Ok(keys) => {
                metrics::counter!("wireguard_rotations_total", "outcome" => "success")
                    .increment(1);
                Ok(RotationOutcome {
                    peer_id,
                    success: true,
                    new_keys: Some(keys),
                })
            }
            Err(e) => {
                tracing::error!(peer_id, error = %e, "key rotation failed, rolling back");
                metrics::counter!("wireguard_rotations_total", "outcome" => "rollback")
                    .increment(1);
                self.rollback(peer_id, &snapshot, generated.as_ref()).await;
                Ok(RotationOutcome {
                    peer_id,
                    success: false,
                    new_keys: None,
                })
            }
        }
    }

    async fn rotate(
        &self,
        peer_id: i32,
        snapshot: &RotationSnapshot,
        generated: &mut Option<RotatedKeys>,
    ) -> Result<RotatedKeys> {
        let keys = self.generate_keys().await?;
        *generated = Some(keys.clone());

        // New client conf: fresh private key, fresh preshared key. The
        // peer's PublicKey entry is the server's and does not change.
        let mut client = WireGuardConfigFile::parse(&snapshot.client_conf)?;
        client.interface.private_key = Some(keys.private_key.clone());
        for peer in &mut client.peers {
            if peer.preshared_key.is_some() {
                peer.preshared_key = Some(keys.preshared_key.clone());
            }
        }
        let client_ip = client.client_ip().ok_or_else(|| NodeError::WireGuardParse {
            message: format!("peer{peer_id} conf has no Address"),
        })?;

        tokio::fs::write(self.key_path(peer_id, "privatekey"), &keys.private_key).await?;
        tokio::fs::write(self.key_path(peer_id, "publickey"), &keys.public_key).await?;
        tokio::fs::write(self.key_path(peer_id, "presharedkey"), &keys.preshared_key).await?;
        tokio::fs::write(self.client_conf_path(peer_id), client.serialize()).await?;

        // Swap the peer on the live interface: out with the old public key,
        // in with the new one on the same allowed ip.
        let old_public = snapshot.old_public.trim();
        let interface = self.config.interface.clone();
        self.exec(&["wg", "set", &interface, "peer", old_public, "remove"])
            .await?;
        let psk_path = self.container_psk_path(peer_id);
        let allowed = format!("{client_ip}/32");
        self.exec(&[
            "wg",
            "set",
            &interface,
            "peer",
            &keys.public_key,
            "preshared-key",
            &psk_path,
            "allowed-ips",
            &allowed,
        ])
        .await?;

        // Persist the swap for the next daemon restart.
        let mut server = WireGuardConfigFile::parse(&snapshot.server_conf)?;
        let index = server.peer_for_allowed_ip(&client_ip).ok_or_else(|| {
            NodeError::WireGuardParse {
                message: format!("server conf has no peer for {client_ip}/32"),
            }
        })?;
        server.peers[index].public_key = Some(keys.public_key.clone());
        server.peers[index].preshared_key = Some(keys.preshared_key.clone());
        tokio::fs::write(self.server_conf_path(), server.serialize()).await?;

        wireguard_leases::Model::delete_by_ids(&self.db, &[peer_id]).await?;

        tracing::info!(peer_id, "rotated wireguard peer keys");
        Ok(keys)
    }

    /// Best-effort restoration; every step is attempted even if an earlier
    /// one fails, and failures are logged rather than propagated.
    async fn rollback(
        &self,
        peer_id: i32,
        snapshot: &RotationSnapshot,
        generated: Option<&RotatedKeys>,
    ) {
        let restores = [
            (self.key_path(peer_id, "privatekey"), &snapshot.old_private),
            (self.key_path(peer_id, "publickey"), &snapshot.old_public),
            (self.key_path(peer_id, "presharedkey"), &snapshot.old_preshared),
            (self.client_conf_path(peer_id), &snapshot.client_conf),
            (self.server_conf_path(), &snapshot.server_conf),
        ];
        for (path, contents) in restores {
            if let Err(e) = tokio::fs::write(&path, contents).await {
                tracing::error!(peer_id, path = %path.display(), error = %e, "rollback write failed");
            }
        }

        let interface = self.config.interface.clone();

        if let Some(keys) = generated {
            if let Err(e) = self
                .exec(&["wg", "set", &interface, "peer", &keys.public_key, "remove"])
                .await
            {
                tracing::warn!(peer_id, error = %e, "rollback: new peer removal failed");
            }
        }

        let client_ip = WireGuardConfigFile::parse(&snapshot.client_conf)
            .ok()
            .and_then(|conf| conf.client_ip());
        if let Some(client_ip) = client_ip {
            let old_public = snapshot.old_public.trim().to_string();
            let psk_path = self.container_psk_path(peer_id);
            let allowed = format!("{client_ip}/32");
            if let Err(e) = self
                .exec(&[
                    "wg",
                    "set",
                    &interface,
                    "peer",
                    &old_public,
                    "preshared-key",
                    &psk_path,
                    "allowed-ips",
                    &allowed,
                ])
                .await
            {
                tracing::error!(peer_id, error = %e, "rollback: old peer restore failed");
            }
        }
    }

    /// Rotate several peers, or every on-disk peer when `peer_ids` is empty.
    /// Strictly sequential: concurrent `wg set` calls race on the shared
    /// interface.
    pub async fn replace_configs(&self, peer_ids: &[i32]) -> Result<Vec<RotationOutcome>> {
        let ids = if peer_ids.is_empty() {
            self.existing_peer_ids().await?
        } else {
            peer_ids.to_vec()
        };

        let mut outcomes = Vec::with_capacity(ids.len());
        for id in ids {
            outcomes.push(self.replace_config(id).await?);
        }

        Ok(outcomes)
    }

    /// Remove the on-disk peer directories. The daemon regenerates them with
    /// fresh keys on its next restart.
    pub async fn delete_configs(&self, peer_ids: &[i32]) -> Result<usize> {
        let mut deleted = 0;
        for id in peer_ids {
            let dir = self.peer_dir(*id);
            match tokio::fs::remove_dir_all(&dir).await {
                Ok(()) => deleted += 1,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }

        self.count_cache.clear();
        Ok(deleted)
    }

    pub async fn restart(&self) -> Result<()> {
        self.runtime.restart(&self.config.container_name).await?;
        self.count_cache.clear();
        Ok(())
    }
}

impl std::fmt::Debug for WireGuardDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WireGuardDriver")
            .field("container", &self.config.container_name)
            .field("config_dir", &self.config.config_dir)
            .field("peer_count", &self.config.peer_count)
            .finish()
    }
}
