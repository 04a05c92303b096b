use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use sea_orm::DatabaseConnection;
use tokio::net::TcpStream;

use tpn_model::entities::socks;
use tpn_model::methods::SocksWrite;

use crate::config::DanteConfig;
use crate::container::runtime::ContainerRuntime;
use crate::error::{NodeError, Result};

const REGEN_TIMEOUT: Duration = Duration::from_secs(20);
const REGEN_POLL: Duration = Duration::from_millis(250);
const READY_POLL: Duration = Duration::from_millis(500);

/// Drives the Dante daemon through its two filesystem protocols: password
/// files at boot, trigger files for rotation. Exclusive owner of the
/// password and trigger directories.
pub struct DanteDriver {
    runtime: Arc<dyn ContainerRuntime>,
    db: DatabaseConnection,
    config: DanteConfig,
    public_host: String,
    initialised: AtomicBool,
    regen_timeout: Duration,
}

impl DanteDriver {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        db: DatabaseConnection,
        config: DanteConfig,
        public_host: String,
    ) -> Self {
        Self {
            runtime,
            db,
            config,
            public_host,
            initialised: AtomicBool::new(false),
            regen_timeout: REGEN_TIMEOUT,
        }
    }

    /// Shrink the regeneration deadline. Test hook.
    pub fn with_regen_timeout(mut self, timeout: Duration) -> Self {
        self.regen_timeout = timeout;
        self
    }

    fn password_path(&self, username: &str) -> PathBuf {
        self.config.password_dir.join(format!("{username}.password"))
    }

    fn used_path(&self, username: &str) -> PathBuf {
        self.config
            .password_dir
            .join(format!("{username}.password.used"))
    }

    fn trigger_path(&self, username: &str) -> PathBuf {
        self.config.regen_request_dir.join(username)
    }

    /// Usernames are file names in two shared directories; nothing else is
    /// allowed through.
    fn check_username(username: &str) -> Result<()> {
        let ok = !username.is_empty()
            && username
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !ok {
            return Err(NodeError::ValidationFailed {
                field: "username".to_string(),
                message: format!("invalid socks5 username '{username}'"),
            });
        }
        Ok(())
    }

    pub fn is_initialised(&self) -> bool {
        self.initialised.load(Ordering::Acquire)
    }

    /// TCP reachability probe against the public endpoint.
    pub async fn server_ready(&self, max_wait: Duration) -> Result<bool> {
        let endpoint = format!("{}:{}", self.public_host, self.config.port);
        let deadline = tokio::time::Instant::now() + max_wait;

        loop {
            let attempt =
                tokio::time::timeout(Duration::from_secs(2), TcpStream::connect(&endpoint)).await;
            if matches!(attempt, Ok(Ok(_))) {
                return Ok(true);
            }

            if tokio::time::Instant::now() >= deadline {
                tracing::warn!(endpoint, ?max_wait, "dante not reachable within budget");
                return Ok(false);
            }

            tokio::time::sleep(READY_POLL).await;
        }
    }

    /// Mirror the on-disk credential files into the credential table.
    /// Idempotent: the table becomes a function of the file set alone.
    pub async fn load_from_disk(&self) -> Result<usize> {
        let mut incoming = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.config.password_dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let Some(username) = name.strip_suffix(".password") else {
                continue;
            };

            let password = tokio::fs::read_to_string(entry.path()).await?;
            let used = tokio::fs::try_exists(self.used_path(username))
                .await
                .unwrap_or(false);

            incoming.push(SocksWrite {
                ip_address: self.public_host.clone(),
                port: i32::from(self.config.port),
                username: username.to_string(),
                password: password.trim().to_string(),
                available: !used,
            });
        }

        // Directory iteration order is arbitrary; row ids define the
        // priority pool, so make them deterministic.
        incoming.sort_by(|a, b| a.username.cmp(&b.username));

        let count = incoming.len();
        socks::Model::write_socks(&self.db, incoming).await?;
        self.initialised.store(true, Ordering::Release);

        tracing::info!(count, "loaded socks5 credentials from disk");
        Ok(count)
    }

    /// Ask the daemon to rotate one user's password: drop a trigger file,
    /// wait for the daemon to consume it, read the rewritten password file.
    pub async fn regenerate(&self, username: &str) -> Result<String> {
        Self::check_username(username)?;

        let trigger = self.trigger_path(username);
        tokio::fs::write(&trigger, b"").await?;

        let deadline = tokio::time::Instant::now() + self.regen_timeout;
        loop {
            tokio::time::sleep(REGEN_POLL).await;

            let still_there = tokio::fs::try_exists(&trigger).await.unwrap_or(true);
            if !still_there {
                break;
            }

            if tokio::time::Instant::now() >= deadline {
                // The daemon never consumed it; leave no stale request behind.
                let _ = tokio::fs::remove_file(&trigger).await;
                metrics::counter!("dante_regen_total", "outcome" => "timeout").increment(1);
                return Err(NodeError::DanteRegenTimeout {
                    username: username.to_string(),
                });
            }
        }

        let password = tokio::fs::read_to_string(self.password_path(username)).await?;
        self.clear_used(username).await?;

        metrics::counter!("dante_regen_total", "outcome" => "success").increment(1);
        Ok(password.trim().to_string())
    }

    /// Write the `.used` marker for an exclusive lease. Contents are the
    /// expiry in decimal epoch milliseconds.
    pub async fn mark_used(&self, username: &str, expires_at_ms: i64) -> Result<()> {
        Self::check_username(username)?;
        tokio::fs::write(self.used_path(username), expires_at_ms.to_string()).await?;
        Ok(())
    }

    pub async fn clear_used(&self, username: &str) -> Result<()> {
        Self::check_username(username)?;
        match tokio::fs::remove_file(self.used_path(username)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Restart the container; the next caller reloads credentials from disk.
    pub async fn restart(&self) -> Result<()> {
        self.runtime.restart(&self.config.container_name).await?;
        self.initialised.store(false, Ordering::Release);
        Ok(())
    }
}

impl std::fmt::Debug for DanteDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DanteDriver")
            .field("container", &self.config.container_name)
            .field("password_dir", &self.config.password_dir)
            .field("initialised", &self.is_initialised())
            .finish()
    }
}
