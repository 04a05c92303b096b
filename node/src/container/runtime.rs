use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use crate::error::{NodeError, Result};

/// Seam between the drivers and the container engine. Tests substitute a
/// scripted mock; production uses `docker`.
#[async_trait]
pub trait ContainerRuntime: Send + Sync + std::fmt::Debug {
    /// Run a command inside the named container and return its stdout.
    async fn exec(&self, container: &str, command: &[&str]) -> Result<String>;

    /// Restart the named container.
    async fn restart(&self, container: &str) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct DockerRuntime {
    pub binary: String,
    pub exec_timeout: Duration,
    pub restart_timeout: Duration,
}

impl Default for DockerRuntime {
    fn default() -> Self {
        Self {
            binary: "docker".to_string(),
            exec_timeout: Duration::from_secs(30),
            restart_timeout: Duration::from_secs(120),
        }
    }
}

impl DockerRuntime {
    async fn run(
        &self,
        args: &[&str],
        container: &str,
        timeout: Duration,
    ) -> Result<String> {
        let rendered = format!("{} {}", self.binary, args.join(" "));

        let child = Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let output = tokio::time::timeout(timeout, child.wait_with_output())
            .await
            .map_err(|_| NodeError::CommandTimeout {
                command: rendered.clone(),
                timeout,
            })??;

        if !output.status.success() {
            return Err(NodeError::Container {
                container: container.to_string(),
                message: format!(
                    "'{rendered}' exited with {}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn exec(&self, container: &str, command: &[&str]) -> Result<String> {
        let mut args = vec!["exec", container];
        args.extend_from_slice(command);

        self.run(&args, container, self.exec_timeout).await
    }

    async fn restart(&self, container: &str) -> Result<()> {
        self.run(&["restart", container], container, self.restart_timeout)
            .await?;
        tracing::info!(container, "container restarted");
        Ok(())
    }
}
