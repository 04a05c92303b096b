use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::container::ContainerRuntime;
use crate::error::{NodeError, Result};

type RestartHook = Box<dyn Fn(&str) + Send + Sync>;

/// Container engine double. Understands the `wg` command shapes the drivers
/// issue, records every call, and can be scripted to fail on a substring.
pub struct MockRuntime {
    calls: Mutex<Vec<String>>,
    fail_when: Mutex<Vec<String>>,
    key_counter: AtomicU64,
    on_restart: Mutex<Option<RestartHook>>,
}

impl Default for MockRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl MockRuntime {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            fail_when: Mutex::new(Vec::new()),
            key_counter: AtomicU64::new(0),
            on_restart: Mutex::new(None),
        }
    }

    /// Every subsequent command whose rendering contains `needle` fails.
    pub fn fail_on(&self, needle: &str) {
        self.fail_when.lock().unwrap().push(needle.to_string());
    }

    pub fn clear_failures(&self) {
        self.fail_when.lock().unwrap().clear();
    }

    /// Run `hook` on every restart; tests use this to simulate the daemon
    /// regenerating state.
    pub fn set_restart_hook(&self, hook: impl Fn(&str) + Send + Sync + 'static) {
        *self.on_restart.lock().unwrap() = Some(Box::new(hook));
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn restart_count(&self, container: &str) -> usize {
        let needle = format!("restart {container}");
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|call| call.contains(&needle))
            .count()
    }

    fn record(&self, rendered: &str) -> Result<()> {
        self.calls.lock().unwrap().push(rendered.to_string());

        for needle in self.fail_when.lock().unwrap().iter() {
            if rendered.contains(needle.as_str()) {
                return Err(NodeError::Container {
                    container: "mock".to_string(),
                    message: format!("scripted failure on '{needle}'"),
                });
            }
        }

        Ok(())
    }

    fn next_key(&self, prefix: &str) -> String {
        let n = self.key_counter.fetch_add(1, Ordering::SeqCst);
        format!("{prefix}{n:04}=")
    }
}

#[async_trait]
impl ContainerRuntime for MockRuntime {
    async fn exec(&self, container: &str, command: &[&str]) -> Result<String> {
        let rendered = format!("exec {container} {}", command.join(" "));
        self.record(&rendered)?;

        if rendered.contains("wg genkey") {
            return Ok(self.next_key("mock-private-"));
        }
        if rendered.contains("wg genpsk") {
            return Ok(self.next_key("mock-psk-"));
        }
        if rendered.contains("wg pubkey") {
            // Derive a stable public key from the piped private key.
            let private = rendered
                .split('\'')
                .nth(1)
                .unwrap_or("unknown")
                .to_string();
            return Ok(format!("pub({private})"));
        }

        Ok(String::new())
    }

    async fn restart(&self, container: &str) -> Result<()> {
        self.record(&format!("restart {container}"))?;

        if let Some(hook) = self.on_restart.lock().unwrap().as_ref() {
            hook(container);
        }
        Ok(())
    }
}

impl std::fmt::Debug for MockRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockRuntime")
            .field("calls", &self.calls.lock().unwrap().len())
            .finish()
    }
}
