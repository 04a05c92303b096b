use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::{NodeError, Result};
use crate::probes::TunnelProber;

/// Prober double: scripted egress addresses per path.
#[derive(Debug)]
pub struct MockProber {
    direct: Mutex<String>,
    wireguard: Mutex<Option<String>>,
    socks5: Mutex<Option<String>>,
}

impl Default for MockProber {
    fn default() -> Self {
        Self::new("203.0.113.1")
    }
}

impl MockProber {
    pub fn new(direct: &str) -> Self {
        Self {
            direct: Mutex::new(direct.to_string()),
            wireguard: Mutex::new(None),
            socks5: Mutex::new(None),
        }
    }

    /// Scripted egress through the WireGuard tunnel; `None` makes the probe
    /// fail.
    pub fn set_wireguard_egress(&self, ip: Option<&str>) {
        *self.wireguard.lock().unwrap() = ip.map(str::to_owned);
    }

    pub fn set_socks5_egress(&self, ip: Option<&str>) {
        *self.socks5.lock().unwrap() = ip.map(str::to_owned);
    }
}

#[async_trait]
impl TunnelProber for MockProber {
    async fn direct_egress_ip(&self) -> Result<String> {
        Ok(self.direct.lock().unwrap().clone())
    }

    async fn wireguard_egress_ip(&self, _config_text: &str) -> Result<String> {
        self.wireguard
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| NodeError::internal("scripted wireguard probe failure"))
    }

    async fn socks5_egress_ip(&self, _socks_url: &str) -> Result<String> {
        self.socks5
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| NodeError::internal("scripted socks5 probe failure"))
    }
}
