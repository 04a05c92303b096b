use crate::error::{NodeError, Result};

/// Parsed `wg-quick` style configuration. Key order inside a section is not
/// significant; serialization emits known keys in a fixed order followed by
/// any unrecognised keys in their original order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WireGuardConfigFile {
    pub interface: InterfaceSection,
    pub peers: Vec<PeerSection>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InterfaceSection {
    pub address: Option<String>,
    pub private_key: Option<String>,
    pub listen_port: Option<u16>,
    pub dns: Option<String>,
    /// Keys we carry but do not interpret (MTU, PostUp, ...)
    pub extras: Vec<(String, String)>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeerSection {
    pub public_key: Option<String>,
    pub preshared_key: Option<String>,
    pub allowed_ips: Option<String>,
    pub endpoint: Option<String>,
    pub persistent_keepalive: Option<u32>,
    pub extras: Vec<(String, String)>,
}

enum Section {
    Interface,
    Peer(usize),
}

pub fn parse_wireguard_config(text: &str) -> Result<WireGuardConfigFile> {
    let mut config = WireGuardConfigFile::default();
    let mut section: Option<Section> = None;
    let mut saw_interface = false;

    for (line_no, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }

        if line.starts_with('[') {
            let name = line.trim_start_matches('[').trim_end_matches(']').trim();
            section = match name.to_lowercase().as_str() {
                "interface" => {
                    saw_interface = true;
                    Some(Section::Interface)
                }
                "peer" => {
                    config.peers.push(PeerSection::default());
                    Some(Section::Peer(config.peers.len() - 1))
                }
                other => {
                    return Err(NodeError::WireGuardParse {
                        message: format!("unknown section '[{other}]' on line {}", line_no + 1),
                    })
                }
            };
            continue;
        }

        let Some((key, value)) = line.split_once('=') else {
            return Err(NodeError::WireGuardParse {
                message: format!("expected 'Key = Value' on line {}", line_no + 1),
            });
        };
        let key = key.trim();
        let value = value.trim().to_string();

        match &section {
            None => {
                return Err(NodeError::WireGuardParse {
                    message: format!("key '{key}' before any section on line {}", line_no + 1),
                })
            }
            Some(Section::Interface) => match key.to_lowercase().as_str() {
                "address" => config.interface.address = Some(value),
                "privatekey" => config.interface.private_key = Some(value),
                "listenport" => {
                    config.interface.listen_port =
                        Some(value.parse().map_err(|_| NodeError::WireGuardParse {
                            message: format!("invalid ListenPort '{value}'"),
                        })?)
                }
                "dns" => config.interface.dns = Some(value),
                _ => config.interface.extras.push((key.to_string(), value)),
            },
            Some(Section::Peer(index)) => {
                let peer = &mut config.peers[*index];
                match key.to_lowercase().as_str() {
                    "publickey" => peer.public_key = Some(value),
                    "presharedkey" => peer.preshared_key = Some(value),
                    "allowedips" => peer.allowed_ips = Some(value),
                    "endpoint" => peer.endpoint = Some(value),
                    "persistentkeepalive" => {
                        peer.persistent_keepalive =
                            Some(value.parse().map_err(|_| NodeError::WireGuardParse {
                                message: format!("invalid PersistentKeepalive '{value}'"),
                            })?)
                    }
                    _ => peer.extras.push((key.to_string(), value)),
                }
            }
        }
    }

    if !saw_interface {
        return Err(NodeError::WireGuardParse {
            message: "missing [Interface] section".to_string(),
        });
    }

    Ok(config)
}

impl WireGuardConfigFile {
    pub fn parse(text: &str) -> Result<Self> {
        parse_wireguard_config(text)
    }

    pub fn serialize(&self) -> String {
        let mut out = String::new();
        out.push_str("[Interface]\n");
        if let Some(address) = &self.interface.address {
            out.push_str(&format!("Address = {address}\n"));
        }
        if let Some(key) = &self.interface.private_key {
            out.push_str(&format!("PrivateKey = {key}\n"));
        }
        if let Some(port) = self.interface.listen_port {
            out.push_str(&format!("ListenPort = {port}\n"));
        }
        if let Some(dns) = &self.interface.dns {
            out.push_str(&format!("DNS = {dns}\n"));
        }
        for (key, value) in &self.interface.extras {
            out.push_str(&format!("{key} = {value}\n"));
        }

        for peer in &self.peers {
            out.push_str("\n[Peer]\n");
            if let Some(key) = &peer.public_key {
                out.push_str(&format!("PublicKey = {key}\n"));
            }
            if let Some(key) = &peer.preshared_key {
                out.push_str(&format!("PresharedKey = {key}\n"));
            }
            if let Some(ips) = &peer.allowed_ips {
                out.push_str(&format!("AllowedIPs = {ips}\n"));
            }
            if let Some(endpoint) = &peer.endpoint {
                out.push_str(&format!("Endpoint = {endpoint}\n"));
            }
            if let Some(keepalive) = peer.persistent_keepalive {
                out.push_str(&format!("PersistentKeepalive = {keepalive}\n"));
            }
            for (key, value) in &peer.extras {
                out.push_str(&format!("{key} = {value}\n"));
            }
        }

        out
    }

    /// The interface address without its prefix length, e.g. `10.13.13.5`.
    pub fn client_ip(&self) -> Option<String> {
        let address = self.interface.address.as_ref()?;
        let first = address.split(',').next()?.trim();
        Some(first.split('/').next()?.trim().to_string())
    }

    /// Index of the peer whose AllowedIPs contains `<ip>/32`.
    pub fn peer_for_allowed_ip(&self, ip: &str) -> Option<usize> {
        let needle = format!("{ip}/32");
        self.peers.iter().position(|peer| {
            peer.allowed_ips
                .as_deref()
                .map(|ips| ips.split(',').any(|entry| entry.trim() == needle))
                .unwrap_or(false)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CLIENT_CONF: &str = r#"
        [Interface]
        Address = 10.13.13.5/32
        PrivateKey = cPrivKeyAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA=
        DNS = 10.13.13.1
        MTU = 1420

        [Peer]
        PublicKey = sPubKeyBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBB=
        PresharedKey = pskCCCCCCCCCCCCCCCCCCCCCCCCCCCCCCCCCCCCCCCC=
        AllowedIPs = 0.0.0.0/0
        Endpoint = 203.0.113.9:51820
        PersistentKeepalive = 25
    "#;

    #[test]
    fn parse_then_serialize_round_trips() {
        let parsed = parse_wireguard_config(CLIENT_CONF).unwrap();
        let reparsed = parse_wireguard_config(&parsed.serialize()).unwrap();
        assert_eq!(parsed, reparsed);
    }

    #[test]
    fn whitespace_variance_is_ignored() {
        let tight = "[Interface]\nAddress=10.0.0.2/32\nPrivateKey=k=\n[Peer]\nPublicKey=p=\nAllowedIPs=0.0.0.0/0\n";
        let loose = "[Interface]\n  Address  =  10.0.0.2/32\n\n  PrivateKey = k=\n\n[Peer]\n PublicKey = p=\n AllowedIPs = 0.0.0.0/0\n";
        assert_eq!(
            parse_wireguard_config(tight).unwrap(),
            parse_wireguard_config(loose).unwrap()
        );
    }

    #[test]
    fn unknown_keys_survive_round_trip() {
        let parsed = parse_wireguard_config(CLIENT_CONF).unwrap();
        assert!(parsed
            .interface
            .extras
            .iter()
            .any(|(k, v)| k == "MTU" && v == "1420"));
        let reparsed = parse_wireguard_config(&parsed.serialize()).unwrap();
        assert_eq!(parsed.interface.extras, reparsed.interface.extras);
    }

    #[test]
    fn missing_interface_section_fails() {
        let result = parse_wireguard_config("[Peer]\nPublicKey = p=\n");
        assert!(result.is_err());
    }

    #[test]
    fn garbage_fails() {
        assert!(parse_wireguard_config("not a config at all").is_err());
    }

    #[test]
    fn client_ip_strips_prefix() {
        let parsed = parse_wireguard_config(CLIENT_CONF).unwrap();
        assert_eq!(parsed.client_ip().as_deref(), Some("10.13.13.5"));
    }

    #[test]
    fn finds_peer_by_allowed_ip() {
        let server = "\
[Interface]
Address = 10.13.13.1/24
PrivateKey = srv=
ListenPort = 51820

[Peer]
PublicKey = peer1=
PresharedKey = psk1=
AllowedIPs = 10.13.13.2/32

[Peer]
PublicKey = peer2=
PresharedKey = psk2=
AllowedIPs = 10.13.13.3/32
";
        let parsed = parse_wireguard_config(server).unwrap();
        assert_eq!(parsed.peer_for_allowed_ip("10.13.13.3"), Some(1));
        assert_eq!(parsed.peer_for_allowed_ip("10.13.13.9"), None);
    }
}
