mod config;

pub use config::{parse_wireguard_config, InterfaceSection, PeerSection, WireGuardConfigFile};
