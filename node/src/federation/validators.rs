use std::net::{IpAddr, Ipv4Addr};
use std::sync::RwLock;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::utils::net::canonical_ip;

/// Hard-coded bootstrap validators, used until the upstream neuron pushes a
/// list and as patch material for `0.0.0.0` entries. Null-uid entries are
/// testnet: excluded from `validator_count` but honoured by `is_validator`.
const FALLBACK_VALIDATOR_IPS: &[&str] = &["34.130.136.222", "185.234.52.87"];

/// One neuron as published by the upstream chain follower.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NeuronInfo {
    pub uid: i32,
    pub ip: String,
    #[serde(default)]
    pub validator_trust: f64,
    #[serde(default)]
    pub alpha_stake: f64,
    #[serde(default)]
    pub stake_weight: f64,
    #[serde(default)]
    pub block: i64,
    #[serde(default)]
    pub hotkey: String,
    #[serde(default)]
    pub coldkey: String,
    #[serde(default)]
    pub excluded: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ValidatorDescriptor {
    pub uid: Option<i32>,
    pub ip: Ipv4Addr,
}

/// Last-known validator set plus the miner uid → ip mapping, both refreshed
/// by the neuron broadcast. Request-source checks always use the canonical
/// remote address; forwarded headers never participate.
#[derive(Debug)]
pub struct ValidatorRegistry {
    entries: RwLock<Vec<ValidatorDescriptor>>,
    miner_ips: DashMap<i32, Ipv4Addr>,
}

impl Default for ValidatorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ValidatorRegistry {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Self::fallback_entries()),
            miner_ips: DashMap::new(),
        }
    }

    fn fallback_entries() -> Vec<ValidatorDescriptor> {
        FALLBACK_VALIDATOR_IPS
            .iter()
            .filter_map(|ip| ip.parse().ok())
            .map(|ip| ValidatorDescriptor { uid: None, ip })
            .collect()
    }

    /// Ingest a neuron broadcast. Validators are neurons with positive
    /// validator trust; `0.0.0.0` addresses are patched from the fallback
    /// list. Every addressable neuron refreshes the miner ip map.
    pub fn apply_neuron_broadcast(&self, neurons: &[NeuronInfo]) {
        self.miner_ips.clear();
        for neuron in neurons {
            if let Ok(ip) = neuron.ip.parse::<Ipv4Addr>() {
                if !ip.is_unspecified() {
                    self.miner_ips.insert(neuron.uid, ip);
                }
            }
        }

        let fallback = Self::fallback_entries();
        let mut fallback_cycle = fallback.iter().cycle();

        let mut next: Vec<ValidatorDescriptor> = Vec::new();
        for neuron in neurons {
            if neuron.excluded || neuron.validator_trust <= 0.0 {
                continue;
            }
            let Ok(ip) = neuron.ip.parse::<Ipv4Addr>() else {
                continue;
            };

            let ip = if ip.is_unspecified() {
                match fallback_cycle.next() {
                    Some(descriptor) => descriptor.ip,
                    None => continue,
                }
            } else {
                ip
            };

            next.push(ValidatorDescriptor {
                uid: Some(neuron.uid),
                ip,
            });
        }

        // Testnet fallbacks stay recognisable unless a mainnet validator
        // already claimed the address.
        for descriptor in fallback {
            if !next.iter().any(|entry| entry.ip == descriptor.ip) {
                next.push(descriptor);
            }
        }

        let count = next.len();
        *self.entries.write().expect("validator registry poisoned") = next;
        tracing::info!(count, "validator registry refreshed from neuron broadcast");
    }

    pub fn validator_ips(&self) -> Vec<Ipv4Addr> {
        self.entries
            .read()
            .expect("validator registry poisoned")
            .iter()
            .map(|entry| entry.ip)
            .collect()
    }

    /// Mainnet validators only.
    pub fn validator_count(&self) -> usize {
        self.entries
            .read()
            .expect("validator registry poisoned")
            .iter()
            .filter(|entry| entry.uid.is_some())
            .count()
    }

    /// Match the unspoofable remote address against the known validator set.
    pub fn is_validator(&self, remote: IpAddr) -> Option<ValidatorDescriptor> {
        let IpAddr::V4(remote) = canonical_ip(remote) else {
            return None;
        };

        self.entries
            .read()
            .expect("validator registry poisoned")
            .iter()
            .find(|entry| entry.ip == remote)
            .copied()
    }

    pub fn miner_ip(&self, uid: i32) -> Option<Ipv4Addr> {
        self.miner_ips.get(&uid).map(|entry| *entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn neuron(uid: i32, ip: &str, trust: f64) -> NeuronInfo {
        NeuronInfo {
            uid,
            ip: ip.to_string(),
            validator_trust: trust,
            alpha_stake: 0.0,
            stake_weight: 0.0,
            block: 0,
            hotkey: format!("hotkey-{uid}"),
            coldkey: format!("coldkey-{uid}"),
            excluded: false,
        }
    }

    #[test]
    fn fallback_validators_recognised_at_boot() {
        let registry = ValidatorRegistry::new();
        let ip: IpAddr = FALLBACK_VALIDATOR_IPS[0].parse().unwrap();

        assert!(registry.is_validator(ip).is_some());
        assert_eq!(registry.validator_count(), 0);
    }

    #[test]
    fn broadcast_replaces_and_counts_mainnet_only() {
        let registry = ValidatorRegistry::new();
        registry.apply_neuron_broadcast(&[
            neuron(1, "203.0.113.10", 0.9),
            neuron(2, "203.0.113.11", 0.0),
            neuron(3, "203.0.113.12", 0.5),
        ]);

        assert_eq!(registry.validator_count(), 2);
        assert!(registry
            .is_validator("203.0.113.10".parse().unwrap())
            .is_some());
        // Non-validator neuron is still a known miner.
        assert!(registry.is_validator("203.0.113.11".parse().unwrap()).is_none());
        assert_eq!(registry.miner_ip(2), Some("203.0.113.11".parse().unwrap()));
    }

    #[test]
    fn v4_mapped_v6_matches() {
        let registry = ValidatorRegistry::new();
        registry.apply_neuron_broadcast(&[neuron(7, "203.0.113.20", 1.0)]);

        let mapped: IpAddr = "::ffff:203.0.113.20".parse().unwrap();
        assert!(registry.is_validator(mapped).is_some());
    }

    #[test]
    fn unspecified_ip_patched_from_fallback() {
        let registry = ValidatorRegistry::new();
        registry.apply_neuron_broadcast(&[neuron(9, "0.0.0.0", 1.0)]);

        let patched: IpAddr = FALLBACK_VALIDATOR_IPS[0].parse().unwrap();
        let descriptor = registry.is_validator(patched).unwrap();
        assert_eq!(descriptor.uid, Some(9));
    }

    #[test]
    fn excluded_neurons_are_ignored() {
        let registry = ValidatorRegistry::new();
        let mut burn = neuron(0, "203.0.113.30", 1.0);
        burn.excluded = true;
        registry.apply_neuron_broadcast(&[burn]);

        assert!(registry.is_validator("203.0.113.30".parse().unwrap()).is_none());
    }
}
