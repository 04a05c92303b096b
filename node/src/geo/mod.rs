use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::path::Path;

use serde::Serialize;

use tpn_model::entities::workers::ConnectionType;

use crate::config::GeoConfig;
use crate::error::{NodeError, Result};
use crate::services::caching::TtlCache;

/// Resolved geodata for one address.
#[derive(Debug, Clone, Serialize)]
pub struct GeoData {
    pub country_code: Option<String>,
    pub connection_type: ConnectionType,
    pub datacenter: bool,
}

impl Default for GeoData {
    fn default() -> Self {
        Self {
            country_code: None,
            connection_type: ConnectionType::Unknown,
            datacenter: false,
        }
    }
}

#[derive(Debug)]
struct GeoRange {
    start: u32,
    end: u32,
    country_code: String,
    connection_type: ConnectionType,
}

/// IP → geodata resolver over a local range dataset, fronted by a TTL cache.
/// Dataset lines: `start_ip,end_ip,country_code,datacenter|residential`
/// (addresses as dotted quads or u32).
#[derive(Debug)]
pub struct GeoResolver {
    ranges: Vec<GeoRange>,
    cache: TtlCache<Ipv4Addr, GeoData>,
}

fn parse_addr(field: &str) -> Result<u32> {
    let field = field.trim();
    if let Ok(ip) = field.parse::<Ipv4Addr>() {
        return Ok(u32::from(ip));
    }
    field.parse::<u32>().map_err(|_| NodeError::ValidationFailed {
        field: "geo dataset".to_string(),
        message: format!("invalid address '{field}'"),
    })
}

impl GeoResolver {
    pub fn new(config: &GeoConfig) -> Result<Self> {
        let ranges = match &config.dataset_path {
            Some(path) => Self::load_dataset(path)?,
            None => Vec::new(),
        };

        Ok(Self {
            ranges,
            cache: TtlCache::new(config.cache_ttl),
        })
    }

    fn load_dataset(path: &Path) -> Result<Vec<GeoRange>> {
        let content = std::fs::read_to_string(path)?;
        let mut ranges = Vec::new();

        for (line_no, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let fields: Vec<&str> = line.split(',').map(str::trim).collect();
            if fields.len() < 3 {
                return Err(NodeError::ValidationFailed {
                    field: "geo dataset".to_string(),
                    message: format!("line {} has {} fields", line_no + 1, fields.len()),
                });
            }

            let connection_type = match fields.get(3).copied().unwrap_or("") {
                "datacenter" => ConnectionType::Datacenter,
                "residential" => ConnectionType::Residential,
                _ => ConnectionType::Unknown,
            };

            ranges.push(GeoRange {
                start: parse_addr(fields[0])?,
                end: parse_addr(fields[1])?,
                country_code: fields[2].to_uppercase(),
                connection_type,
            });
        }

        ranges.sort_by_key(|range| range.start);
        tracing::info!(ranges = ranges.len(), path = %path.display(), "geo dataset loaded");
        Ok(ranges)
    }

    fn lookup(&self, ip: Ipv4Addr) -> Option<&GeoRange> {
        let needle = u32::from(ip);
        let index = self
            .ranges
            .partition_point(|range| range.start <= needle)
            .checked_sub(1)?;

        let range = &self.ranges[index];
        (needle <= range.end).then_some(range)
    }

    /// Resolve one address. Misses resolve to the unknown default, which is
    /// cached too so repeated unknown lookups stay cheap.
    pub fn ip_geodata(&self, ip: Ipv4Addr) -> GeoData {
        if let Some(hit) = self.cache.get(&ip) {
            return hit;
        }

        let data = match self.lookup(ip) {
            Some(range) => GeoData {
                country_code: Some(range.country_code.clone()),
                connection_type: range.connection_type,
                datacenter: range.connection_type == ConnectionType::Datacenter,
            },
            None => GeoData::default(),
        };

        self.cache.put(ip, data.clone());
        data
    }

    /// Batch-warm the cache and return the resolved map.
    pub fn map_ips_to_geodata(&self, ips: &[Ipv4Addr]) -> HashMap<Ipv4Addr, GeoData> {
        ips.iter().map(|ip| (*ip, self.ip_geodata(*ip))).collect()
    }
}
