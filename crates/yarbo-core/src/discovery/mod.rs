// ── Discovery probe ──
//
// Finds on-board brokers on the local network. Candidates come from the
// configured seed hosts plus either explicit CIDR ranges or the locally
// attached networks. Each candidate gets a TCP probe and, if it answers,
// a passive MQTT sniff for the serial. Per-host failures are logged and
// skipped; a discovery run itself never fails.

pub mod neighbor;
pub mod probe;
pub mod role;
pub mod subnet;

use std::collections::HashSet;
use std::net::{Ipv4Addr, SocketAddr};

use futures_util::StreamExt;
use serde::Serialize;
use tracing::{debug, info, warn};
use yarbo_api::Endpoint;

use crate::config::DiscoveryConfig;

pub use role::{Role, classify, connection_order};
pub use subnet::{Ipv4Network, LocalInterface};

// ── DiscoveredDevice ─────────────────────────────────────────────────

/// A broker that answered, with whatever could be learned about it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiscoveredDevice {
    /// Carries the serial when the sniff caught a device message.
    pub endpoint: Endpoint,
    pub mac: Option<String>,
    pub hostname: Option<String>,
    /// Set only when a robot/base-station pair could be told apart.
    pub role: Option<Role>,
}

impl DiscoveredDevice {
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            mac: None,
            hostname: None,
            role: None,
        }
    }
}

// ── Discovery ────────────────────────────────────────────────────────

/// Local-network broker discovery.
///
/// Dropping a running [`discover()`](Self::discover) future cancels every
/// in-flight probe and closes its sockets.
#[derive(Debug, Clone, Default)]
pub struct Discovery {
    config: DiscoveryConfig,
}

impl Discovery {
    pub fn new(config: DiscoveryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DiscoveryConfig {
        &self.config
    }

    /// Probe every candidate, enrich the hits with MAC and hostname, and
    /// classify robot/base-station pairs.
    pub async fn discover(&self) -> Vec<DiscoveredDevice> {
        let endpoints = self.discover_endpoints().await;
        if endpoints.is_empty() {
            return Vec::new();
        }

        let macs = neighbor::read_arp_table(&self.config.neighbor_table).await;
        let names = neighbor::read_hosts_file(&self.config.hosts_file).await;

        let mut devices: Vec<DiscoveredDevice> = endpoints
            .into_iter()
            .map(|endpoint| {
                let ip = endpoint.host.parse::<Ipv4Addr>().ok();
                DiscoveredDevice {
                    mac: ip.and_then(|ip| macs.get(&ip).cloned()),
                    hostname: ip.and_then(|ip| names.get(&ip).cloned()),
                    role: None,
                    endpoint,
                }
            })
            .collect();

        classify(&mut devices, &self.config.secondary_hostname_hints);
        devices
    }

    /// Probe every candidate and return the brokers that answered, in
    /// candidate order, unclassified.
    pub async fn discover_endpoints(&self) -> Vec<Endpoint> {
        let candidates = self.candidates().await;
        if candidates.is_empty() {
            info!("no discovery candidates");
            return Vec::new();
        }
        debug!(count = candidates.len(), "probing candidates");

        let found: Vec<Endpoint> = futures_util::stream::iter(candidates)
            .map(|endpoint| self.probe(endpoint))
            .buffered(self.config.max_concurrency.max(1))
            .filter_map(std::future::ready)
            .collect()
            .await;

        info!(
            found = found.len(),
            brokers = ?found.iter().map(Endpoint::address).collect::<Vec<_>>(),
            "discovery finished"
        );
        found
    }

    /// Seeds first, then scan targets, de-duplicated in that order.
    pub async fn candidates(&self) -> Vec<Endpoint> {
        let config = &self.config;
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        let mut push = |endpoint: Endpoint| {
            if seen.insert((endpoint.host.clone(), endpoint.port)) {
                out.push(endpoint);
            }
        };

        for seed in &config.seed_hosts {
            if let Some(endpoint) = parse_candidate(seed, config.port) {
                push(endpoint);
            } else {
                warn!(seed = %seed, "ignoring unparsable seed host");
            }
        }

        let explicit: Vec<Ipv4Network> = config
            .subnets
            .iter()
            .filter_map(|s| match s.parse::<Ipv4Network>() {
                Ok(net) => Some(net),
                Err(e) => {
                    warn!(subnet = %s, error = %e, "ignoring invalid subnet");
                    None
                }
            })
            .collect();

        let scan_local = explicit.is_empty() && config.scan_local_subnets;
        if explicit.is_empty() && !scan_local {
            return out;
        }

        let interfaces = subnet::local_interfaces().await;
        let own: Vec<Ipv4Addr> = interfaces.iter().map(|i| i.addr).collect();
        let networks = if scan_local {
            let nets = subnet::attached_networks(&interfaces, config);
            if nets.is_empty() {
                info!("no scannable local networks");
            }
            nets
        } else {
            explicit
        };

        for network in &networks {
            let hosts = subnet::scan_hosts(network, &own, config.max_hosts_per_network);
            debug!(network = %network, hosts = hosts.len(), "scanning network");
            for ip in hosts {
                push(Endpoint::new(ip.to_string(), config.port));
            }
        }
        out
    }

    async fn probe(&self, endpoint: Endpoint) -> Option<Endpoint> {
        if let Err(e) = probe::tcp_reachable(&endpoint, self.config.connect_timeout).await {
            debug!(endpoint = %endpoint, error = %e, "probe failed");
            return None;
        }
        debug!(endpoint = %endpoint, "port open, sniffing for serial");

        match probe::sniff_serial(&endpoint, &self.config.namespace, self.config.sniff_timeout).await
        {
            Some(serial) => Some(endpoint.with_serial(serial)),
            None => Some(endpoint),
        }
    }
}

/// `host` or `host:port`.
fn parse_candidate(raw: &str, default_port: u16) -> Option<Endpoint> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(addr) = raw.parse::<SocketAddr>() {
        return Some(Endpoint::from(addr));
    }
    match raw.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() && !host.contains(':') => {
            Some(Endpoint::new(host, port.parse().ok()?))
        }
        Some(_) => None,
        None => Some(Endpoint::new(raw, default_port)),
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn candidate_parsing() {
        assert_eq!(parse_candidate("192.168.1.24", 1883), Some(Endpoint::new("192.168.1.24", 1883)));
        assert_eq!(parse_candidate("10.0.0.2:1884", 1883), Some(Endpoint::new("10.0.0.2", 1884)));
        assert_eq!(parse_candidate("yarbo.local", 1883), Some(Endpoint::new("yarbo.local", 1883)));
        assert_eq!(parse_candidate("host:notaport", 1883), None);
        assert_eq!(parse_candidate("  ", 1883), None);
    }

    #[tokio::test]
    async fn targeted_candidates_skip_scan_and_dedupe() {
        let discovery = Discovery::new(DiscoveryConfig::targeted([
            "192.168.1.24",
            "192.168.1.24:1883",
            "192.168.1.55",
        ]));
        let hosts: Vec<String> = discovery
            .candidates()
            .await
            .into_iter()
            .map(|e| e.address())
            .collect();
        assert_eq!(hosts, vec!["192.168.1.24:1883", "192.168.1.55:1883"]);
    }

    #[tokio::test]
    async fn explicit_subnet_is_capped() {
        let config = DiscoveryConfig {
            seed_hosts: Vec::new(),
            subnets: vec!["10.9.8.0/24".into(), "bogus".into()],
            max_hosts_per_network: 4,
            ..DiscoveryConfig::default()
        };
        let candidates = Discovery::new(config).candidates().await;
        assert_eq!(candidates.len(), 4);
        assert!(candidates.iter().all(|e| e.host.starts_with("10.9.8.")));
    }

    #[tokio::test]
    async fn nothing_to_probe_is_empty_not_error() {
        let discovery = Discovery::new(DiscoveryConfig::targeted(Vec::<String>::new()));
        assert!(discovery.discover().await.is_empty());
    }
}
