// ── Local network enumeration ──
//
// Figures out which IPv4 networks this machine sits on and which hosts
// in them are worth probing. Linux answers via `ip -4 -o addr show`
// (prefix-aware); elsewhere, or when `ip` is missing, `local-ip-address`
// lists addresses and each is assumed to be a /24.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;

use thiserror::Error;
use tracing::debug;

use crate::config::DiscoveryConfig;

// ── Ipv4Network ──────────────────────────────────────────────────────

/// An IPv4 network in CIDR notation, normalized to its network address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ipv4Network {
    addr: Ipv4Addr,
    prefix_len: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NetworkParseError {
    #[error("invalid IPv4 address")]
    InvalidAddress,
    #[error("prefix length must be 0-32")]
    InvalidPrefix,
}

impl Ipv4Network {
    pub fn new(addr: Ipv4Addr, prefix_len: u8) -> Result<Self, NetworkParseError> {
        if prefix_len > 32 {
            return Err(NetworkParseError::InvalidPrefix);
        }
        let mask = mask_for(prefix_len);
        Ok(Self {
            addr: Ipv4Addr::from(u32::from(addr) & mask),
            prefix_len,
        })
    }

    pub fn network(&self) -> Ipv4Addr {
        self.addr
    }

    pub fn prefix_len(&self) -> u8 {
        self.prefix_len
    }

    pub fn broadcast(&self) -> Ipv4Addr {
        Ipv4Addr::from(u32::from(self.addr) | !mask_for(self.prefix_len))
    }

    pub fn contains(&self, ip: Ipv4Addr) -> bool {
        let mask = mask_for(self.prefix_len);
        u32::from(ip) & mask == u32::from(self.addr)
    }

    /// Number of usable host addresses.
    pub fn host_count(&self) -> u64 {
        match self.prefix_len {
            32 => 1,
            31 => 2,
            p => (1_u64 << (32 - u32::from(p))) - 2,
        }
    }

    /// Usable hosts in ascending order. Network and broadcast addresses
    /// are skipped except for /31 and /32, which have none.
    pub fn hosts(&self) -> impl Iterator<Item = Ipv4Addr> {
        let first = u32::from(self.addr);
        let last = u32::from(self.broadcast());
        let (start, end) = if self.prefix_len >= 31 {
            (first, last)
        } else {
            (first + 1, last - 1)
        };
        (start..=end).map(Ipv4Addr::from)
    }
}

fn mask_for(prefix_len: u8) -> u32 {
    if prefix_len == 0 {
        0
    } else {
        u32::MAX << (32 - u32::from(prefix_len))
    }
}

impl FromStr for Ipv4Network {
    type Err = NetworkParseError;

    /// `a.b.c.d/len`, or a bare address meaning /32.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (addr, prefix) = match s.trim().split_once('/') {
            Some((addr, prefix)) => (
                addr,
                prefix
                    .parse::<u8>()
                    .map_err(|_| NetworkParseError::InvalidPrefix)?,
            ),
            None => (s.trim(), 32),
        };
        let addr = addr
            .parse::<Ipv4Addr>()
            .map_err(|_| NetworkParseError::InvalidAddress)?;
        Self::new(addr, prefix)
    }
}

impl fmt::Display for Ipv4Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.addr, self.prefix_len)
    }
}

// ── Interfaces ───────────────────────────────────────────────────────

/// One IPv4 address bound to a local interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalInterface {
    pub name: String,
    pub addr: Ipv4Addr,
    pub network: Ipv4Network,
}

impl LocalInterface {
    /// Loopback and link-local (169.254/16) never host a robot.
    pub fn is_scannable(&self) -> bool {
        !self.addr.is_loopback() && !self.addr.is_link_local() && !self.addr.is_unspecified()
    }
}

/// Parse `ip -4 -o addr show` output.
///
/// ```text
/// 2: wlan0    inet 192.168.1.37/24 brd 192.168.1.255 scope global dynamic wlan0\       valid_lft ...
/// ```
pub fn parse_ip_addr_output(output: &str) -> Vec<LocalInterface> {
    output
        .lines()
        .filter_map(|line| {
            let mut tokens = line.split_whitespace();
            let name = tokens.nth(1)?.trim_end_matches(':').to_owned();
            tokens.find(|&t| t == "inet")?;
            let cidr = tokens.next()?;
            let (addr, _) = cidr.split_once('/')?;
            let addr = addr.parse::<Ipv4Addr>().ok()?;
            let network = cidr.parse::<Ipv4Network>().ok()?;
            Some(LocalInterface {
                name,
                addr,
                network,
            })
        })
        .collect()
}

/// Every IPv4 address on this machine. Empty when enumeration fails.
pub async fn local_interfaces() -> Vec<LocalInterface> {
    #[cfg(target_os = "linux")]
    {
        match tokio::process::Command::new("ip")
            .args(["-4", "-o", "addr", "show"])
            .output()
            .await
        {
            Ok(output) if output.status.success() => {
                let parsed = parse_ip_addr_output(&String::from_utf8_lossy(&output.stdout));
                if !parsed.is_empty() {
                    return parsed;
                }
            }
            Ok(output) => debug!(status = %output.status, "'ip addr' failed"),
            Err(e) => debug!(error = %e, "'ip' command not available"),
        }
    }
    interfaces_from_crate()
}

/// Portable fallback. The crate reports no prefix, so assume /24.
fn interfaces_from_crate() -> Vec<LocalInterface> {
    let interfaces = match local_ip_address::list_afinet_netifas() {
        Ok(ifs) => ifs,
        Err(e) => {
            debug!(error = %e, "failed to list network interfaces");
            return Vec::new();
        }
    };

    interfaces
        .into_iter()
        .filter_map(|(name, ip)| match ip {
            IpAddr::V4(addr) => Some(LocalInterface {
                name,
                addr,
                network: Ipv4Network::new(addr, 24).ok()?,
            }),
            IpAddr::V6(_) => None,
        })
        .collect()
}

// ── Scan planning ────────────────────────────────────────────────────

/// Networks to scan from the attached interfaces, after the size filter.
pub fn attached_networks(
    interfaces: &[LocalInterface],
    config: &DiscoveryConfig,
) -> Vec<Ipv4Network> {
    let mut networks: Vec<Ipv4Network> = Vec::new();
    for iface in interfaces.iter().filter(|i| i.is_scannable()) {
        let net = iface.network;
        if net.prefix_len() < config.min_prefix_len && !config.force_large_networks {
            debug!(
                interface = %iface.name,
                network = %net,
                min_prefix = config.min_prefix_len,
                "skipping large network"
            );
            continue;
        }
        if !networks.contains(&net) {
            networks.push(net);
        }
    }
    networks
}

/// Hosts to probe in `network`, excluding this machine's own addresses,
/// capped at `max_hosts`.
pub fn scan_hosts(network: &Ipv4Network, own: &[Ipv4Addr], max_hosts: usize) -> Vec<Ipv4Addr> {
    network
        .hosts()
        .filter(|ip| !own.contains(ip))
        .take(max_hosts)
        .collect()
}
