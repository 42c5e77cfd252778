// ── Runtime configuration ──
//
// These types describe how to talk to a robot and how to look for one.
// They never touch disk; the CLI (via yarbo-config) builds them and hands
// them in. No process-wide defaults exist outside these `Default` impls.

use std::time::Duration;

use yarbo_api::endpoint::DEFAULT_PORT;
use yarbo_api::topic::{self, DEFAULT_NAMESPACE};
use yarbo_api::{Endpoint, TransportConfig};

/// Addresses the on-board broker has been seen on. DHCP-assigned, so
/// these are only a fast path and never relied upon.
pub const DEFAULT_SEED_HOSTS: &[&str] = &[
    "192.168.1.24",
    "192.168.1.55",
    "192.168.8.8",
    "192.168.1.1",
    "192.168.0.1",
];

// ── SessionConfig ────────────────────────────────────────────────────

/// Protocol-session tuning.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Topic namespace. Default: `snowbot`.
    pub namespace: String,
    /// Bound on the broker CONNACK wait. Default: 10s.
    pub connect_timeout: Duration,
    /// Bound on command acknowledgements and the handshake. Default: 5s.
    pub command_timeout: Duration,
    /// Run the controller handshake as part of `connect()`. Default: true.
    pub auto_controller: bool,
    /// Feedback leaves subscribed on connect.
    pub feedback_leaves: Vec<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.into(),
            connect_timeout: Duration::from_secs(10),
            command_timeout: Duration::from_secs(5),
            auto_controller: true,
            feedback_leaves: topic::FEEDBACK_LEAVES
                .iter()
                .map(|&leaf| leaf.to_owned())
                .collect(),
        }
    }
}

// ── DiscoveryConfig ──────────────────────────────────────────────────

/// Network-probe tuning.
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// Topic namespace sniffed for serials. Default: `snowbot`.
    pub namespace: String,
    /// Broker port probed on every host. Default: 1883.
    pub port: u16,
    /// Hosts tried before any subnet scan.
    pub seed_hosts: Vec<String>,
    /// Explicit CIDR ranges to scan; when empty, attached subnets are used.
    pub subnets: Vec<String>,
    /// Enumerate locally attached IPv4 networks. Default: true.
    pub scan_local_subnets: bool,
    /// Per-host TCP connect bound. Default: 1.5s.
    pub connect_timeout: Duration,
    /// How long the sniff waits for any device message. Default: 3s.
    pub sniff_timeout: Duration,
    /// Simultaneous probes in flight. Default: 50.
    pub max_concurrency: usize,
    /// Networks with a shorter prefix than this are skipped unless forced.
    /// Default: 22 (at most 1022 hosts).
    pub min_prefix_len: u8,
    /// Scan networks below `min_prefix_len` anyway. Default: false.
    pub force_large_networks: bool,
    /// Ceiling on hosts probed per network. Default: 512.
    pub max_hosts_per_network: usize,
    /// Case-insensitive hostname substrings marking the base station.
    pub secondary_hostname_hints: Vec<String>,
    /// Kernel neighbour table used for MAC lookup.
    pub neighbor_table: std::path::PathBuf,
    /// Hosts file used for hostname lookup.
    pub hosts_file: std::path::PathBuf,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.into(),
            port: DEFAULT_PORT,
            seed_hosts: DEFAULT_SEED_HOSTS.iter().map(|&h| h.to_owned()).collect(),
            subnets: Vec::new(),
            scan_local_subnets: true,
            connect_timeout: Duration::from_millis(1500),
            sniff_timeout: Duration::from_secs(3),
            max_concurrency: 50,
            min_prefix_len: 22,
            force_large_networks: false,
            max_hosts_per_network: 512,
            secondary_hostname_hints: vec!["dc".into(), "base".into()],
            neighbor_table: "/proc/net/arp".into(),
            hosts_file: "/etc/hosts".into(),
        }
    }
}

impl DiscoveryConfig {
    /// Probe only the given hosts: no seeds, no subnet scan.
    pub fn targeted<I, S>(hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            seed_hosts: hosts.into_iter().map(Into::into).collect(),
            scan_local_subnets: false,
            ..Self::default()
        }
    }
}

// ── ReconnectConfig ──────────────────────────────────────────────────

/// Exponential backoff for reconnecting a dropped session.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt. Default: 1s.
    pub initial_delay: Duration,
    /// Upper bound on backoff delay. Default: 30s.
    pub max_delay: Duration,
    /// Maximum reconnection attempts before giving up.
    /// `None` means retry forever.
    pub max_retries: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_retries: None,
        }
    }
}

// ── ClientConfig ─────────────────────────────────────────────────────

/// Everything a [`LocalClient`](crate::LocalClient) needs.
///
/// Built by the CLI, passed to the client -- core never reads config files.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Broker address; must carry the device serial.
    pub endpoint: Endpoint,
    pub session: SessionConfig,
    pub transport: TransportConfig,
    pub reconnect: ReconnectConfig,
}

impl ClientConfig {
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            session: SessionConfig::default(),
            transport: TransportConfig::default(),
            reconnect: ReconnectConfig::default(),
        }
    }
}
