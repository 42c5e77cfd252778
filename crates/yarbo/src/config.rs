//! CLI configuration: merges global flags over the active profile.
//!
//! Precedence, highest first: command-line flags (and their `YARBO_*`
//! env fallbacks), the selected profile, `[defaults]`, built-in defaults.

use std::time::Duration;

use yarbo_config::{Config, Profile};
use yarbo_core::discovery::Ipv4Network;
use yarbo_core::{ClientConfig, DiscoveryConfig, Endpoint, TransportConfig};

use crate::cli::GlobalOpts;
use crate::error::CliError;

/// Everything the commands need to reach a robot.
#[derive(Debug, Clone)]
pub struct Target {
    /// Client template. The endpoint host is empty when no broker is known.
    pub client: ClientConfig,
    pub discovery: DiscoveryConfig,
    /// How long `status`-style commands wait for a telemetry frame.
    pub status_timeout: Duration,
}

impl Target {
    pub fn broker(&self) -> Option<&str> {
        let host = self.client.endpoint.host.as_str();
        (!host.is_empty()).then_some(host)
    }

    pub fn serial(&self) -> Option<&str> {
        self.client.endpoint.serial.as_deref()
    }

    /// Broker and serial both known, so discovery can be skipped.
    pub fn is_direct(&self) -> bool {
        self.broker().is_some() && self.serial().is_some()
    }

    /// Same target without the automatic controller handshake, so the
    /// session never publishes `get_controller`.
    pub fn read_only(mut self) -> Self {
        self.client.session.auto_controller = false;
        self
    }

    /// Discovery settings for finding a broker to connect to. A known
    /// broker is probed alone, only to learn its serial.
    pub fn discovery_for_connect(&self) -> DiscoveryConfig {
        match self.broker() {
            Some(host) => DiscoveryConfig {
                seed_hosts: vec![host.to_owned()],
                subnets: Vec::new(),
                scan_local_subnets: false,
                ..self.discovery.clone()
            },
            None => self.discovery.clone(),
        }
    }
}

/// Load the config file and resolve it against the global flags.
pub fn resolve(global: &GlobalOpts) -> Result<Target, CliError> {
    let cfg = yarbo_config::load_config()?;
    let name = cfg.active_profile_name(global.profile.as_deref());
    let profile = match cfg.profile(&name) {
        Ok(profile) => Some(profile),
        // Only a profile the user asked for by name has to exist.
        Err(e) if global.profile.is_some() => return Err(e.into()),
        Err(_) => None,
    };
    tracing::debug!(profile = %name, found = profile.is_some(), "resolved profile");
    resolve_with(&cfg, profile, global)
}

pub(crate) fn resolve_with(
    cfg: &Config,
    profile: Option<&Profile>,
    global: &GlobalOpts,
) -> Result<Target, CliError> {
    let defaults = &cfg.defaults;

    for subnet in &global.subnet {
        subnet
            .parse::<Ipv4Network>()
            .map_err(|e| CliError::Validation {
                field: "subnet".into(),
                reason: format!("'{subnet}': {e}"),
            })?;
    }

    let port = global
        .port
        .or_else(|| profile.and_then(|p| p.port))
        .unwrap_or(defaults.port);
    let broker = non_empty(global.broker.as_deref())
        .or_else(|| non_empty(profile.and_then(|p| p.broker.as_deref())));
    let serial = non_empty(global.serial.as_deref())
        .or_else(|| non_empty(profile.and_then(|p| p.serial.as_deref())));

    let mut session = defaults.session_config(profile);
    let mut discovery = defaults.discovery_config(profile);
    discovery.port = port;
    if !global.subnet.is_empty() {
        discovery.subnets.clone_from(&global.subnet);
    }
    if let Some(max) = global.max_hosts {
        discovery.max_hosts_per_network = max;
    }

    let status_timeout = global.timeout.unwrap_or(session.command_timeout);
    if let Some(timeout) = global.timeout {
        session.command_timeout = timeout;
        discovery.connect_timeout = discovery.connect_timeout.min(timeout);
        discovery.sniff_timeout = discovery.sniff_timeout.min(timeout);
    }

    let mut endpoint = Endpoint::new(broker.unwrap_or_default(), port);
    if let Some(serial) = serial {
        endpoint = endpoint.with_serial(serial);
    }

    Ok(Target {
        client: ClientConfig {
            endpoint,
            session,
            transport: TransportConfig::default(),
            reconnect: defaults.reconnect_config(),
        },
        discovery,
        status_timeout,
    })
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_owned)
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;
    use crate::cli::Cli;

    fn global(args: &[&str]) -> GlobalOpts {
        let mut argv = vec!["yarbo"];
        argv.extend_from_slice(args);
        argv.push("status");
        Cli::try_parse_from(argv).unwrap().global
    }

    fn garage() -> Profile {
        Profile {
            broker: Some("192.168.1.24".into()),
            serial: Some("SN-GARAGE".into()),
            port: Some(1884),
            timeout: Some(9),
            ..Profile::default()
        }
    }

    #[test]
    fn flags_override_profile() {
        let cfg = Config::default();
        let profile = garage();
        let target = resolve_with(
            &cfg,
            Some(&profile),
            &global(&["--broker", "10.0.0.7", "--port", "2883", "--timeout", "2.5"]),
        )
        .unwrap();

        assert_eq!(target.client.endpoint.host, "10.0.0.7");
        assert_eq!(target.client.endpoint.port, 2883);
        assert_eq!(target.serial(), Some("SN-GARAGE"));
        assert_eq!(target.client.session.command_timeout, Duration::from_millis(2500));
        assert_eq!(target.status_timeout, Duration::from_millis(2500));
        assert_eq!(target.discovery.port, 2883);
        assert!(target.is_direct());
    }

    #[test]
    fn profile_fills_missing_flags() {
        let profile = garage();
        let target = resolve_with(&Config::default(), Some(&profile), &global(&[])).unwrap();
        assert_eq!(target.broker(), Some("192.168.1.24"));
        assert_eq!(target.client.endpoint.port, 1884);
        assert_eq!(target.status_timeout, Duration::from_secs(9));
    }

    #[test]
    fn nothing_known_needs_discovery() {
        let target = resolve_with(&Config::default(), None, &global(&[])).unwrap();
        assert!(target.broker().is_none());
        assert!(target.serial().is_none());
        assert!(!target.is_direct());
        assert!(target.discovery.scan_local_subnets);
    }

    #[test]
    fn broker_without_serial_probes_only_that_broker() {
        let target =
            resolve_with(&Config::default(), None, &global(&["--broker", "10.0.0.7"])).unwrap();
        let discovery = target.discovery_for_connect();
        assert_eq!(discovery.seed_hosts, vec!["10.0.0.7".to_owned()]);
        assert!(!discovery.scan_local_subnets);
        assert!(discovery.subnets.is_empty());
    }

    #[test]
    fn short_timeout_caps_probe_bounds() {
        let target =
            resolve_with(&Config::default(), None, &global(&["--timeout", "0.5"])).unwrap();
        assert_eq!(target.discovery.connect_timeout, Duration::from_millis(500));
        assert_eq!(target.discovery.sniff_timeout, Duration::from_millis(500));
    }

    #[test]
    fn subnet_and_host_cap_flags() {
        let target = resolve_with(
            &Config::default(),
            None,
            &global(&["--subnet", "10.1.0.0/24", "--max-hosts", "64"]),
        )
        .unwrap();
        assert_eq!(target.discovery.subnets, vec!["10.1.0.0/24".to_owned()]);
        assert_eq!(target.discovery.max_hosts_per_network, 64);
    }

    #[test]
    fn bad_subnet_is_a_validation_error() {
        let err = resolve_with(&Config::default(), None, &global(&["--subnet", "10.1.0.0/40"]))
            .unwrap_err();
        assert!(matches!(err, CliError::Validation { ref field, .. } if field == "subnet"));
    }

    #[test]
    fn read_only_target_skips_handshake() {
        let profile = garage();
        let target = resolve_with(&Config::default(), Some(&profile), &global(&[])).unwrap();
        assert!(target.client.session.auto_controller);

        let target = target.read_only();
        assert!(!target.client.session.auto_controller);
        assert_eq!(target.serial(), Some("SN-GARAGE"));
    }
}
