// ── Neighbour and hosts lookups ──
//
// Best-effort enrichment for discovered brokers: the kernel ARP table
// gives link-layer addresses, the hosts file gives names. A missing or
// unreadable file yields an empty map.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::path::Path;

use tracing::debug;

/// Parse `/proc/net/arp`.
///
/// ```text
/// IP address       HW type     Flags       HW address            Mask     Device
/// 192.168.1.24     0x1         0x2         b8:27:eb:12:34:56     *        wlan0
/// ```
///
/// Incomplete entries (flags `0x0` or an all-zero address) are skipped.
/// MACs are lowercased.
pub fn parse_arp_table(contents: &str) -> HashMap<Ipv4Addr, String> {
    contents
        .lines()
        .skip(1)
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            let [ip, _hw_type, flags, mac, ..] = fields.as_slice() else {
                return None;
            };
            if *flags == "0x0" || *mac == "00:00:00:00:00:00" {
                return None;
            }
            Some((ip.parse().ok()?, mac.to_ascii_lowercase()))
        })
        .collect()
}

/// Parse a hosts file into address -> first name.
pub fn parse_hosts_file(contents: &str) -> HashMap<Ipv4Addr, String> {
    let mut names = HashMap::new();
    for line in contents.lines() {
        let line = line.split('#').next().unwrap_or_default();
        let mut tokens = line.split_whitespace();
        let (Some(addr), Some(name)) = (tokens.next(), tokens.next()) else {
            continue;
        };
        if let Ok(addr) = addr.parse::<Ipv4Addr>() {
            names.entry(addr).or_insert_with(|| name.to_owned());
        }
    }
    names
}

pub async fn read_arp_table(path: &Path) -> HashMap<Ipv4Addr, String> {
    match tokio::fs::read_to_string(path).await {
        Ok(contents) => parse_arp_table(&contents),
        Err(e) => {
            debug!(path = %path.display(), error = %e, "neighbour table unavailable");
            HashMap::new()
        }
    }
}

pub async fn read_hosts_file(path: &Path) -> HashMap<Ipv4Addr, String> {
    match tokio::fs::read_to_string(path).await {
        Ok(contents) => parse_hosts_file(&contents),
        Err(e) => {
            debug!(path = %path.display(), error = %e, "hosts file unavailable");
            HashMap::new()
        }
    }
}
