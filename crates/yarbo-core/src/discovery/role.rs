// ── Role classification ──
//
// A robot paired with a base station is often reachable through two
// brokers that report the same serial: the robot itself and the base
// station bridging it. Callers prefer the base station, so both get a
// role when the evidence allows it.

use std::collections::HashMap;

use serde::Serialize;

use super::DiscoveredDevice;

/// Which side of a robot/base-station pair a broker is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Role {
    /// The robot's own broker.
    Primary,
    /// A base station or bridge relaying the robot.
    Secondary,
}

/// Assign roles within every group of two or more devices sharing a
/// serial. Devices without a serial, or alone in their group, stay
/// unclassified.
///
/// Evidence, strongest first:
/// 1. a hostname containing one of `hints` (case-insensitive) marks that
///    member secondary and the rest primary;
/// 2. two members answering from the same MAC mean one bridges the
///    other: the first found of them is secondary, the rest primary.
///
/// Without either signal the group is left alone.
pub fn classify(devices: &mut [DiscoveredDevice], hints: &[String]) {
    let mut groups: HashMap<String, Vec<usize>> = HashMap::new();
    for (idx, device) in devices.iter().enumerate() {
        if let Some(serial) = &device.endpoint.serial {
            groups.entry(serial.clone()).or_default().push(idx);
        }
    }

    let hints: Vec<String> = hints.iter().map(|h| h.to_ascii_lowercase()).collect();

    for members in groups.values().filter(|m| m.len() >= 2) {
        let hinted: Vec<usize> = members
            .iter()
            .copied()
            .filter(|&i| matches_hint(&devices[i], &hints))
            .collect();

        let secondary = if !hinted.is_empty() && hinted.len() < members.len() {
            hinted
        } else if let Some(first) = first_shared_mac(devices, members) {
            vec![first]
        } else {
            continue;
        };

        for &idx in members {
            devices[idx].role = Some(if secondary.contains(&idx) {
                Role::Secondary
            } else {
                Role::Primary
            });
        }
    }
}

fn matches_hint(device: &DiscoveredDevice, hints: &[String]) -> bool {
    device.hostname.as_deref().is_some_and(|name| {
        let name = name.to_ascii_lowercase();
        hints.iter().any(|h| !h.is_empty() && name.contains(h.as_str()))
    })
}

/// Index of the earliest member whose MAC another member also reports.
fn first_shared_mac(devices: &[DiscoveredDevice], members: &[usize]) -> Option<usize> {
    members.iter().copied().find(|&i| {
        devices[i].mac.as_deref().is_some_and(|mac| {
            members
                .iter()
                .any(|&j| j != i && devices[j].mac.as_deref() == Some(mac))
        })
    })
}

/// Preferred connection order.
///
/// When both roles are present, secondaries come first, then primaries,
/// then anything unclassified, each in discovery order. Otherwise the
/// discovery order is kept as is.
pub fn connection_order(devices: &[DiscoveredDevice]) -> Vec<DiscoveredDevice> {
    let has = |role| devices.iter().any(|d| d.role == Some(role));
    let mut ordered = devices.to_vec();
    if has(Role::Secondary) && has(Role::Primary) {
        ordered.sort_by_key(|d| match d.role {
            Some(Role::Secondary) => 0,
            Some(Role::Primary) => 1,
            None => 2,
        });
    }
    ordered
}
