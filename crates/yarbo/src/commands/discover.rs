//! Discover command handler.

use tabled::Tabled;
use yarbo_core::{DiscoveredDevice, Discovery, connection_order};

use crate::cli::GlobalOpts;
use crate::config::Target;
use crate::error::CliError;
use crate::output;

// ── Table row ───────────────────────────────────────────────────────

#[derive(Tabled)]
struct DeviceRow {
    #[tabled(rename = "IP")]
    ip: String,
    #[tabled(rename = "Port")]
    port: u16,
    #[tabled(rename = "Serial")]
    serial: String,
    #[tabled(rename = "MAC")]
    mac: String,
    #[tabled(rename = "Hostname")]
    hostname: String,
    #[tabled(rename = "Role")]
    role: String,
}

impl DeviceRow {
    fn new(device: &DiscoveredDevice, recommended: bool, color: bool) -> Self {
        let role = device.role.map_or_else(|| "-".into(), |r| r.to_string());
        Self {
            ip: device.endpoint.host.clone(),
            port: device.endpoint.port,
            serial: device.endpoint.serial.clone().unwrap_or_else(|| "-".into()),
            mac: device.mac.clone().unwrap_or_else(|| "-".into()),
            hostname: device.hostname.clone().unwrap_or_else(|| "-".into()),
            role: if recommended {
                output::accent(&format!("{role} *"), color)
            } else {
                role
            },
        }
    }
}

pub async fn handle(target: &Target, global: &GlobalOpts) -> Result<(), CliError> {
    output::print_status("Scanning for Yarbo brokers...", global.quiet);
    let devices = Discovery::new(target.discovery.clone()).discover().await;
    if devices.is_empty() {
        return Err(CliError::NoDevices);
    }

    let ordered = connection_order(&devices);
    let recommended = ordered.first().map(|d| d.endpoint.clone());
    let color = output::should_color(&global.color);
    let out = output::render_list(
        &global.output,
        &ordered,
        |d| DeviceRow::new(d, recommended.as_ref() == Some(&d.endpoint), color),
        |d| d.endpoint.address(),
    )?;
    output::print_output(&out, global.quiet);
    Ok(())
}
