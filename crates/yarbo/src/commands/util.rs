//! Shared helpers for command handlers.

use yarbo_core::{Discovery, Endpoint, LocalClient, connection_order};

use crate::cli::GlobalOpts;
use crate::config::Target;
use crate::error::CliError;
use crate::output;

/// Connect to the robot described by `target`.
///
/// With both broker and serial known the client connects directly.
/// Otherwise discovery runs first and every broker found is tried in
/// connection order, base station first.
pub async fn connect(target: &Target, global: &GlobalOpts) -> Result<LocalClient, CliError> {
    if target.is_direct() {
        let client = LocalClient::new(target.client.clone())?;
        if let Err(e) = client.connect().await {
            client.close().await;
            return Err(e.into());
        }
        return Ok(client);
    }

    output::print_status("Searching for Yarbo brokers...", global.quiet);
    let devices = Discovery::new(target.discovery_for_connect())
        .discover()
        .await;
    if devices.is_empty() {
        return Err(CliError::NoDevices);
    }

    let endpoints: Vec<Endpoint> = connection_order(&devices)
        .into_iter()
        .map(|d| d.endpoint)
        .collect();
    if target.serial().is_none() && endpoints.iter().all(|e| e.serial.is_none()) {
        let found: Vec<String> = endpoints.iter().map(Endpoint::address).collect();
        return Err(CliError::Validation {
            field: "sn".into(),
            reason: format!(
                "found {} but none reported a serial; pass --sn",
                found.join(", ")
            ),
        });
    }

    tracing::debug!(candidates = endpoints.len(), "connecting to discovered brokers");
    Ok(LocalClient::connect_first(&endpoints, target.client.clone()).await?)
}

/// Parse a JSON object body given on the command line.
pub fn parse_json_object(
    field: &str,
    raw: Option<&str>,
) -> Result<serde_json::Map<String, serde_json::Value>, CliError> {
    let Some(raw) = raw else {
        return Ok(serde_json::Map::new());
    };
    let value: serde_json::Value = serde_json::from_str(raw).map_err(|e| CliError::Validation {
        field: field.into(),
        reason: format!("invalid JSON: {e}"),
    })?;
    match value {
        serde_json::Value::Object(map) => Ok(map),
        other => Err(CliError::Validation {
            field: field.into(),
            reason: format!("expected a JSON object, got {}", kind(&other)),
        }),
    }
}

fn kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}
