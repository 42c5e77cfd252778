//! Status, battery and telemetry handlers.

use chrono::{DateTime, Local, Utc};
use futures_util::StreamExt;
use serde::Serialize;
use yarbo_core::{DeviceStatus, LocalClient, TelemetryFrame};

use crate::cli::{GlobalOpts, OutputFormat, TelemetryArgs};
use crate::config::Target;
use crate::error::CliError;
use crate::output;

// ── Status ──────────────────────────────────────────────────────────

#[derive(Serialize)]
struct StatusReport {
    broker: String,
    serial: String,
    controller: bool,
    received_at: DateTime<Utc>,
    #[serde(flatten)]
    status: DeviceStatus,
}

fn dash<T: ToString>(value: Option<T>) -> String {
    value.map_or_else(|| "-".into(), |v| v.to_string())
}

fn detail(r: &StatusReport, color: bool) -> String {
    let s = &r.status;
    let mut lines = vec![
        format!("Broker:     {}", r.broker),
        format!("Serial:     {}", r.serial),
        format!("Controller: {}", if r.controller { "yes" } else { "no" }),
        format!("Battery:    {}", output::battery(s.battery, color)),
        format!("State:      {}", s.state().unwrap_or("-")),
        format!(
            "Charging:   {}",
            match s.charging_status {
                Some(_) if s.is_charging() => "yes",
                Some(_) => "no",
                None => "-",
            }
        ),
        format!("Error code: {}", dash(s.error_code)),
        format!("Heading:    {}", s.heading.map_or_else(|| "-".into(), |h| format!("{h:.1}"))),
    ];
    if let (Some(x), Some(y)) = (s.x, s.y) {
        lines.push(format!(
            "Position:   {x:.2}, {y:.2} (phi {})",
            s.phi.map_or_else(|| "-".into(), |p| format!("{p:.2}"))
        ));
    }
    if !s.extra.is_empty() {
        let mut groups: Vec<&str> = s.extra.keys().map(String::as_str).collect();
        groups.sort_unstable();
        lines.push(format!("Other:      {}", groups.join(", ")));
    }
    lines.push(format!(
        "Updated:    {}",
        r.received_at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S")
    ));
    lines.join("\n")
}

async fn next_status(
    client: &LocalClient,
    target: &Target,
) -> Result<(TelemetryFrame, DeviceStatus), CliError> {
    let frame = client
        .get_status(target.status_timeout)
        .await?
        .ok_or(CliError::NoTelemetry {
            seconds: target.status_timeout.as_secs_f64(),
        })?;
    let status = frame.status();
    Ok((frame, status))
}

pub async fn handle_status(
    client: &LocalClient,
    target: &Target,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let (frame, status) = next_status(client, target).await?;
    let report = StatusReport {
        broker: client.endpoint().address(),
        serial: client.serial().to_owned(),
        controller: client.is_controller(),
        received_at: frame.received_at,
        status,
    };
    let color = output::should_color(&global.color);
    let out = output::render_single(
        &global.output,
        &report,
        |r| detail(r, color),
        |r| dash(r.status.state()),
    )?;
    output::print_output(&out, global.quiet);
    Ok(())
}

// ── Battery ─────────────────────────────────────────────────────────

#[derive(Serialize)]
struct BatteryReport {
    battery: Option<i64>,
    charging: bool,
}

pub async fn handle_battery(
    client: &LocalClient,
    target: &Target,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let (_, status) = next_status(client, target).await?;
    let report = BatteryReport {
        battery: status.battery,
        charging: status.is_charging(),
    };
    let color = output::should_color(&global.color);
    let out = output::render_single(
        &global.output,
        &report,
        |r| output::battery(r.battery, color),
        |r| output::battery(r.battery, false),
    )?;
    output::print_output(&out, global.quiet);
    Ok(())
}

// ── Telemetry ───────────────────────────────────────────────────────

/// One line per frame for the interactive formats.
fn summary_line(frame: &TelemetryFrame, color: bool) -> String {
    let time = frame.received_at.with_timezone(&Local).format("%H:%M:%S");
    if frame.is_device_msg() {
        let status = frame.status();
        let mut line = format!(
            "{time}  Battery: {}  State: {}",
            output::battery(status.battery, color),
            status.state().unwrap_or("?")
        );
        if let Some(plan) = &frame.plan {
            line.push_str(&format!(
                "  Plan: {} ({})",
                plan.plan_id.as_ref().map_or_else(|| "-".into(), ToString::to_string),
                plan.area_covered.map_or_else(|| "-".into(), |a| format!("{a:.1} m²"))
            ));
        }
        line
    } else {
        format!(
            "{time}  {}  {}",
            output::accent(&frame.leaf, color),
            serde_json::Value::Object(frame.payload.clone())
        )
    }
}

fn render_frame(
    format: &OutputFormat,
    frame: &TelemetryFrame,
    color: bool,
) -> Result<String, CliError> {
    match format {
        OutputFormat::Table => Ok(summary_line(frame, color)),
        OutputFormat::Json => output::render_json(frame, false),
        // One object per line so the stream can be piped into `jq`.
        OutputFormat::JsonCompact | OutputFormat::Plain => output::render_json(frame, true),
        OutputFormat::Yaml => Ok(format!("---\n{}", output::render_yaml(frame)?)),
    }
}

pub async fn handle_telemetry(
    client: &LocalClient,
    args: TelemetryArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let mut frames = if args.all {
        client.watch_feedback().await?.boxed()
    } else {
        client.watch_telemetry().await?.boxed()
    };
    output::print_status("Streaming telemetry (Ctrl-C to stop)...", global.quiet);

    let color = output::should_color(&global.color);
    let mut seen = 0usize;
    loop {
        if args.count.is_some_and(|limit| seen >= limit) {
            return Ok(());
        }
        tokio::select! {
            biased;
            _ = tokio::signal::ctrl_c() => return Ok(()),
            next = frames.next() => {
                let Some(frame) = next else {
                    return Err(CliError::ConnectionLost);
                };
                seen += 1;
                let out = render_frame(&global.output, &frame, color)?;
                output::print_output(&out, global.quiet);
            }
        }
    }
}
