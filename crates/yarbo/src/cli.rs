//! Clap derive structures for the `yarbo` CLI.
//!
//! Defines the command tree, global flags, and shared types.

use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// yarbo -- local control for Yarbo robots over the on-board MQTT broker
#[derive(Debug, Parser)]
#[command(
    name = "yarbo",
    version,
    about = "Discover and control Yarbo robots on the local network",
    long_about = "Talks to the robot's on-board MQTT broker directly, without the cloud.\n\n\
        Pass --broker and --sn to connect to a known robot; omit them and the\n\
        CLI discovers brokers on the attached networks, preferring the base\n\
        station when both it and the robot answer.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Robot profile to use
    #[arg(long, short = 'p', env = "YARBO_PROFILE", global = true)]
    pub profile: Option<String>,

    /// Broker IP or hostname (omit to auto-discover)
    #[arg(long, short = 'b', env = "YARBO_BROKER", global = true)]
    pub broker: Option<String>,

    /// Robot serial number (omit to learn it during discovery)
    #[arg(long = "sn", env = "YARBO_SN", global = true)]
    pub serial: Option<String>,

    /// MQTT port [default: 1883]
    #[arg(long, env = "YARBO_PORT", global = true)]
    pub port: Option<u16>,

    /// Timeout in seconds for acknowledgements, status and probes [default: 5]
    #[arg(long, short = 't', env = "YARBO_TIMEOUT", global = true, value_parser = parse_seconds)]
    pub timeout: Option<Duration>,

    /// Subnet to scan when auto-discovering (e.g. 192.168.1.0/24); repeatable
    #[arg(long, global = true)]
    pub subnet: Vec<String>,

    /// Max hosts probed per subnet [default: 512]
    #[arg(long, value_name = "N", global = true)]
    pub max_hosts: Option<usize>,

    /// Output format
    #[arg(
        long,
        short = 'o',
        env = "YARBO_OUTPUT",
        default_value = "table",
        global = true
    )]
    pub output: OutputFormat,

    /// When to use color output
    #[arg(long, default_value = "auto", global = true)]
    pub color: ColorMode,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,
}

/// Seconds as a positive decimal (`5`, `0.5`).
fn parse_seconds(raw: &str) -> Result<Duration, String> {
    let secs: f64 = raw
        .parse()
        .map_err(|_| format!("'{raw}' is not a number of seconds"))?;
    if secs <= 0.0 {
        return Err("timeout must be greater than zero".into());
    }
    Duration::try_from_secs_f64(secs).map_err(|e| format!("invalid timeout '{raw}': {e}"))
}

// ── Output & Color Enums ─────────────────────────────────────────────

#[derive(Debug, Clone, ValueEnum)]
pub enum OutputFormat {
    /// Pretty table (default, interactive)
    Table,
    /// Pretty-printed JSON
    Json,
    /// Compact single-line JSON
    JsonCompact,
    /// YAML
    Yaml,
    /// Plain text, one value per line (scripting)
    Plain,
}

#[derive(Debug, Clone, ValueEnum)]
pub enum ColorMode {
    /// Auto-detect (color if terminal is interactive)
    Auto,
    /// Always emit color codes
    Always,
    /// Never emit color codes
    Never,
}

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Find Yarbo brokers (robot and base station) on the network
    #[command(alias = "scan")]
    Discover,

    /// Connect and print the robot's status
    #[command(alias = "st")]
    Status,

    /// Print the battery percentage
    Battery,

    /// Stream telemetry until interrupted
    #[command(alias = "watch")]
    Telemetry(TelemetryArgs),

    /// Turn all lights on
    LightsOn,

    /// Turn all lights off
    LightsOff,

    /// Sound the buzzer (--stop to silence it)
    Buzzer(BuzzerArgs),

    /// Rotate the snow chute
    Chute(ChuteArgs),

    /// Send the robot back to its charging dock
    #[command(alias = "dock")]
    ReturnToDock,

    /// Start a saved plan
    PlanStart(PlanStartArgs),

    /// Stop the running plan
    PlanStop,

    /// Pause the running plan
    PlanPause,

    /// Resume a paused plan
    PlanResume,

    /// Publish an arbitrary command verb with a JSON object body
    Raw(RawArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

impl Command {
    /// Whether the command mutates the device and so needs the controller
    /// role. Read-only commands leave the role with the phone app.
    pub fn needs_controller(&self) -> bool {
        !matches!(
            self,
            Self::Discover | Self::Status | Self::Battery | Self::Telemetry(_) | Self::Completions(_)
        )
    }
}

// ── Command Arguments ────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct TelemetryArgs {
    /// Stop after N frames
    #[arg(long, short = 'n', value_name = "N")]
    pub count: Option<usize>,

    /// Include every feedback topic, heartbeat included
    #[arg(long)]
    pub all: bool,
}

#[derive(Debug, Args)]
pub struct BuzzerArgs {
    /// Stop the buzzer instead of starting it
    #[arg(long)]
    pub stop: bool,
}

#[derive(Debug, Args)]
pub struct ChuteArgs {
    /// Rotation velocity; positive turns right, negative left
    #[arg(long, allow_hyphen_values = true)]
    pub vel: i32,
}

#[derive(Debug, Args)]
pub struct PlanStartArgs {
    /// Plan ID to start
    #[arg(long)]
    pub plan_id: String,
}

#[derive(Debug, Args)]
pub struct RawArgs {
    /// Command verb, the last topic segment (e.g. `light_ctrl`)
    pub verb: String,

    /// JSON object body [default: {}]
    pub payload: Option<String>,
}

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}
