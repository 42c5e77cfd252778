mod cli;
mod commands;
mod config;
mod error;
mod output;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Command};
use crate::error::CliError;

#[tokio::main]
async fn main() {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Setup tracing based on verbosity
    init_tracing(cli.global.verbose);

    // Dispatch and handle errors with proper exit codes
    if let Err(err) = run(cli).await {
        let code = err.exit_code();
        eprintln!("{:?}", miette::Report::new(err));
        std::process::exit(code);
    }
}

fn init_tracing(verbosity: u8) {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

async fn run(cli: Cli) -> Result<(), CliError> {
    match cli.command {
        // Shell completions generation
        Command::Completions(args) => {
            use clap::CommandFactory;
            use clap_complete::generate;

            let mut cmd = Cli::command();
            generate(args.shell, &mut cmd, "yarbo", &mut std::io::stdout());
            Ok(())
        }

        // Discovery probes the network but never opens a session
        Command::Discover => {
            let target = config::resolve(&cli.global)?;
            commands::discover::handle(&target, &cli.global).await
        }

        // Everything else talks to a robot
        cmd => {
            // Reject a malformed body before touching the network
            if let Command::Raw(ref args) = cmd {
                commands::util::parse_json_object("payload", args.payload.as_deref())?;
            }

            let mut target = config::resolve(&cli.global)?;
            if !cmd.needs_controller() {
                target = target.read_only();
            }
            let client = commands::util::connect(&target, &cli.global).await?;

            tracing::debug!(command = ?cmd, endpoint = %client.endpoint(), "dispatching command");
            let result = commands::dispatch(cmd, &client, &target, &cli.global).await;
            client.close().await;
            result
        }
    }
}
