//! Command dispatch: bridges CLI args -> core client calls -> output formatting.

pub mod control;
pub mod discover;
pub mod status;
pub mod util;

use yarbo_core::LocalClient;

use crate::cli::{Command, GlobalOpts};
use crate::config::Target;
use crate::error::CliError;

/// Dispatch a connection-bound command to the appropriate handler.
pub async fn dispatch(
    cmd: Command,
    client: &LocalClient,
    target: &Target,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    match cmd {
        Command::Status => status::handle_status(client, target, global).await,
        Command::Battery => status::handle_battery(client, target, global).await,
        Command::Telemetry(args) => status::handle_telemetry(client, args, global).await,
        Command::Discover | Command::Completions(_) => Err(CliError::Internal(
            "discover and completions run without a connection".into(),
        )),
        cmd => control::handle(client, cmd, global).await,
    }
}
