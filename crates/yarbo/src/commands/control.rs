//! Command handlers that drive the robot.
//!
//! Fire-and-forget commands print a confirmation on stderr. Plan and dock
//! commands wait for the robot's reply and render it.

use tabled::Tabled;
use yarbo_core::{CommandResult, LocalClient};

use crate::cli::{Command, GlobalOpts};
use crate::error::CliError;
use crate::output;

use super::util;

pub async fn handle(
    client: &LocalClient,
    cmd: Command,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    match cmd {
        Command::LightsOn => {
            client.lights_on().await?;
            sent("Lights on", global)
        }
        Command::LightsOff => {
            client.lights_off().await?;
            sent("Lights off", global)
        }
        Command::Buzzer(args) => {
            client.buzzer(!args.stop).await?;
            sent(if args.stop { "Buzzer stopped" } else { "Buzzer on" }, global)
        }
        Command::Chute(args) => {
            client.chute(args.vel).await?;
            sent(&format!("Chute velocity set to {}", args.vel), global)
        }
        Command::ReturnToDock => acknowledged(client.return_to_dock().await?, global),
        Command::PlanStart(args) => acknowledged(client.start_plan(args.plan_id).await?, global),
        Command::PlanStop => acknowledged(client.stop_plan().await?, global),
        Command::PlanPause => acknowledged(client.pause_plan().await?, global),
        Command::PlanResume => acknowledged(client.resume_plan().await?, global),
        Command::Raw(args) => {
            let payload = util::parse_json_object("payload", args.payload.as_deref())?;
            client.publish_raw(args.verb.clone(), payload).await?;
            sent(&format!("Published {}", args.verb), global)
        }
        other => Err(CliError::Internal(format!(
            "{other:?} is not a control command"
        ))),
    }
}

fn sent(message: &str, global: &GlobalOpts) -> Result<(), CliError> {
    output::print_status(message, global.quiet);
    Ok(())
}

// ── Acknowledgement rendering ───────────────────────────────────────

#[derive(Tabled)]
struct AckRow {
    #[tabled(rename = "Command")]
    verb: String,
    #[tabled(rename = "State")]
    state: i64,
    #[tabled(rename = "Message")]
    msg: String,
}

fn acknowledged(result: CommandResult, global: &GlobalOpts) -> Result<(), CliError> {
    let out = output::render_list(
        &global.output,
        std::slice::from_ref(&result),
        |r| AckRow {
            verb: r.topic.clone(),
            state: r.state,
            msg: r.msg.clone().unwrap_or_else(|| "ok".into()),
        },
        |r| r.topic.clone(),
    )?;
    output::print_output(&out, global.quiet);
    Ok(())
}
