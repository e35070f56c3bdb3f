//! Commands every bot ships with.
//!
//!   !commands            List registered commands
//!   !ping                Check the bot is alive
//!   !say [message]       Echo a message (administrators)
//!   !nuwani status       Connection status (Management)
//!   !raw [line]          Send a raw IRC line (owners)

use nuwani_sdk::command::{CommandError, CommandManager, Parameter, ParameterType};
use nuwani_sdk::{Bot, Level};

pub fn register(commands: &CommandManager, bot: &Bot) -> Result<(), CommandError> {
    let manager = commands.clone();
    commands.register_command("commands", move |context, _| {
        let prefix = manager.prefix();
        let names: Vec<String> = manager.command_names().iter().map(|name| format!("{prefix}{name}")).collect();
        context.respond(&format!("Available commands: {}", names.join(", ")));
        true
    })?;

    commands.register_command("ping", |context, _| {
        context.respond("pong");
        true
    })?;

    let echo = bot.clone();
    commands
        .build_command("say")?
        .restrict(Level::Administrator)
        .parameters([Parameter::new("message", ParameterType::Sentence)])
        .build(move |context, arguments| {
            let Some(message) = arguments.text(0) else {
                return false;
            };
            let sender = context.nickname().unwrap_or("someone");
            echo.echo("say", &format!("<{sender}> {message}"));
            true
        })?;

    let status = bot.clone();
    commands
        .build_command("nuwani")?
        .restrict(Level::Management)
        .sub("status", |sub| {
            sub.build(move |context, _| {
                let status = status.status();
                let channels = if status.channels.is_empty() {
                    "no channels".to_string()
                } else {
                    status.channels.join(", ")
                };
                let state = match (status.connected, status.registered) {
                    (true, true) => "registered",
                    (true, false) => "registering",
                    (false, _) => "disconnected",
                };
                context.respond(&format!("{} is {state}, in {channels}.", status.nickname));
                true
            })
        })?
        .build_group()?;

    commands
        .build_command("raw")?
        .parameters([Parameter::new("line", ParameterType::Sentence)])
        .build(|context, arguments| {
            if !context.is_owner() {
                context.respond_with_error("Sorry, this command is only available to bot owners.");
                return false;
            }
            let Some(line) = arguments.text(0) else {
                return false;
            };
            tracing::info!(nickname = ?context.nickname(), line = %line, "Sending raw line");
            context.write(line);
            true
        })?;

    Ok(())
}
