//! nuwani-bot: mirrors a game server's echo channel on IRC and takes
//! commands from it.
//!
//! Reads its settings from a TOML file (see `nuwani.example.toml`), connects
//! to the first reachable server and keeps reconnecting until interrupted.

mod commands;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use nuwani_sdk::command::NoPlayers;
use nuwani_sdk::{Bot, CommandManager, Configuration, ConnectionFactory, TcpDialer};

#[derive(Parser)]
#[command(name = "nuwani-bot", about = "IRC echo and command bot for game servers")]
struct Args {
    /// Configuration file
    #[arg(long, env = "NUWANI_CONFIG", default_value = "nuwani.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "nuwani_bot=info,nuwani_sdk=info".into()),
        )
        .init();

    let args = Args::parse();
    let config = Configuration::load(&args.config)
        .with_context(|| format!("loading configuration from {}", args.config.display()))?;

    tracing::info!(
        nickname = %config.bot.nickname,
        servers = config.servers.len(),
        echo_channel = %config.echo_channel,
        "Starting nuwani-bot"
    );

    let commands = CommandManager::new(&config.command_prefix, Arc::new(NoPlayers));
    let bot = Bot::new(&ConnectionFactory::new(), config, commands.clone(), Arc::new(TcpDialer));
    commands::register(&commands, &bot).context("registering built-in commands")?;

    let runner = tokio::spawn({
        let bot = bot.clone();
        async move { bot.run().await }
    });

    tracing::info!("Bot running. Ctrl+C to stop.");
    tokio::signal::ctrl_c().await.context("waiting for Ctrl+C")?;

    bot.shutdown();
    runner.await.context("bot task panicked")??;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn args_are_well_formed() {
        Args::command().debug_assert();
        let args = Args::try_parse_from(["nuwani-bot", "--config", "/etc/nuwani.toml"]).unwrap();
        assert_eq!(args.config, PathBuf::from("/etc/nuwani.toml"));
    }

    #[test]
    fn example_configuration_loads() {
        let config = Configuration::from_toml_str(include_str!("../nuwani.example.toml")).unwrap();
        assert_eq!(config.servers.len(), 2);
        assert_eq!(config.channels[1].password.as_deref(), Some("crew-only"));
        assert_eq!(config.levels.len(), 3);
    }
}
