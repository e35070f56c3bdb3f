//! nuwani-sdk: IRC connectivity and command dispatch for game-server bots.
//!
//! - [`connection`]: reconnecting socket with server failover and backoff
//! - [`handshake`]: NICK/USER registration, NickServ and channel joins
//! - [`mode`] and [`channels`]: MODE parsing and per-channel status tracking
//! - [`command`]: the command tree, its builder and dispatcher
//! - [`bot`]: ties it all together around one ordered event loop

pub mod backoff;
pub mod bot;
pub mod channels;
pub mod command;
pub mod config;
pub mod connection;
mod event;
pub mod handshake;
pub mod irc;
pub mod mode;

pub use bot::{Bot, BotError, BotStatus};
pub use command::{CommandContext, CommandError, CommandManager, CommandOutcome};
pub use config::{ConfigError, Configuration, Level};
pub use connection::{Connection, ConnectionFactory, TcpDialer};
