//! Command registration and dispatch.
//!
//! Commands form a tree: a top-level name, literal or typed sub-commands
//! below it, and a parameter list plus listener at any node. Incoming chat
//! lines that start with the configured prefix are matched against that tree
//! and run at most one listener.

mod builder;
mod context;
mod descriptor;
mod parameter;

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;

pub use builder::CommandBuilder;
pub use context::CommandContext;
pub use descriptor::{CommandDescriptor, DefaultValue, Listener, Parameter, SubCommand};
pub use parameter::{NoPlayers, ParameterType, Player, PlayerDirectory, Value};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    #[error("command \"{0}\" has already been registered")]
    AlreadyRegistered(String),
    #[error("command \"{0}\" has not been registered")]
    NotRegistered(String),
    #[error("\"{sub_command}\" is ambiguous with an existing sub-command of \"{command}\"")]
    Ambiguous { command: String, sub_command: String },
    #[error("invalid command name {0:?}")]
    InvalidName(String),
    #[error("{0}")]
    InvalidParameters(String),
}

/// What became of one chat line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    /// The line doesn't start with the command prefix.
    NotACommand,
    /// Prefixed, but no command of that name exists.
    UnknownCommand(String),
    /// The listener ran and returned this.
    Executed(bool),
    /// The sender's level is too low; they have been told.
    Refused,
    /// Bad input; a usage or error message has been sent.
    Invalid,
}

/// Values a listener is invoked with: typed sub-commands first, then
/// parameters, in order. Optional parameters that weren't given are absent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Arguments {
    values: Vec<Value>,
    rest: String,
}

impl Arguments {
    pub fn new(values: Vec<Value>, rest: &str) -> Self {
        Self {
            values,
            rest: rest.to_string(),
        }
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    pub fn number(&self, index: usize) -> Option<f64> {
        self.get(index).and_then(Value::as_number)
    }

    pub fn text(&self, index: usize) -> Option<&str> {
        self.get(index).and_then(Value::as_str)
    }

    pub fn player(&self, index: usize) -> Option<&Player> {
        self.get(index).and_then(Value::as_player)
    }

    /// Input left after sub-commands and parameters, trimmed.
    pub fn rest(&self) -> &str {
        &self.rest
    }
}

type Registry = Arc<RwLock<BTreeMap<String, Arc<CommandDescriptor>>>>;

fn register(registry: &Registry, descriptor: Arc<CommandDescriptor>) -> Result<(), CommandError> {
    let name = descriptor.path().to_lowercase();
    let mut commands = registry.write();
    if commands.contains_key(&name) {
        return Err(CommandError::AlreadyRegistered(descriptor.path().to_string()));
    }
    tracing::debug!(command = %name, "Registered command");
    commands.insert(name, descriptor);
    Ok(())
}

/// Owns the command tree of one bot. Cheap to clone; clones share commands.
#[derive(Clone)]
pub struct CommandManager {
    prefix: Arc<str>,
    registry: Registry,
    players: Arc<dyn PlayerDirectory>,
}

impl CommandManager {
    pub fn new(prefix: &str, players: Arc<dyn PlayerDirectory>) -> Self {
        Self {
            prefix: Arc::from(prefix),
            registry: Registry::default(),
            players,
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Start building the top-level command `name`. It is registered when
    /// the builder's `build` succeeds.
    pub fn build_command(&self, name: &str) -> Result<CommandBuilder, CommandError> {
        validate_name(name)?;
        Ok(CommandBuilder::root(name, Arc::clone(&self.registry)))
    }

    /// Register a command without sub-commands or parameters. The listener
    /// gets everything after the command name as [`Arguments::rest`].
    pub fn register_command<L>(&self, name: &str, listener: L) -> Result<(), CommandError>
    where
        L: Fn(&CommandContext, &Arguments) -> bool + Send + Sync + 'static,
    {
        self.build_command(name)?.build(listener).map(|_| ())
    }

    pub fn remove_command(&self, name: &str) -> Result<(), CommandError> {
        match self.registry.write().remove(&name.to_lowercase()) {
            Some(_) => Ok(()),
            None => Err(CommandError::NotRegistered(name.to_string())),
        }
    }

    pub fn has_command(&self, name: &str) -> bool {
        self.registry.read().contains_key(&name.to_lowercase())
    }

    /// Registered top-level command names, sorted.
    pub fn command_names(&self) -> Vec<String> {
        self.registry.read().values().map(|d| d.path().to_string()).collect()
    }

    /// Run the command `text` asks for, if any.
    pub fn dispatch(&self, context: &CommandContext, text: &str) -> CommandOutcome {
        let Some(body) = text.strip_prefix(&*self.prefix) else {
            return CommandOutcome::NotACommand;
        };
        let (name, rest) = body.split_once(' ').unwrap_or((body, ""));
        if name.is_empty() {
            return CommandOutcome::NotACommand;
        }

        // Clone out of the lock; listeners may (re)register commands.
        let Some(descriptor) = self.registry.read().get(&name.to_lowercase()).cloned() else {
            return CommandOutcome::UnknownCommand(name.to_string());
        };

        let outcome = descriptor.invoke(context, rest, Vec::new(), self.players.as_ref(), &self.prefix);
        tracing::debug!(command = %name, nickname = ?context.nickname(), outcome = ?outcome, "Command dispatched");
        outcome
    }
}

fn validate_name(name: &str) -> Result<(), CommandError> {
    if name.is_empty() || name.contains(char::is_whitespace) {
        return Err(CommandError::InvalidName(name.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::ChannelTracker;
    use crate::config::{Configuration, Level, LevelMapping};
    use crate::connection::{ConnectionError, LineWriter};
    use crate::irc::Message;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Sent(Mutex<Vec<String>>);

    impl LineWriter for Sent {
        fn write(&self, line: &str) -> Result<(), ConnectionError> {
            self.0.lock().push(line.to_string());
            Ok(())
        }
    }

    fn context(sent: &Arc<Sent>, line: &str) -> CommandContext {
        let mut config = Configuration::new("Nuwani", "#echo");
        config.levels = vec![LevelMapping::new('o', Level::Administrator)];
        let mut tracker = ChannelTracker::new();
        for names in [":Nuwani!n@h JOIN #echo", ":srv 353 Nuwani = #echo :Nuwani @Joe Ann"] {
            tracker.handle_message("Nuwani", &Message::parse(names).unwrap());
        }
        CommandContext::for_message(sent.clone(), &Message::parse(line).unwrap(), &config, &tracker).unwrap()
    }

    fn manager() -> CommandManager {
        CommandManager::new("!", Arc::new(NoPlayers))
    }

    #[test]
    fn register_and_remove() {
        let manager = manager();
        manager.register_command("ping", |_, _| true).unwrap();
        assert_eq!(
            manager.register_command("PING", |_, _| true),
            Err(CommandError::AlreadyRegistered("PING".into()))
        );
        manager.remove_command("ping").unwrap();
        assert_eq!(manager.remove_command("ping"), Err(CommandError::NotRegistered("ping".into())));
        manager.register_command("ping", |_, _| true).unwrap();
        assert!(manager.has_command("Ping"));
    }

    #[test]
    fn rejects_bad_names() {
        let manager = manager();
        assert!(matches!(manager.register_command("", |_, _| true), Err(CommandError::InvalidName(_))));
        assert!(matches!(manager.register_command("a b", |_, _| true), Err(CommandError::InvalidName(_))));
    }

    #[test]
    fn parameter_layout_is_validated() {
        let manager = manager();
        let result = manager
            .build_command("msg")
            .unwrap()
            .parameters([Parameter::new("text", ParameterType::Sentence), Parameter::new("n", ParameterType::Number)])
            .build(|_, _| true);
        assert!(matches!(result, Err(CommandError::InvalidParameters(_))));

        let result = manager
            .build_command("msg")
            .unwrap()
            .parameters([Parameter::optional("a", ParameterType::Word), Parameter::new("b", ParameterType::Word)])
            .build(|_, _| true);
        assert!(matches!(result, Err(CommandError::InvalidParameters(_))));
        assert!(!manager.has_command("msg"));
    }

    #[test]
    fn literal_sub_commands_need_a_word_boundary() {
        let sent = Arc::new(Sent::default());
        let manager = manager();
        manager
            .build_command("nuwani")
            .unwrap()
            .sub("status", |sub| {
                sub.build(|context, _| {
                    context.respond("status");
                    true
                })
            })
            .unwrap()
            .build(|context, arguments| {
                context.respond(&format!("top: {}", arguments.rest()));
                false
            })
            .unwrap();

        let ctx = context(&sent, ":Ann!a@h PRIVMSG #echo :!nuwani status");
        assert_eq!(manager.dispatch(&ctx, "!nuwani status"), CommandOutcome::Executed(true));
        assert_eq!(manager.dispatch(&ctx, "!nuwani statusx"), CommandOutcome::Executed(false));
        assert_eq!(*sent.0.lock(), vec!["PRIVMSG #echo :status", "PRIVMSG #echo :top: statusx"]);
    }

    #[test]
    fn groups_reply_with_usage() {
        let sent = Arc::new(Sent::default());
        let manager = manager();
        manager
            .build_command("nuwani")
            .unwrap()
            .sub("reload", |sub| sub.build(|_, _| true))
            .unwrap()
            .sub("status", |sub| sub.build(|_, _| true))
            .unwrap()
            .build_group()
            .unwrap();

        let ctx = context(&sent, ":Ann!a@h PRIVMSG Nuwani :!nuwani");
        assert_eq!(manager.dispatch(&ctx, "!nuwani"), CommandOutcome::Invalid);
        assert_eq!(*sent.0.lock(), vec!["PRIVMSG Ann :\x02Usage\x02: !nuwani [reload/status]"]);
    }

    #[test]
    fn parameters_and_usage() {
        let sent = Arc::new(Sent::default());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let manager = manager();
        let record = seen.clone();
        manager
            .build_command("announce")
            .unwrap()
            .parameters([
                Parameter::new("seconds", ParameterType::Number),
                Parameter::optional("message", ParameterType::Sentence),
            ])
            .build(move |_, arguments| {
                record.lock().push((arguments.number(0), arguments.text(1).map(str::to_string)));
                true
            })
            .unwrap();

        let ctx = context(&sent, ":Ann!a@h PRIVMSG #echo :!announce");
        assert_eq!(manager.dispatch(&ctx, "!announce 10 hello there"), CommandOutcome::Executed(true));
        assert_eq!(manager.dispatch(&ctx, "!announce 10"), CommandOutcome::Executed(true));
        assert_eq!(manager.dispatch(&ctx, "!announce soon"), CommandOutcome::Invalid);
        assert_eq!(
            *seen.lock(),
            vec![(Some(10.0), Some("hello there".to_string())), (Some(10.0), None)]
        );
        assert_eq!(
            *sent.0.lock(),
            vec!["PRIVMSG #echo :\x02Usage\x02: !announce [seconds] [message?]"]
        );
    }

    #[test]
    fn context_levels_from_echo_channel() {
        let sent = Arc::new(Sent::default());
        let joe = context(&sent, ":Joe!j@h PRIVMSG #echo :!x");
        assert_eq!(joe.level(), Level::Administrator);
        assert!(joe.is_vip());
        assert!(joe.in_echo_channel());

        let ann = context(&sent, ":Ann!a@h PRIVMSG Nuwani :!x");
        assert_eq!(ann.level(), Level::Player);
        assert!(!ann.is_vip());
        assert_eq!(ann.target(), "Ann");
        assert!(!ann.in_echo_channel());
        assert!(!ann.is_owner());
    }
}
