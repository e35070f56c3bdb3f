//! One bot: a connection, its handshake, and the command loop on top.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::backoff::ExponentialBackoff;
use crate::channels::{ChannelTracker, DEFAULT_PREFIX};
use crate::command::{CommandContext, CommandManager, CommandOutcome};
use crate::config::Configuration;
use crate::connection::{Connection, ConnectionError, ConnectionFactory, Dialer, LineWriter};
use crate::event::{Event, EventForwarder, HandshakeSink};
use crate::handshake::{ConnectionHandshake, HandshakeState};
use crate::irc::{self, Message};
use crate::mode::{ModeError, ModeParser};

#[derive(Debug, thiserror::Error)]
pub enum BotError {
    #[error("the bot is already running")]
    AlreadyRunning,
}

/// A snapshot of what the bot is up to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BotStatus {
    pub nickname: String,
    pub connected: bool,
    pub registered: bool,
    pub channels: Vec<String>,
}

/// State belonging to the current connection; rebuilt on every connect.
struct Session {
    nickname: String,
    registered: bool,
    /// Last `PREFIX` value, [`DEFAULT_PREFIX`] until the server sends one.
    prefix: String,
    chanmodes: Option<String>,
    modes: ModeParser,
    channels: ChannelTracker,
}

impl Session {
    fn new(nickname: &str) -> Self {
        Self {
            nickname: nickname.to_string(),
            registered: false,
            prefix: DEFAULT_PREFIX.to_string(),
            chanmodes: None,
            modes: mode_parser(DEFAULT_PREFIX, None).unwrap_or_default(),
            channels: ChannelTracker::new(),
        }
    }
}

/// A parser for the given `PREFIX` and (optional) `CHANMODES` values.
fn mode_parser(prefix: &str, chanmodes: Option<&str>) -> Result<ModeParser, ModeError> {
    let mut parser = ModeParser::new();
    parser.set_channel_prefixes(prefix)?;
    if let Some(chanmodes) = chanmodes {
        parser.set_channel_modes(chanmodes)?;
    }
    Ok(parser)
}

struct Shared {
    config: Configuration,
    connection: Arc<Connection>,
    handshake: ConnectionHandshake,
    commands: CommandManager,
    session: Mutex<Session>,
    events_tx: mpsc::UnboundedSender<Event>,
    events: Mutex<Option<mpsc::UnboundedReceiver<Event>>>,
}

/// Handle to a bot. Cheap to clone; command listeners usually hold one.
#[derive(Clone)]
pub struct Bot {
    shared: Arc<Shared>,
}

impl Bot {
    pub fn new(
        factory: &ConnectionFactory,
        config: Configuration,
        commands: CommandManager,
        dialer: Arc<dyn Dialer>,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let connection = factory.create(
            config.servers.clone(),
            Box::new(ExponentialBackoff::new(config.backoff)),
            dialer,
            Arc::new(EventForwarder::new(events_tx.clone())),
        );
        let handshake = ConnectionHandshake::new(
            config.bot.clone(),
            config.channels.clone(),
            Arc::new(HandshakeSink::new(Arc::clone(&connection), events_tx.clone())),
        );

        Self {
            shared: Arc::new(Shared {
                session: Mutex::new(Session::new(&config.bot.nickname)),
                config,
                connection,
                handshake,
                commands,
                events_tx,
                events: Mutex::new(Some(events_rx)),
            }),
        }
    }

    pub fn config(&self) -> &Configuration {
        &self.shared.config
    }

    pub fn commands(&self) -> &CommandManager {
        &self.shared.commands
    }

    pub fn status(&self) -> BotStatus {
        let session = self.shared.session.lock();
        BotStatus {
            nickname: session.nickname.clone(),
            connected: self.shared.connection.is_connected(),
            registered: session.registered,
            channels: session.channels.channels(),
        }
    }

    /// Connect and process events until [`Bot::shutdown`] is called.
    pub async fn run(&self) -> Result<(), BotError> {
        let mut events = self.shared.events.lock().take().ok_or(BotError::AlreadyRunning)?;

        self.spawn_connect();
        while let Some(event) = events.recv().await {
            if !self.handle_event(event) {
                break;
            }
        }

        tracing::info!(connection = self.shared.connection.id(), "Bot stopped");
        Ok(())
    }

    /// Send `text` to the echo channel, one `PRIVMSG` per line. Dropped
    /// when not connected.
    pub fn echo(&self, tag: &str, text: &str) {
        for line in text.split(['\r', '\n']).filter(|l| !l.trim().is_empty()) {
            let line = format!("PRIVMSG {} :{}", self.shared.config.echo_channel, line);
            match self.write(&line) {
                Ok(()) => tracing::trace!(tag, "Echoed"),
                Err(e) => tracing::debug!(tag, error = %e, "Dropped echo message"),
            }
        }
    }

    /// Send a raw protocol line.
    pub fn write(&self, line: &str) -> Result<(), ConnectionError> {
        self.shared.connection.write(line)
    }

    /// Say goodbye, disconnect and stop [`Bot::run`]. Final.
    pub fn shutdown(&self) {
        tracing::info!(connection = self.shared.connection.id(), "Shutting down");
        let _ = self.write("QUIT :Shutting down");
        self.shared.handshake.dispose();
        self.shared.connection.disconnect();
        let _ = self.shared.events_tx.send(Event::Shutdown);
    }

    fn spawn_connect(&self) {
        let connection = Arc::clone(&self.shared.connection);
        tokio::spawn(async move {
            if let Err(e) = connection.connect().await {
                tracing::warn!(connection = connection.id(), error = %e, "Unable to connect");
            }
        });
    }

    /// Returns `false` once the loop should stop.
    fn handle_event(&self, event: Event) -> bool {
        match event {
            Event::Connected => {
                *self.shared.session.lock() = Session::new(&self.shared.config.bot.nickname);
                if let Err(e) = self.shared.handshake.start() {
                    tracing::warn!(error = %e, "Unable to start the handshake");
                }
            }
            Event::ConnectFailed => {
                tracing::debug!(connection = self.shared.connection.id(), "Retrying connection");
            }
            Event::Disconnected => {
                if self.shared.handshake.state() == HandshakeState::Disposed {
                    return false;
                }
                self.shared.handshake.reset();
                {
                    let mut session = self.shared.session.lock();
                    session.registered = false;
                    session.channels.clear();
                }
                tracing::info!(connection = self.shared.connection.id(), "Connection lost, reconnecting");
                self.spawn_connect();
            }
            Event::Line(line) => self.handle_line(&line),
            Event::Registered { nickname } => {
                tracing::info!(nickname = %nickname, "Handshake complete");
                let mut session = self.shared.session.lock();
                session.nickname = nickname;
                session.registered = true;
            }
            Event::Shutdown => return false,
        }
        true
    }

    fn handle_line(&self, line: &str) {
        let message = match Message::parse(line) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(error = %e, line = %line, "Skipping malformed line");
                return;
            }
        };

        if message.command == "PING" {
            let _ = self.write(&Message::new("PONG", message.params).to_string());
            return;
        }

        if self.shared.handshake.handle_message(&message) {
            self.shared.session.lock().nickname = self.shared.handshake.nickname();
            return;
        }

        match message.command.as_str() {
            "005" => self.apply_isupport(&message),
            "353" | "JOIN" | "PART" | "KICK" | "QUIT" | "NICK" => {
                let mut session = self.shared.session.lock();
                let own = session.nickname.clone();
                session.channels.handle_message(&own, &message);

                if message.command == "NICK" && message.nickname().is_some_and(|n| irc::eq_ignore_case(n, &own)) {
                    if let Some(nickname) = message.params.first() {
                        tracing::info!(nickname = %nickname, "Nickname changed");
                        session.nickname = nickname.clone();
                    }
                }
            }
            "MODE" => self.apply_mode(&message),
            "PRIVMSG" => self.dispatch_command(&message),
            _ => {}
        }
    }

    fn apply_isupport(&self, message: &Message) {
        let mut guard = self.shared.session.lock();
        let session = &mut *guard;
        for token in message.params.iter().skip(1) {
            // The parser is rebuilt from both values so that PREFIX replaces
            // the default flags rather than clashing with them.
            let result = match token.split_once('=') {
                Some(("PREFIX", value)) => mode_parser(value, session.chanmodes.as_deref()).and_then(|parser| {
                    session.channels.set_prefixes(value)?;
                    session.modes = parser;
                    session.prefix = value.to_string();
                    Ok(())
                }),
                Some(("CHANMODES", value)) => mode_parser(&session.prefix, Some(value)).map(|parser| {
                    session.modes = parser;
                    session.chanmodes = Some(value.to_string());
                }),
                _ => Ok(()),
            };
            if let Err(e) = result {
                tracing::warn!(error = %e, token = %token, "Ignoring ISUPPORT token");
            }
        }
    }

    fn apply_mode(&self, message: &Message) {
        let Some(target) = message.params.first() else {
            return;
        };
        if !irc::is_channel_name(target) {
            return;
        }

        let mut session = self.shared.session.lock();
        let parsed = session.modes.parse(message);
        match parsed {
            Ok(parsed) => session.channels.apply_modes(target, &parsed),
            Err(e) => tracing::warn!(error = %e, line = %message, "Unable to parse MODE"),
        }
    }

    fn dispatch_command(&self, message: &Message) {
        let Some(text) = message.params.get(1) else {
            return;
        };
        if !text.starts_with(self.shared.commands.prefix()) {
            return;
        }

        let writer: Arc<dyn LineWriter> = Arc::clone(&self.shared.connection) as Arc<dyn LineWriter>;
        let context = {
            let session = self.shared.session.lock();
            CommandContext::for_message(writer, message, &self.shared.config, &session.channels)
        };
        let Some(context) = context else {
            return;
        };

        // The session lock is released; listeners may call back into the bot.
        if let CommandOutcome::UnknownCommand(name) = self.shared.commands.dispatch(&context, text) {
            tracing::debug!(command = %name, nickname = ?context.nickname(), "Unknown command");
        }
    }
}
