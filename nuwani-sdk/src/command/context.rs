use std::sync::Arc;

use crate::channels::ChannelTracker;
use crate::config::{Configuration, Level};
use crate::connection::LineWriter;
use crate::irc::{self, Message, Source};

/// Mode that makes someone a VIP on its own.
const VOICE_MODE: char = 'v';

/// Who sent a command, where to, and what they are allowed to do.
///
/// Computed once per incoming chat message through
/// [`CommandContext::for_message`], the only way to make one.
pub struct CommandContext {
    writer: Arc<dyn LineWriter>,
    source: Option<Source>,
    target: String,
    level: Level,
    in_echo_channel: bool,
    owner: bool,
    vip: bool,
}

impl CommandContext {
    /// Returns `None` for messages without a target.
    pub fn for_message(
        writer: Arc<dyn LineWriter>,
        message: &Message,
        configuration: &Configuration,
        channels: &ChannelTracker,
    ) -> Option<Self> {
        let recipient = message.params.first()?;
        let nickname = message.nickname();

        let target = match nickname {
            Some(nickname) if !irc::is_channel_name(recipient) => nickname.to_string(),
            _ => recipient.clone(),
        };
        let in_echo_channel = irc::eq_ignore_case(&target, &configuration.echo_channel);

        let modes = nickname
            .and_then(|n| channels.modes_of(&configuration.echo_channel, n))
            .unwrap_or_default();
        let level = configuration
            .levels
            .iter()
            .find(|mapping| modes.contains(mapping.flag()))
            .map(|mapping| mapping.level)
            .unwrap_or(Level::Player);
        let vip = modes.contains(VOICE_MODE) || level > Level::Player;

        let owner = message
            .source
            .as_ref()
            .is_some_and(|source| configuration.owners.iter().any(|owner| owner.matches(source)));

        Some(Self {
            writer,
            source: message.source.clone(),
            target,
            level,
            in_echo_channel,
            owner,
            vip,
        })
    }

    pub fn level(&self) -> Level {
        self.level
    }

    /// The channel the message was sent to, or the sender for private messages.
    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn nickname(&self) -> Option<&str> {
        self.source.as_ref().and_then(|s| s.nickname.as_deref())
    }

    pub fn source(&self) -> Option<&Source> {
        self.source.as_ref()
    }

    pub fn in_echo_channel(&self) -> bool {
        self.in_echo_channel
    }

    pub fn is_owner(&self) -> bool {
        self.owner
    }

    pub fn is_vip(&self) -> bool {
        self.vip
    }

    /// Reply to wherever the command came from, one `PRIVMSG` per line.
    pub fn respond(&self, text: &str) {
        for line in text.split(['\r', '\n']).filter(|l| !l.trim().is_empty()) {
            self.write(&format!("PRIVMSG {} :{}", self.target, line));
        }
    }

    pub fn respond_with_usage(&self, usage: &str) {
        self.respond(&format!("\x02Usage\x02: {usage}"));
    }

    pub fn respond_with_error(&self, error: &str) {
        self.respond(&format!("\x0304Error\x03: {error}"));
    }

    /// Send a raw protocol line.
    pub fn write(&self, line: &str) {
        if let Err(e) = self.writer.write(line) {
            tracing::warn!(error = %e, target = %self.target, "Unable to send command response");
        }
    }
}
