//! Membership and status-mode bookkeeping for the channels we are in.

use std::collections::HashMap;

use crate::irc::{self, Message};
use crate::mode::{self, ModeError, ParsedModes};

/// Used until the server advertises its own `PREFIX`.
pub const DEFAULT_PREFIX: &str = "(ov)@+";

#[derive(Debug, Clone)]
struct Member {
    nickname: String,
    /// Status flags, kept in `PREFIX` rank order.
    modes: String,
}

#[derive(Debug, Clone)]
struct Channel {
    name: String,
    members: HashMap<String, Member>,
}

impl Channel {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            members: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChannelTracker {
    /// `(flag, symbol)` pairs, highest rank first.
    prefixes: Vec<(char, char)>,
    channels: HashMap<String, Channel>,
}

impl Default for ChannelTracker {
    fn default() -> Self {
        Self {
            prefixes: vec![('o', '@'), ('v', '+')],
            channels: HashMap::new(),
        }
    }
}

impl ChannelTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a `PREFIX` value such as `(qaohv)~&@%+`.
    pub fn set_prefixes(&mut self, prefixes: &str) -> Result<(), ModeError> {
        let (flags, symbols) = mode::split_prefix(prefixes)?;
        self.prefixes = flags.chars().zip(symbols.chars()).collect();
        Ok(())
    }

    pub fn is_status_flag(&self, flag: char) -> bool {
        self.prefixes.iter().any(|&(f, _)| f == flag)
    }

    /// Names of the channels we are currently in.
    pub fn channels(&self) -> Vec<String> {
        let mut names: Vec<String> = self.channels.values().map(|c| c.name.clone()).collect();
        names.sort();
        names
    }

    pub fn is_member(&self, channel: &str, nickname: &str) -> bool {
        self.channels
            .get(&irc::fold_case(channel))
            .is_some_and(|c| c.members.contains_key(&irc::fold_case(nickname)))
    }

    /// Status flags `nickname` holds in `channel`, or `None` if they aren't in it.
    pub fn modes_of(&self, channel: &str, nickname: &str) -> Option<&str> {
        self.channels
            .get(&irc::fold_case(channel))?
            .members
            .get(&irc::fold_case(nickname))
            .map(|m| m.modes.as_str())
    }

    pub fn clear(&mut self) {
        self.channels.clear();
    }

    /// Update membership from a `353`, `JOIN`, `PART`, `KICK`, `QUIT` or `NICK`.
    /// `own_nickname` is the nickname we are currently known by.
    pub fn handle_message(&mut self, own_nickname: &str, message: &Message) {
        let params = &message.params;
        match message.command.as_str() {
            "353" => {
                // :server 353 <me> <type> <channel> :<names>
                let (Some(channel), Some(names)) = (params.get(2), params.get(3)) else {
                    return;
                };
                for entry in names.split_whitespace() {
                    let (modes, nickname) = self.split_status_symbols(entry);
                    // userhost-in-names sends nick!user@host
                    let nickname = nickname.split('!').next().unwrap_or(nickname);
                    self.add_member(channel, nickname, modes);
                }
            }
            "JOIN" => {
                let (Some(nickname), Some(channel)) = (message.nickname(), params.first()) else {
                    return;
                };
                if irc::eq_ignore_case(nickname, own_nickname) {
                    tracing::info!(channel = %channel, "Joined channel");
                    self.channels.insert(irc::fold_case(channel), Channel::new(channel));
                }
                self.add_member(channel, nickname, String::new());
            }
            "PART" => {
                if let (Some(nickname), Some(channel)) = (message.nickname(), params.first()) {
                    self.remove_member(own_nickname, channel, nickname);
                }
            }
            "KICK" => {
                if let (Some(channel), Some(nickname)) = (params.first(), params.get(1)) {
                    self.remove_member(own_nickname, channel, nickname);
                }
            }
            "QUIT" => {
                if let Some(nickname) = message.nickname() {
                    let key = irc::fold_case(nickname);
                    for channel in self.channels.values_mut() {
                        channel.members.remove(&key);
                    }
                }
            }
            "NICK" => {
                let (Some(old), Some(new)) = (message.nickname(), params.first()) else {
                    return;
                };
                let old_key = irc::fold_case(old);
                for channel in self.channels.values_mut() {
                    if let Some(mut member) = channel.members.remove(&old_key) {
                        member.nickname = new.clone();
                        channel.members.insert(irc::fold_case(new), member);
                    }
                }
            }
            _ => {}
        }
    }

    /// Apply the status-flag part of a parsed channel `MODE`.
    pub fn apply_modes(&mut self, channel: &str, modes: &ParsedModes) {
        let ranks: Vec<char> = self.prefixes.iter().map(|&(flag, _)| flag).collect();
        let Some(channel) = self.channels.get_mut(&irc::fold_case(channel)) else {
            return;
        };

        for (setting, change) in &modes.changes {
            if !ranks.contains(&change.flag) {
                continue;
            }
            let Some(member) = change
                .param
                .as_deref()
                .and_then(|nickname| channel.members.get_mut(&irc::fold_case(nickname)))
            else {
                continue;
            };

            if *setting {
                if !member.modes.contains(change.flag) {
                    member.modes.push(change.flag);
                    member.modes = ranks.iter().filter(|f| member.modes.contains(**f)).collect();
                }
            } else {
                member.modes.retain(|f| f != change.flag);
            }
        }
    }

    fn split_status_symbols<'a>(&self, entry: &'a str) -> (String, &'a str) {
        let mut modes = String::new();
        let mut rest = entry;
        while let Some(symbol) = rest.chars().next() {
            let Some(&(flag, _)) = self.prefixes.iter().find(|&&(_, s)| s == symbol) else {
                break;
            };
            modes.push(flag);
            rest = &rest[symbol.len_utf8()..];
        }
        (modes, rest)
    }

    fn add_member(&mut self, channel: &str, nickname: &str, modes: String) {
        let Some(channel) = self.channels.get_mut(&irc::fold_case(channel)) else {
            return;
        };
        channel.members.insert(
            irc::fold_case(nickname),
            Member {
                nickname: nickname.to_string(),
                modes,
            },
        );
    }

    fn remove_member(&mut self, own_nickname: &str, channel: &str, nickname: &str) {
        let key = irc::fold_case(channel);
        if irc::eq_ignore_case(nickname, own_nickname) {
            if self.channels.remove(&key).is_some() {
                tracing::info!(channel = %channel, "Left channel");
            }
        } else if let Some(channel) = self.channels.get_mut(&key) {
            channel.members.remove(&irc::fold_case(nickname));
        }
    }
}
