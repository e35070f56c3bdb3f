//! IRC protocol line parsing and serialization.

use std::collections::HashMap;
use std::fmt;

/// Errors raised while parsing a single protocol line.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MessageError {
    #[error("empty line")]
    Empty,
    #[error("line has no command: {0:?}")]
    MissingCommand(String),
}

/// The origin of a message, taken from its `:prefix`.
///
/// Server-sourced messages carry only a hostname; user-sourced messages
/// carry a nickname and usually a username and hostname as well.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Source {
    pub nickname: Option<String>,
    pub username: Option<String>,
    pub hostname: Option<String>,
}

impl Source {
    /// Parse a prefix of the form `nick!user@host`, `nick@host`, `nick` or
    /// `server.name`.
    pub fn parse(prefix: &str) -> Self {
        let (rest, hostname) = match prefix.split_once('@') {
            Some((rest, host)) => (rest, Some(host.to_string())),
            None => (prefix, None),
        };
        let (nickname, username) = match rest.split_once('!') {
            Some((nick, user)) => (nick, Some(user.to_string())),
            None => (rest, None),
        };

        // A bare prefix with a dot in it is a server name.
        if hostname.is_none() && username.is_none() && nickname.contains('.') {
            return Self {
                nickname: None,
                username: None,
                hostname: Some(nickname.to_string()),
            };
        }

        Self {
            nickname: Some(nickname.to_string()),
            username,
            hostname,
        }
    }

    /// Whether this source is a server rather than a user.
    pub fn is_server(&self) -> bool {
        self.nickname.is_none()
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.nickname, &self.username, &self.hostname) {
            (Some(nick), Some(user), Some(host)) => write!(f, "{nick}!{user}@{host}"),
            (Some(nick), None, Some(host)) => write!(f, "{nick}@{host}"),
            (Some(nick), _, None) => write!(f, "{nick}"),
            (None, _, Some(host)) => write!(f, "{host}"),
            (None, _, None) => Ok(()),
        }
    }
}

/// One parsed IRC protocol line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Message {
    /// IRCv3 message tags (empty if none).
    pub tags: HashMap<String, String>,
    pub source: Option<Source>,
    /// The command, upper-cased. Numerics are kept as their three digits.
    pub command: String,
    pub params: Vec<String>,
}

impl Message {
    /// Build an outgoing message without tags or source.
    pub fn new(command: &str, params: Vec<String>) -> Self {
        Self {
            tags: HashMap::new(),
            source: None,
            command: command.to_string(),
            params,
        }
    }

    pub fn parse(line: &str) -> Result<Self, MessageError> {
        let mut rest = line.trim_end_matches(['\r', '\n']).trim_start_matches(' ');
        if rest.is_empty() {
            return Err(MessageError::Empty);
        }

        let mut tags = HashMap::new();
        if let Some(stripped) = rest.strip_prefix('@') {
            let (raw_tags, remainder) = stripped.split_once(' ').unwrap_or((stripped, ""));
            for tag in raw_tags.split(';').filter(|t| !t.is_empty()) {
                let (key, value) = tag.split_once('=').unwrap_or((tag, ""));
                tags.insert(key.to_string(), unescape_tag_value(value));
            }
            rest = remainder.trim_start_matches(' ');
        }

        let mut source = None;
        if let Some(stripped) = rest.strip_prefix(':') {
            let (prefix, remainder) = stripped.split_once(' ').unwrap_or((stripped, ""));
            source = Some(Source::parse(prefix));
            rest = remainder.trim_start_matches(' ');
        }

        let (command, mut rest) = rest.split_once(' ').unwrap_or((rest, ""));
        if command.is_empty() {
            return Err(MessageError::MissingCommand(line.to_string()));
        }

        let mut params = Vec::new();
        loop {
            rest = rest.trim_start_matches(' ');
            if rest.is_empty() {
                break;
            }
            if let Some(trailing) = rest.strip_prefix(':') {
                params.push(trailing.to_string());
                break;
            }
            match rest.split_once(' ') {
                Some((param, remainder)) => {
                    params.push(param.to_string());
                    rest = remainder;
                }
                None => {
                    params.push(rest.to_string());
                    break;
                }
            }
        }

        Ok(Self {
            tags,
            source,
            command: command.to_ascii_uppercase(),
            params,
        })
    }

    /// The nickname of the sender, if the message came from a user.
    pub fn nickname(&self) -> Option<&str> {
        self.source.as_ref().and_then(|s| s.nickname.as_deref())
    }
}

fn unescape_tag_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some(':') => out.push(';'),
            Some('s') => out.push(' '),
            Some('r') => out.push('\r'),
            Some('n') => out.push('\n'),
            Some(other) => out.push(other),
            None => {}
        }
    }
    out
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.tags.is_empty() {
            let mut tags: Vec<_> = self.tags.iter().collect();
            tags.sort();
            let joined: Vec<String> = tags
                .into_iter()
                .map(|(k, v)| if v.is_empty() { k.clone() } else { format!("{k}={v}") })
                .collect();
            write!(f, "@{} ", joined.join(";"))?;
        }
        if let Some(source) = &self.source {
            write!(f, ":{source} ")?;
        }
        f.write_str(&self.command)?;
        if let Some((last, middle)) = self.params.split_last() {
            for param in middle {
                write!(f, " {param}")?;
            }
            if last.is_empty() || last.contains(' ') || last.starts_with(':') {
                write!(f, " :{last}")?;
            } else {
                write!(f, " {last}")?;
            }
        }
        Ok(())
    }
}

/// Whether `name` is a channel name per protocol syntax.
pub fn is_channel_name(name: &str) -> bool {
    matches!(name.chars().next(), Some('#' | '&' | '+' | '!'))
}

/// Case-insensitive comparison of two nicknames or channel names, using the
/// RFC 1459 case mapping.
pub fn eq_ignore_case(a: &str, b: &str) -> bool {
    a.len() == b.len() && a.chars().zip(b.chars()).all(|(x, y)| fold(x) == fold(y))
}

/// Lower-case `name` using the RFC 1459 case mapping, for use as a map key.
pub fn fold_case(name: &str) -> String {
    name.chars().map(fold).collect()
}

fn fold(c: char) -> char {
    match c {
        '[' => '{',
        ']' => '}',
        '\\' => '|',
        '~' => '^',
        c => c.to_ascii_lowercase(),
    }
}
