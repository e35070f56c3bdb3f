//! Bot configuration.
//!
//! Loaded once at startup from a TOML file, read-only afterwards:
//!
//! ```toml
//! command_prefix = "!"
//! echo_channel = "#LVP.echo"
//!
//! [bot]
//! nickname = "Nuwani"
//! password = "hunter2"
//!
//! [[servers]]
//! ip = "irc.gtanet.com"
//! port = 6667
//!
//! [[channels]]
//! channel = "#LVP.echo"
//!
//! [[levels]]
//! mode = "a"
//! level = "management"
//!
//! [[owners]]
//! nickname = "*"
//! username = "*"
//! hostname = "lvp.dev"
//! ```

use std::fmt;
use std::path::Path;

use serde::Deserialize;

use crate::backoff::BackoffConfig;
use crate::irc;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("can't read configuration: {0}")]
    Io(#[from] std::io::Error),
    #[error("bad configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// One failover endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Server {
    pub ip: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_port() -> u16 {
    6667
}

impl fmt::Display for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

/// Credentials used during the handshake.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BotIdentity {
    pub nickname: String,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_realname")]
    pub realname: String,
}

fn default_realname() -> String {
    "Nuwani".to_string()
}

impl BotIdentity {
    pub fn new(nickname: &str, password: Option<&str>) -> Self {
        Self {
            nickname: nickname.to_string(),
            password: password.map(str::to_string),
            realname: default_realname(),
        }
    }
}

/// A channel to join once registered.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ChannelConfig {
    pub channel: String,
    #[serde(default)]
    pub password: Option<String>,
}

impl ChannelConfig {
    pub fn new(channel: &str, password: Option<&str>) -> Self {
        Self {
            channel: channel.to_string(),
            password: password.map(str::to_string),
        }
    }
}

/// Permission levels, ordered from least to most privileged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Player,
    Administrator,
    Management,
}

impl Level {
    /// Plural audience name, as used in "only available to ...".
    pub fn audience(self) -> &'static str {
        match self {
            Level::Player => "players",
            Level::Administrator => "administrators",
            Level::Management => "Management members",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Level::Player => "player",
            Level::Administrator => "administrator",
            Level::Management => "management",
        })
    }
}

/// Channel status mode → permission level, in priority order.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LevelMapping {
    pub mode: String,
    pub level: Level,
}

impl LevelMapping {
    pub fn new(mode: char, level: Level) -> Self {
        Self { mode: mode.to_string(), level }
    }

    /// The mode flag. Validated to be exactly one character on load.
    pub fn flag(&self) -> char {
        self.mode.chars().next().unwrap_or_default()
    }
}

/// A bot owner. Any field may be `*` to match everything.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Owner {
    #[serde(default = "wildcard")]
    pub nickname: String,
    #[serde(default = "wildcard")]
    pub username: String,
    #[serde(default = "wildcard")]
    pub hostname: String,
}

fn wildcard() -> String {
    "*".to_string()
}

impl Owner {
    pub fn new(nickname: &str, username: &str, hostname: &str) -> Self {
        Self {
            nickname: nickname.to_string(),
            username: username.to_string(),
            hostname: hostname.to_string(),
        }
    }

    pub fn matches(&self, source: &irc::Source) -> bool {
        fn field(pattern: &str, value: Option<&str>) -> bool {
            pattern == "*" || value.is_some_and(|v| v.eq_ignore_ascii_case(pattern))
        }
        field(&self.nickname, source.nickname.as_deref())
            && field(&self.username, source.username.as_deref())
            && field(&self.hostname, source.hostname.as_deref())
    }
}

/// The complete configuration of one bot.
#[derive(Debug, Clone, Deserialize)]
pub struct Configuration {
    pub servers: Vec<Server>,
    pub bot: BotIdentity,
    #[serde(default)]
    pub channels: Vec<ChannelConfig>,
    #[serde(default = "default_prefix")]
    pub command_prefix: String,
    pub echo_channel: String,
    #[serde(default)]
    pub levels: Vec<LevelMapping>,
    #[serde(default)]
    pub owners: Vec<Owner>,
    #[serde(default)]
    pub backoff: BackoffConfig,
}

fn default_prefix() -> String {
    "!".to_string()
}

impl Configuration {
    /// Read and validate the configuration file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// A minimal configuration, mostly useful for tests.
    pub fn new(nickname: &str, echo_channel: &str) -> Self {
        Self {
            servers: vec![Server { ip: "127.0.0.1".to_string(), port: default_port() }],
            bot: BotIdentity::new(nickname, None),
            channels: vec![ChannelConfig::new(echo_channel, None)],
            command_prefix: default_prefix(),
            echo_channel: echo_channel.to_string(),
            levels: Vec::new(),
            owners: Vec::new(),
            backoff: BackoffConfig::default(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.servers.is_empty() {
            return Err(ConfigError::Invalid("at least one server is required".into()));
        }
        if self.bot.nickname.trim().is_empty() || self.bot.nickname.contains(' ') {
            return Err(ConfigError::Invalid(format!("bad nickname {:?}", self.bot.nickname)));
        }
        if self.command_prefix.is_empty() {
            return Err(ConfigError::Invalid("command_prefix must not be empty".into()));
        }
        if !irc::is_channel_name(&self.echo_channel) {
            return Err(ConfigError::Invalid(format!("{:?} is not a channel", self.echo_channel)));
        }
        for channel in &self.channels {
            if !irc::is_channel_name(&channel.channel) {
                return Err(ConfigError::Invalid(format!("{:?} is not a channel", channel.channel)));
            }
        }
        for mapping in &self.levels {
            if mapping.mode.chars().count() != 1 {
                return Err(ConfigError::Invalid(format!(
                    "level mode {:?} must be a single character",
                    mapping.mode
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r##"
        command_prefix = "!"
        echo_channel = "#LVP.echo"

        [bot]
        nickname = "Nuwani"
        password = "hunter2"

        [[servers]]
        ip = "irc.gtanet.com"

        [[servers]]
        ip = "irc.lvp.dev"
        port = 6697

        [[channels]]
        channel = "#LVP.echo"

        [[channels]]
        channel = "#LVP.crew"
        password = "secret"

        [[levels]]
        mode = "a"
        level = "management"

        [[levels]]
        mode = "o"
        level = "administrator"

        [[owners]]
        hostname = "lvp.dev"

        [backoff]
        max_delay_ms = 60000
    "##;

    #[test]
    fn parses_sample() {
        let config = Configuration::from_toml_str(SAMPLE).unwrap();
        assert_eq!(config.servers.len(), 2);
        assert_eq!(config.servers[0].port, 6667);
        assert_eq!(config.servers[1].to_string(), "irc.lvp.dev:6697");
        assert_eq!(config.bot.password.as_deref(), Some("hunter2"));
        assert_eq!(config.channels[1].password.as_deref(), Some("secret"));
        assert_eq!(config.levels[0].flag(), 'a');
        assert_eq!(config.levels[1].level, Level::Administrator);
        assert_eq!(config.owners[0].nickname, "*");
        assert_eq!(config.backoff.max_delay_ms, 60_000);
        assert_eq!(config.backoff.initial_delay_ms, 1_000);
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        let config = Configuration::load(file.path()).unwrap();
        assert_eq!(config.bot.nickname, "Nuwani");
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = Configuration::load("/nonexistent/nuwani.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }

    #[test]
    fn rejects_invalid_settings() {
        let no_servers = SAMPLE.replace("[[servers]]", "[[unused]]");
        assert!(Configuration::from_toml_str(&no_servers).is_err());

        let bad_echo = SAMPLE.replace("echo_channel = \"#LVP.echo\"", "echo_channel = \"LVP\"");
        assert!(matches!(Configuration::from_toml_str(&bad_echo), Err(ConfigError::Invalid(_))));

        let bad_mode = SAMPLE.replace("mode = \"a\"", "mode = \"ab\"");
        assert!(matches!(Configuration::from_toml_str(&bad_mode), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn levels_are_ordered() {
        assert!(Level::Management > Level::Administrator);
        assert!(Level::Administrator > Level::Player);
        assert_eq!(Level::Administrator.audience(), "administrators");
    }

    #[test]
    fn owner_wildcards() {
        let source = irc::Source::parse("Russell!russell@lvp.dev");
        assert!(Owner::new("*", "*", "lvp.dev").matches(&source));
        assert!(Owner::new("russell", "*", "*").matches(&source));
        assert!(!Owner::new("*", "*", "example.com").matches(&source));
        assert!(Owner::new("*", "*", "*").matches(&irc::Source::parse("irc.gtanet.com")));
    }
}
