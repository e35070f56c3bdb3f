//! The post-connect registration sequence.
//!
//! ```text
//! Idle --start()--> RegistrationSent --001--> RegistrationAcknowledged
//!                     |  ^                      |        |
//!                     +--+ 433/436              | 376    | 376 (password)
//!                      (retry nick)             v        v
//!                                             Idle <-- AwaitingPasswordRequest
//!                                                 (4s timeout, joins channels)
//! ```
//!
//! Messages that don't fit the current state are not handled, they are left
//! for whoever processes the line next. The only guaranteed way out of
//! `AwaitingPasswordRequest` is the timeout, since servers don't reliably
//! acknowledge the identification.

use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use rand::Rng;

use crate::config::{BotIdentity, ChannelConfig};
use crate::connection::LineWriter;
use crate::irc::{self, Message};

/// How long to wait for NickServ before joining channels regardless.
pub const PASSWORD_TIMEOUT: Duration = Duration::from_millis(4000);

/// Text NickServ sends when it wants us to identify.
pub const IDENTIFY_TRIGGER: &str = "This nickname is registered";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    Idle,
    RegistrationSent,
    RegistrationAcknowledged,
    AwaitingPasswordRequest,
    Disposed,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HandshakeError {
    #[error("handshake is already in progress ({0:?})")]
    AlreadyStarted(HandshakeState),
    #[error("handshake has been disposed")]
    Disposed,
}

/// The bot a handshake runs for.
pub trait HandshakeDelegate: LineWriter {
    /// All configured channels have been joined.
    fn on_handshake_completed(&self, nickname: &str);
}

struct Inner {
    state: HandshakeState,
    identity: BotIdentity,
    channels: Vec<ChannelConfig>,
    nickname: String,
    /// Bumped on every start/reset/dispose; pending timeouts compare it.
    generation: u64,
    delegate: Option<Arc<dyn HandshakeDelegate>>,
}

/// Side effects decided under the lock, performed after releasing it.
#[derive(Default)]
struct Effects {
    lines: Vec<String>,
    completed: Option<String>,
    password_timeout: Option<u64>,
}

impl Inner {
    fn join_channels(&mut self, effects: &mut Effects) {
        for channel in &self.channels {
            effects.lines.push(match &channel.password {
                Some(password) => format!("JOIN {} {}", channel.channel, password),
                None => format!("JOIN {}", channel.channel),
            });
        }
        self.state = HandshakeState::Idle;
        effects.completed = Some(self.nickname.clone());
    }

    fn suffixed_nickname(&self) -> String {
        let mut rng = rand::thread_rng();
        loop {
            let candidate = format!("{}{}", self.identity.nickname, rng.gen_range(1000..=9999));
            if candidate != self.nickname {
                return candidate;
            }
        }
    }
}

/// Drives one connection through NICK/USER registration, nickname collisions,
/// NickServ identification and channel joins.
pub struct ConnectionHandshake {
    inner: Arc<Mutex<Inner>>,
}

impl ConnectionHandshake {
    pub fn new(identity: BotIdentity, channels: Vec<ChannelConfig>, delegate: Arc<dyn HandshakeDelegate>) -> Self {
        let nickname = identity.nickname.clone();
        Self {
            inner: Arc::new(Mutex::new(Inner {
                state: HandshakeState::Idle,
                identity,
                channels,
                nickname,
                generation: 0,
                delegate: Some(delegate),
            })),
        }
    }

    pub fn state(&self) -> HandshakeState {
        self.inner.lock().state
    }

    /// The nickname we registered (or are trying to register) with.
    pub fn nickname(&self) -> String {
        self.inner.lock().nickname.clone()
    }

    pub fn is_active(&self) -> bool {
        !matches!(self.state(), HandshakeState::Idle | HandshakeState::Disposed)
    }

    /// Send the registration commands. Only valid from `Idle`.
    pub fn start(&self) -> Result<(), HandshakeError> {
        let mut effects = Effects::default();
        {
            let mut inner = self.inner.lock();
            match inner.state {
                HandshakeState::Idle => {}
                HandshakeState::Disposed => return Err(HandshakeError::Disposed),
                state => return Err(HandshakeError::AlreadyStarted(state)),
            }

            inner.generation += 1;
            inner.nickname = inner.identity.nickname.clone();
            inner.state = HandshakeState::RegistrationSent;
            effects.lines.push(format!("NICK {}", inner.nickname));
            effects.lines.push(format!("USER {} 0 * :{}", inner.nickname, inner.identity.realname));
            tracing::info!(nickname = %inner.nickname, "Registering");
        }
        self.apply(effects);
        Ok(())
    }

    /// Feed one received message. Returns whether the handshake consumed it.
    pub fn handle_message(&self, message: &Message) -> bool {
        let mut effects = Effects::default();
        let handled = {
            let mut inner = self.inner.lock();
            match (inner.state, message.command.as_str()) {
                (HandshakeState::RegistrationSent, "433" | "436") => {
                    let nickname = inner.suffixed_nickname();
                    tracing::info!(rejected = %inner.nickname, nickname = %nickname, "Nickname in use, retrying");
                    inner.nickname = nickname;
                    effects.lines.push(format!("NICK {}", inner.nickname));
                    true
                }
                (HandshakeState::RegistrationSent, "001") => {
                    if let Some(nickname) = message.params.first() {
                        inner.nickname = nickname.clone();
                    }
                    inner.state = HandshakeState::RegistrationAcknowledged;
                    tracing::info!(nickname = %inner.nickname, "Registered");
                    true
                }
                (HandshakeState::RegistrationAcknowledged, "004") => {
                    if message.params.get(3).is_some_and(|modes| modes.contains('B')) {
                        effects.lines.push(format!("MODE {} +B", inner.nickname));
                    }
                    true
                }
                (HandshakeState::RegistrationAcknowledged, "376" | "422") => {
                    if inner.identity.password.is_some() {
                        inner.state = HandshakeState::AwaitingPasswordRequest;
                        effects.password_timeout = Some(inner.generation);
                    } else {
                        inner.join_channels(&mut effects);
                    }
                    true
                }
                (HandshakeState::AwaitingPasswordRequest, "NOTICE") => {
                    let from_nickserv = message.nickname().is_some_and(|n| irc::eq_ignore_case(n, "NickServ"));
                    let asks_identify = message.params.last().is_some_and(|text| text.contains(IDENTIFY_TRIGGER));
                    if !(from_nickserv && asks_identify) {
                        false
                    } else {
                        match &inner.identity.password {
                            Some(password) => {
                                tracing::info!("Identifying with NickServ");
                                effects.lines.push(format!("PRIVMSG NickServ :IDENTIFY {password}"));
                            }
                            None => tracing::warn!("NickServ asked to identify, but no password is configured"),
                        }
                        true
                    }
                }
                _ => false,
            }
        };
        self.apply(effects);
        handled
    }

    /// Return to `Idle`, e.g. after the connection was lost.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        if inner.state != HandshakeState::Disposed {
            inner.state = HandshakeState::Idle;
            inner.generation += 1;
        }
    }

    /// Terminal: no message will be handled after this.
    pub fn dispose(&self) {
        let mut inner = self.inner.lock();
        inner.state = HandshakeState::Disposed;
        inner.generation += 1;
        inner.delegate = None;
    }

    fn on_password_timeout(&self, generation: u64) {
        let mut effects = Effects::default();
        {
            let mut inner = self.inner.lock();
            if inner.generation != generation || inner.state != HandshakeState::AwaitingPasswordRequest {
                return;
            }
            tracing::debug!("Password timeout elapsed, joining channels");
            inner.join_channels(&mut effects);
        }
        self.apply(effects);
    }

    fn apply(&self, effects: Effects) {
        let Some(delegate) = self.inner.lock().delegate.clone() else {
            return;
        };

        for line in &effects.lines {
            if let Err(e) = delegate.write(line) {
                tracing::warn!(error = %e, line = %line, "Handshake write failed");
            }
        }
        if let Some(nickname) = effects.completed {
            delegate.on_handshake_completed(&nickname);
        }
        if let Some(generation) = effects.password_timeout {
            let weak: Weak<Mutex<Inner>> = Arc::downgrade(&self.inner);
            tokio::spawn(async move {
                tokio::time::sleep(PASSWORD_TIMEOUT).await;
                if let Some(inner) = weak.upgrade() {
                    ConnectionHandshake { inner }.on_password_timeout(generation);
                }
            });
        }
    }
}
