//! Typed command parameters and the players they can refer to.

use std::fmt;

/// How a parameter or typed sub-command consumes input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParameterType {
    /// A leading signed number, e.g. `-12` or `3.5`.
    Number,
    /// One whitespace-delimited token.
    Word,
    /// Everything that's left, trimmed.
    Sentence,
    /// A connected player, by id, name or partial name.
    Player,
}

impl fmt::Display for ParameterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ParameterType::Number => "number",
            ParameterType::Word => "word",
            ParameterType::Sentence => "message",
            ParameterType::Player => "player",
        })
    }
}

/// A connected player, as known to the game.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Player {
    pub id: u32,
    pub name: String,
}

impl Player {
    pub fn new(id: u32, name: &str) -> Self {
        Self { id, name: name.to_string() }
    }
}

/// Supplied by the embedding game; lists who is online right now.
pub trait PlayerDirectory: Send + Sync {
    fn players(&self) -> Vec<Player>;

    /// Resolve user input: numeric id, then exact name (case-insensitive),
    /// then a name containing the input, provided exactly one does.
    fn find(&self, input: &str) -> Option<Player> {
        let players = self.players();
        if let Ok(id) = input.parse::<u32>() {
            if let Some(player) = players.iter().find(|p| p.id == id) {
                return Some(player.clone());
            }
        }

        if let Some(player) = players.iter().find(|p| p.name.eq_ignore_ascii_case(input)) {
            return Some(player.clone());
        }

        let needle = input.to_lowercase();
        let mut partial = players.iter().filter(|p| p.name.to_lowercase().contains(&needle));
        match (partial.next(), partial.next()) {
            (Some(player), None) => Some(player.clone()),
            _ => None,
        }
    }
}

/// A directory without anybody in it.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoPlayers;

impl PlayerDirectory for NoPlayers {
    fn players(&self) -> Vec<Player> {
        Vec::new()
    }
}

/// A parsed parameter value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Number(f64),
    Word(String),
    Sentence(String),
    Player(Player),
}

impl Value {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// The text of a word or sentence.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Word(s) | Value::Sentence(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_player(&self) -> Option<&Player> {
        match self {
            Value::Player(p) => Some(p),
            _ => None,
        }
    }
}

/// Result of trying one parameter type against the input.
#[derive(Debug, PartialEq)]
pub(crate) enum Parsed<'a> {
    NoMatch,
    /// The value and the unconsumed input after it.
    Matched(Value, &'a str),
    /// The input was meant for this parameter but can't be used.
    Error(String),
}

impl ParameterType {
    pub(crate) fn parse<'a>(self, input: &'a str, players: &dyn PlayerDirectory) -> Parsed<'a> {
        let input = input.trim_start();
        if input.is_empty() {
            return Parsed::NoMatch;
        }

        let (token, rest) = match input.split_once(char::is_whitespace) {
            Some((token, rest)) => (token, rest.trim_start()),
            None => (input, ""),
        };

        match self {
            ParameterType::Number => match parse_number(token) {
                Some(number) => Parsed::Matched(Value::Number(number), rest),
                None => Parsed::NoMatch,
            },
            ParameterType::Word => Parsed::Matched(Value::Word(token.to_string()), rest),
            ParameterType::Sentence => Parsed::Matched(Value::Sentence(input.trim_end().to_string()), ""),
            ParameterType::Player => match players.find(token) {
                Some(player) => Parsed::Matched(Value::Player(player), rest),
                None => Parsed::Error(format!("no player could be found for \"{token}\"")),
            },
        }
    }
}

/// `[+-]digits[.digits]`, nothing else.
fn parse_number(token: &str) -> Option<f64> {
    let unsigned = token.strip_prefix(['-', '+']).unwrap_or(token);
    let (whole, fraction) = match unsigned.split_once('.') {
        Some((whole, fraction)) => (whole, Some(fraction)),
        None => (unsigned, None),
    };

    let digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
    if !digits(whole) || fraction.is_some_and(|f| !digits(f)) {
        return None;
    }
    token.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Online(Vec<Player>);

    impl PlayerDirectory for Online {
        fn players(&self) -> Vec<Player> {
            self.0.clone()
        }
    }

    fn online() -> Online {
        Online(vec![
            Player::new(0, "Russell"),
            Player::new(4, "Luce"),
            Player::new(12, "Lucy"),
            Player::new(33, "[BB]Ricky92"),
        ])
    }

    #[test]
    fn numbers() {
        let players = NoPlayers;
        assert_eq!(
            ParameterType::Number.parse("-12.5 rest here", &players),
            Parsed::Matched(Value::Number(-12.5), "rest here")
        );
        assert_eq!(ParameterType::Number.parse("+3", &players), Parsed::Matched(Value::Number(3.0), ""));
        assert_eq!(ParameterType::Number.parse("12abc", &players), Parsed::NoMatch);
        assert_eq!(ParameterType::Number.parse("inf", &players), Parsed::NoMatch);
        assert_eq!(ParameterType::Number.parse("1.", &players), Parsed::NoMatch);
        assert_eq!(ParameterType::Number.parse("", &players), Parsed::NoMatch);
    }

    #[test]
    fn words_and_sentences() {
        let players = NoPlayers;
        assert_eq!(
            ParameterType::Word.parse("  hello   world ", &players),
            Parsed::Matched(Value::Word("hello".into()), "world ")
        );
        assert_eq!(
            ParameterType::Sentence.parse("  hello   world ", &players),
            Parsed::Matched(Value::Sentence("hello   world".into()), "")
        );
        assert_eq!(ParameterType::Sentence.parse("   ", &players), Parsed::NoMatch);
    }

    #[test]
    fn player_resolution_order() {
        let players = online();
        assert_eq!(players.find("4").map(|p| p.name), Some("Luce".to_string()));
        assert_eq!(players.find("luce").map(|p| p.id), Some(4));
        assert_eq!(players.find("rick").map(|p| p.id), Some(33));
        // "luc" is part of both Luce and Lucy.
        assert_eq!(players.find("luc"), None);
        assert_eq!(players.find("99"), None);
    }

    #[test]
    fn unknown_player_is_an_error() {
        let players = online();
        assert_eq!(
            ParameterType::Player.parse("Gunther now", &players),
            Parsed::Error("no player could be found for \"Gunther\"".into())
        );
        assert_eq!(
            ParameterType::Player.parse("0 now", &players),
            Parsed::Matched(Value::Player(Player::new(0, "Russell")), "now")
        );
    }
}
