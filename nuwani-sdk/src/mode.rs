//! Decoding of `MODE` commands into structured flag changes.
//!
//! Which flags take a parameter depends on the network, so the parser is
//! configured once from the `PREFIX` and `CHANMODES` ISUPPORT tokens.

use std::collections::HashMap;

use crate::irc::Message;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ModeError {
    #[error("prefix string {0:?} does not start with a parenthesised flag list")]
    MissingParenthesis(String),
    #[error("prefix string {0:?} has a different number of flags and prefixes")]
    PrefixLengthMismatch(String),
    #[error("CHANMODES value {0:?} must have exactly four groups")]
    InvalidChannelModes(String),
    #[error("mode flag '{0}' has already been registered")]
    DuplicateFlag(char),
    #[error("expected a MODE command, got {0}")]
    NotAModeCommand(String),
    #[error("MODE command needs a target and at least one flag block")]
    NotEnoughParameters,
    #[error("unrecognized mode flag '{0}'")]
    UnrecognizedFlag(char),
    #[error("mode flag '{0}' requires a parameter")]
    MissingParameter(char),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeType {
    /// Always takes a parameter (list modes, status prefixes).
    WithParameter,
    /// Takes a parameter only when being set, e.g. `+l 10` / `-l`.
    WithParameterWhenSet,
    WithoutParameter,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModeChange {
    pub flag: char,
    pub param: Option<String>,
}

impl ModeChange {
    fn new(flag: char, param: Option<String>) -> Self {
        Self { flag, param }
    }
}

/// The outcome of parsing one `MODE` line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedModes {
    pub set: Vec<ModeChange>,
    pub unset: Vec<ModeChange>,
    /// Every change in line order, `true` when the flag is being set.
    pub changes: Vec<(bool, ModeChange)>,
}

#[derive(Debug, Clone, Default)]
pub struct ModeParser {
    types: HashMap<char, ModeType>,
}

impl ModeParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the flags of a `PREFIX` value such as `(ov)@+`.
    pub fn set_channel_prefixes(&mut self, prefixes: &str) -> Result<(), ModeError> {
        let (flags, _symbols) = split_prefix(prefixes)?;
        for flag in flags.chars() {
            self.register(flag, ModeType::WithParameter)?;
        }
        Ok(())
    }

    /// Register the four groups of a `CHANMODES` value such as `b,k,l,imnpst`.
    pub fn set_channel_modes(&mut self, modes: &str) -> Result<(), ModeError> {
        let groups: Vec<&str> = modes.split(',').collect();
        let [list, always, when_set, never] = groups.as_slice() else {
            return Err(ModeError::InvalidChannelModes(modes.to_string()));
        };

        for (group, mode_type) in [
            (list, ModeType::WithParameter),
            (always, ModeType::WithParameter),
            (when_set, ModeType::WithParameterWhenSet),
            (never, ModeType::WithoutParameter),
        ] {
            for flag in group.chars() {
                self.register(flag, mode_type)?;
            }
        }
        Ok(())
    }

    pub fn mode_type(&self, flag: char) -> Option<ModeType> {
        self.types.get(&flag).copied()
    }

    fn register(&mut self, flag: char, mode_type: ModeType) -> Result<(), ModeError> {
        if self.types.contains_key(&flag) {
            return Err(ModeError::DuplicateFlag(flag));
        }
        self.types.insert(flag, mode_type);
        Ok(())
    }

    /// Parse a `MODE <target> <flags> [params...] [<flags> [params...]]` line.
    pub fn parse(&self, message: &Message) -> Result<ParsedModes, ModeError> {
        if message.command != "MODE" {
            return Err(ModeError::NotAModeCommand(message.command.clone()));
        }
        if message.params.len() < 2 {
            return Err(ModeError::NotEnoughParameters);
        }

        let mut result = ParsedModes::default();
        let mut params = message.params[1..].iter();

        // Each flag block consumes the parameters that follow it; whatever is
        // left over afterwards starts the next block.
        while let Some(block) = params.next() {
            let mut setting = true;
            for flag in block.chars() {
                match flag {
                    '+' => setting = true,
                    '-' => setting = false,
                    _ => {
                        let mode_type = self.mode_type(flag).ok_or(ModeError::UnrecognizedFlag(flag))?;
                        let takes_param = match mode_type {
                            ModeType::WithParameter => true,
                            ModeType::WithParameterWhenSet => setting,
                            ModeType::WithoutParameter => false,
                        };
                        let param = if takes_param {
                            Some(params.next().ok_or(ModeError::MissingParameter(flag))?.clone())
                        } else {
                            None
                        };

                        let change = ModeChange::new(flag, param);
                        result.changes.push((setting, change.clone()));
                        if setting {
                            result.set.push(change);
                        } else {
                            result.unset.push(change);
                        }
                    }
                }
            }
        }

        Ok(result)
    }
}

/// Split `(ov)@+` into `("ov", "@+")`, checking both halves line up.
pub fn split_prefix(prefixes: &str) -> Result<(&str, &str), ModeError> {
    let (flags, symbols) = prefixes
        .strip_prefix('(')
        .and_then(|rest| rest.split_once(')'))
        .ok_or_else(|| ModeError::MissingParenthesis(prefixes.to_string()))?;
    if flags.chars().count() != symbols.chars().count() {
        return Err(ModeError::PrefixLengthMismatch(prefixes.to_string()));
    }
    Ok((flags, symbols))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parser() -> ModeParser {
        let mut parser = ModeParser::new();
        parser.set_channel_prefixes("(qaohv)~&@%+").unwrap();
        parser.set_channel_modes("beI,k,l,imnpst").unwrap();
        parser
    }

    fn mode(line: &str) -> Message {
        Message::parse(line).unwrap()
    }

    fn change(flag: char, param: Option<&str>) -> ModeChange {
        ModeChange::new(flag, param.map(str::to_string))
    }

    #[test]
    fn prefix_string_must_be_well_formed() {
        let mut parser = ModeParser::new();
        assert_eq!(parser.set_channel_prefixes("ov@+"), Err(ModeError::MissingParenthesis("ov@+".into())));
        assert_eq!(
            parser.set_channel_prefixes("(ov)@"),
            Err(ModeError::PrefixLengthMismatch("(ov)@".into()))
        );
        assert!(parser.set_channel_prefixes("(ov)@+").is_ok());
        assert_eq!(parser.mode_type('o'), Some(ModeType::WithParameter));
    }

    #[test]
    fn channel_modes_need_four_groups() {
        let mut parser = ModeParser::new();
        assert!(matches!(parser.set_channel_modes("b,k,l"), Err(ModeError::InvalidChannelModes(_))));
        assert!(matches!(parser.set_channel_modes("b,k,l,m,n"), Err(ModeError::InvalidChannelModes(_))));
        parser.set_channel_modes("b,k,l,m").unwrap();
        assert_eq!(parser.mode_type('b'), Some(ModeType::WithParameter));
        assert_eq!(parser.mode_type('k'), Some(ModeType::WithParameter));
        assert_eq!(parser.mode_type('l'), Some(ModeType::WithParameterWhenSet));
        assert_eq!(parser.mode_type('m'), Some(ModeType::WithoutParameter));
    }

    #[test]
    fn duplicate_registration_is_fatal() {
        let mut parser = ModeParser::new();
        parser.set_channel_prefixes("(ov)@+").unwrap();
        assert_eq!(parser.set_channel_modes("b,o,l,m"), Err(ModeError::DuplicateFlag('o')));
    }

    #[test]
    fn parses_mixed_changes() {
        let result = parser().parse(&mode(":Joe!j@h MODE #echo +ov-b+l Ann Bob *!*@spam 25")).unwrap();
        assert_eq!(
            result.set,
            vec![change('o', Some("Ann")), change('v', Some("Bob")), change('l', Some("25"))]
        );
        assert_eq!(result.unset, vec![change('b', Some("*!*@spam"))]);
    }

    #[test]
    fn limit_takes_no_parameter_when_unset() {
        let result = parser().parse(&mode("MODE #echo -lm+k pass")).unwrap();
        assert_eq!(result.unset, vec![change('l', None), change('m', None)]);
        assert_eq!(result.set, vec![change('k', Some("pass"))]);
    }

    #[test]
    fn multiple_flag_blocks() {
        let result = parser().parse(&mode("MODE #echo +o Ann -v Bob +nt")).unwrap();
        assert_eq!(result.set, vec![change('o', Some("Ann")), change('n', None), change('t', None)]);
        assert_eq!(result.unset, vec![change('v', Some("Bob"))]);
    }

    #[test]
    fn preserves_encounter_order() {
        let result = parser().parse(&mode("MODE #echo +vvv A B C")).unwrap();
        let params: Vec<_> = result.set.iter().map(|c| c.param.as_deref().unwrap()).collect();
        assert_eq!(params, vec!["A", "B", "C"]);

        let result = parser().parse(&mode("MODE #echo -o+o-v Joe Joe Ann")).unwrap();
        assert_eq!(
            result.changes,
            vec![
                (false, change('o', Some("Joe"))),
                (true, change('o', Some("Joe"))),
                (false, change('v', Some("Ann"))),
            ]
        );
    }

    #[test]
    fn errors() {
        let parser = parser();
        assert_eq!(parser.parse(&mode("MODE #echo +Z")), Err(ModeError::UnrecognizedFlag('Z')));
        assert_eq!(parser.parse(&mode("MODE #echo +o")), Err(ModeError::MissingParameter('o')));
        assert_eq!(parser.parse(&mode("MODE #echo")), Err(ModeError::NotEnoughParameters));
        assert_eq!(
            parser.parse(&mode("PRIVMSG #echo +o")),
            Err(ModeError::NotAModeCommand("PRIVMSG".into()))
        );
    }
}
