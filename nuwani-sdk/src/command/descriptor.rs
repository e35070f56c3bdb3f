//! The registered command tree and how input is matched against it.

use std::fmt;
use std::sync::Arc;

use super::context::CommandContext;
use super::parameter::{ParameterType, Parsed, PlayerDirectory, Value};
use super::{Arguments, CommandOutcome};
use crate::config::Level;

pub type Listener = Arc<dyn Fn(&CommandContext, &Arguments) -> bool + Send + Sync>;

/// Supplies a typed sub-command's value when the input doesn't.
pub type DefaultValue = Arc<dyn Fn(&CommandContext) -> Option<Value> + Send + Sync>;

/// How a sub-command is selected.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SubCommand {
    /// The input starts with this word.
    Literal(String),
    /// The input parses as this type.
    Typed(ParameterType),
}

impl From<&str> for SubCommand {
    fn from(name: &str) -> Self {
        SubCommand::Literal(name.to_string())
    }
}

impl From<ParameterType> for SubCommand {
    fn from(parameter_type: ParameterType) -> Self {
        SubCommand::Typed(parameter_type)
    }
}

impl fmt::Display for SubCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubCommand::Literal(name) => f.write_str(name),
            SubCommand::Typed(parameter_type) => write!(f, "[{parameter_type}]"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parameter {
    pub name: String,
    pub parameter_type: ParameterType,
    pub optional: bool,
}

impl Parameter {
    pub fn new(name: &str, parameter_type: ParameterType) -> Self {
        Self {
            name: name.to_string(),
            parameter_type,
            optional: false,
        }
    }

    pub fn optional(name: &str, parameter_type: ParameterType) -> Self {
        Self {
            optional: true,
            ..Self::new(name, parameter_type)
        }
    }
}

/// One node of the command tree. Immutable once built.
pub struct CommandDescriptor {
    pub(super) key: SubCommand,
    /// Space-separated route from the top-level command, e.g. `money [player]`.
    pub(super) path: String,
    pub(super) level: Level,
    pub(super) parameters: Vec<Parameter>,
    pub(super) default_value: Option<DefaultValue>,
    pub(super) sub_commands: Vec<Arc<CommandDescriptor>>,
    pub(super) listener: Option<Listener>,
}

impl fmt::Debug for CommandDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandDescriptor")
            .field("path", &self.path)
            .field("level", &self.level)
            .field("parameters", &self.parameters)
            .field("sub_commands", &self.sub_commands)
            .finish_non_exhaustive()
    }
}

impl CommandDescriptor {
    pub fn key(&self) -> &SubCommand {
        &self.key
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn level(&self) -> Level {
        self.level
    }

    pub fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }

    pub fn sub_commands(&self) -> &[Arc<CommandDescriptor>] {
        &self.sub_commands
    }

    pub fn has_default_value(&self) -> bool {
        self.default_value.is_some()
    }

    /// e.g. `!money [player] [amount]` or `!nuwani [reload/status]`.
    pub fn usage(&self, prefix: &str) -> String {
        let mut usage = format!("{prefix}{}", self.path);
        if self.listener.is_none() && !self.sub_commands.is_empty() {
            let options: Vec<String> = self
                .sub_commands
                .iter()
                .map(|sub| match &sub.key {
                    SubCommand::Literal(name) => name.clone(),
                    SubCommand::Typed(parameter_type) => parameter_type.to_string(),
                })
                .collect();
            usage.push_str(&format!(" [{}]", options.join("/")));
        }
        for parameter in &self.parameters {
            let marker = if parameter.optional { "?" } else { "" };
            usage.push_str(&format!(" [{}{marker}]", parameter.name));
        }
        usage
    }

    /// Literal names this node answers to at its own level: its own name,
    /// plus those of its children when it may absorb input via a default.
    pub(super) fn literals_at_level(&self) -> Vec<&str> {
        let mut literals = Vec::new();
        if let SubCommand::Literal(name) = &self.key {
            literals.push(name.as_str());
        }
        if self.default_value.is_some() {
            for sub in &self.sub_commands {
                literals.extend(sub.literals_at_level());
            }
        }
        literals
    }

    /// Run the command for `input`, the text that follows its name.
    pub(super) fn invoke(
        &self,
        context: &CommandContext,
        input: &str,
        mut values: Vec<Value>,
        players: &dyn PlayerDirectory,
        prefix: &str,
    ) -> CommandOutcome {
        if context.level() < self.level {
            context.respond_with_error(&format!(
                "Sorry, this command is only available to {}.",
                self.level.audience()
            ));
            return CommandOutcome::Refused;
        }

        let input = input.trim_start();
        for sub in &self.sub_commands {
            match &sub.key {
                SubCommand::Literal(name) => {
                    let Some(rest) = input.strip_prefix(name.as_str()) else {
                        continue;
                    };
                    if rest.is_empty() || rest.starts_with(' ') {
                        return sub.invoke(context, rest, values, players, prefix);
                    }
                }
                SubCommand::Typed(parameter_type) => match parameter_type.parse(input, players) {
                    Parsed::Matched(value, rest) => {
                        values.push(value);
                        return sub.invoke(context, rest, values, players, prefix);
                    }
                    Parsed::Error(message) => {
                        context.respond_with_error(&message);
                        return CommandOutcome::Invalid;
                    }
                    Parsed::NoMatch => {
                        if let Some(value) = sub.default_value.as_ref().and_then(|default| default(context)) {
                            values.push(value);
                            return sub.invoke(context, input, values, players, prefix);
                        }
                    }
                },
            }
        }

        let Some(listener) = &self.listener else {
            context.respond_with_usage(&self.usage(prefix));
            return CommandOutcome::Invalid;
        };

        let mut rest = input;
        for parameter in &self.parameters {
            match parameter.parameter_type.parse(rest, players) {
                Parsed::Matched(value, remaining) => {
                    values.push(value);
                    rest = remaining;
                }
                Parsed::Error(message) => {
                    context.respond_with_error(&message);
                    return CommandOutcome::Invalid;
                }
                Parsed::NoMatch if parameter.optional && rest.trim().is_empty() => break,
                Parsed::NoMatch => {
                    context.respond_with_usage(&self.usage(prefix));
                    return CommandOutcome::Invalid;
                }
            }
        }

        let arguments = Arguments::new(values, rest.trim());
        CommandOutcome::Executed(listener(context, &arguments))
    }
}
