use std::fmt;
use std::sync::Arc;

use super::context::CommandContext;
use super::descriptor::{CommandDescriptor, DefaultValue, Listener, Parameter, SubCommand};
use super::parameter::{ParameterType, Value};
use super::{Arguments, CommandError, Registry};
use crate::config::Level;

/// Assembles one level of the command tree.
///
/// Obtained from [`CommandManager::build_command`](super::CommandManager::build_command);
/// [`build`](Self::build) on that builder registers the command. Nested
/// builders handed to [`sub`](Self::sub) only produce their descriptor, which
/// the parent attaches once it has been proven unambiguous.
///
/// ```ignore
/// manager
///     .build_command("nuwani")?
///     .restrict(Level::Management)
///     .sub("status", |sub| sub.build(|context, _| { context.respond("ok"); true }))?
///     .build_group()?;
/// ```
pub struct CommandBuilder {
    key: SubCommand,
    path: String,
    level: Level,
    parameters: Vec<Parameter>,
    default_value: Option<DefaultValue>,
    sub_commands: Vec<Arc<CommandDescriptor>>,
    /// Set on top-level builders only.
    registry: Option<Registry>,
}

impl fmt::Debug for CommandBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandBuilder")
            .field("path", &self.path)
            .field("level", &self.level)
            .field("parameters", &self.parameters)
            .field("sub_commands", &self.sub_commands)
            .finish_non_exhaustive()
    }
}

impl CommandBuilder {
    pub(super) fn root(name: &str, registry: Registry) -> Self {
        Self {
            key: SubCommand::Literal(name.to_string()),
            path: name.to_string(),
            level: Level::Player,
            parameters: Vec::new(),
            default_value: None,
            sub_commands: Vec::new(),
            registry: Some(registry),
        }
    }

    fn child(&self, key: SubCommand, default_value: Option<DefaultValue>) -> Self {
        Self {
            path: format!("{} {key}", self.path),
            key,
            level: self.level,
            parameters: Vec::new(),
            default_value,
            sub_commands: Vec::new(),
            registry: None,
        }
    }

    /// Minimum level needed to run this command. Sub-commands added after
    /// this call inherit it.
    pub fn restrict(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    pub fn parameters(mut self, parameters: impl IntoIterator<Item = Parameter>) -> Self {
        self.parameters.extend(parameters);
        self
    }

    /// Add a sub-command, configured and built by `configure`.
    pub fn sub<F>(self, key: impl Into<SubCommand>, configure: F) -> Result<Self, CommandError>
    where
        F: FnOnce(CommandBuilder) -> Result<Arc<CommandDescriptor>, CommandError>,
    {
        let child = self.child(key.into(), None);
        let descriptor = configure(child)?;
        self.attach(descriptor)
    }

    /// Add a typed sub-command that falls back to `default` when the input
    /// doesn't parse as `parameter_type`.
    pub fn sub_with_default<D, F>(
        self,
        parameter_type: ParameterType,
        default: D,
        configure: F,
    ) -> Result<Self, CommandError>
    where
        D: Fn(&CommandContext) -> Option<Value> + Send + Sync + 'static,
        F: FnOnce(CommandBuilder) -> Result<Arc<CommandDescriptor>, CommandError>,
    {
        let default: DefaultValue = Arc::new(default);
        let child = self.child(SubCommand::Typed(parameter_type), Some(default));
        let descriptor = configure(child)?;
        self.attach(descriptor)
    }

    /// Finish this level with `listener`, registering it if it's a top-level
    /// command.
    pub fn build<L>(self, listener: L) -> Result<Arc<CommandDescriptor>, CommandError>
    where
        L: Fn(&CommandContext, &Arguments) -> bool + Send + Sync + 'static,
    {
        let listener: Listener = Arc::new(listener);
        self.finish(Some(listener))
    }

    /// Finish a level that only routes to its sub-commands. Input matching
    /// none of them gets a usage message.
    pub fn build_group(self) -> Result<Arc<CommandDescriptor>, CommandError> {
        if self.sub_commands.is_empty() {
            return Err(CommandError::InvalidParameters(format!(
                "\"{}\" has neither a listener nor sub-commands",
                self.path
            )));
        }
        self.finish(None)
    }

    fn attach(mut self, descriptor: Arc<CommandDescriptor>) -> Result<Self, CommandError> {
        let new_literals = descriptor.literals_at_level();
        for sibling in &self.sub_commands {
            let collision = sibling.literals_at_level().into_iter().find(|name| new_literals.contains(name));
            if let Some(name) = collision {
                return Err(CommandError::Ambiguous {
                    command: self.path.clone(),
                    sub_command: name.to_string(),
                });
            }

            let same_type = matches!(
                (&sibling.key, &descriptor.key),
                (SubCommand::Typed(a), SubCommand::Typed(b)) if a == b
            );
            if same_type || (sibling.has_default_value() && descriptor.has_default_value()) {
                return Err(CommandError::Ambiguous {
                    command: self.path.clone(),
                    sub_command: descriptor.key.to_string(),
                });
            }
        }

        self.sub_commands.push(descriptor);
        Ok(self)
    }

    fn finish(self, listener: Option<Listener>) -> Result<Arc<CommandDescriptor>, CommandError> {
        validate_parameters(&self.path, &self.parameters)?;

        let descriptor = Arc::new(CommandDescriptor {
            key: self.key,
            path: self.path,
            level: self.level,
            parameters: self.parameters,
            default_value: self.default_value,
            sub_commands: self.sub_commands,
            listener,
        });

        if let Some(registry) = self.registry {
            super::register(&registry, Arc::clone(&descriptor))?;
        }
        Ok(descriptor)
    }
}

/// Optional parameters must trail, and a sentence swallows the rest.
fn validate_parameters(path: &str, parameters: &[Parameter]) -> Result<(), CommandError> {
    let mut seen_optional = false;
    for (index, parameter) in parameters.iter().enumerate() {
        if parameter.name.trim().is_empty() {
            return Err(CommandError::InvalidParameters(format!("\"{path}\" has an unnamed parameter")));
        }
        if seen_optional && !parameter.optional {
            return Err(CommandError::InvalidParameters(format!(
                "\"{path}\": required parameter \"{}\" follows an optional one",
                parameter.name
            )));
        }
        if parameter.parameter_type == ParameterType::Sentence && index + 1 != parameters.len() {
            return Err(CommandError::InvalidParameters(format!(
                "\"{path}\": sentence parameter \"{}\" must come last",
                parameter.name
            )));
        }
        seen_optional |= parameter.optional;
    }
    Ok(())
}
