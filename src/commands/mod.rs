//! In-band chat commands.
//!
//! This module contains the command handler trait and the registry that
//! resolves `/name` tokens found in parseable message bodies. The registry
//! is built once at startup and read-only afterwards.
//!
//! Parameters are bound positionally to each descriptor's parameter names.
//! Trailing parameters may be omitted (they bind to `None`); the last
//! declared parameter absorbs any remaining tokens, so free-text arguments
//! like an announcement body need no quoting.

mod admin;
mod dice;
mod help;
mod moderation;
mod roster;
pub mod scan;

pub use admin::{AnnounceHandler, RestartHandler};
pub use dice::DiceHandler;
pub use help::HelpHandler;
pub use moderation::KickHandler;
pub use roster::{ActiveHandler, AwayHandler, BackHandler, ModeHandler};
pub use scan::{ContentScan, scan_content};

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

use crate::auth::Role;
use crate::state::{ClientIdentity, RoomRegistry};
use crate::transport::ConnectionHandle;

/// A command's minimum required role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Tier {
    Normal,
    Teacher,
    Admin,
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Normal => write!(f, "NORMAL"),
            Self::Teacher => write!(f, "TEACHER"),
            Self::Admin => write!(f, "ADMIN"),
        }
    }
}

/// Errors that can occur during command invocation.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("unknown command: /{0}")]
    Unknown(String),

    #[error("/{command} requires the {tier} role")]
    PermissionDenied { command: String, tier: Tier },

    #[error("/{command} takes no arguments")]
    UnexpectedArguments { command: String },

    #[error("invalid argument for {param}: {reason}")]
    InvalidArgument { param: &'static str, reason: String },
}

impl CommandError {
    #[inline]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Unknown(_) => "unknown_command",
            Self::PermissionDenied { .. } => "permission_denied",
            Self::UnexpectedArguments { .. } => "unexpected_arguments",
            Self::InvalidArgument { .. } => "invalid_argument",
        }
    }
}

/// Result type for command handlers.
pub type CommandResult = Result<(), CommandError>;

/// Invocation context passed to each command handler.
pub struct CommandContext<'a> {
    /// The invoking member.
    pub invoker: &'a ClientIdentity,
    /// Role established at connection bind, never read from message content.
    pub role: Role,
    /// The invoker's own connection, for private replies.
    pub conn: &'a Arc<dyn ConnectionHandle>,
    /// Shared engine state.
    pub rooms: &'a Arc<RoomRegistry>,
    /// The registry itself, for /help listings.
    pub registry: &'a CommandRegistry,
    /// Server name stamped on server-originated messages.
    pub server_name: &'a str,
    /// Arguments bound positionally to the descriptor's parameter names.
    params: Vec<Option<String>>,
}

impl CommandContext<'_> {
    /// Bound value of the `idx`th declared parameter, if supplied.
    pub fn param(&self, idx: usize) -> Option<&str> {
        self.params.get(idx).and_then(|p| p.as_deref())
    }
}

/// Trait implemented by all command handlers.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    async fn handle(&self, ctx: &CommandContext<'_>) -> CommandResult;
}

/// Static description of one command.
pub struct CommandDescriptor {
    pub name: &'static str,
    pub tier: Tier,
    pub param_names: &'static [&'static str],
    pub summary: &'static str,
    handler: Box<dyn CommandHandler>,
}

/// Registry of command handlers, keyed by bare command name.
pub struct CommandRegistry {
    commands: HashMap<&'static str, CommandDescriptor>,
}

impl CommandRegistry {
    /// Create a new registry with all commands registered.
    pub fn new() -> Self {
        let mut commands: HashMap<&'static str, CommandDescriptor> = HashMap::new();
        let mut register = |d: CommandDescriptor| {
            commands.insert(d.name, d);
        };

        register(CommandDescriptor {
            name: "dice",
            tier: Tier::Normal,
            param_names: &["opponent"],
            summary: "roll a die, optionally challenging another member",
            handler: Box::new(DiceHandler),
        });
        register(CommandDescriptor {
            name: "away",
            tier: Tier::Normal,
            param_names: &[],
            summary: "mark yourself away",
            handler: Box::new(AwayHandler),
        });
        register(CommandDescriptor {
            name: "back",
            tier: Tier::Normal,
            param_names: &[],
            summary: "return from away",
            handler: Box::new(BackHandler),
        });
        register(CommandDescriptor {
            name: "mode",
            tier: Tier::Normal,
            param_names: &["state"],
            summary: "set presence to away or active",
            handler: Box::new(ModeHandler),
        });
        register(CommandDescriptor {
            name: "active",
            tier: Tier::Normal,
            param_names: &[],
            summary: "list active members of this room",
            handler: Box::new(ActiveHandler),
        });
        register(CommandDescriptor {
            name: "help",
            tier: Tier::Normal,
            param_names: &[],
            summary: "list commands available to you",
            handler: Box::new(HelpHandler),
        });
        register(CommandDescriptor {
            name: "kick",
            tier: Tier::Teacher,
            param_names: &["username"],
            summary: "remove a member from the room",
            handler: Box::new(KickHandler),
        });
        register(CommandDescriptor {
            name: "announce",
            tier: Tier::Admin,
            param_names: &["message"],
            summary: "broadcast a maintenance announcement to every room",
            handler: Box::new(AnnounceHandler),
        });
        register(CommandDescriptor {
            name: "restart",
            tier: Tier::Admin,
            param_names: &[],
            summary: "notify every room of an imminent restart",
            handler: Box::new(RestartHandler),
        });

        Self { commands }
    }

    /// Descriptors the given role may invoke, sorted by name. Used by /help.
    pub fn visible_to(&self, role: Role) -> Vec<&CommandDescriptor> {
        let mut out: Vec<_> = self
            .commands
            .values()
            .filter(|d| role.meets(d.tier))
            .collect();
        out.sort_by_key(|d| d.name);
        out
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Resolve, permission-check, bind parameters, and run one invocation.
    ///
    /// A tier violation or unknown name returns an error and performs no
    /// side effect; the caller turns it into a private reply to the invoker.
    #[allow(clippy::too_many_arguments)]
    pub async fn invoke(
        &self,
        name: &str,
        args: &[&str],
        invoker: &ClientIdentity,
        role: Role,
        conn: &Arc<dyn ConnectionHandle>,
        rooms: &Arc<RoomRegistry>,
        server_name: &str,
    ) -> CommandResult {
        let descriptor = self
            .commands
            .get(name)
            .ok_or_else(|| CommandError::Unknown(name.to_string()))?;

        if !role.meets(descriptor.tier) {
            return Err(CommandError::PermissionDenied {
                command: name.to_string(),
                tier: descriptor.tier,
            });
        }

        let params = bind_params(descriptor, args)?;
        crate::metrics::commands().with_label_values(&[descriptor.name]).inc();

        let ctx = CommandContext {
            invoker,
            role,
            conn,
            rooms,
            registry: self,
            server_name,
            params,
        };
        descriptor.handler.handle(&ctx).await
    }
}

impl Default for CommandRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Bind argument tokens to a descriptor's parameter names.
///
/// Missing trailing parameters bind to `None`. The last declared parameter
/// absorbs all remaining tokens. Tokens supplied to a zero-parameter
/// command are an error, not silently dropped.
fn bind_params(descriptor: &CommandDescriptor, args: &[&str]) -> Result<Vec<Option<String>>, CommandError> {
    let arity = descriptor.param_names.len();
    if arity == 0 {
        if !args.is_empty() {
            return Err(CommandError::UnexpectedArguments {
                command: descriptor.name.to_string(),
            });
        }
        return Ok(Vec::new());
    }

    let mut params: Vec<Option<String>> = Vec::with_capacity(arity);
    for i in 0..arity {
        if i + 1 == arity && args.len() > arity {
            // Last parameter takes the rest.
            params.push(Some(args[i..].join(" ")));
        } else {
            params.push(args.get(i).map(|s| s.to_string()));
        }
    }
    Ok(params)
}
