//! Command Dispatch
//!
//! Maps a case-insensitive verb to the handler that serves it.
//!
//! ## Two kinds of handler
//!
//! - **Stateless** ([`StatelessCommand`]): one shared instance answers every
//!   invocation on every connection. It keeps no per-call state and is done
//!   after the line that named it.
//! - **Stateful** ([`StatefulCommand`]): a fresh instance is built for every
//!   invocation and stays in progress on its connection, receiving each
//!   following line, until [`StatefulCommand::has_finished`] reports true.
//!
//! ```text
//!             resolve("post")                      resolve("group")
//!                   │                                    │
//!                   ▼                                    ▼
//!   ┌──────────────────────────────┐    ┌──────────────────────────────┐
//!   │ factory() -> Box<PostCommand>│    │ Arc::clone(&SelectGroup)     │
//!   │ (new instance every time)    │    │ (same instance every time)   │
//!   └──────────────────────────────┘    └──────────────────────────────┘
//! ```
//!
//! The table is built once at startup by [`CommandTable::standard`]. Verbs
//! that nobody registered resolve to a fixed responder that answers `500`.

use crate::commands::{article, group, info, post};
use crate::config::ServerConfig;
use crate::protocol::{ParseError, Reply, Session};
use crate::storage::{ArticleStore, FeedQueue, MailGateway, StorageError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Errors a handler hands back to the protocol state machine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// The storage collaborator failed
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// The command line was malformed; answered with `501`
    #[error("{0}")]
    Usage(String),
}

impl CommandError {
    /// Whether repeating the same line may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CommandError::Storage(e) if e.is_retryable())
    }
}

impl From<ParseError> for CommandError {
    fn from(err: ParseError) -> Self {
        CommandError::Usage(err.to_string())
    }
}

pub type CommandResult = Result<(), CommandError>;

/// Everything a handler may reach outside its own connection.
#[derive(Clone)]
pub struct Services {
    pub store: Arc<dyn ArticleStore>,
    pub gateway: Arc<dyn MailGateway>,
    pub feed: FeedQueue,
    pub config: Arc<ServerConfig>,
    pub commands: Arc<CommandTable>,
}

impl fmt::Debug for Services {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Services")
            .field("config", &self.config)
            .field("commands", &self.commands)
            .finish_non_exhaustive()
    }
}

/// What a handler sees while processing one line.
pub struct CommandContext<'a> {
    pub services: &'a Services,
    pub session: &'a mut Session,
    pub reply: &'a mut Reply,
}

/// A handler shared by every invocation.
#[async_trait]
pub trait StatelessCommand: Send + Sync {
    async fn execute(&self, ctx: &mut CommandContext<'_>, line: &str) -> CommandResult;
}

/// A handler instantiated per invocation that consumes several lines.
#[async_trait]
pub trait StatefulCommand: Send {
    async fn process_line(&mut self, ctx: &mut CommandContext<'_>, line: &str) -> CommandResult;

    fn has_finished(&self) -> bool;
}

/// How a verb is served.
#[derive(Clone)]
pub enum HandlerKind {
    Stateless(Arc<dyn StatelessCommand>),
    Stateful(fn() -> Box<dyn StatefulCommand>),
}

/// One entry of the dispatch table.
#[derive(Clone)]
pub struct CommandDescriptor {
    /// Upper-case verb and its aliases
    pub verbs: &'static [&'static str],
    pub kind: HandlerKind,
}

impl CommandDescriptor {
    pub fn stateless(verbs: &'static [&'static str], handler: impl StatelessCommand + 'static) -> Self {
        Self {
            verbs,
            kind: HandlerKind::Stateless(Arc::new(handler)),
        }
    }

    pub fn stateful(verbs: &'static [&'static str], factory: fn() -> Box<dyn StatefulCommand>) -> Self {
        Self {
            verbs,
            kind: HandlerKind::Stateful(factory),
        }
    }

    pub fn is_stateful(&self) -> bool {
        matches!(self.kind, HandlerKind::Stateful(_))
    }
}

impl fmt::Debug for CommandDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandDescriptor")
            .field("verbs", &self.verbs)
            .field("stateful", &self.is_stateful())
            .finish()
    }
}

/// A resolved handler, ready to receive lines.
pub enum Handler {
    Shared(Arc<dyn StatelessCommand>),
    Owned(Box<dyn StatefulCommand>),
}

impl Handler {
    pub async fn process_line(&mut self, ctx: &mut CommandContext<'_>, line: &str) -> CommandResult {
        match self {
            Handler::Shared(handler) => handler.execute(ctx, line).await,
            Handler::Owned(handler) => handler.process_line(ctx, line).await,
        }
    }

    /// Stateless handlers are always finished after one line.
    pub fn has_finished(&self) -> bool {
        match self {
            Handler::Shared(_) => true,
            Handler::Owned(handler) => handler.has_finished(),
        }
    }

    pub fn is_stateful(&self) -> bool {
        matches!(self, Handler::Owned(_))
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Handler::Shared(_) => f.write_str("Handler::Shared"),
            Handler::Owned(h) => write!(f, "Handler::Owned(finished: {})", h.has_finished()),
        }
    }
}

/// Verb to handler mapping.
pub struct CommandTable {
    descriptors: Vec<CommandDescriptor>,
    by_verb: HashMap<&'static str, usize>,
    unsupported: Arc<dyn StatelessCommand>,
}

impl CommandTable {
    /// Creates an empty table. Every verb resolves to the unsupported
    /// responder until registered.
    pub fn new() -> Self {
        Self {
            descriptors: Vec::new(),
            by_verb: HashMap::new(),
            unsupported: Arc::new(info::Unsupported),
        }
    }

    /// The full command set served by newsd.
    pub fn standard() -> Self {
        let mut table = Self::new();
        table.register(CommandDescriptor::stateless(&["ARTICLE"], article::Retrieve::Article));
        table.register(CommandDescriptor::stateless(&["BODY"], article::Retrieve::Body));
        table.register(CommandDescriptor::stateless(&["CAPABILITIES"], info::Capabilities));
        table.register(CommandDescriptor::stateless(&["DATE"], info::Date));
        table.register(CommandDescriptor::stateless(&["GROUP"], group::SelectGroup));
        table.register(CommandDescriptor::stateless(&["HEAD"], article::Retrieve::Head));
        table.register(CommandDescriptor::stateless(&["HELP"], info::Help));
        table.register(CommandDescriptor::stateless(&["LAST"], group::Step::Last));
        table.register(CommandDescriptor::stateless(&["LIST"], info::List));
        table.register(CommandDescriptor::stateless(&["LISTGROUP"], group::ListGroup));
        table.register(CommandDescriptor::stateless(&["MODE"], info::Mode));
        table.register(CommandDescriptor::stateless(&["NEXT"], group::Step::Next));
        table.register(CommandDescriptor::stateful(&["POST"], post::PostCommand::boxed));
        table.register(CommandDescriptor::stateless(&["QUIT"], info::Quit));
        table.register(CommandDescriptor::stateless(&["STAT"], article::Retrieve::Stat));
        table
    }

    /// Adds a descriptor. A verb registered twice is served by the later
    /// descriptor.
    pub fn register(&mut self, descriptor: CommandDescriptor) {
        let index = self.descriptors.len();
        for &verb in descriptor.verbs {
            self.by_verb.insert(verb, index);
        }
        self.descriptors.push(descriptor);
    }

    /// Looks up `verb` case-insensitively.
    ///
    /// Stateless verbs return the shared instance; stateful verbs return a
    /// new instance on every call.
    pub fn resolve(&self, verb: &str) -> Handler {
        let upper = verb.to_ascii_uppercase();
        match self.by_verb.get(upper.as_str()).map(|&i| &self.descriptors[i].kind) {
            Some(HandlerKind::Stateless(handler)) => Handler::Shared(Arc::clone(handler)),
            Some(HandlerKind::Stateful(factory)) => Handler::Owned(factory()),
            None => Handler::Shared(Arc::clone(&self.unsupported)),
        }
    }

    pub fn contains(&self, verb: &str) -> bool {
        self.by_verb.contains_key(verb.to_ascii_uppercase().as_str())
    }

    /// Registered verbs in alphabetical order.
    pub fn verbs(&self) -> Vec<&'static str> {
        let mut verbs: Vec<_> = self.by_verb.keys().copied().collect();
        verbs.sort_unstable();
        verbs
    }
}

impl Default for CommandTable {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CommandTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandTable")
            .field("descriptors", &self.descriptors)
            .finish()
    }
}
