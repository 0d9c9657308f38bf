//! Per-connection protocol state machine.
//!
//! ```text
//!                 ┌──────────── line ────────────┐
//!                 ▼                              │
//!         ┌───────────────┐   no    ┌──────────────────────┐
//!         │ in progress?  │───────> │ parse verb, resolve  │
//!         └──────┬────────┘         └──────────┬───────────┘
//!                │ yes                         │
//!                ▼                             ▼
//!         ┌─────────────────────────────────────────────┐
//!         │ handler.process_line  (retry once if the    │
//!         │ store reports a retryable failure)          │
//!         └──────────────────────┬──────────────────────┘
//!                     finished?  │
//!             ┌──── yes ─────────┴────── no ────┐
//!             ▼                                 ▼
//!   clear handler, reset charset       keep handler in progress
//! ```
//!
//! Errors never escape this layer: a usage error becomes `501`, a storage
//! failure that survives the retry becomes `500`, and in both cases the
//! in-progress handler is dropped while the connection stays open.

use crate::buffer::Charset;
use crate::commands::{CommandContext, CommandError, CommandResult, Handler, Services};
use crate::protocol::parser::{decode_line, CommandLine};
use crate::protocol::types::{codes, Reply};
use std::net::SocketAddr;
use tracing::{debug, trace, warn};

/// Session state a command handler may read and change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    peer: SocketAddr,
    /// Charset used to decode input and encode replies
    pub charset: Charset,
    /// Currently selected group
    pub group: Option<String>,
    /// Currently selected article number within `group`
    pub article: Option<u64>,
    quit: bool,
}

impl Session {
    pub fn new(peer: SocketAddr) -> Self {
        Self {
            peer,
            charset: Charset::default(),
            group: None,
            article: None,
            quit: false,
        }
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Selects `group` and, optionally, an article in it.
    pub fn select(&mut self, group: &str, article: Option<u64>) {
        self.group = Some(group.to_string());
        self.article = article;
    }

    /// Marks the session to be closed once the current reply is flushed.
    pub fn request_quit(&mut self) {
        self.quit = true;
    }

    pub fn quit_requested(&self) -> bool {
        self.quit
    }

    pub fn reset_charset(&mut self) {
        self.charset = Charset::default();
    }
}

/// Result of feeding one line to the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineOutcome {
    /// Reply text to queue; may be empty while a multi-line command reads
    pub reply: String,
    /// Charset to encode `reply` with
    pub charset: Charset,
    /// Close the connection after flushing `reply`
    pub close: bool,
}

/// Routes the lines of one connection to command handlers.
#[derive(Debug)]
pub struct ProtocolStateMachine {
    session: Session,
    in_progress: Option<Handler>,
}

impl ProtocolStateMachine {
    pub fn new(peer: SocketAddr) -> Self {
        Self {
            session: Session::new(peer),
            in_progress: None,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Whether a multi-line command is waiting for more lines.
    pub fn has_command_in_progress(&self) -> bool {
        self.in_progress.is_some()
    }

    /// Processes one framed line (without its `\n`).
    pub async fn process_line(&mut self, raw: &[u8], services: &Services) -> LineOutcome {
        let line = decode_line(raw, self.session.charset);
        let mut reply = Reply::new();

        let mut handler = match self.in_progress.take() {
            Some(handler) => handler,
            None => match CommandLine::parse(&line) {
                Ok(command) => {
                    trace!(peer = %self.session.peer, verb = command.verb(), "Dispatching command");
                    services.commands.resolve(command.verb())
                }
                Err(err) => {
                    reply.status(codes::COMMAND_NOT_RECOGNIZED, err);
                    return self.outcome(reply);
                }
            },
        };

        let finished = match self.run(&mut handler, services, &line, &mut reply).await {
            Ok(()) => handler.has_finished(),
            Err(CommandError::Usage(message)) => {
                reply.status(codes::SYNTAX_ERROR, message);
                true
            }
            Err(CommandError::Storage(err)) => {
                warn!(peer = %self.session.peer, error = %err, "Command failed, abandoning it");
                reply.status(codes::COMMAND_NOT_RECOGNIZED, "internal error");
                true
            }
        };

        if finished {
            self.session.reset_charset();
        } else {
            self.in_progress = Some(handler);
        }

        self.outcome(reply)
    }

    /// Feeds `line` to `handler`, retrying exactly once on a retryable
    /// failure. Output from the failed attempt is discarded.
    async fn run(
        &mut self,
        handler: &mut Handler,
        services: &Services,
        line: &str,
        reply: &mut Reply,
    ) -> CommandResult {
        let mark = reply.len();
        let first = self.attempt(handler, services, line, reply).await;
        match first {
            Err(err) if err.is_retryable() => {
                debug!(peer = %self.session.peer, error = %err, "Retrying line once");
                reply.truncate(mark);
                self.attempt(handler, services, line, reply).await
            }
            other => other,
        }
    }

    async fn attempt(
        &mut self,
        handler: &mut Handler,
        services: &Services,
        line: &str,
        reply: &mut Reply,
    ) -> CommandResult {
        let mut ctx = CommandContext {
            services,
            session: &mut self.session,
            reply,
        };
        handler.process_line(&mut ctx, line).await
    }

    fn outcome(&self, mut reply: Reply) -> LineOutcome {
        LineOutcome {
            reply: reply.take(),
            charset: self.session.charset,
            close: self.session.quit_requested(),
        }
    }
}
