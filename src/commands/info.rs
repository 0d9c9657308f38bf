//! Server-level commands.
//!
//! - `CAPABILITIES` - advertise what this server speaks
//! - `DATE` - server time in UTC
//! - `HELP` - list the registered verbs
//! - `LIST [ACTIVE | NEWSGROUPS]` - list the groups
//! - `MODE READER` - acknowledge reader mode
//! - `QUIT` - say goodbye and close
//!
//! Also home to the responder that answers every unknown verb.

use crate::commands::handler::{CommandContext, CommandError, CommandResult, StatelessCommand};
use crate::protocol::{codes, CommandLine};
use async_trait::async_trait;

/// Advertises server capabilities.
#[derive(Debug, Clone, Copy)]
pub struct Capabilities;

#[async_trait]
impl StatelessCommand for Capabilities {
    async fn execute(&self, ctx: &mut CommandContext<'_>, _line: &str) -> CommandResult {
        ctx.reply
            .status(codes::CAPABILITY_LIST, "capability list follows")
            .data_line("VERSION 2")
            .data_line("READER")
            .data_line("POST")
            .data_line("LIST ACTIVE NEWSGROUPS")
            .data_line(&format!("IMPLEMENTATION newsd {}", crate::VERSION))
            .end_data();
        Ok(())
    }
}

/// Reports the server's UTC time as `yyyymmddhhmmss`.
#[derive(Debug, Clone, Copy)]
pub struct Date;

#[async_trait]
impl StatelessCommand for Date {
    async fn execute(&self, ctx: &mut CommandContext<'_>, _line: &str) -> CommandResult {
        let now = chrono::Utc::now().format("%Y%m%d%H%M%S");
        ctx.reply.status(codes::SERVER_DATE, now);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Help;

#[async_trait]
impl StatelessCommand for Help {
    async fn execute(&self, ctx: &mut CommandContext<'_>, _line: &str) -> CommandResult {
        ctx.reply.status(codes::HELP_TEXT, "help text follows");
        for verb in ctx.services.commands.verbs() {
            ctx.reply.data_line(&format!("  {}", verb));
        }
        ctx.reply.end_data();
        Ok(())
    }
}

/// Lists groups. Deleted groups are never shown.
#[derive(Debug, Clone, Copy)]
pub struct List;

#[async_trait]
impl StatelessCommand for List {
    async fn execute(&self, ctx: &mut CommandContext<'_>, line: &str) -> CommandResult {
        let command = CommandLine::parse(line)?;
        let keyword = command
            .arg(0)
            .map(str::to_ascii_uppercase)
            .unwrap_or_else(|| "ACTIVE".to_string());

        let newsgroups = match keyword.as_str() {
            "ACTIVE" => false,
            "NEWSGROUPS" => true,
            other => {
                return Err(CommandError::Usage(format!("unknown LIST keyword: {}", other)));
            }
        };

        let groups = ctx.services.store.groups().await?;
        ctx.reply
            .status(codes::INFORMATION_FOLLOWS, "list of newsgroups follows");
        for group in groups.iter().filter(|g| !g.deleted) {
            let entry = if newsgroups {
                format!("{}\t{}", group.name, group.description)
            } else {
                format!("{} {} {} y", group.name, group.last, group.first)
            };
            ctx.reply.data_line(&entry);
        }
        ctx.reply.end_data();
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Mode;

#[async_trait]
impl StatelessCommand for Mode {
    async fn execute(&self, ctx: &mut CommandContext<'_>, line: &str) -> CommandResult {
        let command = CommandLine::parse(line)?;
        match command.arg(0) {
            Some(mode) if mode.eq_ignore_ascii_case("READER") => {
                ctx.reply.status(codes::POSTING_ALLOWED, "posting allowed");
                Ok(())
            }
            Some(mode) => Err(CommandError::Usage(format!("unknown mode: {}", mode))),
            None => Err(CommandError::Usage("usage: MODE READER".to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Quit;

#[async_trait]
impl StatelessCommand for Quit {
    async fn execute(&self, ctx: &mut CommandContext<'_>, _line: &str) -> CommandResult {
        ctx.reply.status(codes::CONNECTION_CLOSING, "closing connection");
        ctx.session.request_quit();
        Ok(())
    }
}

/// Answers every verb nobody registered.
#[derive(Debug, Clone, Copy)]
pub struct Unsupported;

#[async_trait]
impl StatelessCommand for Unsupported {
    async fn execute(&self, ctx: &mut CommandContext<'_>, _line: &str) -> CommandResult {
        ctx.reply
            .status(codes::COMMAND_NOT_RECOGNIZED, "command not recognized");
        Ok(())
    }
}
