//! POST: the multi-line stateful command.
//!
//! ## States
//!
//! ```text
//!  WaitForLineOne ──"POST"──> ReadingHeaders ──"" ──> ReadingBody ──"."──> Finished
//!        │                        │    │                  │
//!        │ anything else          │    └──"."──(empty body, post now)──> Finished
//!        ▼                        ▼ bad header block      ▼ too long
//!     Finished (501)           Finished (441)          Finished (500)
//! ```
//!
//! A bare `.` is accepted as the end of the header block and posts the
//! article with an empty body straight away.
//!
//! ## Posting
//!
//! Checked in this order:
//!
//! 1. `Control: cancel <id>` deletes `<id>` and files the control message
//!    into the `control` group. Any other Control header is rejected.
//! 2. The groups in `Newsgroups` that exist and are not deleted are
//!    resolved. With none left the post is rejected and nothing changes.
//! 3. `Supersedes: <id>` deletes `<id>`, then each resolved group receives
//!    the article. Mailing-list groups get it through the gateway unless the
//!    poster is a trusted peer. A message-id that is already stored counts
//!    as accepted without being stored again.
//!
//! The post succeeds when at least one destination accepted it; the
//! article is then queued for peer feeding.
//!
//! Size is counted in wire bytes, each line re-encoded in the connection
//! charset plus two for CRLF, across the header block and the body. The
//! `Bytes` header holds the length of the body as filed.

use crate::buffer::Charset;
use crate::commands::handler::{CommandContext, CommandResult, StatefulCommand};
use crate::protocol::{codes, dot_unstuff, is_end_of_data, CommandLine, CRLF};
use crate::storage::{Article, Headers};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};

/// Group that receives cancel control messages.
pub const CONTROL_GROUP: &str = "control";

static MESSAGE_COUNTER: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostState {
    WaitForLineOne,
    ReadingHeaders,
    ReadingBody,
    Finished,
}

enum Outcome {
    Posted,
    Rejected(&'static str),
}

/// One POST invocation.
#[derive(Debug)]
pub struct PostCommand {
    state: PostState,
    header_block: String,
    headers: Option<Headers>,
    body: String,
    /// Body lines received
    lines: u64,
    /// Header and body bytes received, checked against the size limit
    size: usize,
    /// Article as it will be filed; built once so a retried line files the
    /// same article
    prepared: Option<Article>,
    /// Whether the message-id was already stored before this post
    already_stored: Option<bool>,
}

impl PostCommand {
    pub fn new() -> Self {
        Self {
            state: PostState::WaitForLineOne,
            header_block: String::new(),
            headers: None,
            body: String::new(),
            lines: 0,
            size: 0,
            prepared: None,
            already_stored: None,
        }
    }

    /// Factory registered in the command table.
    pub fn boxed() -> Box<dyn StatefulCommand> {
        Box::new(Self::new())
    }

    pub fn state(&self) -> PostState {
        self.state
    }

    fn fail(&mut self, ctx: &mut CommandContext<'_>, code: u16, message: &str) -> CommandResult {
        ctx.reply.status(code, message);
        self.state = PostState::Finished;
        self.body.clear();
        self.header_block.clear();
        Ok(())
    }

    /// Adds the wire length of `line` plus CRLF to the running size. False
    /// once over the limit.
    fn account(&mut self, ctx: &CommandContext<'_>, line: &str) -> bool {
        self.size += ctx.session.charset.encoded_len(line) + CRLF.len();
        self.size <= ctx.services.config.max_article_size
    }

    fn end_headers(&mut self, ctx: &mut CommandContext<'_>) -> Result<(), String> {
        let headers = Headers::parse(&self.header_block).map_err(|e| e.to_string())?;
        if let Some(charset) = headers.get("Content-Type").and_then(content_charset) {
            debug!(charset = %charset, "Switching connection charset for article body");
            ctx.session.charset = charset;
        }
        self.headers = Some(headers);
        self.state = PostState::ReadingBody;
        Ok(())
    }

    fn prepare(&mut self, ctx: &CommandContext<'_>) -> Article {
        let hostname = &ctx.services.config.hostname;
        let mut headers = self.headers.take().unwrap_or_default();
        let mut body = std::mem::take(&mut self.body);
        if body.ends_with(CRLF) {
            body.truncate(body.len() - CRLF.len());
        }

        if !headers.contains("Message-ID") {
            headers.set("Message-ID", new_message_id(hostname));
        }
        if !headers.contains("Date") {
            headers.set("Date", Utc::now().to_rfc2822());
        }
        let path = match headers.get("Path") {
            Some(path) => format!("{}!{}", hostname, path),
            None => format!("{}!not-for-mail", hostname),
        };
        headers.set("Path", path);
        headers.set("Lines", self.lines.to_string());
        headers.set("Bytes", body.len().to_string());

        Article::new(headers, body)
    }

    async fn finish(&mut self, ctx: &mut CommandContext<'_>) -> CommandResult {
        if self.prepared.is_none() {
            self.prepared = Some(self.prepare(ctx));
        }
        let Some(article) = self.prepared.as_ref() else {
            return Ok(());
        };

        match post_article(ctx, article, &mut self.already_stored).await? {
            Outcome::Posted => {
                info!(
                    peer = %ctx.session.peer(),
                    message_id = article.message_id().unwrap_or_default(),
                    lines = self.lines,
                    "Article posted"
                );
                ctx.services.feed.enqueue(article.clone());
                ctx.reply.status(codes::ARTICLE_POSTED, "article posted ok");
                self.state = PostState::Finished;
                Ok(())
            }
            Outcome::Rejected(reason) => self.fail(ctx, codes::POSTING_FAILED, reason),
        }
    }
}

impl Default for PostCommand {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StatefulCommand for PostCommand {
    async fn process_line(&mut self, ctx: &mut CommandContext<'_>, line: &str) -> CommandResult {
        match self.state {
            PostState::WaitForLineOne => {
                let is_post = CommandLine::parse(line)
                    .map(|c| c.verb().eq_ignore_ascii_case("POST") && c.arg_count() == 0)
                    .unwrap_or(false);
                if !is_post {
                    return self.fail(ctx, codes::SYNTAX_ERROR, "usage: POST");
                }
                ctx.reply.status(
                    codes::SEND_ARTICLE,
                    "send article to be posted. End with <CR-LF>.<CR-LF>",
                );
                self.state = PostState::ReadingHeaders;
                Ok(())
            }
            PostState::ReadingHeaders => {
                let bare_dot = is_end_of_data(line);
                if bare_dot || line.is_empty() {
                    if let Err(reason) = self.end_headers(ctx) {
                        debug!(error = %reason, "Rejecting article with bad header block");
                        return self.fail(ctx, codes::POSTING_FAILED, "posting failed: bad header block");
                    }
                    if bare_dot {
                        return self.finish(ctx).await;
                    }
                    return Ok(());
                }
                if !self.account(ctx, line) {
                    return self.fail(ctx, codes::COMMAND_NOT_RECOGNIZED, "article too long");
                }
                self.header_block.push_str(line);
                self.header_block.push('\n');
                Ok(())
            }
            PostState::ReadingBody => {
                if is_end_of_data(line) {
                    return self.finish(ctx).await;
                }
                let line = dot_unstuff(line);
                if !self.account(ctx, line) {
                    return self.fail(ctx, codes::COMMAND_NOT_RECOGNIZED, "article too long");
                }
                self.body.push_str(line);
                self.body.push_str(CRLF);
                self.lines += 1;
                Ok(())
            }
            PostState::Finished => Ok(()),
        }
    }

    fn has_finished(&self) -> bool {
        self.state == PostState::Finished
    }
}

async fn post_article(
    ctx: &mut CommandContext<'_>,
    article: &Article,
    already_stored: &mut Option<bool>,
) -> Result<Outcome, crate::commands::CommandError> {
    let services = ctx.services;
    let store = services.store.as_ref();

    if let Some(control) = article.control() {
        let Some(target) = parse_cancel(control) else {
            return Ok(Outcome::Rejected("posting failed: malformed Control header"));
        };
        let deleted = store.delete_article(target).await?;
        info!(target = target, deleted = deleted, "Cancel control message processed");
        if store.group(CONTROL_GROUP).await?.is_some() {
            store.add_article(article, CONTROL_GROUP).await?;
        } else {
            debug!("No control group, cancel message not filed");
        }
        return Ok(Outcome::Posted);
    }

    let Some(message_id) = article.message_id() else {
        return Ok(Outcome::Rejected("posting failed: no Message-ID"));
    };
    let existed = match *already_stored {
        Some(existed) => existed,
        None => {
            let existed = store.article_exists(message_id).await?;
            *already_stored = Some(existed);
            existed
        }
    };

    let mut destinations = Vec::new();
    for name in article.newsgroups() {
        let Some(group) = store.group(&name).await? else {
            debug!(group = %name, "Skipping unknown group");
            continue;
        };
        if store.is_group_deleted(&name).await? {
            debug!(group = %name, "Skipping deleted group");
            continue;
        }
        destinations.push((name, group));
    }
    if destinations.is_empty() {
        return Ok(Outcome::Rejected("no newsgroup found / configuration error"));
    }

    if let Some(old) = article.supersedes() {
        let replaced = store.delete_article(old).await?;
        debug!(superseded = old, replaced = replaced, "Superseding article");
    }

    let trusted = services.config.is_trusted(ctx.session.peer().ip());
    for (name, group) in &destinations {
        match &group.mailing_list {
            Some(list) if !trusted => {
                services.gateway.forward(article, list).await?;
            }
            _ if existed => {
                debug!(message_id = message_id, "Duplicate post accepted silently");
            }
            _ => {
                store.add_article(article, name).await?;
            }
        }
    }
    Ok(Outcome::Posted)
}

/// Parses `cancel <message-id>`.
fn parse_cancel(control: &str) -> Option<&str> {
    let mut tokens = control.split_ascii_whitespace();
    let verb = tokens.next()?;
    let target = tokens.next()?;
    let well_formed = verb.eq_ignore_ascii_case("cancel")
        && target.len() > 2
        && target.starts_with('<')
        && target.ends_with('>')
        && tokens.next().is_none();
    well_formed.then_some(target)
}

/// Extracts the `charset=` parameter of a Content-Type value.
fn content_charset(content_type: &str) -> Option<Charset> {
    content_type.split(';').skip(1).find_map(|param| {
        let (name, value) = param.split_once('=')?;
        if name.trim().eq_ignore_ascii_case("charset") {
            Charset::from_label(value.trim().trim_matches('"'))
        } else {
            None
        }
    })
}

fn new_message_id(hostname: &str) -> String {
    let counter = MESSAGE_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("<{}.{}@{}>", Utc::now().timestamp_millis(), counter, hostname)
}
