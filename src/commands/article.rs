//! Article retrieval: `ARTICLE`, `HEAD`, `BODY`, `STAT`.
//!
//! All four take the same argument (nothing, an article number or a
//! `<message-id>`) and differ only in what they send back. Text is sent as
//! a dot-stuffed multi-line block.

use crate::commands::handler::{CommandContext, CommandResult, StatelessCommand};
use crate::protocol::{codes, ArticleRef, CommandLine};
use crate::storage::Article;
use async_trait::async_trait;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retrieve {
    Article,
    Head,
    Body,
    Stat,
}

impl Retrieve {
    fn code(self) -> u16 {
        match self {
            Retrieve::Article => codes::ARTICLE_FOLLOWS,
            Retrieve::Head => codes::HEAD_FOLLOWS,
            Retrieve::Body => codes::BODY_FOLLOWS,
            Retrieve::Stat => codes::ARTICLE_EXISTS,
        }
    }

    fn description(self) -> &'static str {
        match self {
            Retrieve::Article => "article retrieved - head and body follow",
            Retrieve::Head => "article retrieved - head follows",
            Retrieve::Body => "article retrieved - body follows",
            Retrieve::Stat => "article retrieved - request text separately",
        }
    }
}

#[async_trait]
impl StatelessCommand for Retrieve {
    async fn execute(&self, ctx: &mut CommandContext<'_>, line: &str) -> CommandResult {
        let command = CommandLine::parse(line)?;
        let target = ArticleRef::parse(command.arg(0))?;
        let store = ctx.services.store.as_ref();

        let (number, article) = match target {
            ArticleRef::MessageId(id) => match store.article_by_message_id(id).await? {
                Some(article) => (0, article),
                None => {
                    ctx.reply.status(codes::NO_SUCH_ARTICLE_ID, "no such article found");
                    return Ok(());
                }
            },
            ArticleRef::Number(number) => {
                let Some(group) = ctx.session.group.clone() else {
                    ctx.reply.status(codes::NO_GROUP_SELECTED, "no newsgroup selected");
                    return Ok(());
                };
                match store.article_by_index(&group, number).await? {
                    Some(article) => {
                        ctx.session.article = Some(number);
                        (number, article)
                    }
                    None => {
                        ctx.reply
                            .status(codes::NO_SUCH_ARTICLE_NUMBER, "no article with that number");
                        return Ok(());
                    }
                }
            }
            ArticleRef::Current => {
                let Some(group) = ctx.session.group.clone() else {
                    ctx.reply.status(codes::NO_GROUP_SELECTED, "no newsgroup selected");
                    return Ok(());
                };
                let current = match ctx.session.article {
                    Some(number) => store.article_by_index(&group, number).await?.map(|a| (number, a)),
                    None => None,
                };
                match current {
                    Some(found) => found,
                    None => {
                        ctx.reply
                            .status(codes::NO_CURRENT_ARTICLE, "current article number is invalid");
                        return Ok(());
                    }
                }
            }
        };

        self.respond(ctx, number, &article);
        Ok(())
    }
}

impl Retrieve {
    fn respond(self, ctx: &mut CommandContext<'_>, number: u64, article: &Article) {
        let message_id = article.message_id().unwrap_or("<0>");
        ctx.reply.status(
            self.code(),
            format!("{} {} {}", number, message_id, self.description()),
        );

        match self {
            Retrieve::Stat => return,
            Retrieve::Article => {
                ctx.reply.data_block(&article.headers.to_wire()).data_line("");
                write_body(ctx, article);
            }
            Retrieve::Head => {
                ctx.reply.data_block(&article.headers.to_wire());
            }
            Retrieve::Body => write_body(ctx, article),
        }
        ctx.reply.end_data();
    }
}

fn write_body(ctx: &mut CommandContext<'_>, article: &Article) {
    for line in article.body_lines() {
        ctx.reply.data_line(line);
    }
}
