//! Group selection and navigation: `GROUP`, `LISTGROUP`, `NEXT`, `LAST`.

use crate::commands::handler::{CommandContext, CommandError, CommandResult, StatelessCommand};
use crate::protocol::{codes, CommandLine};
use crate::storage::{ArticleStore, Group, StorageResult};
use async_trait::async_trait;

/// Resolves a group that exists and is not deleted.
async fn live_group(store: &dyn ArticleStore, name: &str) -> StorageResult<Option<Group>> {
    Ok(store.group(name).await?.filter(|g| !g.deleted))
}

fn group_summary(group: &Group) -> String {
    format!("{} {} {} {}", group.count, group.first, group.last, group.name)
}

/// Message-ID of article `number` in `group`, if it is still there.
async fn message_id_at(store: &dyn ArticleStore, group: &str, number: u64) -> StorageResult<String> {
    let article = store.article_by_index(group, number).await?;
    Ok(article
        .as_ref()
        .and_then(|a| a.message_id())
        .unwrap_or("<0>")
        .to_string())
}

/// `GROUP name`: selects a group and its first article.
#[derive(Debug, Clone, Copy)]
pub struct SelectGroup;

#[async_trait]
impl StatelessCommand for SelectGroup {
    async fn execute(&self, ctx: &mut CommandContext<'_>, line: &str) -> CommandResult {
        let command = CommandLine::parse(line)?;
        let name = command
            .arg(0)
            .ok_or_else(|| CommandError::Usage("usage: GROUP newsgroup".to_string()))?;

        match live_group(ctx.services.store.as_ref(), name).await? {
            Some(group) => {
                let first = (group.count > 0).then_some(group.first);
                ctx.session.select(&group.name, first);
                ctx.reply.status(codes::GROUP_SELECTED, group_summary(&group));
            }
            None => {
                ctx.reply.status(codes::NO_SUCH_GROUP, "no such news group");
            }
        }
        Ok(())
    }
}

/// `LISTGROUP [name]`: selects a group and lists its article numbers.
#[derive(Debug, Clone, Copy)]
pub struct ListGroup;

#[async_trait]
impl StatelessCommand for ListGroup {
    async fn execute(&self, ctx: &mut CommandContext<'_>, line: &str) -> CommandResult {
        let command = CommandLine::parse(line)?;
        let name = match command.arg(0).map(str::to_string).or_else(|| ctx.session.group.clone()) {
            Some(name) => name,
            None => {
                ctx.reply.status(codes::NO_GROUP_SELECTED, "no newsgroup selected");
                return Ok(());
            }
        };

        let store = ctx.services.store.as_ref();
        let group = match live_group(store, &name).await? {
            Some(group) => group,
            None => {
                ctx.reply.status(codes::NO_SUCH_GROUP, "no such news group");
                return Ok(());
            }
        };
        let numbers = store.article_numbers(&group.name).await?;

        ctx.session.select(&group.name, numbers.first().copied());
        ctx.reply.status(
            codes::GROUP_SELECTED,
            format!("{} list follows", group_summary(&group)),
        );
        for number in numbers {
            ctx.reply.data_line(&number.to_string());
        }
        ctx.reply.end_data();
        Ok(())
    }
}

/// `NEXT` and `LAST`: move the current article pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Next,
    Last,
}

#[async_trait]
impl StatelessCommand for Step {
    async fn execute(&self, ctx: &mut CommandContext<'_>, _line: &str) -> CommandResult {
        let Some(group) = ctx.session.group.clone() else {
            ctx.reply.status(codes::NO_GROUP_SELECTED, "no newsgroup selected");
            return Ok(());
        };
        let Some(current) = ctx.session.article else {
            ctx.reply
                .status(codes::NO_CURRENT_ARTICLE, "current article number is invalid");
            return Ok(());
        };

        let store = ctx.services.store.as_ref();
        let numbers = store.article_numbers(&group).await?;
        let target = match self {
            Step::Next => numbers.iter().copied().find(|&n| n > current),
            Step::Last => numbers.iter().rev().copied().find(|&n| n < current),
        };

        match target {
            Some(number) => {
                let message_id = message_id_at(store, &group, number).await?;
                ctx.session.article = Some(number);
                ctx.reply.status(
                    codes::ARTICLE_EXISTS,
                    format!("{} {} article retrieved - request text separately", number, message_id),
                );
            }
            None if *self == Step::Next => {
                ctx.reply
                    .status(codes::NO_NEXT_ARTICLE, "no next article in this group");
            }
            None => {
                ctx.reply
                    .status(codes::NO_PREV_ARTICLE, "no previous article in this group");
            }
        }
        Ok(())
    }
}
