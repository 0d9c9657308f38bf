//! Downstream destinations for posted articles.
//!
//! Two collaborators sit behind a successful POST:
//!
//! - [`MailGateway`] receives articles aimed at mailing-list mirrored groups
//!   when the poster is not a trusted peer.
//! - [`FeedQueue`] collects every accepted article for peer feeding.

use crate::storage::article::Article;
use crate::storage::engine::StorageResult;
use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Hands articles to the mailing-list side of a mirrored group.
#[async_trait]
pub trait MailGateway: Send + Sync {
    /// Forwards `article` to `list`.
    async fn forward(&self, article: &Article, list: &str) -> StorageResult<()>;
}

/// Gateway that only records what it would have sent.
#[derive(Debug, Default)]
pub struct LoggingGateway;

#[async_trait]
impl MailGateway for LoggingGateway {
    async fn forward(&self, article: &Article, list: &str) -> StorageResult<()> {
        info!(
            list = list,
            message_id = article.message_id().unwrap_or("<none>"),
            "Article handed to mailing-list gateway"
        );
        Ok(())
    }
}

/// Queue of accepted articles awaiting peer feeding.
#[derive(Debug, Clone)]
pub struct FeedQueue {
    tx: mpsc::UnboundedSender<Article>,
}

impl FeedQueue {
    /// Creates a queue and the receiver the feeder drains.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Article>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Enqueues an article. Returns false if the feeder has gone away.
    pub fn enqueue(&self, article: Article) -> bool {
        let message_id = article.message_id().map(str::to_string);
        match self.tx.send(article) {
            Ok(()) => true,
            Err(_) => {
                debug!(message_id = ?message_id, "Peer feed closed, article not queued");
                false
            }
        }
    }
}
