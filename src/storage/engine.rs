//! Storage Contract and In-Memory Article Store
//!
//! The protocol layer talks to article storage only through the
//! [`ArticleStore`] trait. Every call is fallible: a backend may be briefly
//! unavailable (retryable) or may reject the operation outright (permanent).
//! Reconnection and backoff belong to the backend; the protocol layer retries
//! a failed line at most once.
//!
//! [`MemoryStore`] is a complete in-process implementation used by the
//! `newsd` binary and the test-suite.
//!
//! ## Layout
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       MemoryStore                           │
//! │  ┌──────────────────┐  ┌──────────────────┐  ┌───────────┐  │
//! │  │ groups           │  │ articles         │  │ config    │  │
//! │  │ name → watermark │  │ message-id →     │  │ key →     │  │
//! │  │   + number index │  │   article        │  │   value   │  │
//! │  └──────────────────┘  └──────────────────┘  └───────────┘  │
//! │                   one RwLock over all three                 │
//! └─────────────────────────────────────────────────────────────┘
//! ```

use crate::storage::article::{Article, Group};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use thiserror::Error;

/// Errors reported by a storage backend.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// Backend temporarily unreachable; the operation may be retried
    #[error("storage backend unavailable: {0}")]
    Unavailable(String),

    /// The operation failed and will fail again
    #[error("storage error: {0}")]
    Permanent(String),
}

impl StorageError {
    /// True when the caller may retry the operation.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StorageError::Unavailable(_))
    }
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Article and group storage used by command handlers.
#[async_trait]
pub trait ArticleStore: Send + Sync {
    async fn article_by_message_id(&self, message_id: &str) -> StorageResult<Option<Article>>;

    async fn article_by_index(&self, group: &str, index: u64) -> StorageResult<Option<Article>>;

    /// Files `article` into `group` and returns its article number. Adding a
    /// message-id that is already filed in `group` returns the existing
    /// number.
    async fn add_article(&self, article: &Article, group: &str) -> StorageResult<u64>;

    /// Removes the article from every group. Returns false if it was unknown.
    async fn delete_article(&self, message_id: &str) -> StorageResult<bool>;

    async fn article_exists(&self, message_id: &str) -> StorageResult<bool>;

    async fn group(&self, name: &str) -> StorageResult<Option<Group>>;

    async fn is_group_deleted(&self, name: &str) -> StorageResult<bool>;

    /// Article numbers present in `group`, ascending.
    async fn article_numbers(&self, group: &str) -> StorageResult<Vec<u64>>;

    /// All groups, including deleted ones.
    async fn groups(&self) -> StorageResult<Vec<Group>>;

    async fn config_value(&self, key: &str) -> StorageResult<Option<String>>;

    async fn set_config_value(&self, key: &str, value: &str) -> StorageResult<()>;
}

#[derive(Debug)]
struct GroupEntry {
    description: String,
    deleted: bool,
    mailing_list: Option<String>,
    /// Highest article number ever assigned
    watermark: u64,
    /// Article number → message-id
    index: BTreeMap<u64, String>,
}

impl GroupEntry {
    fn snapshot(&self, name: &str) -> Group {
        let first = self
            .index
            .keys()
            .next()
            .copied()
            .unwrap_or(self.watermark + 1);
        Group {
            name: name.to_string(),
            description: self.description.clone(),
            first,
            last: self.watermark,
            count: self.index.len() as u64,
            deleted: self.deleted,
            mailing_list: self.mailing_list.clone(),
        }
    }

    fn number_of(&self, message_id: &str) -> Option<u64> {
        self.index
            .iter()
            .find(|(_, id)| id.as_str() == message_id)
            .map(|(n, _)| *n)
    }
}

#[derive(Debug, Default)]
struct Inner {
    groups: BTreeMap<String, GroupEntry>,
    articles: HashMap<String, Article>,
    config: HashMap<String, String>,
}

/// In-memory [`ArticleStore`].
pub struct MemoryStore {
    inner: RwLock<Inner>,

    /// Remaining calls that will fail with `Unavailable`
    fail_next: AtomicUsize,

    /// Statistics: articles filed
    add_count: AtomicU64,

    /// Statistics: articles deleted
    delete_count: AtomicU64,
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("MemoryStore")
            .field("groups", &inner.groups.len())
            .field("articles", &inner.articles.len())
            .field("add_count", &self.add_count.load(Ordering::Relaxed))
            .field("delete_count", &self.delete_count.load(Ordering::Relaxed))
            .finish()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            fail_next: AtomicUsize::new(0),
            add_count: AtomicU64::new(0),
            delete_count: AtomicU64::new(0),
        }
    }

    /// Creates a group if it does not exist yet. Returns true if created.
    pub fn create_group(&self, name: &str, description: &str) -> bool {
        let mut inner = self.inner.write();
        if inner.groups.contains_key(name) {
            return false;
        }
        inner.groups.insert(
            name.to_string(),
            GroupEntry {
                description: description.to_string(),
                deleted: false,
                mailing_list: None,
                watermark: 0,
                index: BTreeMap::new(),
            },
        );
        true
    }

    /// Marks a group as mirroring the given mailing list.
    pub fn set_mailing_list(&self, group: &str, list: &str) -> bool {
        match self.inner.write().groups.get_mut(group) {
            Some(entry) => {
                entry.mailing_list = Some(list.to_string());
                true
            }
            None => false,
        }
    }

    /// Flags a group as deleted. Its articles stay readable by message-id.
    pub fn mark_deleted(&self, group: &str) -> bool {
        match self.inner.write().groups.get_mut(group) {
            Some(entry) => {
                entry.deleted = true;
                true
            }
            None => false,
        }
    }

    /// Makes the next `n` calls fail with [`StorageError::Unavailable`].
    pub fn fail_next(&self, n: usize) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    /// Number of stored articles.
    pub fn article_count(&self) -> usize {
        self.inner.read().articles.len()
    }

    fn check_available(&self) -> StorageResult<()> {
        let injected = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        match injected {
            Ok(_) => Err(StorageError::Unavailable(
                "connection to backend lost".to_string(),
            )),
            Err(_) => Ok(()),
        }
    }
}

#[async_trait]
impl ArticleStore for MemoryStore {
    async fn article_by_message_id(&self, message_id: &str) -> StorageResult<Option<Article>> {
        self.check_available()?;
        Ok(self.inner.read().articles.get(message_id).cloned())
    }

    async fn article_by_index(&self, group: &str, index: u64) -> StorageResult<Option<Article>> {
        self.check_available()?;
        let inner = self.inner.read();
        let article = inner
            .groups
            .get(group)
            .and_then(|g| g.index.get(&index))
            .and_then(|id| inner.articles.get(id))
            .cloned();
        Ok(article)
    }

    async fn add_article(&self, article: &Article, group: &str) -> StorageResult<u64> {
        self.check_available()?;
        let message_id = article
            .message_id()
            .ok_or_else(|| StorageError::Permanent("article has no Message-ID".to_string()))?
            .to_string();

        let mut inner = self.inner.write();
        let entry = inner
            .groups
            .get_mut(group)
            .ok_or_else(|| StorageError::Permanent(format!("no such group: {}", group)))?;

        if let Some(existing) = entry.number_of(&message_id) {
            return Ok(existing);
        }

        entry.watermark += 1;
        let number = entry.watermark;
        entry.index.insert(number, message_id.clone());
        inner.articles.insert(message_id, article.clone());
        self.add_count.fetch_add(1, Ordering::Relaxed);
        Ok(number)
    }

    async fn delete_article(&self, message_id: &str) -> StorageResult<bool> {
        self.check_available()?;
        let mut inner = self.inner.write();
        if inner.articles.remove(message_id).is_none() {
            return Ok(false);
        }
        for entry in inner.groups.values_mut() {
            entry.index.retain(|_, id| id.as_str() != message_id);
        }
        self.delete_count.fetch_add(1, Ordering::Relaxed);
        Ok(true)
    }

    async fn article_exists(&self, message_id: &str) -> StorageResult<bool> {
        self.check_available()?;
        Ok(self.inner.read().articles.contains_key(message_id))
    }

    async fn group(&self, name: &str) -> StorageResult<Option<Group>> {
        self.check_available()?;
        Ok(self.inner.read().groups.get(name).map(|g| g.snapshot(name)))
    }

    async fn is_group_deleted(&self, name: &str) -> StorageResult<bool> {
        self.check_available()?;
        Ok(self
            .inner
            .read()
            .groups
            .get(name)
            .map(|g| g.deleted)
            .unwrap_or(false))
    }

    async fn article_numbers(&self, group: &str) -> StorageResult<Vec<u64>> {
        self.check_available()?;
        Ok(self
            .inner
            .read()
            .groups
            .get(group)
            .map(|g| g.index.keys().copied().collect())
            .unwrap_or_default())
    }

    async fn groups(&self) -> StorageResult<Vec<Group>> {
        self.check_available()?;
        Ok(self
            .inner
            .read()
            .groups
            .iter()
            .map(|(name, g)| g.snapshot(name))
            .collect())
    }

    async fn config_value(&self, key: &str) -> StorageResult<Option<String>> {
        self.check_available()?;
        Ok(self.inner.read().config.get(key).cloned())
    }

    async fn set_config_value(&self, key: &str, value: &str) -> StorageResult<()> {
        self.check_available()?;
        self.inner
            .write()
            .config
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::article::Headers;

    fn article(id: &str, groups: &str) -> Article {
        let mut headers = Headers::new();
        headers.set("Message-ID", id);
        headers.set("Newsgroups", groups);
        Article::new(headers, "body")
    }

    #[tokio::test]
    async fn test_add_and_fetch() {
        let store = MemoryStore::new();
        store.create_group("misc.test", "Testing");

        let n = store.add_article(&article("<1@x>", "misc.test"), "misc.test").await.unwrap();
        assert_eq!(n, 1);

        let by_id = store.article_by_message_id("<1@x>").await.unwrap();
        assert!(by_id.is_some());
        let by_index = store.article_by_index("misc.test", 1).await.unwrap();
        assert_eq!(by_id, by_index);
        assert!(store.article_exists("<1@x>").await.unwrap());
    }

    #[tokio::test]
    async fn test_add_is_idempotent_per_group() {
        let store = MemoryStore::new();
        store.create_group("misc.test", "");
        let a = article("<1@x>", "misc.test");
        assert_eq!(store.add_article(&a, "misc.test").await.unwrap(), 1);
        assert_eq!(store.add_article(&a, "misc.test").await.unwrap(), 1);
        assert_eq!(store.article_numbers("misc.test").await.unwrap(), vec![1]);
    }

    #[tokio::test]
    async fn test_watermarks() {
        let store = MemoryStore::new();
        store.create_group("misc.test", "");

        let empty = store.group("misc.test").await.unwrap().unwrap();
        assert_eq!((empty.count, empty.first, empty.last), (0, 1, 0));

        for i in 1..=3 {
            let a = article(&format!("<{}@x>", i), "misc.test");
            store.add_article(&a, "misc.test").await.unwrap();
        }
        assert!(store.delete_article("<1@x>").await.unwrap());

        let group = store.group("misc.test").await.unwrap().unwrap();
        assert_eq!((group.count, group.first, group.last), (2, 2, 3));
        assert!(!store.delete_article("<1@x>").await.unwrap());
    }

    #[tokio::test]
    async fn test_add_to_unknown_group_is_permanent_error() {
        let store = MemoryStore::new();
        let err = store
            .add_article(&article("<1@x>", "nope"), "nope")
            .await
            .unwrap_err();
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_deleted_and_mailing_list_flags() {
        let store = MemoryStore::new();
        store.create_group("gone", "");
        store.create_group("list.mirror", "");
        assert!(store.mark_deleted("gone"));
        assert!(store.set_mailing_list("list.mirror", "list@example.com"));

        assert!(store.is_group_deleted("gone").await.unwrap());
        assert!(!store.is_group_deleted("list.mirror").await.unwrap());
        let mirror = store.group("list.mirror").await.unwrap().unwrap();
        assert!(mirror.is_mailing_list());
    }

    #[tokio::test]
    async fn test_fail_next_injects_retryable_errors() {
        let store = MemoryStore::new();
        store.fail_next(2);
        assert!(store.groups().await.unwrap_err().is_retryable());
        assert!(store.groups().await.is_err());
        assert!(store.groups().await.is_ok());
    }

    #[tokio::test]
    async fn test_config_values() {
        let store = MemoryStore::new();
        assert_eq!(store.config_value("timeout").await.unwrap(), None);
        store.set_config_value("timeout", "30").await.unwrap();
        assert_eq!(
            store.config_value("timeout").await.unwrap(),
            Some("30".to_string())
        );
    }
}
