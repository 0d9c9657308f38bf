//! Storage Module
//!
//! Everything a command handler may touch outside its own connection:
//! the article store contract, the article model, the mailing-list gateway
//! and the peer feed queue.
//!
//! ## Example
//!
//! ```
//! use newsd::storage::{Article, ArticleStore, Headers, MemoryStore};
//!
//! # tokio_test::block_on(async {
//! let store = MemoryStore::new();
//! store.create_group("misc.test", "Testing group");
//!
//! let mut headers = Headers::new();
//! headers.set("Message-ID", "<1@example.com>");
//! headers.set("Newsgroups", "misc.test");
//! let article = Article::new(headers, "Hello");
//!
//! let number = store.add_article(&article, "misc.test").await.unwrap();
//! assert_eq!(number, 1);
//! # });
//! ```

pub mod article;
pub mod engine;
pub mod feed;

// Re-export commonly used types
pub use article::{Article, Group, HeaderError, Headers};
pub use engine::{ArticleStore, MemoryStore, StorageError, StorageResult};
pub use feed::{FeedQueue, LoggingGateway, MailGateway};
