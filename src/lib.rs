//! # newsd - A Multi-Connection NNTP News Server
//!
//! newsd serves the NNTP reader protocol over TCP. Clients select groups,
//! walk and retrieve articles and post new ones; the server handles many of
//! them at once with a small, fixed pool of protocol workers.
//!
//! ## Features
//!
//! - **Line-oriented protocol core**: pooled line buffers, per-connection
//!   charsets, dot-stuffed multi-line replies
//! - **Bounded workers**: connections that have complete lines are queued
//!   and drained by N workers, never more than one per connection at a time
//! - **Pluggable storage**: handlers talk to an [`ArticleStore`]; a
//!   [`MemoryStore`] is included
//! - **Idle reaping**: silent clients are purged after a timeout
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                               newsd                                     │
//! │                                                                         │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐                  │
//! │  │  Acceptor   │───>│ Connection  │───>│ Worker Pool │                  │
//! │  │ (Listener)  │    │  Registry   │    │  (N tasks)  │                  │
//! │  └─────────────┘    └──────┬──────┘    └──────┬──────┘                  │
//! │                            │                  │                         │
//! │                            │                  ▼                         │
//! │  ┌─────────────┐           │         ┌──────────────────┐               │
//! │  │ Line Framer │<──────────┘         │ ProtocolState-   │               │
//! │  │ Buffer Pool │                     │ Machine          │               │
//! │  └─────────────┘                     └────────┬─────────┘               │
//! │                                               │                         │
//! │                                               ▼                         │
//! │                     ┌─────────────────────────────────────────────┐    │
//! │                     │ CommandTable ──> ArticleStore / Gateway /   │    │
//! │                     │                  FeedQueue                  │    │
//! │                     └─────────────────────────────────────────────┘    │
//! │                                               ▲                         │
//! │                     ┌─────────────────────────┴───────────────────────┐ │
//! │                     │           IdleReaper                            │ │
//! │                     │      (Background Tokio Task)                    │ │
//! │                     └─────────────────────────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! use newsd::{LoggingGateway, MemoryStore, NewsServer, ServerConfig};
//! use newsd::storage::FeedQueue;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let store = Arc::new(MemoryStore::new());
//!     store.create_group("misc.test", "Testing");
//!
//!     let (feed, _articles) = FeedQueue::new();
//!     let server = NewsServer::bind(
//!         ServerConfig::default(),
//!         store,
//!         Arc::new(LoggingGateway),
//!         feed,
//!     )
//!     .await?;
//!
//!     server.run().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Module Overview
//!
//! - [`buffer`]: buffer pool, line framing and charsets
//! - [`protocol`]: reply codes, command-line parsing and the per-connection
//!   state machine
//! - [`commands`]: the command table and one handler per verb
//! - [`connection`]: connection state, registry and idle reaper
//! - [`server`]: acceptor, reader, worker and writer tasks
//! - [`storage`]: the article store contract and its collaborators
//! - [`config`]: runtime configuration

pub mod buffer;
pub mod commands;
pub mod config;
pub mod connection;
pub mod protocol;
pub mod server;
pub mod storage;

// Re-export commonly used types for convenience
pub use commands::{CommandTable, Services};
pub use config::{ArgsOutcome, ServerConfig, DEFAULT_HOST, DEFAULT_PORT};
pub use connection::{ConnectionRegistry, ConnectionStats};
pub use protocol::ProtocolStateMachine;
pub use server::NewsServer;
pub use storage::{ArticleStore, LoggingGateway, MemoryStore};

/// Version of newsd
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
