//! Command Handler Module
//!
//! This module implements the command layer of newsd: the dispatch table
//! and one handler per NNTP verb.
//!
//! ## Architecture
//!
//! ```text
//! Framed line
//!       │
//!       ▼
//! ┌──────────────────────┐
//! │ ProtocolStateMachine │  (protocol module)
//! └──────────┬───────────┘
//!            │ resolve(verb) or in-progress handler
//!            ▼
//! ┌──────────────────────┐
//! │    CommandTable      │  (this module)
//! │                      │
//! │  - Stateless: shared │
//! │  - Stateful: per call│
//! └──────────┬───────────┘
//!            │
//!            ▼
//! ┌──────────────────────┐
//! │    ArticleStore      │  (storage module)
//! └──────────────────────┘
//! ```
//!
//! ## Supported Commands
//!
//! ### Reading
//! - `GROUP`, `LISTGROUP`, `NEXT`, `LAST`
//! - `ARTICLE`, `HEAD`, `BODY`, `STAT`
//! - `LIST [ACTIVE | NEWSGROUPS]`
//!
//! ### Posting
//! - `POST` (multi-line, stateful)
//!
//! ### Session
//! - `CAPABILITIES`, `DATE`, `HELP`, `MODE READER`, `QUIT`

pub mod article;
pub mod group;
pub mod handler;
pub mod info;
pub mod post;

// Re-export the dispatch types
pub use handler::{
    CommandContext, CommandDescriptor, CommandError, CommandResult, CommandTable, Handler,
    HandlerKind, Services, StatefulCommand, StatelessCommand,
};
pub use post::{PostCommand, PostState};

#[cfg(test)]
pub(crate) use handler::testing;
