//! NNTP Protocol Implementation
//!
//! This module provides the line-level side of NNTP: turning framed input
//! lines into commands, routing them through a per-connection state
//! machine, and building correctly framed responses.
//!
//! ## Overview
//!
//! NNTP is a line-oriented text protocol. Every line ends with CRLF, every
//! response starts with a three-digit status code, and multi-line blocks end
//! with a line holding a single `.`.
//!
//! ## Modules
//!
//! - `types`: status codes, the `Reply` builder and dot-stuffing
//! - `parser`: line decoding and command tokenizing
//! - `session`: `Session` and the `ProtocolStateMachine`
//!
//! ## Example
//!
//! ```ignore
//! use newsd::protocol::{ProtocolStateMachine, Reply};
//!
//! let mut machine = ProtocolStateMachine::new(peer);
//! let outcome = machine.process_line(b"GROUP misc.test\r", &services).await;
//! assert!(outcome.reply.starts_with("211"));
//! ```

pub mod parser;
pub mod session;
pub mod types;

// Re-export commonly used types for convenience
pub use parser::{decode_line, ArticleRef, CommandLine, ParseError};
pub use session::{LineOutcome, ProtocolStateMachine, Session};
pub use types::{codes, dot_stuff, dot_unstuff, is_end_of_data, Reply, CRLF};
