//! Command Line Parser
//!
//! Turns one framed line into text and, when it starts a new command, into
//! a verb and its arguments.
//!
//! ## Decoding
//!
//! Lines arrive as raw bytes without the `\n` terminator. [`decode_line`]
//! decodes them with the connection's current charset and strips a single
//! trailing `\r`. Nothing else is trimmed: inside a POST header block a
//! leading space marks a folded continuation and has to survive.
//!
//! ## Tokenizing
//!
//! A command line is split on ASCII whitespace. The first token is the
//! verb, matched case-insensitively; the rest are arguments.
//!
//! ```text
//! "group  misc.test\r"  ──decode──>  "group  misc.test"
//!                       ──parse───>  verb "GROUP", args ["misc.test"]
//! ```

use crate::buffer::Charset;
use thiserror::Error;

/// Errors raised while interpreting command arguments.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// The line holds no verb at all
    #[error("empty command line")]
    EmptyLine,

    /// An article argument is neither a number nor a `<message-id>`
    #[error("invalid article reference: {0}")]
    InvalidArticleRef(String),
}

/// Decodes a framed line and strips one trailing carriage return.
pub fn decode_line(raw: &[u8], charset: Charset) -> String {
    let mut line = charset.decode(raw);
    if line.ends_with('\r') {
        line.pop();
    }
    line
}

/// A command line split into verb and arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine<'a> {
    verb: &'a str,
    args: Vec<&'a str>,
}

impl<'a> CommandLine<'a> {
    pub fn parse(line: &'a str) -> Result<Self, ParseError> {
        let mut tokens = line.split_ascii_whitespace();
        let verb = tokens.next().ok_or(ParseError::EmptyLine)?;
        Ok(Self {
            verb,
            args: tokens.collect(),
        })
    }

    /// The verb as the client sent it.
    pub fn verb(&self) -> &'a str {
        self.verb
    }

    /// The verb folded to upper case, as used for dispatch.
    pub fn verb_upper(&self) -> String {
        self.verb.to_ascii_uppercase()
    }

    pub fn args(&self) -> &[&'a str] {
        &self.args
    }

    pub fn arg(&self, index: usize) -> Option<&'a str> {
        self.args.get(index).copied()
    }

    pub fn arg_count(&self) -> usize {
        self.args.len()
    }
}

/// The article argument of ARTICLE, HEAD, BODY and STAT.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArticleRef<'a> {
    /// No argument: the currently selected article
    Current,
    /// An article number in the selected group
    Number(u64),
    /// A `<message-id>`
    MessageId(&'a str),
}

impl<'a> ArticleRef<'a> {
    pub fn parse(arg: Option<&'a str>) -> Result<Self, ParseError> {
        match arg {
            None => Ok(ArticleRef::Current),
            Some(id) if id.starts_with('<') && id.ends_with('>') && id.len() > 2 => {
                Ok(ArticleRef::MessageId(id))
            }
            Some(number) => number
                .parse()
                .map(ArticleRef::Number)
                .map_err(|_| ParseError::InvalidArticleRef(number.to_string())),
        }
    }
}
