//! NNTP Response Types
//!
//! Every response line starts with a three-digit status code followed by
//! free text and is terminated by CRLF. Multi-line responses continue with
//! data lines and end with a line holding a single `.`.
//!
//! ## Examples
//!
//! Single line: `211 3 1 3 misc.test\r\n`
//! Multi-line: `215 list follows\r\nmisc.test 3 1 y\r\n.\r\n`
//!
//! Data lines that begin with `.` are dot-stuffed (`..`) on the way out and
//! un-stuffed on the way in.

use std::borrow::Cow;
use std::fmt;

/// The CRLF terminator used by NNTP
pub const CRLF: &str = "\r\n";

/// Terminator of a multi-line block
pub const END_OF_DATA: &str = ".";

/// NNTP status codes used by this server.
pub mod codes {
    pub const HELP_TEXT: u16 = 100;
    pub const CAPABILITY_LIST: u16 = 101;
    pub const SERVER_DATE: u16 = 111;

    pub const POSTING_ALLOWED: u16 = 200;
    pub const CONNECTION_CLOSING: u16 = 205;
    pub const GROUP_SELECTED: u16 = 211;
    pub const INFORMATION_FOLLOWS: u16 = 215;
    pub const ARTICLE_FOLLOWS: u16 = 220;
    pub const HEAD_FOLLOWS: u16 = 221;
    pub const BODY_FOLLOWS: u16 = 222;
    pub const ARTICLE_EXISTS: u16 = 223;
    pub const ARTICLE_POSTED: u16 = 240;

    pub const SEND_ARTICLE: u16 = 340;

    pub const NO_SUCH_GROUP: u16 = 411;
    pub const NO_GROUP_SELECTED: u16 = 412;
    pub const NO_CURRENT_ARTICLE: u16 = 420;
    pub const NO_NEXT_ARTICLE: u16 = 421;
    pub const NO_PREV_ARTICLE: u16 = 422;
    pub const NO_SUCH_ARTICLE_NUMBER: u16 = 423;
    pub const NO_SUCH_ARTICLE_ID: u16 = 430;
    pub const POSTING_FAILED: u16 = 441;

    pub const COMMAND_NOT_RECOGNIZED: u16 = 500;
    pub const SYNTAX_ERROR: u16 = 501;
}

/// Outbound response text accumulated while handling one line.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Reply {
    text: String,
}

impl Reply {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a status line: `<code> <message>\r\n`.
    pub fn status(&mut self, code: u16, message: impl fmt::Display) -> &mut Self {
        self.text.push_str(&format!("{:03} {}{}", code, message, CRLF));
        self
    }

    /// Appends one data line of a multi-line block, dot-stuffed.
    pub fn data_line(&mut self, line: &str) -> &mut Self {
        self.text.push_str(&dot_stuff(line));
        self.text.push_str(CRLF);
        self
    }

    /// Appends every line of a CRLF-separated block as data lines.
    pub fn data_block(&mut self, block: &str) -> &mut Self {
        if block.is_empty() {
            return self;
        }
        for line in block.trim_end_matches(CRLF).split(CRLF) {
            self.data_line(line);
        }
        self
    }

    /// Terminates a multi-line block.
    pub fn end_data(&mut self) -> &mut Self {
        self.text.push_str(END_OF_DATA);
        self.text.push_str(CRLF);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    pub fn len(&self) -> usize {
        self.text.len()
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Drops everything appended after the first `len` bytes.
    pub fn truncate(&mut self, len: usize) {
        self.text.truncate(len);
    }

    /// Takes the accumulated text, leaving the reply empty.
    pub fn take(&mut self) -> String {
        std::mem::take(&mut self.text)
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// Escapes a data line that starts with `.`.
pub fn dot_stuff(line: &str) -> Cow<'_, str> {
    if line.starts_with('.') {
        Cow::Owned(format!(".{}", line))
    } else {
        Cow::Borrowed(line)
    }
}

/// Removes the escape added by [`dot_stuff`].
pub fn dot_unstuff(line: &str) -> &str {
    if line.starts_with("..") {
        &line[1..]
    } else {
        line
    }
}

/// True when `line` is the end-of-data marker.
pub fn is_end_of_data(line: &str) -> bool {
    line == END_OF_DATA
}
