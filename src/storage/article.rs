//! Articles, header blocks and newsgroups.

use std::fmt;
use thiserror::Error;

/// Errors raised while parsing a header block.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HeaderError {
    /// The block starts with a folded continuation line
    #[error("continuation line without a preceding header")]
    OrphanContinuation,

    /// A line has no `:` separator
    #[error("header line without ':' separator: {0}")]
    MissingColon(String),

    /// The header name is empty or contains whitespace
    #[error("invalid header name: {0:?}")]
    InvalidName(String),
}

/// Ordered header collection with case-insensitive names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a raw header block, unfolding continuation lines.
    ///
    /// A line starting with a space or tab continues the previous header;
    /// its text is joined to the previous value with one space. Leading
    /// whitespace is significant, so callers must hand lines in untrimmed.
    pub fn parse(block: &str) -> Result<Self, HeaderError> {
        let mut headers = Headers::new();

        for line in block.lines() {
            if line.is_empty() {
                continue;
            }

            if line.starts_with([' ', '\t']) {
                let (_, value) = headers
                    .entries
                    .last_mut()
                    .ok_or(HeaderError::OrphanContinuation)?;
                let folded = line.trim();
                if !folded.is_empty() {
                    if !value.is_empty() {
                        value.push(' ');
                    }
                    value.push_str(folded);
                }
                continue;
            }

            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| HeaderError::MissingColon(line.to_string()))?;
            if name.is_empty() || name.contains(char::is_whitespace) {
                return Err(HeaderError::InvalidName(name.to_string()));
            }
            headers
                .entries
                .push((name.to_string(), value.trim().to_string()));
        }

        Ok(headers)
    }

    /// First value of the named header.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Replaces the named header in place, or appends it.
    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self
            .entries
            .iter_mut()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
        {
            Some((_, v)) => *v = value,
            None => self.entries.push((name.to_string(), value)),
        }
    }

    /// Removes every occurrence of the named header and returns the first.
    pub fn remove(&mut self, name: &str) -> Option<String> {
        let mut removed = None;
        self.entries.retain(|(n, v)| {
            if n.eq_ignore_ascii_case(name) {
                if removed.is_none() {
                    removed = Some(v.clone());
                }
                false
            } else {
                true
            }
        });
        removed
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Header block in wire form, each line terminated by CRLF.
    pub fn to_wire(&self) -> String {
        let mut out = String::new();
        for (name, value) in &self.entries {
            out.push_str(name);
            out.push_str(": ");
            out.push_str(value);
            out.push_str("\r\n");
        }
        out
    }
}

/// A news article: headers plus a CRLF-separated body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Article {
    pub headers: Headers,
    pub body: String,
}

impl Article {
    pub fn new(headers: Headers, body: impl Into<String>) -> Self {
        Self {
            headers,
            body: body.into(),
        }
    }

    pub fn message_id(&self) -> Option<&str> {
        self.headers.get("Message-ID")
    }

    /// Newsgroups named in the `Newsgroups` header.
    pub fn newsgroups(&self) -> Vec<String> {
        self.headers
            .get("Newsgroups")
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn control(&self) -> Option<&str> {
        self.headers.get("Control")
    }

    pub fn supersedes(&self) -> Option<&str> {
        self.headers.get("Supersedes")
    }

    /// Body lines, without terminators.
    pub fn body_lines(&self) -> impl Iterator<Item = &str> {
        let body = if self.body.is_empty() {
            None
        } else {
            Some(self.body.split("\r\n"))
        };
        body.into_iter().flatten()
    }

    /// Full article in wire form: headers, blank line, body.
    pub fn to_wire(&self) -> String {
        let mut out = self.headers.to_wire();
        out.push_str("\r\n");
        out.push_str(&self.body);
        out
    }
}

/// A newsgroup as seen by the protocol layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Group {
    pub name: String,
    pub description: String,
    /// Lowest article number present (watermark + 1 when empty)
    pub first: u64,
    /// Highest article number ever assigned
    pub last: u64,
    pub count: u64,
    pub deleted: bool,
    /// Mailing list this group mirrors, if any
    pub mailing_list: Option<String>,
}

impl Group {
    pub fn is_mailing_list(&self) -> bool {
        self.mailing_list.is_some()
    }
}

impl fmt::Display for Group {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_block() {
        let headers =
            Headers::parse("From: a@b.c\r\nNewsgroups: misc.test\r\nSubject: hi\r\n").unwrap();
        assert_eq!(headers.len(), 3);
        assert_eq!(headers.get("newsgroups"), Some("misc.test"));
        assert_eq!(headers.get("SUBJECT"), Some("hi"));
    }

    #[test]
    fn test_parse_unfolds_continuation_lines() {
        let headers = Headers::parse("Subject: a very\r\n\tlong\r\n  subject\r\n").unwrap();
        assert_eq!(headers.get("Subject"), Some("a very long subject"));
    }

    #[test]
    fn test_parse_rejects_orphan_continuation() {
        assert_eq!(
            Headers::parse(" leading: space\r\n"),
            Err(HeaderError::OrphanContinuation)
        );
    }

    #[test]
    fn test_parse_rejects_missing_colon() {
        assert!(matches!(
            Headers::parse("From: a@b.c\r\nnot a header\r\n"),
            Err(HeaderError::MissingColon(_))
        ));
    }

    #[test]
    fn test_parse_rejects_bad_name() {
        assert!(matches!(
            Headers::parse("Bad Name: x\r\n"),
            Err(HeaderError::InvalidName(_))
        ));
    }

    #[test]
    fn test_empty_block_is_allowed() {
        assert!(Headers::parse("").unwrap().is_empty());
    }

    #[test]
    fn test_set_and_remove() {
        let mut headers = Headers::new();
        headers.set("Lines", "3");
        headers.set("lines", "4");
        assert_eq!(headers.len(), 1);
        assert_eq!(headers.get("Lines"), Some("4"));
        assert_eq!(headers.remove("LINES"), Some("4".to_string()));
        assert!(headers.is_empty());
    }

    #[test]
    fn test_article_accessors() {
        let headers = Headers::parse(
            "Message-ID: <1@x>\r\nNewsgroups: a.b, c.d ,,\r\nControl: cancel <2@x>\r\n",
        )
        .unwrap();
        let article = Article::new(headers, "line one\r\nline two");
        assert_eq!(article.message_id(), Some("<1@x>"));
        assert_eq!(article.newsgroups(), vec!["a.b", "c.d"]);
        assert_eq!(article.control(), Some("cancel <2@x>"));
        assert_eq!(article.body_lines().count(), 2);
        assert!(article.to_wire().contains("\r\n\r\nline one"));
    }

    #[test]
    fn test_empty_body_has_no_lines() {
        let article = Article::new(Headers::new(), "");
        assert_eq!(article.body_lines().count(), 0);
    }
}
