//! Character-level cursor and shared lexical rules for spec and predicate text.

use thiserror::Error;

use crate::version::VersionParseError;

/// Errors raised while parsing spec, compiler or predicate text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SpecParseError {
    #[error("expected {expected} at offset {offset} in '{input}'")]
    Expected {
        input: String,
        offset: usize,
        expected: &'static str,
    },
    #[error("unexpected '{found}' at offset {offset} in '{input}'")]
    Unexpected {
        input: String,
        offset: usize,
        found: char,
    },
    #[error("invalid version in '{input}': {source}")]
    Version {
        input: String,
        #[source]
        source: VersionParseError,
    },
    #[error("invalid spec '{input}': {message}")]
    Invalid { input: String, message: String },
}

/// Characters allowed in package, variant and compiler names.
pub fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')
}

/// Characters allowed in a version constraint after `@`.
pub fn is_version_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | ':' | '=')
}

/// Characters allowed in a variant value after `=`.
pub fn is_value_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ',')
}

/// A forward-only cursor over spec text.
#[derive(Debug, Clone)]
pub struct Cursor<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Cursor<'a> {
    pub fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    pub fn input(&self) -> &'a str {
        self.input
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    pub fn rest(&self) -> &'a str {
        &self.input[self.pos..]
    }

    pub fn is_eof(&self) -> bool {
        self.pos >= self.input.len()
    }

    pub fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    pub fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    /// Consume `c` if it is next.
    pub fn eat(&mut self, c: char) -> bool {
        if self.peek() == Some(c) {
            self.pos += c.len_utf8();
            true
        } else {
            false
        }
    }

    /// Skip whitespace; returns whether any was skipped.
    pub fn skip_ws(&mut self) -> bool {
        let start = self.pos;
        self.take_while(char::is_whitespace);
        self.pos > start
    }

    pub fn take_while(&mut self, pred: impl Fn(char) -> bool) -> &'a str {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if !pred(c) {
                break;
            }
            self.pos += c.len_utf8();
        }
        &self.input[start..self.pos]
    }

    /// Whether the next word is exactly `keyword` (not a longer name).
    pub fn at_keyword(&self, keyword: &str) -> bool {
        let rest = self.rest();
        rest.starts_with(keyword)
            && !rest[keyword.len()..]
                .chars()
                .next()
                .is_some_and(is_name_char)
    }

    /// Consume `keyword` if it is the next word.
    pub fn eat_keyword(&mut self, keyword: &str) -> bool {
        if self.at_keyword(keyword) {
            self.pos += keyword.len();
            true
        } else {
            false
        }
    }

    /// Whether the upcoming name is immediately followed by `=`.
    pub fn at_assignment(&self) -> bool {
        let rest = self.rest();
        let name_len = rest.find(|c: char| !is_name_char(c)).unwrap_or(rest.len());
        name_len > 0 && rest[name_len..].starts_with('=')
    }

    /// Consume a non-empty name.
    pub fn name(&mut self, expected: &'static str) -> Result<&'a str, SpecParseError> {
        let name = self.take_while(is_name_char);
        if name.is_empty() {
            return Err(self.expected(expected));
        }
        Ok(name)
    }

    pub fn expected(&self, expected: &'static str) -> SpecParseError {
        SpecParseError::Expected {
            input: self.input.to_string(),
            offset: self.pos,
            expected,
        }
    }

    /// Error for the next character, or for end of input.
    pub fn unexpected(&self) -> SpecParseError {
        match self.peek() {
            Some(found) => SpecParseError::Unexpected {
                input: self.input.to_string(),
                offset: self.pos,
                found,
            },
            None => self.expected("more input"),
        }
    }

    pub fn version_error(&self, source: VersionParseError) -> SpecParseError {
        SpecParseError::Version {
            input: self.input.to_string(),
            source,
        }
    }

    pub fn invalid(&self, message: impl Into<String>) -> SpecParseError {
        SpecParseError::Invalid {
            input: self.input.to_string(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keywords_need_a_word_boundary() {
        let c = Cursor::new("andrew");
        assert!(!c.at_keyword("and"));
        let c = Cursor::new("and +foo");
        assert!(c.at_keyword("and"));
        let c = Cursor::new("not(+foo)");
        assert!(c.at_keyword("not"));
    }

    #[test]
    fn assignment_lookahead() {
        assert!(Cursor::new("build_type=debug").at_assignment());
        assert!(!Cursor::new("zlib@1.2").at_assignment());
        assert!(!Cursor::new("=x").at_assignment());
    }

    #[test]
    fn take_while_stops_at_delimiter() {
        let mut c = Cursor::new("1.2:1.4+shared");
        assert_eq!(c.take_while(is_version_char), "1.2:1.4");
        assert_eq!(c.peek(), Some('+'));
    }
}
