//! Double-star glob matching for API product paths and referers.
//!
//! Patterns are split on `/` and compiled once into an anchored regular
//! expression, so matching is linear in the length of the path:
//!
//! | Syntax    | Matches                                              |
//! |-----------|------------------------------------------------------|
//! | `**`      | zero or more whole segments (only as a full segment) |
//! | `*`       | any run of characters within one segment             |
//! | `?`       | exactly one character                                |
//! | `[abc]`   | one character from the class, ranges like `a-z` ok   |
//! | `[!abc]`  | one character not in the class (`[^abc]` too)        |
//! | `{a,b}`   | either alternative; may nest, may not contain `/`    |
//! | `\c`      | the literal character `c`                            |
//!
//! So `/v1/**` matches `/v1`, `/v1/` and `/v1/a/b/c`, while `/v1/*` matches
//! `/v1/a` and `/v1/` but not `/v1/a/b`.

use std::sync::Arc;

use dashmap::DashMap;
use regex::Regex;
use thiserror::Error;
use tracing::debug;

/// Compiled patterns kept by a [`GlobCache`] before it starts over.
pub const DEFAULT_GLOB_CACHE_CAPACITY: usize = 4096;

/// A pattern that cannot be compiled.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GlobError {
    /// `[` without a closing `]`, or an empty class.
    #[error("unterminated or empty character class")]
    BadClass,
    /// `{` without a closing `}`.
    #[error("unterminated alternative group")]
    UnclosedBrace,
    /// `\` at the end of a segment.
    #[error("dangling escape")]
    DanglingEscape,
    /// The translated expression was rejected, e.g. a reversed range.
    #[error("invalid pattern: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Literal(char),
    Any,
    One,
    Class { negated: bool, ranges: Vec<(char, char)> },
    Alternatives(Vec<Vec<Token>>),
}

/// A compiled glob pattern.
#[derive(Debug, Clone)]
pub struct Glob {
    source: String,
    regex: Regex,
}

impl PartialEq for Glob {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl Eq for Glob {}

impl Glob {
    /// Compiles `pattern`.
    pub fn new(pattern: &str) -> Result<Self, GlobError> {
        let mut segments: Vec<&str> = pattern.split('/').collect();
        segments.dedup_by(|a, b| *a == "**" && *b == "**");
        let last = segments.len() - 1;
        let mut expr = String::from("^");

        for (i, segment) in segments.iter().enumerate() {
            if *segment == "**" {
                expr.push_str(match (i, last) {
                    (_, 0) => ".*",
                    (0, _) => "(?:.*/)?",
                    _ => "(?:/.*)?",
                });
                continue;
            }
            if i > 1 || (i == 1 && segments[0] != "**") {
                expr.push('/');
            }
            for token in Parser::new(segment).parse()? {
                push_token(&mut expr, &token);
            }
        }
        expr.push('$');

        let regex = Regex::new(&expr).map_err(|e| GlobError::Invalid(e.to_string()))?;
        Ok(Self {
            source: pattern.to_string(),
            regex,
        })
    }

    /// The pattern as written.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Tests `path` against the pattern.
    pub fn matches(&self, path: &str) -> bool {
        self.regex.is_match(path)
    }
}

/// Tests `path` against `pattern`. Malformed patterns match nothing.
///
/// Compiles on every call; hot paths go through a [`GlobCache`].
pub fn glob_match(pattern: &str, path: &str) -> bool {
    Glob::new(pattern).is_ok_and(|glob| glob.matches(path))
}

/// Compiled patterns keyed by their source text.
///
/// Malformed patterns are remembered too, so a bad pattern is reported once
/// and then matches nothing.
#[derive(Debug)]
pub struct GlobCache {
    compiled: DashMap<String, Option<Arc<Glob>>>,
    capacity: usize,
}

impl Default for GlobCache {
    fn default() -> Self {
        Self::new(DEFAULT_GLOB_CACHE_CAPACITY)
    }
}

impl GlobCache {
    /// Creates a cache holding at most `capacity` patterns.
    pub fn new(capacity: usize) -> Self {
        Self {
            compiled: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    /// Returns the compiled form of `pattern`, compiling it on first use.
    pub fn get(&self, pattern: &str) -> Option<Arc<Glob>> {
        if let Some(hit) = self.compiled.get(pattern).map(|entry| entry.value().clone()) {
            return hit;
        }

        let compiled = match Glob::new(pattern) {
            Ok(glob) => Some(Arc::new(glob)),
            Err(error) => {
                debug!(pattern, %error, "ignoring malformed glob");
                None
            }
        };
        if self.compiled.len() >= self.capacity {
            self.compiled.clear();
        }
        self.compiled.insert(pattern.to_string(), compiled.clone());
        compiled
    }

    /// Tests `path` against `pattern`. Malformed patterns match nothing.
    pub fn is_match(&self, pattern: &str, path: &str) -> bool {
        self.get(pattern).is_some_and(|glob| glob.matches(path))
    }

    /// Number of patterns currently compiled.
    pub fn len(&self) -> usize {
        self.compiled.len()
    }

    /// Returns `true` if nothing has been compiled yet.
    pub fn is_empty(&self) -> bool {
        self.compiled.is_empty()
    }
}

fn push_token(expr: &mut String, token: &Token) {
    match token {
        Token::Literal(c) => push_literal(expr, *c),
        Token::Any => expr.push_str("[^/]*"),
        Token::One => expr.push_str("[^/]"),
        Token::Class { negated, ranges } => {
            expr.push('[');
            if *negated {
                expr.push_str("^/");
            }
            for (lo, hi) in ranges {
                push_literal(expr, *lo);
                if lo != hi {
                    expr.push('-');
                    push_literal(expr, *hi);
                }
            }
            expr.push(']');
        }
        Token::Alternatives(alternatives) => {
            expr.push_str("(?:");
            for (i, alternative) in alternatives.iter().enumerate() {
                if i > 0 {
                    expr.push('|');
                }
                for token in alternative {
                    push_token(expr, token);
                }
            }
            expr.push(')');
        }
    }
}

fn push_literal(expr: &mut String, c: char) {
    let mut buf = [0; 4];
    expr.push_str(&regex::escape(c.encode_utf8(&mut buf)));
}

struct Parser {
    chars: Vec<char>,
    pos: usize,
}

impl Parser {
    fn new(segment: &str) -> Self {
        Self {
            chars: segment.chars().collect(),
            pos: 0,
        }
    }

    fn parse(mut self) -> Result<Vec<Token>, GlobError> {
        self.sequence(false)
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        Some(c)
    }

    fn sequence(&mut self, in_group: bool) -> Result<Vec<Token>, GlobError> {
        let mut tokens = Vec::new();
        while let Some(c) = self.peek() {
            if in_group && (c == ',' || c == '}') {
                break;
            }
            self.pos += 1;
            match c {
                '*' => {
                    if tokens.last() != Some(&Token::Any) {
                        tokens.push(Token::Any);
                    }
                }
                '?' => tokens.push(Token::One),
                '[' => tokens.push(self.class()?),
                '{' => tokens.push(self.alternatives()?),
                '\\' => tokens.push(Token::Literal(self.bump().ok_or(GlobError::DanglingEscape)?)),
                c => tokens.push(Token::Literal(c)),
            }
        }
        Ok(tokens)
    }

    fn class(&mut self) -> Result<Token, GlobError> {
        let negated = matches!(self.peek(), Some('!' | '^'));
        if negated {
            self.pos += 1;
        }

        let mut ranges = Vec::new();
        loop {
            let lo = match self.bump().ok_or(GlobError::BadClass)? {
                ']' => break,
                '\\' => self.bump().ok_or(GlobError::BadClass)?,
                c => c,
            };
            let hi = if self.peek() == Some('-') && self.chars.get(self.pos + 1) != Some(&']') {
                self.pos += 1;
                match self.bump().ok_or(GlobError::BadClass)? {
                    '\\' => self.bump().ok_or(GlobError::BadClass)?,
                    c => c,
                }
            } else {
                lo
            };
            ranges.push((lo, hi));
        }

        if ranges.is_empty() {
            return Err(GlobError::BadClass);
        }
        Ok(Token::Class { negated, ranges })
    }

    fn alternatives(&mut self) -> Result<Token, GlobError> {
        let mut alternatives = Vec::new();
        loop {
            alternatives.push(self.sequence(true)?);
            match self.bump() {
                Some(',') => {}
                Some('}') => return Ok(Token::Alternatives(alternatives)),
                _ => return Err(GlobError::UnclosedBrace),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_double_star() {
        assert!(glob_match("/v1/**", "/v1/a/b/c"));
        assert!(glob_match("/v1/**", "/v1/a"));
        assert!(glob_match("/v1/**", "/v1/"));
        assert!(glob_match("/v1/**", "/v1"));
        assert!(!glob_match("/v1/**", "/v2/a"));
        assert!(!glob_match("/v1/**", "/v10/a"));
    }

    #[test]
    fn test_double_star_in_the_middle() {
        assert!(glob_match("/v1/**/items", "/v1/items"));
        assert!(glob_match("/v1/**/items", "/v1/a/b/items"));
        assert!(!glob_match("/v1/**/items", "/v1/a/b/items/1"));
        assert!(glob_match("/**", "/anything/at/all"));
    }

    #[test]
    fn test_single_star_stays_in_segment() {
        assert!(glob_match("/a/*", "/a/b"));
        assert!(glob_match("/a/*", "/a/"));
        assert!(!glob_match("/a/*", "/a/b/c"));
        assert!(!glob_match("/a/*", "/a"));
        assert!(glob_match("/a/*.json", "/a/items.json"));
        assert!(!glob_match("/a/*.json", "/a/items.xml"));
    }

    #[test]
    fn test_literal() {
        assert!(glob_match("/a/b", "/a/b"));
        assert!(!glob_match("/a/b", "/a/b/"));
        assert!(!glob_match("/a/b", "/a/bc"));
    }

    #[test]
    fn test_question_mark_and_classes() {
        assert!(glob_match("/v?/x", "/v1/x"));
        assert!(!glob_match("/v?/x", "/v10/x"));
        assert!(glob_match("/v[0-9]/x", "/v7/x"));
        assert!(!glob_match("/v[0-9]/x", "/va/x"));
        assert!(glob_match("/v[!0-9]/x", "/va/x"));
        assert!(glob_match("/v[^0-9]/x", "/va/x"));
        assert!(glob_match("/[a-]", "/-"));
    }

    #[test]
    fn test_alternatives() {
        assert!(glob_match("/{users,groups}/*", "/users/1"));
        assert!(glob_match("/{users,groups}/*", "/groups/1"));
        assert!(!glob_match("/{users,groups}/*", "/roles/1"));
        assert!(glob_match("/file.{j{s,son},xml}", "/file.json"));
        assert!(glob_match("/x{,y}", "/x"));
    }

    #[test]
    fn test_escape() {
        assert!(glob_match("/a\\*", "/a*"));
        assert!(!glob_match("/a\\*", "/ab"));
    }

    #[test]
    fn test_malformed_patterns_match_nothing() {
        assert_eq!(Glob::new("/a/[bc"), Err(GlobError::BadClass));
        assert_eq!(Glob::new("/a/[]"), Err(GlobError::BadClass));
        assert_eq!(Glob::new("/a/{b,c"), Err(GlobError::UnclosedBrace));
        assert_eq!(Glob::new("/a\\"), Err(GlobError::DanglingEscape));
        assert!(!glob_match("/a/[bc", "/a/b"));
        assert!(matches!(Glob::new("/a/[z-a]"), Err(GlobError::Invalid(_))));
    }

    #[test]
    fn test_leading_double_star() {
        assert!(glob_match("**/items", "items"));
        assert!(glob_match("**/items", "a/b/items"));
        assert!(glob_match("**/**/items", "items"));
        assert!(!glob_match("**/items", "a/bitems"));
        assert!(glob_match("**", "a/b/c"));
    }

    #[test]
    fn test_negated_class_stays_in_segment() {
        assert!(!glob_match("/a[!x]b", "/a/b"));
        assert!(glob_match("/a[!x]b", "/ayb"));
    }

    #[test]
    fn test_referer_style_patterns() {
        assert!(glob_match("https://*.example.com/**", "https://www.example.com/page/1"));
        assert!(!glob_match("https://*.example.com/**", "https://evil.com/www.example.com/"));
    }

    #[test]
    fn test_adversarial_paths_match_in_linear_time() {
        let pattern = "/**/*a*a*a*a*a*a*a*a*a*a*b";
        let path = format!("/{}", "a/".repeat(2_000) + &"a".repeat(20_000));

        let glob = Glob::new(pattern).unwrap();
        let started = std::time::Instant::now();
        assert!(!glob.matches(&path));
        assert!(glob.matches(&format!("{path}b")));
        assert!(started.elapsed() < std::time::Duration::from_secs(2));
    }

    #[test]
    fn test_cache_compiles_once() {
        let cache = GlobCache::default();
        assert!(cache.is_empty());

        let first = cache.get("/v1/**").unwrap();
        let second = cache.get("/v1/**").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.len(), 1);

        assert!(cache.is_match("/v1/**", "/v1/a"));
        assert!(!cache.is_match("/a/[bc", "/a/b"));
        assert!(cache.get("/a/[bc").is_none());
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_cache_starts_over_when_full() {
        let cache = GlobCache::new(2);
        cache.get("/a");
        cache.get("/b");
        cache.get("/c");

        assert_eq!(cache.len(), 1);
        assert!(cache.is_match("/a", "/a"));
    }

    proptest! {
        #[test]
        fn prop_literal_path_matches_itself(path in "(/[a-z0-9._-]{0,8}){1,5}") {
            prop_assert!(glob_match(&path, &path));
        }

        #[test]
        fn prop_root_double_star_matches_everything(path in "(/[a-z0-9._-]{0,8}){1,5}") {
            prop_assert!(glob_match("/**", &path));
        }

        #[test]
        fn prop_prefix_double_star(
            prefix in "(/[a-z0-9]{1,6}){1,3}",
            tail in "(/[a-z0-9]{0,6}){0,4}"
        ) {
            let pattern = format!("{prefix}/**");
            let path = format!("{prefix}{tail}");
            prop_assert!(glob_match(&pattern, &path));
        }

        #[test]
        fn prop_star_never_crosses_segments(a in "[a-z]{1,6}", b in "[a-z]{1,6}") {
            let path = format!("/x/{a}/{b}");
            prop_assert!(!glob_match("/x/*", &path));
            prop_assert!(glob_match("/x/*/*", &path));
        }
    }
}
