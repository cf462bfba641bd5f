//! Fragment tokenizer.
//!
//! Turns raw text into delimiter runs, backtick runs, line-start markers and
//! literal text. It only classifies: whether a `*` opens emphasis or a `-`
//! starts a list is decided further down. Input whose class depends on a
//! character that has not arrived yet is carried into the next call, so
//! `"*"` followed by `"*"` scans exactly like `"**"`.

use std::borrow::Cow;

/// Columns a tab advances when measuring indentation.
pub(crate) const TAB_WIDTH: usize = 4;

/// Structural markers recognized at the start of a line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarkerKind {
    /// Leading whitespace, measured in columns
    Indent(usize),
    /// `>`
    Quote,
    /// `-`, `+` or `*` followed by whitespace
    Bullet(char),
    /// `1.` or `1)` followed by whitespace
    Ordered { number: u32, delimiter: char },
    /// 1-6 `#` followed by whitespace
    Heading(u8),
    /// Three or more backticks or tildes
    Fence { ch: char, len: usize },
    /// `|`
    Pipe,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Literal(String),

    /// Maximal run of `*`, `_` or `~`
    DelimiterRun { ch: char, len: usize },

    BacktickRun(usize),

    LineStartMarker { kind: MarkerKind, raw: String },

    /// Backslash followed by ASCII punctuation
    Escape(char),

    /// `[`, or `![` when `image` is set
    LinkOpen { image: bool },

    /// `]`
    LinkClose,

    Newline,
}

impl Token {
    /// The exact source text this token was scanned from.
    pub fn raw(&self) -> Cow<'_, str> {
        match self {
            Token::Literal(text) => Cow::Borrowed(text),
            Token::DelimiterRun { ch, len } => Cow::Owned(ch.to_string().repeat(*len)),
            Token::BacktickRun(len) => Cow::Owned("`".repeat(*len)),
            Token::LineStartMarker { raw, .. } => Cow::Borrowed(raw),
            Token::Escape(c) => Cow::Owned(format!("\\{c}")),
            Token::LinkOpen { image: false } => Cow::Borrowed("["),
            Token::LinkOpen { image: true } => Cow::Borrowed("!["),
            Token::LinkClose => Cow::Borrowed("]"),
            Token::Newline => Cow::Borrowed("\n"),
        }
    }

    pub fn raw_len(&self) -> usize {
        match self {
            Token::Literal(text) => text.len(),
            Token::DelimiterRun { len, .. } | Token::BacktickRun(len) => *len,
            Token::LineStartMarker { raw, .. } => raw.len(),
            Token::Escape(c) => 1 + c.len_utf8(),
            Token::LinkOpen { image: true } => 2,
            Token::LinkOpen { image: false } | Token::LinkClose | Token::Newline => 1,
        }
    }

    pub fn first_char(&self) -> Option<char> {
        match self {
            Token::Literal(text) | Token::LineStartMarker { raw: text, .. } => text.chars().next(),
            Token::DelimiterRun { ch, .. } => Some(*ch),
            Token::BacktickRun(_) => Some('`'),
            Token::Escape(_) => Some('\\'),
            Token::LinkOpen { image: true } => Some('!'),
            Token::LinkOpen { image: false } => Some('['),
            Token::LinkClose => Some(']'),
            Token::Newline => Some('\n'),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    /// Container and leaf markers are still possible
    LineStart,
    /// After a heading, fence or pipe marker only whitespace is still prefix
    AfterLeaf,
    Content,
}

enum Prefix {
    Marker(MarkerKind, usize, Mode),
    NotMarker,
    NeedMore,
}

#[derive(Debug)]
pub struct Scanner {
    /// Unclassified tail of the input seen so far
    carry: String,
    mode: Mode,
    max_carry: usize,
}

impl Default for Scanner {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_MAX_PENDING_BYTES)
    }
}

impl Scanner {
    pub fn new(max_carry: usize) -> Self {
        Self {
            carry: String::new(),
            mode: Mode::LineStart,
            max_carry,
        }
    }

    /// Tokenize one fragment.
    pub fn scan(&mut self, fragment: &str) -> Vec<Token> {
        let mut tokens = Vec::new();
        self.scan_into(fragment, &mut tokens);
        tokens
    }

    pub fn scan_into(&mut self, fragment: &str, out: &mut Vec<Token>) {
        if fragment.is_empty() {
            return;
        }

        let mut input = std::mem::take(&mut self.carry);
        input.push_str(fragment);
        let consumed = self.tokenize(&input, false, out);
        input.drain(..consumed);
        self.carry = input;

        if self.carry.len() > self.max_carry {
            tracing::warn!(
                len = self.carry.len(),
                "scanner carry over pending limit, releasing it as literal text"
            );
            out.push(Token::Literal(std::mem::take(&mut self.carry)));
            self.mode = Mode::Content;
        }
    }

    /// Classify the carried tail against end of input.
    pub fn finish(&mut self, out: &mut Vec<Token>) {
        let input = std::mem::take(&mut self.carry);
        let consumed = self.tokenize(&input, true, out);
        debug_assert_eq!(consumed, input.len());
        self.mode = Mode::LineStart;
    }

    pub fn pending_bytes(&self) -> usize {
        self.carry.len()
    }

    /// Returns the number of bytes consumed. Only ASCII bytes are ever
    /// inspected, so every stopping point is a char boundary.
    fn tokenize(&mut self, input: &str, eof: bool, out: &mut Vec<Token>) -> usize {
        let bytes = input.as_bytes();
        let mut literal_start: Option<usize> = None;
        let mut i = 0;

        while i < bytes.len() {
            if self.mode != Mode::Content {
                if matches!(bytes[i], b' ' | b'\t') {
                    let end = run_end(bytes, i, |b| b == b' ' || b == b'\t');
                    if end == bytes.len() && !eof {
                        break;
                    }
                    let raw = &input[i..end];
                    out.push(Token::LineStartMarker {
                        kind: MarkerKind::Indent(indent_width(raw)),
                        raw: raw.to_string(),
                    });
                    i = end;
                    continue;
                }

                if self.mode == Mode::AfterLeaf {
                    self.mode = Mode::Content;
                    continue;
                }

                match line_start_marker(&bytes[i..], eof) {
                    Prefix::NeedMore => break,
                    Prefix::Marker(kind, len, next) => {
                        out.push(Token::LineStartMarker {
                            kind,
                            raw: input[i..i + len].to_string(),
                        });
                        i += len;
                        self.mode = next;
                    }
                    Prefix::NotMarker => self.mode = Mode::Content,
                }
                continue;
            }

            let b = bytes[i];
            match b {
                b'\n' => {
                    flush_literal(input, &mut literal_start, i, out);
                    out.push(Token::Newline);
                    self.mode = Mode::LineStart;
                    i += 1;
                }
                b'*' | b'_' | b'~' | b'`' => {
                    flush_literal(input, &mut literal_start, i, out);
                    let end = run_end(bytes, i, |x| x == b);
                    if end == bytes.len() && !eof {
                        break;
                    }
                    let len = end - i;
                    out.push(if b == b'`' {
                        Token::BacktickRun(len)
                    } else {
                        Token::DelimiterRun { ch: b as char, len }
                    });
                    i = end;
                }
                b'\\' => match bytes.get(i + 1) {
                    None if !eof => {
                        flush_literal(input, &mut literal_start, i, out);
                        break;
                    }
                    Some(&next) if next.is_ascii_punctuation() => {
                        flush_literal(input, &mut literal_start, i, out);
                        out.push(Token::Escape(next as char));
                        i += 2;
                    }
                    _ => {
                        literal_start.get_or_insert(i);
                        i += 1;
                    }
                },
                b'[' => {
                    flush_literal(input, &mut literal_start, i, out);
                    out.push(Token::LinkOpen { image: false });
                    i += 1;
                }
                b'!' => match bytes.get(i + 1) {
                    None if !eof => {
                        flush_literal(input, &mut literal_start, i, out);
                        break;
                    }
                    Some(b'[') => {
                        flush_literal(input, &mut literal_start, i, out);
                        out.push(Token::LinkOpen { image: true });
                        i += 2;
                    }
                    _ => {
                        literal_start.get_or_insert(i);
                        i += 1;
                    }
                },
                b']' => {
                    flush_literal(input, &mut literal_start, i, out);
                    out.push(Token::LinkClose);
                    i += 1;
                }
                _ => {
                    literal_start.get_or_insert(i);
                    i += 1;
                }
            }
        }

        flush_literal(input, &mut literal_start, i, out);
        i
    }
}

fn line_start_marker(bytes: &[u8], eof: bool) -> Prefix {
    // whitespace, end of line or end of input after position `at`
    let spaced = |at: usize| match bytes.get(at) {
        Some(b' ' | b'\t' | b'\n') => Some(true),
        Some(_) => Some(false),
        None if eof => Some(true),
        None => None,
    };

    let first = bytes[0];
    match first {
        b'>' => Prefix::Marker(MarkerKind::Quote, 1, Mode::LineStart),
        b'#' => {
            let n = run_end(bytes, 0, |b| b == b'#');
            if n > 6 {
                return Prefix::NotMarker;
            }
            match spaced(n) {
                None => Prefix::NeedMore,
                Some(true) => Prefix::Marker(MarkerKind::Heading(n as u8), n, Mode::AfterLeaf),
                Some(false) => Prefix::NotMarker,
            }
        }
        b'`' | b'~' => {
            let n = run_end(bytes, 0, |b| b == first);
            if n == bytes.len() && !eof {
                Prefix::NeedMore
            } else if n >= 3 {
                let fence = MarkerKind::Fence {
                    ch: first as char,
                    len: n,
                };
                Prefix::Marker(fence, n, Mode::AfterLeaf)
            } else {
                Prefix::NotMarker
            }
        }
        b'-' | b'+' | b'*' => match spaced(1) {
            None => Prefix::NeedMore,
            Some(true) => Prefix::Marker(MarkerKind::Bullet(first as char), 1, Mode::LineStart),
            Some(false) => Prefix::NotMarker,
        },
        b'0'..=b'9' => {
            let digits = run_end(bytes, 0, |b| b.is_ascii_digit());
            if digits > 9 {
                return Prefix::NotMarker;
            }
            match bytes.get(digits) {
                None if eof => Prefix::NotMarker,
                None => Prefix::NeedMore,
                Some(&delimiter @ (b'.' | b')')) => match spaced(digits + 1) {
                    None => Prefix::NeedMore,
                    Some(false) => Prefix::NotMarker,
                    Some(true) => {
                        let number = bytes[..digits]
                            .iter()
                            .fold(0u32, |n, b| n * 10 + u32::from(b - b'0'));
                        let kind = MarkerKind::Ordered {
                            number,
                            delimiter: delimiter as char,
                        };
                        Prefix::Marker(kind, digits + 1, Mode::LineStart)
                    }
                },
                Some(_) => Prefix::NotMarker,
            }
        }
        b'|' => Prefix::Marker(MarkerKind::Pipe, 1, Mode::Content),
        _ => Prefix::NotMarker,
    }
}

fn run_end(bytes: &[u8], from: usize, pred: impl Fn(u8) -> bool) -> usize {
    bytes[from..]
        .iter()
        .position(|&b| !pred(b))
        .map_or(bytes.len(), |n| from + n)
}

pub(crate) fn indent_width(raw: &str) -> usize {
    raw.chars()
        .map(|c| if c == '\t' { TAB_WIDTH } else { 1 })
        .sum()
}

fn flush_literal(input: &str, start: &mut Option<usize>, end: usize, out: &mut Vec<Token>) {
    if let Some(start) = start.take() {
        if start < end {
            out.push(Token::Literal(input[start..end].to_string()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scan_all(fragments: &[&str]) -> Vec<Token> {
        let mut scanner = Scanner::default();
        let mut tokens = Vec::new();
        for fragment in fragments {
            scanner.scan_into(fragment, &mut tokens);
        }
        scanner.finish(&mut tokens);
        tokens
    }

    fn lit(text: &str) -> Token {
        Token::Literal(text.to_string())
    }

    fn marker(kind: MarkerKind, raw: &str) -> Token {
        Token::LineStartMarker {
            kind,
            raw: raw.to_string(),
        }
    }

    #[test]
    fn test_split_run_merges() {
        let mut scanner = Scanner::default();
        assert!(scanner.scan("a *").iter().all(|t| matches!(t, Token::Literal(_))));
        assert_eq!(
            scanner.scan("*b"),
            vec![Token::DelimiterRun { ch: '*', len: 2 }, lit("b")]
        );
    }

    #[test]
    fn test_heading_marker_needs_space() {
        assert_eq!(scan_all(&["#tag"]), vec![lit("#tag")]);
        assert_eq!(
            scan_all(&["#", "# x"]),
            vec![
                marker(MarkerKind::Heading(2), "##"),
                marker(MarkerKind::Indent(1), " "),
                lit("x")
            ]
        );
    }

    #[test]
    fn test_markers_only_at_line_start() {
        let tokens = scan_all(&["a # b - c\n", "- d"]);
        assert_eq!(
            tokens,
            vec![
                lit("a # b - c"),
                Token::Newline,
                marker(MarkerKind::Bullet('-'), "-"),
                marker(MarkerKind::Indent(1), " "),
                lit("d"),
            ]
        );
    }

    #[test]
    fn test_ordered_marker_across_fragments() {
        let tokens = scan_all(&["1", "2", ")", " item"]);
        assert_eq!(
            tokens[0],
            marker(
                MarkerKind::Ordered {
                    number: 12,
                    delimiter: ')'
                },
                "12)"
            )
        );
        assert_eq!(scan_all(&["2024 was"]), vec![lit("2024 was")]);
    }

    #[test]
    fn test_nested_container_markers() {
        let tokens = scan_all(&["> * x"]);
        assert_eq!(
            tokens,
            vec![
                marker(MarkerKind::Quote, ">"),
                marker(MarkerKind::Indent(1), " "),
                marker(MarkerKind::Bullet('*'), "*"),
                marker(MarkerKind::Indent(1), " "),
                lit("x"),
            ]
        );
    }

    #[test]
    fn test_fence_and_backticks() {
        let tokens = scan_all(&["``", "`rust\n", "a `b`"]);
        assert_eq!(tokens[0], marker(MarkerKind::Fence { ch: '`', len: 3 }, "```"));
        assert_eq!(tokens[1], lit("rust"));
        assert_eq!(
            &tokens[3..],
            &[lit("a "), Token::BacktickRun(1), lit("b"), Token::BacktickRun(1)]
        );
    }

    #[test]
    fn test_escape_split_across_fragments() {
        assert_eq!(
            scan_all(&["x \\", "*y"]),
            vec![lit("x "), Token::Escape('*'), lit("y")]
        );
        assert_eq!(scan_all(&["x \\a"]), vec![lit("x \\a")]);
    }

    #[test]
    fn test_image_open_needs_lookahead() {
        let mut scanner = Scanner::default();
        assert_eq!(scanner.scan("see !"), vec![lit("see ")]);
        assert_eq!(
            scanner.scan("[alt]"),
            vec![Token::LinkOpen { image: true }, lit("alt"), Token::LinkClose]
        );
    }

    #[test]
    fn test_finish_classifies_carry() {
        let mut scanner = Scanner::default();
        assert!(scanner.scan("-").is_empty());
        let mut tokens = Vec::new();
        scanner.finish(&mut tokens);
        assert_eq!(tokens, vec![marker(MarkerKind::Bullet('-'), "-")]);
    }

    #[test]
    fn test_carry_limit_releases_literal() {
        let mut scanner = Scanner::new(4);
        let tokens = scanner.scan("x ******");
        assert_eq!(tokens, vec![lit("x "), lit("******")]);
        assert_eq!(scanner.pending_bytes(), 0);
    }

    #[test]
    fn test_raw_round_trips_source() {
        let source = "> 1. **a** `b` \\* [c](d) ![e]\n~~~ f";
        let raw: String = scan_all(&[source]).iter().map(|t| t.raw()).collect();
        assert_eq!(raw, source);
    }
}
