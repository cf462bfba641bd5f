//! Inline resolution for emphasis, strong, strikethrough, code spans, links
//! and images.
//!
//! Tokens for one block arrive in order. Everything before the first
//! unmatched opener is final and may be emitted; everything after it is held
//! until that opener is matched, or the block ends and it degrades to literal
//! text.

use tracing::{debug, warn};

use crate::config::Config;
use crate::scanner::Token;
use crate::sink::{Sink, SpanKind};

/// A delimiter run whose right neighbour has not been seen yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRun {
    pub ch: char,
    pub len: usize,
    /// Byte offset of the run within the block's inline content
    pub position: usize,
    left: Option<char>,
}

impl PendingRun {
    /// `(can_open, can_close)` once the right neighbour is known. `None`
    /// stands for end of line.
    pub fn classify(&self, right: Option<char>) -> (bool, bool) {
        flanking(self.ch, self.left, right)
    }
}

/// A span whose opening marker was accepted but which is not closed yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenSpan {
    pub kind: SpanKind,
    pub marker_width: usize,
}

#[derive(Debug, Clone)]
struct Opener {
    ch: char,
    len: usize,
    orig_len: usize,
    can_close: bool,
}

#[derive(Debug, Clone)]
enum Node {
    Text(String),
    Code(String),
    Opener(Opener),
    Bracket { image: bool },
    Span { kind: SpanKind, children: Vec<Node> },
}

impl Node {
    fn len(&self) -> usize {
        match self {
            Node::Text(text) => text.len(),
            Node::Code(code) => code.len() + 2,
            Node::Opener(opener) => opener.len,
            Node::Bracket { image } => bracket_text(*image).len(),
            Node::Span { children, .. } => 2 + children.iter().map(Node::len).sum::<usize>(),
        }
    }
}

#[derive(Debug)]
struct CodeSpan {
    width: usize,
    content: String,
}

/// State after a `]` that closed a bracket, while `(url)` is being read.
#[derive(Debug)]
struct LinkDest {
    bracket: usize,
    /// Position just after the `]`
    start: usize,
    in_parens: bool,
    depth: usize,
    url: String,
    consumed: Vec<Token>,
}

enum LinkInput {
    Consumed,
    /// Destination closed; byte length of the token prefix it used
    Done(usize),
    Failed,
}

impl LinkDest {
    fn take(&mut self, token: &Token) -> LinkInput {
        match token {
            Token::Literal(text) => {
                for (i, c) in text.char_indices() {
                    if !self.in_parens {
                        if c != '(' {
                            return LinkInput::Failed;
                        }
                        self.in_parens = true;
                        continue;
                    }
                    match c {
                        ')' if self.depth == 0 => return LinkInput::Done(i + 1),
                        ')' => {
                            self.depth -= 1;
                            self.url.push(c);
                        }
                        '(' => {
                            self.depth += 1;
                            self.url.push(c);
                        }
                        c if c.is_whitespace() || c.is_control() => return LinkInput::Failed,
                        c => self.url.push(c),
                    }
                }
                LinkInput::Consumed
            }
            Token::Escape(c) if self.in_parens => {
                self.url.push(*c);
                LinkInput::Consumed
            }
            Token::DelimiterRun { .. }
            | Token::BacktickRun(_)
            | Token::LinkOpen { .. }
            | Token::LinkClose
                if self.in_parens =>
            {
                self.url.push_str(&token.raw());
                LinkInput::Consumed
            }
            _ => LinkInput::Failed,
        }
    }
}

/// Resolves the inline content of a single block.
#[derive(Debug)]
pub struct InlineResolver {
    nodes: Vec<Node>,
    pending: Option<PendingRun>,
    code: Option<CodeSpan>,
    link: Option<LinkDest>,
    /// Last character of resolved content, for flanking checks
    prev: Option<char>,
    position: usize,
    held: usize,
    limit: usize,
    strikethrough: bool,
    links: bool,
}

impl InlineResolver {
    pub fn new(config: &Config) -> Self {
        Self {
            nodes: Vec::new(),
            pending: None,
            code: None,
            link: None,
            prev: None,
            position: 0,
            held: 0,
            limit: config.max_pending_bytes,
            strikethrough: config.strikethrough,
            links: config.links,
        }
    }

    /// Feed one token. Nothing is emitted unless the held content grows
    /// past the pending limit, in which case it degrades to text.
    pub fn push<S: Sink + ?Sized>(&mut self, token: Token, sink: &mut S) {
        self.held += token.raw_len();
        self.feed(token);
        if self.held > self.limit {
            self.degrade(sink);
        }
    }

    /// End of a source line: runs touching the line end are classified and a
    /// half-read link destination fails. The resolved prefix is emitted.
    pub fn end_line<S: Sink + ?Sized>(&mut self, sink: &mut S) {
        self.settle();
        self.drain(sink);
    }

    /// Emit every node before the first unmatched opener.
    pub fn drain<S: Sink + ?Sized>(&mut self, sink: &mut S) {
        let ready = self
            .nodes
            .iter()
            .position(|node| matches!(node, Node::Opener(_) | Node::Bracket { .. }))
            .unwrap_or(self.nodes.len());
        if ready > 0 {
            let nodes: Vec<Node> = self.nodes.drain(..ready).collect();
            emit(&nodes, sink);
            if let Some(dest) = self.link.as_mut() {
                dest.bracket -= ready;
            }
        }
        self.recount();
    }

    /// End of the block. Unmatched openers and unclosed code spans become
    /// literal text.
    pub fn finish<S: Sink + ?Sized>(&mut self, sink: &mut S) {
        self.settle();
        if let Some(code) = self.code.take() {
            debug!(width = code.width, "unclosed code span kept as text");
            let mut text = "`".repeat(code.width);
            text.push_str(&code.content);
            self.push_text(&text);
        }
        literalize(&mut self.nodes);
        self.drain(sink);
        self.prev = None;
        self.position = 0;
    }

    pub fn pending_run(&self) -> Option<&PendingRun> {
        self.pending.as_ref()
    }

    pub fn open_spans(&self) -> Vec<OpenSpan> {
        let mut spans: Vec<OpenSpan> = self
            .nodes
            .iter()
            .filter_map(|node| match node {
                Node::Opener(opener) => Some(OpenSpan {
                    kind: match opener.ch {
                        '~' => SpanKind::Strikethrough,
                        _ if opener.len >= 2 => SpanKind::Strong,
                        _ => SpanKind::Emphasis,
                    },
                    marker_width: opener.len,
                }),
                _ => None,
            })
            .collect();
        if let Some(code) = &self.code {
            spans.push(OpenSpan {
                kind: SpanKind::Code,
                marker_width: code.width,
            });
        }
        spans
    }

    pub fn is_idle(&self) -> bool {
        self.nodes.is_empty() && self.pending.is_none() && self.code.is_none() && self.link.is_none()
    }

    pub fn pending_bytes(&self) -> usize {
        self.held
    }

    fn feed(&mut self, token: Token) {
        if self.link.is_some() {
            return self.feed_link(token);
        }

        let at = self.position;
        self.position += token.raw_len();

        if let Some(code) = self.code.as_mut() {
            match token {
                Token::BacktickRun(width) if width == code.width => {
                    let content = std::mem::take(&mut code.content);
                    self.code = None;
                    self.nodes.push(Node::Code(normalize_code(content)));
                    self.prev = Some('`');
                }
                other => code.content.push_str(&other.raw()),
            }
            return;
        }

        if let Some(run) = self.pending.take() {
            let right = token.first_char();
            self.resolve(run, right);
        }

        match token {
            Token::Literal(text) => self.push_text(&text),
            Token::Escape(c) => self.push_text(c.encode_utf8(&mut [0; 4])),
            Token::DelimiterRun { ch: '~', len } if !self.strikethrough => {
                self.push_text(&"~".repeat(len))
            }
            Token::DelimiterRun { ch, len } => {
                self.pending = Some(PendingRun {
                    ch,
                    len,
                    position: at,
                    left: self.prev,
                });
                self.prev = Some(ch);
            }
            Token::BacktickRun(width) => {
                self.code = Some(CodeSpan {
                    width,
                    content: String::new(),
                });
                self.prev = Some('`');
            }
            Token::LinkOpen { image } if self.links => {
                self.nodes.push(Node::Bracket { image });
                self.prev = Some('[');
            }
            Token::LinkClose if self.links => self.close_bracket(),
            other => self.push_text(&other.raw()),
        }
    }

    fn push_text(&mut self, text: &str) {
        let Some(last) = text.chars().next_back() else {
            return;
        };
        self.prev = Some(last);
        if let Some(Node::Text(existing)) = self.nodes.last_mut() {
            existing.push_str(text);
        } else {
            self.nodes.push(Node::Text(text.to_owned()));
        }
    }

    fn resolve(&mut self, run: PendingRun, right: Option<char>) {
        let (can_open, can_close) = run.classify(right);

        // GFM only knows single and double tildes
        if run.ch == '~' && run.len > 2 {
            return self.push_text(&"~".repeat(run.len));
        }

        let mut remaining = run.len;
        if can_close {
            remaining = self.close_spans(run.ch, run.len, can_open, remaining);
        }
        if remaining == 0 {
            return;
        }

        if can_open {
            self.nodes.push(Node::Opener(Opener {
                ch: run.ch,
                len: remaining,
                orig_len: run.len,
                can_close,
            }));
        } else {
            self.push_text(&run.ch.to_string().repeat(remaining));
        }
    }

    /// Match a closing run against earlier openers, innermost first.
    /// Returns how much of the run is left over.
    fn close_spans(
        &mut self,
        ch: char,
        closer_len: usize,
        closer_can_open: bool,
        mut remaining: usize,
    ) -> usize {
        while remaining > 0 {
            let Some(index) = self.find_opener(ch, closer_len, closer_can_open, remaining) else {
                break;
            };
            let Node::Opener(opener) = &mut self.nodes[index] else {
                break;
            };

            let used = if ch == '~' {
                remaining
            } else if opener.len >= 2 && remaining >= 2 {
                2
            } else {
                1
            };
            opener.len -= used;
            remaining -= used;
            let exhausted = opener.len == 0;

            let kind = match (ch, used) {
                ('~', _) => SpanKind::Strikethrough,
                (_, 2) => SpanKind::Strong,
                _ => SpanKind::Emphasis,
            };

            let mut children = self.nodes.split_off(index + 1);
            literalize(&mut children);
            if exhausted {
                self.nodes.pop();
            }
            self.nodes.push(Node::Span { kind, children });
        }
        remaining
    }

    fn find_opener(
        &self,
        ch: char,
        closer_len: usize,
        closer_can_open: bool,
        remaining: usize,
    ) -> Option<usize> {
        for (index, node) in self.nodes.iter().enumerate().rev() {
            match node {
                // emphasis never crosses an unresolved bracket
                Node::Bracket { .. } => return None,
                Node::Opener(opener) if opener.ch == ch => {
                    if ch == '~' {
                        if opener.len == remaining {
                            return Some(index);
                        }
                        continue;
                    }

                    // rule of three
                    let either_both = opener.can_close || closer_can_open;
                    if either_both
                        && (opener.orig_len + closer_len) % 3 == 0
                        && !(opener.orig_len % 3 == 0 && closer_len % 3 == 0)
                    {
                        continue;
                    }
                    return Some(index);
                }
                _ => {}
            }
        }
        None
    }

    fn close_bracket(&mut self) {
        let Some(bracket) = self
            .nodes
            .iter()
            .rposition(|node| matches!(node, Node::Bracket { .. }))
        else {
            return self.push_text("]");
        };

        self.link = Some(LinkDest {
            bracket,
            start: self.position,
            in_parens: false,
            depth: 0,
            url: String::new(),
            consumed: Vec::new(),
        });
        self.prev = Some(']');
    }

    fn feed_link(&mut self, token: Token) {
        let Some(dest) = self.link.as_mut() else {
            return;
        };

        match dest.take(&token) {
            LinkInput::Consumed => {
                self.position += token.raw_len();
                dest.consumed.push(token);
            }
            LinkInput::Done(used) => {
                self.position += used;
                let rest = match &token {
                    Token::Literal(text) => text[used..].to_string(),
                    _ => String::new(),
                };
                self.complete_link();
                if !rest.is_empty() {
                    self.feed(Token::Literal(rest));
                }
            }
            LinkInput::Failed => self.fail_link(Some(token)),
        }
    }

    fn complete_link(&mut self) {
        let Some(dest) = self.link.take() else {
            return;
        };

        let mut children = self.nodes.split_off(dest.bracket + 1);
        literalize(&mut children);
        let image = matches!(self.nodes.pop(), Some(Node::Bracket { image: true }));

        // links do not nest
        if !image {
            for node in &mut self.nodes {
                if matches!(node, Node::Bracket { image: false }) {
                    *node = Node::Text("[".to_string());
                }
            }
        }

        let kind = if image {
            SpanKind::Image { url: dest.url }
        } else {
            SpanKind::Link { url: dest.url }
        };
        self.nodes.push(Node::Span { kind, children });
        self.prev = Some(')');
    }

    /// The bracket pair was not a link after all. Its tokens are replayed as
    /// ordinary inline content.
    fn fail_link(&mut self, current: Option<Token>) {
        let Some(dest) = self.link.take() else {
            return;
        };

        if let Some(&Node::Bracket { image }) = self.nodes.get(dest.bracket) {
            self.nodes[dest.bracket] = Node::Text(bracket_text(image).to_string());
        }
        self.push_text("]");

        self.position = dest.start;
        for token in dest.consumed {
            self.feed(token);
        }
        if let Some(token) = current {
            self.feed(token);
        }
    }

    fn settle(&mut self) {
        loop {
            if let Some(run) = self.pending.take() {
                self.resolve(run, None);
            }
            if self.link.is_none() {
                break;
            }
            self.fail_link(None);
        }
    }

    fn degrade<S: Sink + ?Sized>(&mut self, sink: &mut S) {
        warn!(
            held = self.held,
            limit = self.limit,
            "unresolved inline content over pending limit, emitting as text"
        );

        if let Some(run) = self.pending.take() {
            self.push_text(&run.ch.to_string().repeat(run.len));
        }
        if let Some(dest) = self.link.take() {
            if let Some(&Node::Bracket { image }) = self.nodes.get(dest.bracket) {
                self.nodes[dest.bracket] = Node::Text(bracket_text(image).to_string());
            }
            self.push_text("]");
            for token in &dest.consumed {
                self.push_text(&token.raw());
            }
        }
        if let Some(code) = self.code.take() {
            let mut text = "`".repeat(code.width);
            text.push_str(&code.content);
            self.push_text(&text);
        }

        literalize(&mut self.nodes);
        self.drain(sink);
    }

    fn recount(&mut self) {
        self.held = self.nodes.iter().map(Node::len).sum::<usize>()
            + self.pending.as_ref().map_or(0, |run| run.len)
            + self.code.as_ref().map_or(0, |code| code.width + code.content.len())
            + self.link.as_ref().map_or(0, |dest| {
                dest.consumed.iter().map(Token::raw_len).sum::<usize>()
            });
    }
}

/// CommonMark left/right-flanking rules. `None` neighbours count as
/// whitespace.
fn flanking(ch: char, left: Option<char>, right: Option<char>) -> (bool, bool) {
    let left_space = left.map_or(true, char::is_whitespace);
    let right_space = right.map_or(true, char::is_whitespace);
    let left_punct = left.is_some_and(is_punctuation);
    let right_punct = right.is_some_and(is_punctuation);

    let left_flanking = !right_space && (!right_punct || left_space || left_punct);
    let right_flanking = !left_space && (!left_punct || right_space || right_punct);

    if ch == '_' {
        // no intraword emphasis with underscores
        (
            left_flanking && (!right_flanking || left_punct),
            right_flanking && (!left_flanking || right_punct),
        )
    } else {
        (left_flanking, right_flanking)
    }
}

fn is_punctuation(c: char) -> bool {
    c.is_ascii_punctuation() || (!c.is_alphanumeric() && !c.is_whitespace() && !c.is_control())
}

fn bracket_text(image: bool) -> &'static str {
    if image {
        "!["
    } else {
        "["
    }
}

fn normalize_code(raw: String) -> String {
    let content = raw.replace('\n', " ");
    let strip = content.len() >= 2
        && content.starts_with(' ')
        && content.ends_with(' ')
        && !content.bytes().all(|b| b == b' ');
    if strip {
        content[1..content.len() - 1].to_string()
    } else {
        content
    }
}

fn literalize(nodes: &mut [Node]) {
    for node in nodes.iter_mut() {
        let text = match node {
            Node::Opener(opener) => opener.ch.to_string().repeat(opener.len),
            Node::Bracket { image } => bracket_text(*image).to_string(),
            _ => continue,
        };
        *node = Node::Text(text);
    }
}

fn emit<S: Sink + ?Sized>(nodes: &[Node], sink: &mut S) {
    let mut text = String::new();
    emit_nodes(nodes, &mut text, sink);
    flush_text(&mut text, sink);
}

/// Adjacent text nodes are coalesced into a single `text` call.
fn emit_nodes<S: Sink + ?Sized>(nodes: &[Node], text: &mut String, sink: &mut S) {
    for node in nodes {
        match node {
            Node::Text(t) => text.push_str(t),
            Node::Opener(opener) => text.extend(std::iter::repeat(opener.ch).take(opener.len)),
            Node::Bracket { image } => text.push_str(bracket_text(*image)),
            Node::Code(code) => {
                flush_text(text, sink);
                sink.begin_span(&SpanKind::Code);
                if !code.is_empty() {
                    sink.text(code);
                }
                sink.end_span(&SpanKind::Code);
            }
            Node::Span { kind, children } => {
                flush_text(text, sink);
                sink.begin_span(kind);
                emit_nodes(children, text, sink);
                flush_text(text, sink);
                sink.end_span(kind);
            }
        }
    }
}

fn flush_text<S: Sink + ?Sized>(text: &mut String, sink: &mut S) {
    if !text.is_empty() {
        sink.text(text);
        text.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::Scanner;
    use crate::sink::Event;
    use pretty_assertions::assert_eq;

    fn resolve_with(config: &Config, text: &str) -> Vec<Event> {
        let mut scanner = Scanner::default();
        let mut tokens = scanner.scan(text);
        scanner.finish(&mut tokens);

        let mut resolver = InlineResolver::new(config);
        let mut events = Vec::new();
        for token in tokens {
            resolver.push(token, &mut events);
        }
        resolver.finish(&mut events);
        assert!(resolver.is_idle());
        events
    }

    fn resolve(text: &str) -> Vec<Event> {
        resolve_with(&Config::default(), text)
    }

    fn text(t: &str) -> Event {
        Event::Text(t.to_string())
    }

    fn span(kind: SpanKind, inner: Vec<Event>) -> Vec<Event> {
        let mut events = vec![Event::BeginSpan(kind.clone())];
        events.extend(inner);
        events.push(Event::EndSpan(kind));
        events
    }

    #[test]
    fn test_emphasis() {
        assert_eq!(resolve("*a*"), span(SpanKind::Emphasis, vec![text("a")]));
        assert_eq!(resolve("**a**"), span(SpanKind::Strong, vec![text("a")]));
    }

    #[test]
    fn test_triple_run_nests_strong_in_emphasis() {
        assert_eq!(
            resolve("***a***"),
            span(SpanKind::Emphasis, span(SpanKind::Strong, vec![text("a")]))
        );
    }

    #[test]
    fn test_unclosed_emphasis_is_literal() {
        assert_eq!(resolve("x *a"), vec![text("x *a")]);
        assert_eq!(resolve("a * b"), vec![text("a * b")]);
    }

    #[test]
    fn test_intraword_underscore() {
        assert_eq!(resolve("snake_case_word"), vec![text("snake_case_word")]);

        let mut expected = vec![text("a")];
        expected.extend(span(SpanKind::Emphasis, vec![text("b")]));
        expected.push(text("c"));
        assert_eq!(resolve("a*b*c"), expected);
    }

    #[test]
    fn test_code_span_shields_delimiters() {
        assert_eq!(resolve("`a*b*`"), span(SpanKind::Code, vec![text("a*b*")]));
        assert_eq!(
            resolve("`` a ` b ``"),
            span(SpanKind::Code, vec![text("a ` b")])
        );
    }

    #[test]
    fn test_unclosed_code_span_stays_literal() {
        assert_eq!(resolve("x `open *x*"), vec![text("x `open *x*")]);
    }

    #[test]
    fn test_strikethrough() {
        assert_eq!(
            resolve("~~gone~~"),
            span(SpanKind::Strikethrough, vec![text("gone")])
        );
        assert_eq!(resolve("~~~x~~~"), vec![text("~~~x~~~")]);

        let plain = Config::default().with_strikethrough(false);
        assert_eq!(resolve_with(&plain, "~~x~~"), vec![text("~~x~~")]);
    }

    #[test]
    fn test_links_and_images() {
        let url = "https://example.com/a_(b)".to_string();
        assert_eq!(
            resolve("[site](https://example.com/a_(b))"),
            span(SpanKind::Link { url }, vec![text("site")])
        );

        let mut expected = span(
            SpanKind::Image {
                url: "i.png".to_string(),
            },
            vec![text("alt")],
        );
        expected.push(text(" after"));
        assert_eq!(resolve("![alt](i.png) after"), expected);
    }

    #[test]
    fn test_link_with_emphasis_inside() {
        let url = "u".to_string();
        assert_eq!(
            resolve("[*a*](u)"),
            span(
                SpanKind::Link { url },
                span(SpanKind::Emphasis, vec![text("a")])
            )
        );
    }

    #[test]
    fn test_bracket_without_destination_is_text() {
        assert_eq!(resolve("[a] (b)"), vec![text("[a] (b)")]);
        assert_eq!(resolve("x [a](b c)"), vec![text("x [a](b c)")]);
        assert_eq!(resolve("x ]"), vec![text("x ]")]);

        let plain = Config::default().with_links(false);
        assert_eq!(resolve_with(&plain, "x [a](b)"), vec![text("x [a](b)")]);
    }

    #[test]
    fn test_escapes_are_literal() {
        assert_eq!(resolve("x \\*not\\*"), vec![text("x *not*")]);
    }

    #[test]
    fn test_pending_run_waits_for_right_neighbour() {
        let mut resolver = InlineResolver::new(&Config::default());
        let mut events = Vec::new();

        resolver.push(Token::Literal("a ".to_string()), &mut events);
        resolver.push(Token::DelimiterRun { ch: '*', len: 2 }, &mut events);
        let run = resolver.pending_run().cloned().unwrap();
        assert_eq!(run.position, 2);
        assert_eq!(run.classify(Some('b')), (true, false));
        assert_eq!(run.classify(Some(' ')), (false, false));

        resolver.push(Token::Literal("b".to_string()), &mut events);
        assert!(resolver.pending_run().is_none());
        assert_eq!(
            resolver.open_spans(),
            vec![OpenSpan {
                kind: SpanKind::Strong,
                marker_width: 2
            }]
        );

        resolver.end_line(&mut events);
        assert_eq!(events, vec![text("a ")]);
    }

    #[test]
    fn test_held_content_degrades_over_limit() {
        let config = Config::default().with_max_pending_bytes(8);
        let mut resolver = InlineResolver::new(&config);
        let mut events = Vec::new();

        resolver.push(Token::DelimiterRun { ch: '*', len: 1 }, &mut events);
        resolver.push(Token::Literal("abcdefghij".to_string()), &mut events);
        assert_eq!(events, vec![text("*abcdefghij")]);
        assert_eq!(resolver.pending_bytes(), 0);
        assert!(resolver.open_spans().is_empty());
    }
}
