//! Block structure.
//!
//! Tokens are collected one line at a time. At each line end the line is
//! matched against the open containers, new containers and leaves are opened,
//! and the remaining content is routed to the current leaf. Nothing about a
//! line is emitted before its newline arrives, so a `#` that might still turn
//! into `##` is never reported as a level 1 heading.

use std::collections::VecDeque;

use tracing::{debug, warn};

use crate::config::Config;
use crate::inline::InlineResolver;
use crate::scanner::{indent_width, MarkerKind, Token, TAB_WIDTH};
use crate::sink::{Alignment, BlockKind, Sink};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ListMarker {
    Bullet(char),
    Ordered(char),
}

/// One open container on the block stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockFrame {
    pub kind: BlockKind,
    /// Columns a continuation line must be indented by (list items only)
    pub indent: usize,
    marker: Option<ListMarker>,
    next_ordinal: u32,
}

impl BlockFrame {
    fn new(kind: BlockKind, indent: usize) -> Self {
        Self {
            kind,
            indent,
            marker: None,
            next_ordinal: 1,
        }
    }
}

#[derive(Debug)]
enum Leaf {
    Paragraph(InlineResolver),
    Heading {
        level: u8,
        inline: InlineResolver,
    },
    Code {
        fence: char,
        len: usize,
        indent: usize,
        kind: BlockKind,
    },
    Table {
        alignments: Vec<Alignment>,
    },
}

enum Start {
    Blank,
    ThematicBreak,
    Quote,
    ListItem {
        marker: ListMarker,
        number: Option<u32>,
        empty: bool,
    },
    Heading(u8),
    Fence {
        ch: char,
        len: usize,
    },
    Text,
}

/// The tokens of one line, consumed from the front as prefixes match.
#[derive(Debug)]
struct Line {
    tokens: VecDeque<Token>,
}

impl Line {
    fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens: tokens.into(),
        }
    }

    fn indent(&self) -> usize {
        match self.tokens.front() {
            Some(Token::LineStartMarker {
                kind: MarkerKind::Indent(width),
                ..
            }) => *width,
            _ => 0,
        }
    }

    /// Consume up to `cols` columns of leading whitespace. A tab that is only
    /// partly consumed leaves its remaining columns behind as spaces.
    fn skip_indent(&mut self, cols: usize) {
        let Some(Token::LineStartMarker {
            kind: MarkerKind::Indent(width),
            raw,
        }) = self.tokens.front_mut()
        else {
            return;
        };

        if cols >= *width {
            self.tokens.pop_front();
            return;
        }

        let mut used = 0;
        let mut rest = String::new();
        for c in raw.chars() {
            if used >= cols {
                rest.push(c);
                continue;
            }
            used += if c == '\t' { TAB_WIDTH } else { 1 };
            if used > cols {
                rest.push_str(&" ".repeat(used - cols));
                used = cols;
            }
        }
        *width = indent_width(&rest);
        *raw = rest;
    }

    fn marker_index(&self) -> Option<usize> {
        let index = usize::from(self.indent() > 0);
        match self.tokens.get(index) {
            Some(Token::LineStartMarker { kind, .. }) if !matches!(kind, MarkerKind::Indent(_)) => {
                Some(index)
            }
            _ => None,
        }
    }

    fn marker(&self) -> Option<&MarkerKind> {
        match self.tokens.get(self.marker_index()?) {
            Some(Token::LineStartMarker { kind, .. }) => Some(kind),
            _ => None,
        }
    }

    /// Remove leading whitespace and the marker after it. Returns the
    /// marker's width in bytes.
    fn take_marker(&mut self) -> usize {
        let Some(index) = self.marker_index() else {
            return 0;
        };
        self.tokens.drain(..index);
        self.tokens.pop_front().map_or(0, |token| token.raw_len())
    }

    fn blank_after_marker(&self) -> bool {
        let from = self.marker_index().map_or(0, |index| index + 1);
        self.tokens.iter().skip(from).all(is_blank_token)
    }

    fn raw_after_marker(&self) -> String {
        let from = self.marker_index().map_or(0, |index| index + 1);
        self.tokens.iter().skip(from).map(|token| token.raw()).collect()
    }

    fn is_blank(&self) -> bool {
        self.tokens.iter().all(is_blank_token)
    }

    fn raw(&self) -> String {
        self.tokens.iter().map(|token| token.raw()).collect()
    }

    fn into_content(self) -> Vec<Token> {
        let mut tokens: Vec<Token> = self.tokens.into();
        trim_tokens(&mut tokens);
        tokens
    }
}

/// Line-driven block state machine.
#[derive(Debug)]
pub struct BlockMachine {
    containers: Vec<BlockFrame>,
    leaf: Option<Leaf>,
    /// Pipe row that may become a table header once the next line arrives
    held_row: Option<Vec<Token>>,
    /// Opening line of a paragraph, held until the next line shows whether
    /// it is a setext heading
    held_line: Option<Vec<Token>>,
    line: Vec<Token>,
    line_bytes: usize,
    /// The current line outgrew the pending limit and is being streamed
    committed: bool,
    /// The rest of the committed line belongs to a fence or break marker
    discard_line: bool,
    /// Processing the unterminated last line of the input
    at_end: bool,
    config: Config,
}

impl BlockMachine {
    pub fn new(config: &Config) -> Self {
        Self {
            containers: Vec::new(),
            leaf: None,
            held_row: None,
            held_line: None,
            line: Vec::new(),
            line_bytes: 0,
            committed: false,
            discard_line: false,
            at_end: false,
            config: config.clone(),
        }
    }

    pub fn push<S: Sink + ?Sized>(&mut self, token: Token, sink: &mut S) {
        if self.committed {
            return self.push_committed(token, sink);
        }

        if token == Token::Newline {
            let tokens = std::mem::take(&mut self.line);
            self.line_bytes = 0;
            return self.process_line(tokens, false, sink);
        }

        self.line_bytes += token.raw_len();
        push_merged(&mut self.line, token);

        if self.line_bytes > self.config.max_pending_bytes {
            warn!(
                bytes = self.line_bytes,
                "line over pending limit, committing its block early"
            );
            let tokens = std::mem::take(&mut self.line);
            self.line_bytes = 0;
            self.committed = true;
            self.process_line(tokens, true, sink);
        }
    }

    /// Called once per fragment. A committed line streams whatever of it is
    /// already resolved.
    pub fn end_fragment<S: Sink + ?Sized>(&mut self, sink: &mut S) {
        if !self.committed {
            return;
        }
        if let Some(Leaf::Paragraph(inline) | Leaf::Heading { inline, .. }) = &mut self.leaf {
            inline.drain(sink);
        }
    }

    /// End of input: the last line is processed and every open block closed.
    pub fn finish<S: Sink + ?Sized>(&mut self, sink: &mut S) {
        if self.committed {
            self.end_committed_line(sink);
        } else if !self.line.is_empty() {
            let tokens = std::mem::take(&mut self.line);
            self.line_bytes = 0;
            self.at_end = true;
            self.process_line(tokens, false, sink);
            self.at_end = false;
        }

        self.release_held_row(sink);
        self.release_held_line(sink);
        self.close_leaf(sink);
        self.close_containers(0, sink);
    }

    pub fn containers(&self) -> &[BlockFrame] {
        &self.containers
    }

    pub fn in_code_block(&self) -> bool {
        matches!(self.leaf, Some(Leaf::Code { .. }))
    }

    pub fn pending_bytes(&self) -> usize {
        let held_row = self
            .held_row
            .iter()
            .chain(self.held_line.iter())
            .map(|row| row.iter().map(Token::raw_len).sum::<usize>())
            .sum::<usize>();
        let inline = match &self.leaf {
            Some(Leaf::Paragraph(inline) | Leaf::Heading { inline, .. }) => inline.pending_bytes(),
            _ => 0,
        };
        self.line_bytes + held_row + inline
    }

    fn push_committed<S: Sink + ?Sized>(&mut self, token: Token, sink: &mut S) {
        if token == Token::Newline {
            return self.end_committed_line(sink);
        }
        if self.discard_line {
            return;
        }

        match &mut self.leaf {
            Some(Leaf::Code { .. }) => sink.text(&token.raw()),
            Some(Leaf::Paragraph(inline) | Leaf::Heading { inline, .. }) => inline.push(token, sink),
            _ => self.paragraph_append(vec![token], true, sink),
        }
    }

    fn end_committed_line<S: Sink + ?Sized>(&mut self, sink: &mut S) {
        self.committed = false;
        if std::mem::take(&mut self.discard_line) {
            return;
        }
        match &mut self.leaf {
            Some(Leaf::Code { .. }) => sink.text("\n"),
            Some(Leaf::Paragraph(inline)) => inline.end_line(sink),
            Some(Leaf::Heading { .. }) => self.close_leaf(sink),
            _ => {}
        }
    }

    fn process_line<S: Sink + ?Sized>(&mut self, tokens: Vec<Token>, partial: bool, sink: &mut S) {
        let mut line = Line::new(tokens);
        let matched = self.match_containers(&mut line);
        let all_matched = matched == self.containers.len();

        if self.held_line.is_some() {
            if all_matched && !partial {
                if let Some(level) = setext_level(&line) {
                    return self.setext_heading(level, sink);
                }
            }
            self.release_held_line(sink);
        }

        if self.in_code_block() {
            if all_matched {
                return self.code_line(line, partial, sink);
            }
            self.close_leaf(sink);
        }

        if !all_matched {
            if self.is_lazy_continuation(&line) {
                self.release_held_row(sink);
                return self.paragraph_append(line.into_content(), partial, sink);
            }
            self.release_held_row(sink);
            self.close_leaf(sink);
            self.close_containers(matched, sink);
        }

        self.open_blocks(line, partial, sink);
    }

    /// How many open containers the line continues. Matched prefixes are
    /// consumed from the line.
    fn match_containers(&self, line: &mut Line) -> usize {
        let mut matched = 0;
        for frame in &self.containers {
            match frame.kind {
                BlockKind::BlockQuote => {
                    if line.indent() > 3 || line.marker() != Some(&MarkerKind::Quote) {
                        break;
                    }
                    line.take_marker();
                    line.skip_indent(1);
                }
                BlockKind::ListItem { .. } if !line.is_blank() => {
                    if line.indent() < frame.indent {
                        break;
                    }
                    line.skip_indent(frame.indent);
                }
                _ => {}
            }
            matched += 1;
        }
        matched
    }

    /// A paragraph line that lost its containers. List markers start a
    /// sibling here even where they could not interrupt the paragraph.
    fn is_lazy_continuation(&self, line: &Line) -> bool {
        matches!(self.leaf, Some(Leaf::Paragraph(_)))
            && matches!(self.classify(line, false), Start::Text)
    }

    /// An empty item on the unterminated last line is literal text unless it
    /// continues a list of the same marker.
    fn trailing_marker(&self, marker: ListMarker) -> bool {
        self.at_end
            && !self
                .containers
                .iter()
                .any(|frame| frame.marker == Some(marker))
    }

    fn classify(&self, line: &Line, interrupting: bool) -> Start {
        if line.is_blank() {
            return Start::Blank;
        }
        if line.indent() > 3 {
            return Start::Text;
        }
        if is_thematic_break(&line.raw()) {
            return Start::ThematicBreak;
        }

        match line.marker() {
            Some(MarkerKind::Quote) => Start::Quote,
            Some(&MarkerKind::Bullet(c)) => {
                let marker = ListMarker::Bullet(c);
                let empty = line.blank_after_marker();
                if empty && (interrupting || self.trailing_marker(marker)) {
                    return Start::Text;
                }
                Start::ListItem {
                    marker,
                    number: None,
                    empty,
                }
            }
            Some(&MarkerKind::Ordered { number, delimiter }) => {
                let marker = ListMarker::Ordered(delimiter);
                let empty = line.blank_after_marker();
                // only `1.` may interrupt a paragraph
                if interrupting && (empty || number != 1) {
                    return Start::Text;
                }
                if empty && self.trailing_marker(marker) {
                    return Start::Text;
                }
                Start::ListItem {
                    marker,
                    number: Some(number),
                    empty,
                }
            }
            Some(&MarkerKind::Heading(level)) => Start::Heading(level),
            Some(&MarkerKind::Fence { ch, len }) => {
                if ch == '`' && line.raw_after_marker().contains('`') {
                    return Start::Text;
                }
                Start::Fence { ch, len }
            }
            _ => Start::Text,
        }
    }

    fn open_blocks<S: Sink + ?Sized>(&mut self, mut line: Line, partial: bool, sink: &mut S) {
        loop {
            let interrupting =
                matches!(self.leaf, Some(Leaf::Paragraph(_))) || self.held_row.is_some();
            let start = self.classify(&line, interrupting);

            // a list with no open item only continues with a sibling item
            let open_list = self
                .containers
                .last()
                .filter(|frame| matches!(frame.kind, BlockKind::List { .. }))
                .and_then(|frame| frame.marker);
            if let Some(list_marker) = open_list {
                let sibling = matches!(start, Start::ListItem { marker, .. } if marker == list_marker);
                if !sibling {
                    self.close_containers(self.containers.len() - 1, sink);
                    continue;
                }
            }

            match start {
                Start::Blank => {
                    self.release_held_row(sink);
                    self.close_leaf(sink);
                    return;
                }
                Start::ThematicBreak => {
                    self.release_held_row(sink);
                    self.close_leaf(sink);
                    sink.begin_block(&BlockKind::ThematicBreak);
                    sink.end_block(&BlockKind::ThematicBreak);
                    self.discard_line = partial;
                    return;
                }
                Start::Quote => {
                    self.release_held_row(sink);
                    self.close_leaf(sink);
                    line.take_marker();
                    line.skip_indent(1);
                    self.open_container(BlockFrame::new(BlockKind::BlockQuote, 0), sink);
                }
                Start::ListItem {
                    marker,
                    number,
                    empty,
                } => {
                    self.release_held_row(sink);
                    self.close_leaf(sink);
                    let before = line.indent();
                    let width = line.take_marker();
                    let after = line.indent();
                    // content starting 5+ columns out is indented code in
                    // CommonMark; the item itself then takes a single space
                    let padding = if empty || after == 0 || after > 4 { 1 } else { after };
                    line.skip_indent(padding);
                    self.open_list_item(marker, number, before + width + padding, sink);
                }
                Start::Heading(level) => {
                    self.release_held_row(sink);
                    self.close_leaf(sink);
                    line.take_marker();
                    let mut content = line.into_content();
                    strip_closing_hashes(&mut content);

                    let kind = BlockKind::Heading { level };
                    sink.begin_block(&kind);
                    let mut inline = InlineResolver::new(&self.config);
                    for token in content {
                        inline.push(token, sink);
                    }
                    if partial {
                        self.leaf = Some(Leaf::Heading { level, inline });
                    } else {
                        inline.finish(sink);
                        sink.end_block(&kind);
                    }
                    return;
                }
                Start::Fence { ch, len } => {
                    self.release_held_row(sink);
                    self.close_leaf(sink);
                    let indent = line.indent();
                    line.take_marker();
                    let language = line
                        .raw()
                        .split_whitespace()
                        .next()
                        .map(|word| word.to_string());

                    let kind = BlockKind::CodeBlock { language };
                    debug!(?kind, "code block opened");
                    sink.begin_block(&kind);
                    self.leaf = Some(Leaf::Code {
                        fence: ch,
                        len,
                        indent,
                        kind,
                    });
                    // an info string past the limit is cut at what arrived
                    self.discard_line = partial;
                    return;
                }
                Start::Text => return self.text_line(line, partial, sink),
            }
        }
    }

    fn open_container<S: Sink + ?Sized>(&mut self, frame: BlockFrame, sink: &mut S) {
        sink.begin_block(&frame.kind);
        self.containers.push(frame);
    }

    fn open_list_item<S: Sink + ?Sized>(
        &mut self,
        marker: ListMarker,
        number: Option<u32>,
        indent: usize,
        sink: &mut S,
    ) {
        let ordered = matches!(marker, ListMarker::Ordered(_));
        let sibling = self.containers.last().is_some_and(|frame| {
            matches!(frame.kind, BlockKind::List { .. }) && frame.marker == Some(marker)
        });

        if !sibling {
            let mut list = BlockFrame::new(
                BlockKind::List {
                    ordered,
                    start: number,
                },
                0,
            );
            list.marker = Some(marker);
            list.next_ordinal = number.unwrap_or(1);
            self.open_container(list, sink);
        }

        let ordinal = match self.containers.last_mut() {
            Some(list) if ordered => {
                let ordinal = list.next_ordinal;
                list.next_ordinal = ordinal.saturating_add(1);
                Some(ordinal)
            }
            _ => None,
        };
        let depth = self
            .containers
            .iter()
            .filter(|frame| matches!(frame.kind, BlockKind::List { .. }))
            .count();

        let item = BlockKind::ListItem {
            ordered,
            depth,
            ordinal,
        };
        self.open_container(BlockFrame::new(item, indent), sink);
    }

    fn close_containers<S: Sink + ?Sized>(&mut self, keep: usize, sink: &mut S) {
        while self.containers.len() > keep {
            let Some(frame) = self.containers.pop() else {
                break;
            };
            sink.end_block(&frame.kind);
        }
    }

    fn close_leaf<S: Sink + ?Sized>(&mut self, sink: &mut S) {
        match self.leaf.take() {
            Some(Leaf::Paragraph(mut inline)) => {
                inline.finish(sink);
                sink.end_block(&BlockKind::Paragraph);
            }
            Some(Leaf::Heading { level, mut inline }) => {
                inline.finish(sink);
                sink.end_block(&BlockKind::Heading { level });
            }
            Some(Leaf::Code { kind, .. }) => sink.end_block(&kind),
            Some(Leaf::Table { alignments }) => sink.end_block(&BlockKind::Table { alignments }),
            None => {}
        }
    }

    fn code_line<S: Sink + ?Sized>(&mut self, mut line: Line, partial: bool, sink: &mut S) {
        let Some(Leaf::Code {
            fence, len, indent, ..
        }) = self.leaf
        else {
            return;
        };

        if !partial && line.indent() <= 3 {
            if let Some(&MarkerKind::Fence { ch, len: closing }) = line.marker() {
                if ch == fence && closing >= len && line.blank_after_marker() {
                    return self.close_leaf(sink);
                }
            }
        }

        line.skip_indent(indent);
        let mut text = line.raw();
        if !partial {
            text.push('\n');
        }
        if !text.is_empty() {
            sink.text(&text);
        }
    }

    fn text_line<S: Sink + ?Sized>(&mut self, line: Line, partial: bool, sink: &mut S) {
        let content = line.into_content();

        if self.config.tables && !partial {
            if let Some(Leaf::Table { alignments }) = &self.leaf {
                let cells = split_cells(&content);
                return emit_row(cells, false, alignments, &self.config, sink);
            }

            if is_pipe_row(&content) {
                if let Some(header) = self.held_row.take() {
                    if let Some(alignments) = parse_delimiter_row(&raw_text(&content)) {
                        let cells = split_cells(&header);
                        if cells.len() == alignments.len() {
                            self.close_leaf(sink);
                            debug!(columns = alignments.len(), "table opened");
                            sink.begin_block(&BlockKind::Table {
                                alignments: alignments.clone(),
                            });
                            emit_row(cells, true, &alignments, &self.config, sink);
                            self.leaf = Some(Leaf::Table { alignments });
                            return;
                        }
                    }
                    self.paragraph_append(header, false, sink);
                }
                self.held_row = Some(content);
                return;
            }
        }

        self.release_held_row(sink);
        if !partial && !matches!(self.leaf, Some(Leaf::Paragraph(_))) {
            self.close_leaf(sink);
            self.held_line = Some(content);
            return;
        }
        self.paragraph_append(content, partial, sink);
    }

    fn release_held_row<S: Sink + ?Sized>(&mut self, sink: &mut S) {
        if let Some(row) = self.held_row.take() {
            self.paragraph_append(row, false, sink);
        }
    }

    fn release_held_line<S: Sink + ?Sized>(&mut self, sink: &mut S) {
        if let Some(content) = self.held_line.take() {
            self.paragraph_append(content, false, sink);
        }
    }

    fn setext_heading<S: Sink + ?Sized>(&mut self, level: u8, sink: &mut S) {
        let Some(content) = self.held_line.take() else {
            return;
        };
        debug!(level, "setext heading");

        let kind = BlockKind::Heading { level };
        sink.begin_block(&kind);
        let mut inline = InlineResolver::new(&self.config);
        for token in content {
            inline.push(token, sink);
        }
        inline.finish(sink);
        sink.end_block(&kind);
    }

    fn paragraph_append<S: Sink + ?Sized>(&mut self, content: Vec<Token>, partial: bool, sink: &mut S) {
        if let Some(Leaf::Paragraph(inline)) = &mut self.leaf {
            inline.push(Token::Literal("\n".to_string()), sink);
        } else {
            self.close_leaf(sink);
            sink.begin_block(&BlockKind::Paragraph);
            self.leaf = Some(Leaf::Paragraph(InlineResolver::new(&self.config)));
        }

        let Some(Leaf::Paragraph(inline)) = &mut self.leaf else {
            return;
        };
        for token in content {
            inline.push(token, sink);
        }
        if partial {
            inline.drain(sink);
        } else {
            inline.end_line(sink);
        }
    }
}

fn emit_row<S: Sink + ?Sized>(
    cells: Vec<Vec<Token>>,
    header: bool,
    alignments: &[Alignment],
    config: &Config,
    sink: &mut S,
) {
    let row = BlockKind::TableRow {
        header,
        cells: alignments.len(),
        alignments: alignments.to_vec(),
    };
    sink.begin_block(&row);

    // short rows are padded with empty cells, long rows truncated
    let mut cells = cells.into_iter();
    for &alignment in alignments {
        let cell = BlockKind::TableCell { alignment };
        sink.begin_block(&cell);
        let mut inline = InlineResolver::new(config);
        for token in cells.next().unwrap_or_default() {
            inline.push(token, sink);
        }
        inline.finish(sink);
        sink.end_block(&cell);
    }

    sink.end_block(&row);
}

fn is_pipe_row(tokens: &[Token]) -> bool {
    tokens.iter().any(|token| match token {
        Token::LineStartMarker {
            kind: MarkerKind::Pipe,
            ..
        } => true,
        Token::Literal(text) => text.contains('|'),
        _ => false,
    })
}

/// Split a row on unescaped pipes, dropping the optional outer pipes.
fn split_cells(tokens: &[Token]) -> Vec<Vec<Token>> {
    let leading = match tokens.first() {
        Some(Token::LineStartMarker {
            kind: MarkerKind::Pipe,
            ..
        }) => true,
        Some(Token::Literal(text)) => text.starts_with('|'),
        _ => false,
    };
    let trailing = matches!(tokens.last(), Some(Token::Literal(text)) if text.ends_with('|'));

    let mut cells: Vec<Vec<Token>> = vec![Vec::new()];
    for token in tokens {
        match token {
            Token::LineStartMarker {
                kind: MarkerKind::Pipe,
                ..
            } => cells.push(Vec::new()),
            Token::Literal(text) => {
                for (i, part) in text.split('|').enumerate() {
                    if i > 0 {
                        cells.push(Vec::new());
                    }
                    if part.is_empty() {
                        continue;
                    }
                    if let Some(cell) = cells.last_mut() {
                        cell.push(Token::Literal(part.to_string()));
                    }
                }
            }
            other => {
                if let Some(cell) = cells.last_mut() {
                    cell.push(other.clone());
                }
            }
        }
    }

    if leading && cells.len() > 1 {
        cells.remove(0);
    }
    if trailing && cells.len() > 1 {
        cells.pop();
    }
    for cell in &mut cells {
        trim_tokens(cell);
    }
    cells
}

/// `| :--- | :-: | ---: |` style rows. Returns `None` unless every cell is a
/// run of dashes with optional alignment colons.
fn parse_delimiter_row(raw: &str) -> Option<Vec<Alignment>> {
    let row = raw.trim();
    let row = row.strip_prefix('|').unwrap_or(row);
    let row = row.strip_suffix('|').unwrap_or(row);

    row.split('|')
        .map(|cell| {
            let cell = cell.trim();
            let left = cell.starts_with(':');
            let right = cell.ends_with(':');
            let dashes = cell.trim_start_matches(':').trim_end_matches(':');
            if dashes.is_empty() || !dashes.bytes().all(|b| b == b'-') {
                return None;
            }
            Some(match (left, right) {
                (true, true) => Alignment::Center,
                (true, false) => Alignment::Left,
                (false, true) => Alignment::Right,
                (false, false) => Alignment::None,
            })
        })
        .collect()
}

/// `===` underlines level 1, `---` level 2. Up to three spaces of indent and
/// trailing whitespace are allowed; nothing else.
fn setext_level(line: &Line) -> Option<u8> {
    if line.indent() > 3 {
        return None;
    }
    let raw = line.raw();
    let underline = raw.trim();
    let level = match underline.chars().next()? {
        '=' => 1,
        '-' => 2,
        _ => return None,
    };
    let ch = if level == 1 { '=' } else { '-' };
    underline.chars().all(|c| c == ch).then_some(level)
}

fn is_thematic_break(raw: &str) -> bool {
    let line = raw.trim();
    let Some(first) = line.chars().next() else {
        return false;
    };
    if !matches!(first, '-' | '*' | '_') {
        return false;
    }

    let mut count = 0;
    for c in line.chars() {
        if c == first {
            count += 1;
        } else if c != ' ' && c != '\t' {
            return false;
        }
    }
    count >= 3
}

/// Drop an ATX closing sequence: trailing `#`s preceded by whitespace, or a
/// heading that is nothing but `#`s.
fn strip_closing_hashes(content: &mut Vec<Token>) {
    let alone = content.len() == 1;
    let Some(Token::Literal(text)) = content.last_mut() else {
        return;
    };

    let body = text.trim_end_matches('#');
    if body.len() == text.len() {
        return;
    }
    if (body.is_empty() && alone) || body.ends_with([' ', '\t']) {
        let keep = body.trim_end().len();
        text.truncate(keep);
        trim_tokens(content);
    }
}

fn raw_text(tokens: &[Token]) -> String {
    tokens.iter().map(|token| token.raw()).collect()
}

fn is_blank_token(token: &Token) -> bool {
    match token {
        Token::LineStartMarker {
            kind: MarkerKind::Indent(_),
            ..
        } => true,
        Token::Literal(text) => text.trim().is_empty(),
        _ => false,
    }
}

/// Strip leading and trailing whitespace from a token sequence.
fn trim_tokens(tokens: &mut Vec<Token>) {
    while tokens.first().is_some_and(is_blank_token) {
        tokens.remove(0);
    }
    if let Some(Token::Literal(text)) = tokens.first_mut() {
        let cut = text.len() - text.trim_start().len();
        text.drain(..cut);
    }

    while tokens.last().is_some_and(is_blank_token) {
        tokens.pop();
    }
    if let Some(Token::Literal(text)) = tokens.last_mut() {
        let keep = text.trim_end().len();
        text.truncate(keep);
    }
}

fn push_merged(line: &mut Vec<Token>, token: Token) {
    if let (Token::Literal(text), Some(Token::Literal(last))) = (&token, line.last_mut()) {
        last.push_str(text);
        return;
    }
    line.push(token);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delimiter_row_alignments() {
        assert_eq!(
            parse_delimiter_row("| :--- | :-: | ---: | --- |"),
            Some(vec![
                Alignment::Left,
                Alignment::Center,
                Alignment::Right,
                Alignment::None
            ])
        );
        assert_eq!(parse_delimiter_row("| a | --- |"), None);
        assert_eq!(parse_delimiter_row("| : |"), None);
    }

    #[test]
    fn test_thematic_break_lines() {
        assert!(is_thematic_break("---"));
        assert!(is_thematic_break(" * * *"));
        assert!(!is_thematic_break("--"));
        assert!(!is_thematic_break("-*-"));
    }

    #[test]
    fn test_split_cells_drops_outer_pipes() {
        let tokens = vec![
            Token::LineStartMarker {
                kind: MarkerKind::Pipe,
                raw: "|".to_string(),
            },
            Token::Literal(" a | b ".to_string()),
            Token::Escape('|'),
            Token::Literal(" c |".to_string()),
        ];
        let cells = split_cells(&tokens);
        assert_eq!(cells.len(), 2);
        assert_eq!(cells[0], vec![Token::Literal("a".to_string())]);
        assert_eq!(
            cells[1],
            vec![
                Token::Literal("b ".to_string()),
                Token::Escape('|'),
                Token::Literal(" c".to_string()),
            ]
        );
    }

    #[test]
    fn test_partial_tab_leaves_spaces() {
        let mut line = Line::new(vec![
            Token::LineStartMarker {
                kind: MarkerKind::Indent(5),
                raw: " \t".to_string(),
            },
            Token::Literal("x".to_string()),
        ]);
        line.skip_indent(2);
        assert_eq!(line.indent(), 3);
        assert_eq!(line.raw(), "   x");
    }

    #[test]
    fn test_setext_underline_levels() {
        let line = |text: &str| Line::new(vec![Token::Literal(text.to_string())]);
        assert_eq!(setext_level(&line("===")), Some(1));
        assert_eq!(setext_level(&line("-  ")), Some(2));
        assert_eq!(setext_level(&line("=-=")), None);
        assert_eq!(setext_level(&line("= =")), None);
        assert_eq!(setext_level(&line("text")), None);
    }

    #[test]
    fn test_closing_hashes() {
        let mut content = vec![Token::Literal("Title ##".to_string())];
        strip_closing_hashes(&mut content);
        assert_eq!(content, vec![Token::Literal("Title".to_string())]);

        let mut content = vec![Token::Literal("C#".to_string())];
        strip_closing_hashes(&mut content);
        assert_eq!(content, vec![Token::Literal("C#".to_string())]);
    }
}
