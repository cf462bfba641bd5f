//! Structural events - the stable output of parsing - and the sink contract
//! that receives them.

use serde::{Deserialize, Serialize};

/// Column alignment taken from a table's delimiter row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Alignment {
    #[default]
    None,
    Left,
    Center,
    Right,
}

/// Block-level containers and leaves, with their metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum BlockKind {
    Paragraph,

    /// ATX heading, level 1-6
    Heading { level: u8 },

    /// Fenced code block. Contents arrive as raw `text`, one event per line.
    CodeBlock { language: Option<String> },

    #[serde(rename = "blockquote")]
    BlockQuote,

    /// Wraps consecutive items sharing a marker type
    List { ordered: bool, start: Option<u32> },

    /// `depth` counts enclosing lists, starting at 1
    ListItem {
        ordered: bool,
        depth: usize,
        ordinal: Option<u32>,
    },

    Table { alignments: Vec<Alignment> },

    TableRow {
        header: bool,
        cells: usize,
        alignments: Vec<Alignment>,
    },

    TableCell { alignment: Alignment },

    ThematicBreak,
}

/// Inline spans.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum SpanKind {
    Emphasis,
    Strong,
    Strikethrough,
    #[serde(rename = "code-span")]
    Code,
    Link { url: String },
    /// Children are the alt text
    Image { url: String },
}

/// Consumer of the ordered event stream.
///
/// Calls always nest: every `end_*` matches the most recent unmatched
/// `begin_*`, and spans never straddle a block boundary.
pub trait Sink {
    fn begin_block(&mut self, kind: &BlockKind);
    fn end_block(&mut self, kind: &BlockKind);
    fn begin_span(&mut self, kind: &SpanKind);
    fn end_span(&mut self, kind: &SpanKind);
    fn text(&mut self, text: &str);
}

/// Owned form of a single sink call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum Event {
    BeginBlock(BlockKind),
    EndBlock(BlockKind),
    BeginSpan(SpanKind),
    EndSpan(SpanKind),
    Text(String),
}

impl Event {
    /// Replay this event into another sink.
    pub fn apply<S: Sink + ?Sized>(&self, sink: &mut S) {
        match self {
            Event::BeginBlock(kind) => sink.begin_block(kind),
            Event::EndBlock(kind) => sink.end_block(kind),
            Event::BeginSpan(kind) => sink.begin_span(kind),
            Event::EndSpan(kind) => sink.end_span(kind),
            Event::Text(text) => sink.text(text),
        }
    }
}

/// Records every call.
impl Sink for Vec<Event> {
    fn begin_block(&mut self, kind: &BlockKind) {
        self.push(Event::BeginBlock(kind.clone()));
    }

    fn end_block(&mut self, kind: &BlockKind) {
        self.push(Event::EndBlock(kind.clone()));
    }

    fn begin_span(&mut self, kind: &SpanKind) {
        self.push(Event::BeginSpan(kind.clone()));
    }

    fn end_span(&mut self, kind: &SpanKind) {
        self.push(Event::EndSpan(kind.clone()));
    }

    fn text(&mut self, text: &str) {
        self.push(Event::Text(text.to_owned()));
    }
}

impl<S: Sink + ?Sized> Sink for &mut S {
    fn begin_block(&mut self, kind: &BlockKind) {
        (**self).begin_block(kind)
    }

    fn end_block(&mut self, kind: &BlockKind) {
        (**self).end_block(kind)
    }

    fn begin_span(&mut self, kind: &SpanKind) {
        (**self).begin_span(kind)
    }

    fn end_span(&mut self, kind: &SpanKind) {
        (**self).end_span(kind)
    }

    fn text(&mut self, text: &str) {
        (**self).text(text)
    }
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl Sink for NullSink {
    fn begin_block(&mut self, _kind: &BlockKind) {}
    fn end_block(&mut self, _kind: &BlockKind) {}
    fn begin_span(&mut self, _kind: &SpanKind) {}
    fn end_span(&mut self, _kind: &SpanKind) {}
    fn text(&mut self, _text: &str) {}
}

/// Logs each event at `trace` level before forwarding it.
#[derive(Debug, Default)]
pub struct TracingSink<S> {
    inner: S,
}

impl<S> TracingSink<S> {
    pub fn new(inner: S) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S: Sink> Sink for TracingSink<S> {
    fn begin_block(&mut self, kind: &BlockKind) {
        tracing::trace!(?kind, "begin_block");
        self.inner.begin_block(kind);
    }

    fn end_block(&mut self, kind: &BlockKind) {
        tracing::trace!(?kind, "end_block");
        self.inner.end_block(kind);
    }

    fn begin_span(&mut self, kind: &SpanKind) {
        tracing::trace!(?kind, "begin_span");
        self.inner.begin_span(kind);
    }

    fn end_span(&mut self, kind: &SpanKind) {
        tracing::trace!(?kind, "end_span");
        self.inner.end_span(kind);
    }

    fn text(&mut self, text: &str) {
        tracing::trace!(len = text.len(), "text {:?}", text);
        self.inner.text(text);
    }
}
