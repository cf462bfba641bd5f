//! Session lifecycle: `start`, `add` any number of fragments, `flush`.

use serde::Serialize;
use tracing::{debug, warn};

use crate::block::{BlockFrame, BlockMachine};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::scanner::{Scanner, Token};
use crate::sink::{BlockKind, Event, Sink, SpanKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    Streaming,
    Poisoned,
}

/// Counters for one session, reset on `start`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Stats {
    pub fragments: usize,
    pub bytes_consumed: usize,
    pub text_bytes_emitted: usize,
}

/// Wraps the caller's sink to keep `text_bytes_emitted` current.
struct Counted<'a, S: ?Sized> {
    inner: &'a mut S,
    text_bytes: &'a mut usize,
}

impl<S: Sink + ?Sized> Sink for Counted<'_, S> {
    fn begin_block(&mut self, kind: &BlockKind) {
        self.inner.begin_block(kind);
    }

    fn end_block(&mut self, kind: &BlockKind) {
        self.inner.end_block(kind);
    }

    fn begin_span(&mut self, kind: &SpanKind) {
        self.inner.begin_span(kind);
    }

    fn end_span(&mut self, kind: &SpanKind) {
        self.inner.end_span(kind);
    }

    fn text(&mut self, text: &str) {
        *self.text_bytes += text.len();
        self.inner.text(text);
    }
}

/// Streaming parser bound to a sink.
///
/// ```
/// use md_events::{Event, Session};
///
/// let mut session = Session::new(Vec::<Event>::new());
/// session.add("# Hel").unwrap();
/// session.add("lo\n").unwrap();
/// session.flush().unwrap();
/// assert_eq!(session.sink()[1], Event::Text("Hello".to_string()));
/// ```
#[derive(Debug)]
pub struct Session<S> {
    sink: S,
    config: Config,
    scanner: Scanner,
    blocks: BlockMachine,
    state: State,
    /// Undecoded bytes from the end of the last `add_bytes` call
    utf8_tail: Vec<u8>,
    stats: Stats,
    tokens: Vec<Token>,
}

impl<S: Sink> Session<S> {
    pub fn new(sink: S) -> Self {
        Self::with_config(Config::default(), sink)
    }

    pub fn with_config(config: Config, sink: S) -> Self {
        Self {
            scanner: Scanner::new(config.max_pending_bytes),
            blocks: BlockMachine::new(&config),
            config,
            sink,
            state: State::Idle,
            utf8_tail: Vec::new(),
            stats: Stats::default(),
            tokens: Vec::new(),
        }
    }

    /// Begin a new stream. A stream that is still open is flushed first, and
    /// an error from that flush is returned after the new stream has started.
    /// Starting also clears a poisoned session.
    pub fn start(&mut self) -> Result<()> {
        let previous = match self.state {
            State::Streaming => {
                debug!("start while streaming, flushing previous stream");
                self.finish()
            }
            State::Idle | State::Poisoned => Ok(()),
        };
        self.reset();
        debug!("session started");
        previous
    }

    /// Feed one fragment of the stream. Starts the session if needed.
    pub fn add(&mut self, fragment: &str) -> Result<()> {
        if self.state == State::Poisoned {
            return Err(Error::Poisoned);
        }
        if fragment.is_empty() {
            return Ok(());
        }
        self.ensure_started();

        // a str cannot finish a sequence begun by add_bytes
        if !self.utf8_tail.is_empty() {
            return Err(self.poison(self.stats.bytes_consumed));
        }

        self.feed(fragment);
        Ok(())
    }

    /// Feed raw bytes. A UTF-8 sequence split across calls is reassembled;
    /// an invalid one poisons the session after closing every open block.
    pub fn add_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        if self.state == State::Poisoned {
            return Err(Error::Poisoned);
        }
        if bytes.is_empty() {
            return Ok(());
        }
        self.ensure_started();

        let mut buf = std::mem::take(&mut self.utf8_tail);
        buf.extend_from_slice(bytes);

        match std::str::from_utf8(&buf) {
            Ok(text) => {
                self.feed(text);
                Ok(())
            }
            Err(err) => {
                let (valid, rest) = buf.split_at(err.valid_up_to());
                if let Ok(text) = std::str::from_utf8(valid) {
                    if !text.is_empty() {
                        self.feed(text);
                    }
                }

                if err.error_len().is_some() {
                    return Err(self.poison(self.stats.bytes_consumed));
                }
                self.utf8_tail = rest.to_vec();
                Ok(())
            }
        }
    }

    /// Resolve everything still pending and close all open blocks. Calling
    /// it again, or before anything was added, does nothing.
    pub fn flush(&mut self) -> Result<()> {
        match self.state {
            State::Poisoned => Err(Error::Poisoned),
            State::Idle => Ok(()),
            State::Streaming => self.finish(),
        }
    }

    pub fn is_streaming(&self) -> bool {
        self.state == State::Streaming
    }

    pub fn is_poisoned(&self) -> bool {
        self.state == State::Poisoned
    }

    pub fn in_code_block(&self) -> bool {
        self.blocks.in_code_block()
    }

    /// Open containers, outermost first.
    pub fn open_blocks(&self) -> &[BlockFrame] {
        self.blocks.containers()
    }

    /// Bytes received but not yet reflected in emitted events.
    pub fn pending_bytes(&self) -> usize {
        self.scanner.pending_bytes() + self.blocks.pending_bytes() + self.utf8_tail.len()
    }

    pub fn stats(&self) -> Stats {
        self.stats
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    pub fn into_sink(self) -> S {
        self.sink
    }

    fn reset(&mut self) {
        self.scanner = Scanner::new(self.config.max_pending_bytes);
        self.blocks = BlockMachine::new(&self.config);
        self.utf8_tail.clear();
        self.stats = Stats::default();
        self.state = State::Streaming;
    }

    fn ensure_started(&mut self) {
        if self.state == State::Idle {
            debug!("implicit start");
            self.reset();
        }
    }

    fn feed(&mut self, text: &str) {
        self.stats.fragments += 1;
        self.stats.bytes_consumed += text.len();

        let mut tokens = std::mem::take(&mut self.tokens);
        self.scanner.scan_into(text, &mut tokens);

        let mut sink = Counted {
            inner: &mut self.sink,
            text_bytes: &mut self.stats.text_bytes_emitted,
        };
        for token in tokens.drain(..) {
            self.blocks.push(token, &mut sink);
        }
        self.blocks.end_fragment(&mut sink);

        self.tokens = tokens;
    }

    /// Close the stream. Every open block gets its `end_block`.
    fn close(&mut self) {
        let mut tokens = std::mem::take(&mut self.tokens);
        self.scanner.finish(&mut tokens);

        let mut sink = Counted {
            inner: &mut self.sink,
            text_bytes: &mut self.stats.text_bytes_emitted,
        };
        for token in tokens.drain(..) {
            self.blocks.push(token, &mut sink);
        }
        self.blocks.finish(&mut sink);

        self.tokens = tokens;
        self.state = State::Idle;
    }

    fn finish(&mut self) -> Result<()> {
        self.close();

        debug!(
            fragments = self.stats.fragments,
            bytes = self.stats.bytes_consumed,
            text_bytes = self.stats.text_bytes_emitted,
            "session flushed"
        );

        let dangling = std::mem::take(&mut self.utf8_tail).len();
        if dangling > 0 {
            warn!(dangling, "stream ended inside a utf-8 sequence");
            return Err(Error::TruncatedEncoding { len: dangling });
        }
        Ok(())
    }

    fn poison(&mut self, offset: usize) -> Error {
        warn!(offset, "invalid utf-8 in stream, poisoning session");
        self.utf8_tail.clear();
        self.close();
        self.state = State::Poisoned;
        Error::Encoding { offset }
    }
}

/// Parse a complete document in one call.
pub fn to_events(markdown: &str) -> Vec<Event> {
    let mut session = Session::new(Vec::new());
    // a &str input can neither be invalid nor truncated utf-8
    let added = session.add(markdown);
    debug_assert!(added.is_ok());
    let flushed = session.flush();
    debug_assert!(flushed.is_ok());
    session.into_sink()
}
