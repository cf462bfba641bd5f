//! Incremental markdown parser for streaming LLM output.
//!
//! Text arrives in arbitrary fragments through [`Session::add`]. Structural
//! events (block and span boundaries, text) go out through a [`Sink`] once
//! later input can no longer change them, which happens at each line end.
//! [`Session::flush`] resolves whatever is still ambiguous and closes every
//! open block, so the event stream is always balanced.
//!
//! The output does not depend on how the input was split: feeding `"**bo"`
//! and `"ld**"` yields the same events as `"**bold**"`.

mod block;
mod config;
mod error;
mod inline;
mod scanner;
mod session;
mod sink;

pub use block::{BlockFrame, BlockMachine};
pub use config::{Config, DEFAULT_MAX_PENDING_BYTES};
pub use error::{Error, Result};
pub use inline::{InlineResolver, OpenSpan, PendingRun};
pub use scanner::{MarkerKind, Scanner, Token};
pub use session::{to_events, Session, Stats};
pub use sink::{Alignment, BlockKind, Event, NullSink, Sink, SpanKind, TracingSink};
