/// Errors surfaced by a [`Session`](crate::Session).
///
/// Malformed markdown is never an error; it degrades to literal text. Only
/// undecodable input is rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("invalid utf-8 sequence at stream byte {offset}")]
    Encoding { offset: usize },

    #[error("stream ended inside a utf-8 sequence ({len} dangling bytes)")]
    TruncatedEncoding { len: usize },

    #[error("session was poisoned by an earlier encoding error")]
    Poisoned,
}

pub type Result<T> = std::result::Result<T, Error>;
