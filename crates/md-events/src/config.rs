use serde::{Deserialize, Serialize};

/// Upper bound for any single pending buffer, unless configured otherwise.
pub const DEFAULT_MAX_PENDING_BYTES: usize = 64 * 1024;

/// Parser settings for a [`Session`](crate::Session).
///
/// Deserializes with defaults for missing fields so it can live inside a
/// host application's settings file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Bytes a pending buffer (scanner carry, current line, unresolved inline
    /// content) may hold before its contents are committed or degraded to
    /// literal text.
    pub max_pending_bytes: usize,

    /// Recognize GFM pipe tables.
    pub tables: bool,

    /// Recognize `~~strikethrough~~`.
    pub strikethrough: bool,

    /// Recognize `[text](url)` links and `![alt](url)` images.
    pub links: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            max_pending_bytes: DEFAULT_MAX_PENDING_BYTES,
            tables: true,
            strikethrough: true,
            links: true,
        }
    }
}

impl Config {
    pub fn with_max_pending_bytes(mut self, max_pending_bytes: usize) -> Self {
        self.max_pending_bytes = max_pending_bytes.max(1);
        self
    }

    pub fn with_tables(mut self, tables: bool) -> Self {
        self.tables = tables;
        self
    }

    pub fn with_strikethrough(mut self, strikethrough: bool) -> Self {
        self.strikethrough = strikethrough;
        self
    }

    pub fn with_links(mut self, links: bool) -> Self {
        self.links = links;
        self
    }
}
