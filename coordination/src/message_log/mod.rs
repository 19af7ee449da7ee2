//! Shared ordered message log
//!
//! The single source of truth for a discussion session. Every participant
//! action, moderator notice and vote announcement lands here as an
//! immutable [`Entry`] with a globally unique, gap-free sequence number.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  append   ┌──────────────────────┐  fan-out  ┌──────────────┐
//! │ Trigger      │──────────▶│ MessageLog           │──────────▶│ Subscription │ (engine)
//! │ engines,     │           │  write lock:         │──────────▶│ Subscription │ (watchdog)
//! │ moderator,   │           │   seq++ → arena →    │──────────▶│ Subscription │ (live relay)
//! │ humans       │           │   broadcast          │           └──────────────┘
//! └──────────────┘           └──────────┬───────────┘
//!                                       │ query / snapshot (read lock)
//!                                       ▼
//!                               history replay, transcript
//! ```

pub mod entry;
pub mod query;
pub mod stats;
pub mod store;

pub use entry::{Entry, EntryDraft, EntryKind, Metadata, NameMatcher, Sequence};
pub use query::LogQuery;
pub use stats::{LogStats, ROLE_KEY};
pub use store::{
    MessageLog, SharedMessageLog, Subscription, DEFAULT_RETENTION, DEFAULT_SUBSCRIBER_CAPACITY,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Ordered, read-only export of the log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transcript {
    pub exported_at: DateTime<Utc>,
    pub total_entries: u64,
    pub evicted_entries: u64,
    pub statistics: LogStats,
    pub entries: Vec<Entry>,
}

impl Transcript {
    /// Capture the log's current contents.
    pub fn capture(log: &MessageLog) -> Self {
        let statistics = log.stats();
        Self {
            exported_at: Utc::now(),
            total_entries: statistics.total_entries,
            evicted_entries: log.evicted(),
            statistics,
            entries: log.snapshot(),
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
