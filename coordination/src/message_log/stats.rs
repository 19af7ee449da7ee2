//! Running statistics over everything ever committed to the log.
//!
//! Counters survive retention trimming: they describe the whole session,
//! not only the entries still held in memory.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::entry::{Entry, EntryKind};

/// Metadata key carrying the author's participant role.
pub const ROLE_KEY: &str = "role";

/// Gap below which a statement counts as a quick reply.
const QUICK_REPLY_SECS: i64 = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogStats {
    pub total_entries: u64,
    pub by_kind: BTreeMap<String, u64>,
    pub by_sender: BTreeMap<String, u64>,
    pub agent_statements: u64,
    pub human_statements: u64,
    pub moderator_entries: u64,
    /// Agent statements landing within ten seconds of the previous entry.
    pub quick_replies: u64,
    pub started_at: DateTime<Utc>,
    #[serde(skip)]
    last_timestamp: Option<DateTime<Utc>>,
}

impl LogStats {
    pub fn new() -> Self {
        Self {
            total_entries: 0,
            by_kind: BTreeMap::new(),
            by_sender: BTreeMap::new(),
            agent_statements: 0,
            human_statements: 0,
            moderator_entries: 0,
            quick_replies: 0,
            started_at: Utc::now(),
            last_timestamp: None,
        }
    }

    pub(crate) fn record(&mut self, entry: &Entry) {
        self.total_entries += 1;
        *self.by_kind.entry(entry.kind.to_string()).or_insert(0) += 1;
        *self.by_sender.entry(entry.author.clone()).or_insert(0) += 1;

        match (entry.kind, entry.meta_str(ROLE_KEY)) {
            (EntryKind::Statement, Some("agent")) => {
                self.agent_statements += 1;
                if let Some(prev) = self.last_timestamp {
                    if (entry.timestamp - prev).num_seconds() < QUICK_REPLY_SECS {
                        self.quick_replies += 1;
                    }
                }
            }
            (EntryKind::Statement, _) => self.human_statements += 1,
            (EntryKind::Moderator, _) => self.moderator_entries += 1,
            _ => {}
        }
        self.last_timestamp = Some(entry.timestamp);
    }

    /// Entries per minute since the log was created.
    pub fn entries_per_minute(&self, now: DateTime<Utc>) -> f64 {
        let minutes = (now - self.started_at).num_milliseconds() as f64 / 60_000.0;
        if minutes <= 0.0 {
            return 0.0;
        }
        self.total_entries as f64 / minutes
    }

    /// Share of all entries written by `sender`.
    pub fn share_of(&self, sender: &str) -> f64 {
        if self.total_entries == 0 {
            return 0.0;
        }
        self.by_sender.get(sender).copied().unwrap_or(0) as f64 / self.total_entries as f64
    }
}

impl Default for LogStats {
    fn default() -> Self {
        Self::new()
    }
}
