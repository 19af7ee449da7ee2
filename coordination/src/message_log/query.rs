//! History queries over the message log.

use super::entry::{Entry, EntryKind, Sequence};

/// Filter for history replay and search. All set fields must match.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogQuery {
    /// Only entries by this author.
    pub sender: Option<String>,
    /// Only entries of this kind.
    pub kind: Option<EntryKind>,
    /// Only entries with a sequence strictly greater than this.
    pub since_sequence: Option<Sequence>,
    /// Case-insensitive substring match on the body.
    pub contains: Option<String>,
    /// Keep only the most recent N matches.
    pub limit: Option<usize>,
}

impl LogQuery {
    /// Create an empty query (matches everything).
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sender(mut self, sender: &str) -> Self {
        self.sender = Some(sender.to_string());
        self
    }

    pub fn kind(mut self, kind: EntryKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn since(mut self, sequence: Sequence) -> Self {
        self.since_sequence = Some(sequence);
        self
    }

    pub fn contains(mut self, text: &str) -> Self {
        self.contains = Some(text.to_lowercase());
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Check if an entry matches this filter (ignores `limit`).
    pub fn matches(&self, entry: &Entry) -> bool {
        if let Some(ref sender) = self.sender {
            if &entry.author != sender {
                return false;
            }
        }
        if let Some(kind) = self.kind {
            if entry.kind != kind {
                return false;
            }
        }
        if let Some(since) = self.since_sequence {
            if entry.sequence <= since {
                return false;
            }
        }
        if let Some(ref needle) = self.contains {
            if !entry.body.to_lowercase().contains(needle.as_str()) {
                return false;
            }
        }
        true
    }

    /// Apply the filter to an ordered run of entries.
    pub fn apply<'a, I>(&self, entries: I) -> Vec<Entry>
    where
        I: IntoIterator<Item = &'a Entry>,
    {
        let mut matched: Vec<Entry> = entries
            .into_iter()
            .filter(|e| self.matches(e))
            .cloned()
            .collect();
        if let Some(limit) = self.limit {
            if matched.len() > limit {
                matched.drain(..matched.len() - limit);
            }
        }
        matched
    }
}
