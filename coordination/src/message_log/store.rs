//! Append-only message store with per-subscriber fan-out.
//!
//! One write lock is the single serialization point: the sequence counter,
//! the entry arena and the broadcast send all happen inside it, so the number
//! an entry receives is exactly the order every subscriber sees it in.

use std::collections::VecDeque;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::Utc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use super::entry::{Entry, EntryDraft, NameMatcher, Sequence};
use super::query::LogQuery;
use super::stats::LogStats;

/// Default per-subscriber buffer.
pub const DEFAULT_SUBSCRIBER_CAPACITY: usize = 256;

/// Default number of entries retained in memory.
pub const DEFAULT_RETENTION: usize = 1000;

/// Shared reference to a MessageLog
pub type SharedMessageLog = Arc<MessageLog>;

struct LogInner {
    entries: VecDeque<Entry>,
    next_sequence: Sequence,
    retention: usize,
    evicted: u64,
    stats: LogStats,
}

/// The shared, globally ordered discussion log.
pub struct MessageLog {
    inner: RwLock<LogInner>,
    sender: broadcast::Sender<Entry>,
}

impl MessageLog {
    /// Create a log with default retention and subscriber capacity.
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_RETENTION, DEFAULT_SUBSCRIBER_CAPACITY)
    }

    /// Create a log keeping at most `retention` entries in memory, with
    /// `subscriber_capacity` buffered entries per subscriber.
    pub fn with_limits(retention: usize, subscriber_capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(subscriber_capacity.max(1));
        Self {
            inner: RwLock::new(LogInner {
                entries: VecDeque::new(),
                next_sequence: 1,
                retention: retention.max(1),
                evicted: 0,
                stats: LogStats::new(),
            }),
            sender,
        }
    }

    /// Create a shared reference to this log
    pub fn shared(self) -> SharedMessageLog {
        Arc::new(self)
    }

    fn read(&self) -> RwLockReadGuard<'_, LogInner> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, LogInner> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Commit an entry and fan it out. Never suspends.
    pub fn append(&self, draft: EntryDraft) -> Entry {
        let mut inner = self.write();
        self.commit(&mut inner, draft)
    }

    /// Commit only if `guard` still holds at the commit point.
    ///
    /// The guard runs inside the write critical section, so nothing can be
    /// committed between the check and the insert.
    pub fn append_if<F>(&self, draft: EntryDraft, guard: F) -> Option<Entry>
    where
        F: FnOnce() -> bool,
    {
        let mut inner = self.write();
        if !guard() {
            debug!(author = %draft.author, "Guarded append rejected");
            return None;
        }
        Some(self.commit(&mut inner, draft))
    }

    fn commit(&self, inner: &mut LogInner, draft: EntryDraft) -> Entry {
        let entry = Entry {
            sequence: inner.next_sequence,
            author: draft.author,
            body: draft.body,
            kind: draft.kind,
            timestamp: Utc::now(),
            metadata: draft.metadata,
        };
        inner.next_sequence += 1;
        inner.stats.record(&entry);
        inner.entries.push_back(entry.clone());
        while inner.entries.len() > inner.retention {
            inner.entries.pop_front();
            inner.evicted += 1;
        }

        // No receivers is fine; the entry is committed either way.
        let receivers = self.sender.send(entry.clone()).unwrap_or(0);
        debug!(
            sequence = entry.sequence,
            author = %entry.author,
            kind = %entry.kind,
            receivers,
            "Entry committed"
        );
        entry
    }

    /// Subscribe to entries committed from now on.
    pub fn subscribe(&self, name: &str) -> Subscription {
        Subscription::new(name, self.sender.subscribe())
    }

    /// Snapshot of retained entries plus a subscription starting right after
    /// the last of them, with no gap and no overlap between the two.
    pub fn subscribe_with_history(&self, name: &str) -> (Vec<Entry>, Subscription) {
        let inner = self.read();
        let history = inner.entries.iter().cloned().collect();
        let sub = Subscription::new(name, self.sender.subscribe());
        (history, sub)
    }

    /// Ordered entries matching `query` from a consistent snapshot.
    pub fn query(&self, query: &LogQuery) -> Vec<Entry> {
        let inner = self.read();
        query.apply(inner.entries.iter())
    }

    /// All retained entries in commit order.
    pub fn snapshot(&self) -> Vec<Entry> {
        self.read().entries.iter().cloned().collect()
    }

    /// The most recent `count` entries in commit order.
    pub fn recent(&self, count: usize) -> Vec<Entry> {
        let inner = self.read();
        let skip = inner.entries.len().saturating_sub(count);
        inner.entries.iter().skip(skip).cloned().collect()
    }

    /// Entries relevant to `participant`: their own, moderator and system
    /// notices, and entries mentioning them, drawn from the last
    /// `2 * context_length` entries.
    pub fn context_for(&self, participant: &str, context_length: usize) -> Vec<Entry> {
        let recent = self.recent(context_length * 2);
        let name = NameMatcher::new(participant);
        let mut context: Vec<Entry> = recent
            .into_iter()
            .filter(|e| {
                e.author == participant
                    || !e.is_statement()
                    || e.mentions(&name)
            })
            .collect();
        let skip = context.len().saturating_sub(context_length);
        context.drain(..skip);
        context
    }

    pub fn last(&self) -> Option<Entry> {
        self.read().entries.back().cloned()
    }

    /// Number of retained entries.
    pub fn len(&self) -> usize {
        self.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().entries.is_empty()
    }

    /// Sequence number the next commit will receive.
    pub fn next_sequence(&self) -> Sequence {
        self.read().next_sequence
    }

    /// Entries trimmed by retention so far.
    pub fn evicted(&self) -> u64 {
        self.read().evicted
    }

    pub fn stats(&self) -> LogStats {
        self.read().stats.clone()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for MessageLog {
    fn default() -> Self {
        Self::new()
    }
}

/// A live feed of future entries for one consumer.
///
/// Buffering is bounded per subscriber. A consumer that falls behind loses
/// the oldest undelivered entries (logged as a warning) and then continues
/// in commit order; producers and other subscribers are never blocked.
pub struct Subscription {
    name: String,
    receiver: broadcast::Receiver<Entry>,
    dropped: u64,
}

impl Subscription {
    fn new(name: &str, receiver: broadcast::Receiver<Entry>) -> Self {
        Self {
            name: name.to_string(),
            receiver,
            dropped: 0,
        }
    }

    /// Next entry, or `None` once the log is gone.
    pub async fn recv(&mut self) -> Option<Entry> {
        loop {
            match self.receiver.recv().await {
                Ok(entry) => return Some(entry),
                Err(broadcast::error::RecvError::Lagged(skipped)) => self.note_lag(skipped),
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Next already-buffered entry without waiting.
    pub fn try_recv(&mut self) -> Option<Entry> {
        loop {
            match self.receiver.try_recv() {
                Ok(entry) => return Some(entry),
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => self.note_lag(skipped),
                Err(_) => return None,
            }
        }
    }

    /// Drain everything currently buffered.
    pub fn drain(&mut self) -> Vec<Entry> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }

    fn note_lag(&mut self, skipped: u64) {
        self.dropped += skipped;
        warn!(
            subscriber = %self.name,
            skipped,
            total_dropped = self.dropped,
            "Subscriber lagged; oldest entries dropped"
        );
    }

    /// Entries this subscriber lost to lag.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message_log::entry::EntryKind;

    #[test]
    fn test_sequences_start_at_one_and_increase() {
        let log = MessageLog::new();
        let a = log.append(EntryDraft::statement("ada", "one"));
        let b = log.append(EntryDraft::moderator("Moderator", "two"));
        assert_eq!(a.sequence, 1);
        assert_eq!(b.sequence, 2);
        assert_eq!(log.next_sequence(), 3);
        assert_eq!(log.last().unwrap().body, "two");
    }

    #[test]
    fn test_retention_trims_oldest_without_renumbering() {
        let log = MessageLog::with_limits(3, 16);
        for i in 0..5 {
            log.append(EntryDraft::statement("ada", format!("m{i}")));
        }
        let seqs: Vec<_> = log.snapshot().iter().map(|e| e.sequence).collect();
        assert_eq!(seqs, vec![3, 4, 5]);
        assert_eq!(log.evicted(), 2);
        assert_eq!(log.stats().total_entries, 5);
        assert_eq!(log.append(EntryDraft::statement("ada", "m5")).sequence, 6);
    }

    #[test]
    fn test_append_if_rejects_without_consuming_sequence() {
        let log = MessageLog::new();
        assert!(log
            .append_if(EntryDraft::statement("ada", "stale"), || false)
            .is_none());
        let e = log
            .append_if(EntryDraft::statement("ada", "fresh"), || true)
            .unwrap();
        assert_eq!(e.sequence, 1);
        assert_eq!(log.len(), 1);
    }

    #[tokio::test]
    async fn test_subscriber_receives_in_order() {
        let log = MessageLog::new();
        let mut sub = log.subscribe("test");
        log.append(EntryDraft::statement("ada", "a"));
        log.append(EntryDraft::system("Moderator", "b"));
        assert_eq!(sub.recv().await.unwrap().sequence, 1);
        assert_eq!(sub.recv().await.unwrap().sequence, 2);
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_slow_subscriber_drops_oldest_and_continues() {
        let log = MessageLog::with_limits(100, 4);
        let mut slow = log.subscribe("slow");
        let mut fast = log.subscribe("fast");
        for i in 0..10 {
            log.append(EntryDraft::statement("ada", format!("m{i}")));
            // The fast consumer keeps up.
            assert_eq!(fast.recv().await.unwrap().sequence, i + 1);
        }
        let got: Vec<_> = slow.drain().iter().map(|e| e.sequence).collect();
        assert_eq!(got, vec![7, 8, 9, 10]);
        assert_eq!(slow.dropped(), 6);
    }

    #[test]
    fn test_subscribe_with_history_has_no_gap() {
        let log = MessageLog::new();
        log.append(EntryDraft::statement("ada", "before"));
        let (history, mut sub) = log.subscribe_with_history("late");
        log.append(EntryDraft::statement("bob", "after"));
        assert_eq!(history.len(), 1);
        assert_eq!(sub.try_recv().unwrap().sequence, 2);
    }

    #[test]
    fn test_context_for_participant() {
        let log = MessageLog::new();
        log.append(EntryDraft::statement("bob", "unrelated"));
        log.append(EntryDraft::statement("bob", "ada, what do you say?"));
        log.append(EntryDraft::moderator("Moderator", "two minutes left"));
        log.append(EntryDraft::statement("ada", "I say yes"));
        let ctx = log.context_for("ada", 5);
        let bodies: Vec<_> = ctx.iter().map(|e| e.body.as_str()).collect();
        assert_eq!(
            bodies,
            vec!["ada, what do you say?", "two minutes left", "I say yes"]
        );
        assert_eq!(ctx[1].kind, EntryKind::Moderator);
    }
}
