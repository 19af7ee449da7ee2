//! Live events pushed to listeners, and inbound events from them.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::message_log::{Entry, EntryKind, Sequence};
use crate::moderator::phase::SessionPhase;
use crate::tally::TallyUpdate;

/// Outbound live events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    /// An entry was committed to the log
    EntryAppended {
        sender: String,
        content: String,
        timestamp: DateTime<Utc>,
        sequence: Sequence,
        kind: EntryKind,
    },

    /// The session moved to a new phase
    PhaseChanged {
        phase: SessionPhase,
        /// Budget of the new phase, when it has one.
        time_remaining_secs: Option<f64>,
        timestamp: DateTime<Utc>,
    },

    /// Live tally snapshot
    TallyUpdated {
        candidates: Vec<String>,
        counts: BTreeMap<String, u32>,
        total: u32,
        time_remaining_secs: f64,
        is_open: bool,
    },

    /// The session reached `finished`
    SessionFinished {
        summary: String,
        timestamp: DateTime<Utc>,
    },
}

impl SessionEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::EntryAppended { .. } => "entry_appended",
            Self::PhaseChanged { .. } => "phase_changed",
            Self::TallyUpdated { .. } => "tally_updated",
            Self::SessionFinished { .. } => "session_finished",
        }
    }

    /// Sequence number, for entry events.
    pub fn sequence(&self) -> Option<Sequence> {
        match self {
            Self::EntryAppended { sequence, .. } => Some(*sequence),
            _ => None,
        }
    }
}

impl From<&Entry> for SessionEvent {
    fn from(entry: &Entry) -> Self {
        Self::EntryAppended {
            sender: entry.author.clone(),
            content: entry.body.clone(),
            timestamp: entry.timestamp,
            sequence: entry.sequence,
            kind: entry.kind,
        }
    }
}

impl From<TallyUpdate> for SessionEvent {
    fn from(update: TallyUpdate) -> Self {
        Self::TallyUpdated {
            candidates: update.candidates,
            counts: update.counts,
            total: update.total,
            time_remaining_secs: update.time_remaining_secs,
            is_open: update.is_open,
        }
    }
}

/// Events arriving from humans.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundEvent {
    HumanMessage {
        author: String,
        content: String,
    },
    CastVote {
        voter: String,
        candidate: String,
        #[serde(default)]
        justification: Option<String>,
    },
}
