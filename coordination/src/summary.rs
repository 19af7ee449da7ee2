//! Session summary: the structured result of one finished session.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{DiscussionMode, ParticipantRole};
use crate::message_log::{Entry, LogStats};
use crate::moderator::phase::PhaseTransition;
use crate::tally::{TallyOutcome, TallyResults};
use crate::trigger::AgentReport;

/// Per-participant activity over the session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticipantStats {
    pub id: String,
    pub role: ParticipantRole,
    /// Statements in the log, from any phase.
    pub statements: u64,
    /// Structured turns completed with a statement.
    pub turns_taken: u32,
    /// Structured turns skipped after a generation failure.
    pub skips: u32,
    pub deadline_warnings: u32,
    pub forced_passes: u32,
    pub generation_failures: u32,
    pub fallback_statements: u32,
    /// Trigger engine state at the end of autonomous discussion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub autonomous: Option<AgentReport>,
}

impl ParticipantStats {
    pub fn new(id: &str, role: ParticipantRole) -> Self {
        Self {
            id: id.to_string(),
            role,
            statements: 0,
            turns_taken: 0,
            skips: 0,
            deadline_warnings: 0,
            forced_passes: 0,
            generation_failures: 0,
            fallback_statements: 0,
            autonomous: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub topic: String,
    pub mode: DiscussionMode,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// `None` when voting was disabled.
    pub outcome: Option<TallyOutcome>,
    pub counts: BTreeMap<String, u32>,
    pub total_votes: u32,
    pub eligible_voters: u32,
    pub participation: f64,
    pub tally: Option<TallyResults>,
    pub participants: Vec<ParticipantStats>,
    pub phases: Vec<PhaseTransition>,
    pub silence_interventions: u32,
    pub log_stats: LogStats,
    pub entries: Vec<Entry>,
}

impl SessionSummary {
    /// One-line human-readable result.
    pub fn summary_line(&self) -> String {
        match &self.outcome {
            None => format!("Discussion on \"{}\" finished (voting disabled)", self.topic),
            Some(TallyOutcome::NoVotes) => {
                format!("Discussion on \"{}\" finished: no votes cast", self.topic)
            }
            Some(TallyOutcome::Winner(winner)) => format!(
                "Winner: {} with {} of {} votes ({:.0}% participation)",
                winner,
                self.counts.get(winner).copied().unwrap_or(0),
                self.total_votes,
                self.participation * 100.0
            ),
            Some(TallyOutcome::Tie(set)) => format!(
                "Tie between {} at {} votes each ({:.0}% participation)",
                set.join(" and "),
                set.first()
                    .and_then(|c| self.counts.get(c))
                    .copied()
                    .unwrap_or(0),
                self.participation * 100.0
            ),
        }
    }

    pub fn participant(&self, id: &str) -> Option<&ParticipantStats> {
        self.participants.iter().find(|p| p.id == id)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(outcome: Option<TallyOutcome>) -> SessionSummary {
        let mut counts = BTreeMap::new();
        counts.insert("ada".to_string(), 1);
        counts.insert("bob".to_string(), 3);
        SessionSummary {
            topic: "Remote work".to_string(),
            mode: DiscussionMode::Autonomous,
            started_at: Utc::now(),
            finished_at: Utc::now(),
            outcome,
            counts,
            total_votes: 4,
            eligible_voters: 5,
            participation: 0.8,
            tally: None,
            participants: vec![ParticipantStats::new("ada", ParticipantRole::Agent)],
            phases: vec![],
            silence_interventions: 0,
            log_stats: LogStats::new(),
            entries: vec![],
        }
    }

    #[test]
    fn test_summary_lines() {
        let line = summary(Some(TallyOutcome::Winner("bob".to_string()))).summary_line();
        assert_eq!(line, "Winner: bob with 3 of 4 votes (80% participation)");

        let line = summary(None).summary_line();
        assert!(line.contains("voting disabled"));

        let line = summary(Some(TallyOutcome::Tie(vec!["ada".into(), "bob".into()])))
            .summary_line();
        assert!(line.starts_with("Tie between ada and bob"));
    }

    #[test]
    fn test_participant_lookup() {
        let s = summary(None);
        assert_eq!(s.participant("ada").unwrap().role, ParticipantRole::Agent);
        assert!(s.participant("zed").is_none());
    }
}
