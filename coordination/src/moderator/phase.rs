//! Session phases: forward-only state machine plus the phase epoch.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Stage of the session timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Intro,
    Opening,
    Discussion,
    Closing,
    Voting,
    Results,
    Finished,
}

impl SessionPhase {
    pub const ALL: [SessionPhase; 7] = [
        Self::Intro,
        Self::Opening,
        Self::Discussion,
        Self::Closing,
        Self::Voting,
        Self::Results,
        Self::Finished,
    ];

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Finished)
    }

    /// Phases reachable from this one. Voting may be skipped.
    pub fn valid_transitions(self) -> &'static [SessionPhase] {
        match self {
            Self::Intro => &[Self::Opening],
            Self::Opening => &[Self::Discussion],
            Self::Discussion => &[Self::Closing],
            Self::Closing => &[Self::Voting, Self::Results],
            Self::Voting => &[Self::Results],
            Self::Results => &[Self::Finished],
            Self::Finished => &[],
        }
    }
}

impl std::fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Intro => write!(f, "intro"),
            Self::Opening => write!(f, "opening"),
            Self::Discussion => write!(f, "discussion"),
            Self::Closing => write!(f, "closing"),
            Self::Voting => write!(f, "voting"),
            Self::Results => write!(f, "results"),
            Self::Finished => write!(f, "finished"),
        }
    }
}

/// Monotonic phase identity shared with engines. An append decided under
/// epoch `e` is valid only while the epoch is still `e`.
#[derive(Debug, Clone, Default)]
pub struct PhaseEpoch(Arc<AtomicU64>);

impl PhaseEpoch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> u64 {
        self.0.load(Ordering::Acquire)
    }

    pub fn is_current(&self, epoch: u64) -> bool {
        self.current() == epoch
    }

    /// Move to the next epoch and return it.
    pub fn advance(&self) -> u64 {
        self.0.fetch_add(1, Ordering::AcqRel) + 1
    }
}

/// A recorded phase change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseTransition {
    pub from: SessionPhase,
    pub to: SessionPhase,
    pub epoch: u64,
    pub timestamp: DateTime<Utc>,
    pub reason: String,
}

/// Error for invalid phase transitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionError {
    pub from: SessionPhase,
    pub to: SessionPhase,
}

impl std::fmt::Display for TransitionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "invalid transition {} → {} (allowed: {:?})",
            self.from,
            self.to,
            self.from.valid_transitions()
        )
    }
}

impl std::error::Error for TransitionError {}

/// Current phase and its history. Owned by the moderator.
#[derive(Debug)]
pub struct PhaseTracker {
    phase: SessionPhase,
    epoch: PhaseEpoch,
    transitions: Vec<PhaseTransition>,
}

impl PhaseTracker {
    pub fn new(epoch: PhaseEpoch) -> Self {
        Self {
            phase: SessionPhase::Intro,
            epoch,
            transitions: Vec::new(),
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn epoch(&self) -> &PhaseEpoch {
        &self.epoch
    }

    pub fn transitions(&self) -> &[PhaseTransition] {
        &self.transitions
    }

    /// Check a transition without applying it.
    pub fn check(&self, to: SessionPhase) -> Result<(), TransitionError> {
        if self.phase.valid_transitions().contains(&to) {
            Ok(())
        } else {
            Err(TransitionError {
                from: self.phase,
                to,
            })
        }
    }

    /// Record a transition whose epoch has already been advanced.
    pub fn record(
        &mut self,
        to: SessionPhase,
        epoch: u64,
        reason: &str,
    ) -> Result<PhaseTransition, TransitionError> {
        self.check(to)?;
        let transition = PhaseTransition {
            from: self.phase,
            to,
            epoch,
            timestamp: Utc::now(),
            reason: reason.to_string(),
        };
        self.transitions.push(transition.clone());
        self.phase = to;
        Ok(transition)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transitions_are_strictly_forward() {
        for phase in SessionPhase::ALL {
            for next in phase.valid_transitions() {
                assert!(*next > phase, "{phase} → {next} goes backwards");
            }
        }
        assert!(SessionPhase::Finished.valid_transitions().is_empty());
        assert!(SessionPhase::Finished.is_terminal());
    }

    #[test]
    fn test_tracker_rejects_skips_and_revisits() {
        let epoch = PhaseEpoch::new();
        let mut tracker = PhaseTracker::new(epoch.clone());
        assert!(tracker.record(SessionPhase::Discussion, 1, "skip").is_err());

        let e = epoch.advance();
        let t = tracker.record(SessionPhase::Opening, e, "intro done").unwrap();
        assert_eq!(t.from, SessionPhase::Intro);
        assert_eq!(t.epoch, 1);
        assert!(tracker.record(SessionPhase::Intro, 2, "back").is_err());
        assert_eq!(tracker.transitions().len(), 1);
    }

    #[test]
    fn test_epoch_is_shared() {
        let epoch = PhaseEpoch::new();
        let seen_by_engine = epoch.clone();
        let before = seen_by_engine.current();
        epoch.advance();
        assert!(!seen_by_engine.is_current(before));
        assert_eq!(seen_by_engine.current(), 1);
    }

    #[test]
    fn test_phase_display_matches_serde() {
        let json = serde_json::to_string(&SessionPhase::Discussion).unwrap();
        assert_eq!(json, format!("\"{}\"", SessionPhase::Discussion));
    }
}
