//! Vote tally: time-boxed ballot collection and result computation.
//!
//! One session at a time moves `open → closed`. Ballots are last-write-wins
//! per voter. Closing freezes the ballot set, computes the result once and
//! caches it; later closes hand back the cached value.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info};

/// Error type for tally session misuse
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TallyError {
    #[error("A tally session is already open")]
    AlreadyOpen,

    #[error("No tally session has been opened")]
    NeverOpened,

    #[error("Candidate set is empty")]
    NoCandidates,
}

/// Result type for tally operations
pub type TallyResult<T> = Result<T, TallyError>;

/// Why a cast was refused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    NotOpen,
    Expired,
    UnknownCandidate(String),
    JustificationRequired,
    InvalidVoter,
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotOpen => write!(f, "voting is not open"),
            Self::Expired => write!(f, "voting period has ended"),
            Self::UnknownCandidate(c) => write!(f, "unknown candidate: {}", c),
            Self::JustificationRequired => write!(f, "a justification is required"),
            Self::InvalidVoter => write!(f, "voter id must not be empty"),
        }
    }
}

/// Result of a cast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CastOutcome {
    /// Recorded; `replaced` is true when it overwrote the voter's prior ballot.
    Accepted { replaced: bool },
    Rejected(RejectReason),
}

impl CastOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted { .. })
    }
}

/// One voter's live choice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ballot {
    pub voter: String,
    pub candidate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub justification: Option<String>,
    pub cast_at: DateTime<Utc>,
}

/// Cast-time rules applied to every session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TallyPolicy {
    pub require_justification: bool,
    /// Redact voter ids from closed results.
    pub anonymous: bool,
}

/// Who won, if anyone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "candidates")]
pub enum TallyOutcome {
    Winner(String),
    /// Two or more candidates share the top count. Sorted.
    Tie(Vec<String>),
    NoVotes,
}

impl std::fmt::Display for TallyOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Winner(w) => write!(f, "winner: {}", w),
            Self::Tie(set) => write!(f, "tie: {}", set.join(", ")),
            Self::NoVotes => write!(f, "no votes cast"),
        }
    }
}

/// Frozen results of a closed session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TallyResults {
    pub session_id: String,
    pub outcome: TallyOutcome,
    /// Every candidate, including those with zero votes.
    pub counts: BTreeMap<String, u32>,
    pub total_votes: u32,
    pub eligible_voters: u32,
    /// Distinct voters / eligible voters (0 when nobody is eligible).
    pub participation: f64,
    /// Sorted by voter id; voter ids redacted in anonymous mode.
    pub ballots: Vec<Ballot>,
    pub opened_at: DateTime<Utc>,
    pub closed_at: DateTime<Utc>,
    pub closed_early: bool,
}

impl TallyResults {
    pub fn winner(&self) -> Option<&str> {
        match &self.outcome {
            TallyOutcome::Winner(w) => Some(w.as_str()),
            _ => None,
        }
    }

    pub fn is_tie(&self) -> bool {
        matches!(self.outcome, TallyOutcome::Tie(_))
    }

    /// Counts ordered by votes (descending), then name.
    pub fn ranking(&self) -> Vec<(String, u32)> {
        let mut ranked: Vec<(String, u32)> =
            self.counts.iter().map(|(c, n)| (c.clone(), *n)).collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked
    }
}

/// Live view of the current session for broadcasting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TallyUpdate {
    pub candidates: Vec<String>,
    pub counts: BTreeMap<String, u32>,
    pub total: u32,
    pub time_remaining_secs: f64,
    pub is_open: bool,
}

/// Aggregate performance of a candidate across closed sessions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CandidatePerformance {
    pub sessions: u32,
    pub wins: u32,
    pub total_votes: u32,
}

enum SessionState {
    Open,
    Closed(TallyResults),
}

struct TallySession {
    id: String,
    candidates: BTreeSet<String>,
    ballots: HashMap<String, Ballot>,
    eligible_voters: u32,
    opened_at: DateTime<Utc>,
    deadline: Instant,
    state: SessionState,
}

impl TallySession {
    fn is_open(&self) -> bool {
        matches!(self.state, SessionState::Open)
    }

    fn counts(&self) -> BTreeMap<String, u32> {
        let mut counts: BTreeMap<String, u32> =
            self.candidates.iter().map(|c| (c.clone(), 0)).collect();
        for ballot in self.ballots.values() {
            *counts.entry(ballot.candidate.clone()).or_insert(0) += 1;
        }
        counts
    }

    fn compute(&self, policy: &TallyPolicy, closed_early: bool) -> TallyResults {
        let counts = self.counts();
        let total_votes = self.ballots.len() as u32;

        let top = counts.values().copied().max().unwrap_or(0);
        let outcome = if top == 0 {
            TallyOutcome::NoVotes
        } else {
            let leaders: Vec<String> = counts
                .iter()
                .filter(|(_, n)| **n == top)
                .map(|(c, _)| c.clone())
                .collect();
            if leaders.len() == 1 {
                TallyOutcome::Winner(leaders[0].clone())
            } else {
                TallyOutcome::Tie(leaders)
            }
        };

        let participation = if self.eligible_voters == 0 {
            0.0
        } else {
            total_votes as f64 / self.eligible_voters as f64
        };

        let mut ballots: Vec<Ballot> = self.ballots.values().cloned().collect();
        ballots.sort_by(|a, b| a.voter.cmp(&b.voter));
        if policy.anonymous {
            for ballot in &mut ballots {
                ballot.voter = "anonymous".to_string();
            }
        }

        TallyResults {
            session_id: self.id.clone(),
            outcome,
            counts,
            total_votes,
            eligible_voters: self.eligible_voters,
            participation,
            ballots,
            opened_at: self.opened_at,
            closed_at: Utc::now(),
            closed_early,
        }
    }
}

struct TallyInner {
    current: Option<TallySession>,
    history: Vec<TallyResults>,
}

/// Shared reference to a VoteTally
pub type SharedVoteTally = Arc<VoteTally>;

/// The vote tally. Safe to call from any number of voters concurrently.
pub struct VoteTally {
    policy: TallyPolicy,
    inner: Mutex<TallyInner>,
}

impl VoteTally {
    pub fn new(policy: TallyPolicy) -> Self {
        Self {
            policy,
            inner: Mutex::new(TallyInner {
                current: None,
                history: Vec::new(),
            }),
        }
    }

    /// Create a shared reference to this tally
    pub fn shared(self) -> SharedVoteTally {
        Arc::new(self)
    }

    pub fn policy(&self) -> &TallyPolicy {
        &self.policy
    }

    fn lock(&self) -> MutexGuard<'_, TallyInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Open a new session. Fails while another one is open.
    pub fn open<I, S>(&self, candidates: I, duration: Duration, eligible_voters: u32) -> TallyResult<String>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let candidates: BTreeSet<String> = candidates.into_iter().map(Into::into).collect();
        if candidates.is_empty() {
            return Err(TallyError::NoCandidates);
        }

        let mut inner = self.lock();
        if inner.current.as_ref().is_some_and(|s| s.is_open()) {
            return Err(TallyError::AlreadyOpen);
        }

        let id = uuid::Uuid::new_v4().to_string();
        info!(
            session_id = %id,
            candidates = candidates.len(),
            eligible_voters,
            duration_secs = duration.as_secs(),
            "Tally session opened"
        );
        inner.current = Some(TallySession {
            id: id.clone(),
            candidates,
            ballots: HashMap::new(),
            eligible_voters,
            opened_at: Utc::now(),
            deadline: Instant::now() + duration,
            state: SessionState::Open,
        });
        Ok(id)
    }

    /// Record a ballot. A repeat cast by the same voter replaces the old one.
    pub fn cast(&self, voter: &str, candidate: &str, justification: Option<&str>) -> CastOutcome {
        let voter = voter.trim();
        if voter.is_empty() {
            return CastOutcome::Rejected(RejectReason::InvalidVoter);
        }

        let mut inner = self.lock();
        let Some(session) = inner.current.as_mut().filter(|s| s.is_open()) else {
            return CastOutcome::Rejected(RejectReason::NotOpen);
        };
        if Instant::now() >= session.deadline {
            return CastOutcome::Rejected(RejectReason::Expired);
        }
        if !session.candidates.contains(candidate) {
            return CastOutcome::Rejected(RejectReason::UnknownCandidate(candidate.to_string()));
        }
        let justification = justification
            .map(str::trim)
            .filter(|j| !j.is_empty())
            .map(String::from);
        if self.policy.require_justification && justification.is_none() {
            return CastOutcome::Rejected(RejectReason::JustificationRequired);
        }

        let replaced = session
            .ballots
            .insert(
                voter.to_string(),
                Ballot {
                    voter: voter.to_string(),
                    candidate: candidate.to_string(),
                    justification,
                    cast_at: Utc::now(),
                },
            )
            .is_some();
        debug!(voter, candidate, replaced, "Ballot recorded");
        CastOutcome::Accepted { replaced }
    }

    /// Close the session and return its results. Idempotent.
    pub fn close(&self) -> TallyResult<TallyResults> {
        let mut inner = self.lock();
        let TallyInner { current, history } = &mut *inner;
        let session = current.as_mut().ok_or(TallyError::NeverOpened)?;

        if let SessionState::Closed(results) = &session.state {
            return Ok(results.clone());
        }

        let closed_early = Instant::now() < session.deadline;
        let results = session.compute(&self.policy, closed_early);
        session.state = SessionState::Closed(results.clone());
        history.push(results.clone());

        info!(
            session_id = %results.session_id,
            outcome = %results.outcome,
            total_votes = results.total_votes,
            participation = results.participation,
            "Tally session closed"
        );
        Ok(results)
    }

    pub fn is_open(&self) -> bool {
        self.lock().current.as_ref().is_some_and(|s| s.is_open())
    }

    /// Whether the open session has passed its deadline.
    pub fn is_expired(&self) -> bool {
        self.lock()
            .current
            .as_ref()
            .is_some_and(|s| s.is_open() && Instant::now() >= s.deadline)
    }

    /// Live view of the current (or last) session.
    pub fn update(&self) -> Option<TallyUpdate> {
        let inner = self.lock();
        let session = inner.current.as_ref()?;
        let is_open = session.is_open();
        let time_remaining_secs = if is_open {
            session
                .deadline
                .saturating_duration_since(Instant::now())
                .as_secs_f64()
        } else {
            0.0
        };
        Some(TallyUpdate {
            candidates: session.candidates.iter().cloned().collect(),
            counts: session.counts(),
            total: session.ballots.len() as u32,
            time_remaining_secs,
            is_open,
        })
    }

    /// Results of every closed session, oldest first.
    pub fn history(&self) -> Vec<TallyResults> {
        self.lock().history.clone()
    }

    pub fn candidate_performance(&self, candidate: &str) -> CandidatePerformance {
        let inner = self.lock();
        let mut perf = CandidatePerformance::default();
        for results in inner.history.iter() {
            let Some(votes) = results.counts.get(candidate) else {
                continue;
            };
            perf.sessions += 1;
            perf.total_votes += votes;
            if results.winner() == Some(candidate) {
                perf.wins += 1;
            }
        }
        perf
    }
}

impl Default for VoteTally {
    fn default() -> Self {
        Self::new(TallyPolicy::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINUTE: Duration = Duration::from_secs(60);

    #[tokio::test]
    async fn test_overwrite_scenario() {
        let tally = VoteTally::default();
        tally.open(["Alice", "Bob"], MINUTE, 4).unwrap();

        assert_eq!(
            tally.cast("v1", "Alice", None),
            CastOutcome::Accepted { replaced: false }
        );
        assert!(tally.cast("v2", "Bob", None).is_accepted());
        assert_eq!(
            tally.cast("v1", "Bob", None),
            CastOutcome::Accepted { replaced: true }
        );

        let results = tally.close().unwrap();
        assert_eq!(results.counts.get("Alice"), Some(&0));
        assert_eq!(results.counts.get("Bob"), Some(&2));
        assert_eq!(results.winner(), Some("Bob"));
        assert_eq!(results.total_votes, 2);
        assert!((results.participation - 0.5).abs() < f64::EPSILON);
        assert!(results.closed_early);
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_freezes_ballots() {
        let tally = VoteTally::default();
        tally.open(["Alice", "Bob"], MINUTE, 2).unwrap();
        tally.cast("v1", "Alice", None);

        let first = tally.close().unwrap();
        assert_eq!(
            tally.cast("v2", "Bob", None),
            CastOutcome::Rejected(RejectReason::NotOpen)
        );
        let second = tally.close().unwrap();
        assert_eq!(first, second);
        assert_eq!(tally.history().len(), 1);
    }

    #[tokio::test]
    async fn test_tie_is_explicit() {
        let tally = VoteTally::default();
        tally.open(["Alice", "Bob", "Cy"], MINUTE, 3).unwrap();
        tally.cast("v1", "Bob", None);
        tally.cast("v2", "Alice", None);

        let results = tally.close().unwrap();
        assert_eq!(
            results.outcome,
            TallyOutcome::Tie(vec!["Alice".to_string(), "Bob".to_string()])
        );
        assert_eq!(results.winner(), None);
    }

    #[tokio::test]
    async fn test_no_votes_outcome() {
        let tally = VoteTally::default();
        tally.open(["Alice"], MINUTE, 0).unwrap();
        let results = tally.close().unwrap();
        assert_eq!(results.outcome, TallyOutcome::NoVotes);
        assert_eq!(results.participation, 0.0);
    }

    #[tokio::test]
    async fn test_misuse_is_reported_not_panicking() {
        let tally = VoteTally::default();
        assert_eq!(tally.close(), Err(TallyError::NeverOpened));
        assert_eq!(
            tally.open(Vec::<String>::new(), MINUTE, 1),
            Err(TallyError::NoCandidates)
        );
        tally.open(["Alice"], MINUTE, 1).unwrap();
        assert_eq!(tally.open(["Bob"], MINUTE, 1), Err(TallyError::AlreadyOpen));
        assert_eq!(
            tally.cast("v1", "Zed", None),
            CastOutcome::Rejected(RejectReason::UnknownCandidate("Zed".to_string()))
        );
        assert_eq!(
            tally.cast("  ", "Alice", None),
            CastOutcome::Rejected(RejectReason::InvalidVoter)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_cast_after_deadline_is_expired() {
        let tally = VoteTally::default();
        tally.open(["Alice"], Duration::from_secs(5), 1).unwrap();
        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(tally.is_expired());
        assert_eq!(
            tally.cast("v1", "Alice", None),
            CastOutcome::Rejected(RejectReason::Expired)
        );
        assert!(!tally.close().unwrap().closed_early);
    }

    #[tokio::test]
    async fn test_justification_and_anonymity_policy() {
        let tally = VoteTally::new(TallyPolicy {
            require_justification: true,
            anonymous: true,
        });
        tally.open(["Alice"], MINUTE, 1).unwrap();
        assert_eq!(
            tally.cast("v1", "Alice", Some("   ")),
            CastOutcome::Rejected(RejectReason::JustificationRequired)
        );
        assert!(tally.cast("v1", "Alice", Some("clear rebuttals")).is_accepted());
        let results = tally.close().unwrap();
        assert_eq!(results.ballots[0].voter, "anonymous");
        assert_eq!(
            results.ballots[0].justification.as_deref(),
            Some("clear rebuttals")
        );
    }

    #[tokio::test]
    async fn test_update_and_history_across_sessions() {
        let tally = VoteTally::default();
        assert!(tally.update().is_none());

        tally.open(["Alice", "Bob"], MINUTE, 2).unwrap();
        tally.cast("v1", "Alice", None);
        let live = tally.update().unwrap();
        assert!(live.is_open);
        assert_eq!(live.total, 1);
        assert!(live.time_remaining_secs > 0.0);
        tally.close().unwrap();
        assert!(!tally.update().unwrap().is_open);

        // A closed session never reopens; a new one starts fresh.
        tally.open(["Alice", "Bob"], MINUTE, 2).unwrap();
        tally.cast("v1", "Bob", None);
        tally.cast("v2", "Bob", None);
        tally.close().unwrap();

        let perf = tally.candidate_performance("Alice");
        assert_eq!(perf.sessions, 2);
        assert_eq!(perf.wins, 1);
        assert_eq!(perf.total_votes, 1);
        assert_eq!(tally.candidate_performance("Bob").wins, 1);
    }
}
