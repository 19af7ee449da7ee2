//! Session moderator
//!
//! The moderator owns the session's phase machine and drives a discussion
//! from intro to finished:
//!
//! ```text
//! Intro ─▶ Opening ─▶ Discussion ─▶ Closing ─▶ Voting ─▶ Results ─▶ Finished
//!                                       └──────────────────▲ (voting disabled)
//! ```
//!
//! Opening and closing statements are structured turns with a deadline and
//! a bounded number of re-grants. Discussion is either round-robin
//! ([`DiscussionMode::Sequential`]) or free-for-all, where each agent's
//! [`TriggerEngine`](crate::trigger::TriggerEngine) decides when to speak
//! while the moderator watches for silence and announces time marks.
//!
//! Every phase change advances the shared [`PhaseEpoch`] in the same log
//! critical section that commits the phase entry, so no statement generated
//! for an earlier phase can land after it.

pub mod discussion;
pub mod handle;
pub mod phase;
pub mod turns;
pub mod voting;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::SeedableRng;
use thiserror::Error;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::{ConfigError, SessionConfig};
use crate::events::{spawn_entry_relay, EventBus, SessionEvent, SharedEventBus};
use crate::generation::{Purpose, RetryPolicy, TextGenerator};
use crate::message_log::{Entry, EntryDraft, MessageLog, SharedMessageLog};
use crate::summary::{ParticipantStats, SessionSummary};
use crate::tally::{
    SharedVoteTally, TallyError, TallyOutcome, TallyPolicy, TallyResults, VoteTally,
};
use crate::trigger::personality::{PersonalityTable, DEFAULT_BURNING_QUESTIONS};

pub use handle::{InboundError, InboundReply, InboundResult, SessionHandle};
pub use phase::{PhaseEpoch, PhaseTracker, PhaseTransition, SessionPhase, TransitionError};
pub use turns::{TurnOutcome, TurnPolicy, TurnReport};

/// Errors that stop a session from starting or advancing
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Phase error: {0}")]
    Transition(#[from] TransitionError),

    #[error(transparent)]
    Tally(#[from] TallyError),
}

/// Result type for session operations
pub type SessionResult<T> = Result<T, SessionError>;

pub struct Moderator {
    config: SessionConfig,
    log: SharedMessageLog,
    bus: SharedEventBus,
    tally: SharedVoteTally,
    generator: Arc<dyn TextGenerator>,
    personalities: PersonalityTable,
    burning: HashMap<String, Vec<String>>,
    tracker: PhaseTracker,
    retry: RetryPolicy,
    turn_policy: TurnPolicy,
    /// Roster order.
    stats: Vec<ParticipantStats>,
    silence_interventions: u32,
    rng: StdRng,
    finished: CancellationToken,
    close_voting: Arc<Notify>,
}

impl Moderator {
    pub fn new(config: SessionConfig, generator: Arc<dyn TextGenerator>) -> SessionResult<Self> {
        config.validate()?;

        let mut rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let personalities = PersonalityTable::builtin().with_overrides(&config.personalities);
        let burning = config
            .participants
            .iter()
            .filter(|p| p.is_agent())
            .map(|p| {
                let questions = if p.burning_questions.is_empty() {
                    personalities.sample_questions(&p.personality, DEFAULT_BURNING_QUESTIONS, &mut rng)
                } else {
                    p.burning_questions.clone()
                };
                (p.id.clone(), questions)
            })
            .collect();
        let stats = config
            .participants
            .iter()
            .map(|p| ParticipantStats::new(&p.id, p.role))
            .collect();

        let tally = VoteTally::new(TallyPolicy {
            require_justification: config.voting.require_justification,
            anonymous: config.voting.anonymous,
        });

        Ok(Self {
            log: MessageLog::with_limits(config.log.retention, config.log.subscriber_capacity).shared(),
            bus: EventBus::new().shared(),
            tally: tally.shared(),
            generator,
            personalities,
            burning,
            tracker: PhaseTracker::new(PhaseEpoch::new()),
            retry: config.generator.retry_policy(),
            turn_policy: TurnPolicy::from_config(&config.phases),
            stats,
            silence_interventions: 0,
            rng,
            finished: CancellationToken::new(),
            close_voting: Arc::new(Notify::new()),
            config,
        })
    }

    /// Handle for humans and listeners; valid for the whole session.
    pub fn handle(&self) -> SessionHandle {
        SessionHandle::new(
            &self.config,
            self.log.clone(),
            self.tally.clone(),
            self.bus.clone(),
            self.finished.clone(),
            self.close_voting.clone(),
        )
    }

    pub fn log(&self) -> SharedMessageLog {
        self.log.clone()
    }

    pub fn bus(&self) -> SharedEventBus {
        self.bus.clone()
    }

    pub fn tally(&self) -> SharedVoteTally {
        self.tally.clone()
    }

    pub fn epoch(&self) -> PhaseEpoch {
        self.tracker.epoch().clone()
    }

    pub fn phase(&self) -> SessionPhase {
        self.tracker.phase()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Run the session to completion.
    pub async fn run(mut self) -> SessionResult<SessionSummary> {
        let started_at = Utc::now();
        let relay_stop = CancellationToken::new();
        let relay = spawn_entry_relay(&self.log, self.bus.clone(), relay_stop.clone());
        info!(
            topic = %self.config.topic,
            mode = ?self.config.mode,
            participants = self.config.participants.len(),
            "Session starting"
        );

        self.intro().await;

        let statements = self.statement_budget();
        self.advance(SessionPhase::Opening, "intro elapsed", Some(statements))?;
        self.statement_round(Purpose::Opening, false).await;

        let discussion = self.config.phases.discussion();
        self.advance(SessionPhase::Discussion, "opening statements done", Some(discussion))?;
        self.discussion(discussion).await;

        self.advance(SessionPhase::Closing, "discussion time elapsed", Some(statements))?;
        self.statement_round(Purpose::Closing, true).await;

        let results = if self.config.voting.enabled {
            let duration = self.config.voting.duration();
            self.advance(SessionPhase::Voting, "closing statements done", Some(duration))?;
            self.voting(duration).await
        } else {
            None
        };

        let reason = if results.is_some() { "voting closed" } else { "voting disabled" };
        self.advance(SessionPhase::Results, reason, None)?;
        self.announce_results(results.as_ref());

        self.advance(SessionPhase::Finished, "results announced", None)?;
        relay_stop.cancel();
        match relay.await {
            Ok(forwarded) => info!(forwarded, "Entry relay drained"),
            Err(e) => warn!(error = %e, "Entry relay task failed"),
        }

        let summary = self.summarize(started_at, results);
        self.bus.publish(SessionEvent::SessionFinished {
            summary: summary.summary_line(),
            timestamp: summary.finished_at,
        });
        self.finished.cancel();
        info!(result = %summary.summary_line(), "Session finished");
        Ok(summary)
    }

    async fn intro(&self) {
        let intro = self.config.phases.intro();
        self.system(format!("Phase: {}", SessionPhase::Intro));
        self.bus.publish(SessionEvent::PhaseChanged {
            phase: SessionPhase::Intro,
            time_remaining_secs: Some(intro.as_secs_f64()),
            timestamp: Utc::now(),
        });

        let speakers: Vec<&str> = self.config.speakers().map(|p| p.id.as_str()).collect();
        let welcome = format!(
            "Welcome. Today's topic: \"{}\". Taking part: {}. Each speaker gets an opening \
             statement, then open discussion, then closing statements{}.",
            self.config.topic,
            speakers.join(", "),
            if self.config.voting.enabled { " and a vote" } else { "" }
        );
        self.announce(welcome);
        tokio::time::sleep(intro).await;
    }

    /// Move to `to`, bumping the epoch atomically with the phase entry.
    fn advance(&mut self, to: SessionPhase, reason: &str, budget: Option<Duration>) -> SessionResult<()> {
        self.tracker.check(to)?;
        let epoch = self.tracker.epoch().clone();
        let mut entered = epoch.current();
        self.log.append_if(
            EntryDraft::system(self.config.moderator_name.clone(), format!("Phase: {to}"))
                .with_meta("phase", to.to_string()),
            || {
                entered = epoch.advance();
                true
            },
        );
        let transition = self.tracker.record(to, entered, reason)?;
        info!(from = %transition.from, to = %to, epoch = entered, reason, "Phase changed");
        self.bus.publish(SessionEvent::PhaseChanged {
            phase: to,
            time_remaining_secs: budget.map(|d| d.as_secs_f64()),
            timestamp: transition.timestamp,
        });
        Ok(())
    }

    /// Opening and closing rounds: one turn per speaker.
    fn statement_budget(&self) -> Duration {
        let speakers = self.config.speakers().count() as u32;
        self.config.phases.turn() * speakers
    }

    fn announce(&self, body: impl Into<String>) -> Entry {
        self.log
            .append(EntryDraft::moderator(self.config.moderator_name.clone(), body))
    }

    fn system(&self, body: impl Into<String>) -> Entry {
        self.log
            .append(EntryDraft::system(self.config.moderator_name.clone(), body))
    }

    fn stats_mut(&mut self, id: &str) -> Option<&mut ParticipantStats> {
        self.stats.iter_mut().find(|s| s.id == id)
    }

    fn announce_results(&self, results: Option<&TallyResults>) {
        let Some(results) = results else {
            self.announce("Voting was disabled for this session. Thank you all for taking part.");
            return;
        };
        let standings = results
            .ranking()
            .into_iter()
            .map(|(candidate, votes)| format!("{candidate} {votes}"))
            .collect::<Vec<_>>()
            .join(", ");
        let headline = match &results.outcome {
            TallyOutcome::Winner(w) => format!("{w} wins the audience vote"),
            TallyOutcome::Tie(set) => format!("It's a tie between {}", set.join(" and ")),
            TallyOutcome::NoVotes => "No votes were cast".to_string(),
        };
        self.announce(format!("Results: {headline}. Standings: {standings}."));
        self.announce(format!(
            "Participation: {} of {} eligible voters ({:.0}%).",
            results.total_votes,
            results.eligible_voters,
            results.participation * 100.0
        ));
    }

    fn summarize(&mut self, started_at: DateTime<Utc>, tally: Option<TallyResults>) -> SessionSummary {
        let log_stats = self.log.stats();
        for stats in &mut self.stats {
            stats.statements = log_stats.by_sender.get(&stats.id).copied().unwrap_or(0);
        }
        let (outcome, counts, total_votes, eligible_voters, participation) = match &tally {
            Some(r) => (
                Some(r.outcome.clone()),
                r.counts.clone(),
                r.total_votes,
                r.eligible_voters,
                r.participation,
            ),
            None => (None, Default::default(), 0, 0, 0.0),
        };
        SessionSummary {
            topic: self.config.topic.clone(),
            mode: self.config.mode,
            started_at,
            finished_at: Utc::now(),
            outcome,
            counts,
            total_votes,
            eligible_voters,
            participation,
            tally,
            participants: self.stats.clone(),
            phases: self.tracker.transitions().to_vec(),
            silence_interventions: self.silence_interventions,
            log_stats,
            entries: self.log.snapshot(),
        }
    }
}
