//! End-to-end sessions with scripted generators (no LLM calls), run on a
//! paused clock.
//!
//! Covers: phase order, structured turns, silence watch, autonomous engines
//! and voting through the session handle.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use coordination::config::{DiscussionMode, ParticipantConfig, SessionConfig, Stance};
use coordination::events::SessionEvent;
use coordination::generation::{
    GenerationError, GenerationRequest, GenerationResult, Purpose, TextGenerator,
};
use coordination::message_log::{Entry, EntryKind};
use coordination::moderator::{Moderator, SessionPhase};
use coordination::tally::TallyOutcome;

/// Answers instantly, naming speaker and purpose.
struct Scripted {
    calls: AtomicU32,
}

impl Scripted {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicU32::new(0),
        })
    }
}

#[async_trait]
impl TextGenerator for Scripted {
    async fn generate(&self, request: &GenerationRequest) -> GenerationResult<String> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(format!(
            "{} ({}, {}) point #{n} on {}.",
            request.speaker, request.stance, request.purpose, request.topic
        ))
    }
}

/// Fails for participants; only the moderator's silence prompt gets text.
struct QuietRoom;

#[async_trait]
impl TextGenerator for QuietRoom {
    async fn generate(&self, request: &GenerationRequest) -> GenerationResult<String> {
        match request.purpose {
            Purpose::SilenceBreak => Ok("does anyone want to defend the commute?".to_string()),
            _ => Err(GenerationError::Timeout(std::time::Duration::from_secs(5))),
        }
    }
}

/// Never produces anything.
struct Down;

#[async_trait]
impl TextGenerator for Down {
    async fn generate(&self, _request: &GenerationRequest) -> GenerationResult<String> {
        Err(GenerationError::RequestFailed("connection refused".to_string()))
    }
}

fn base_config(mode: DiscussionMode) -> SessionConfig {
    let mut config = SessionConfig::new(
        "Remote work is better than the office",
        vec![
            ParticipantConfig::agent("ada", Stance::Pro, "analytical"),
            ParticipantConfig::agent("bob", Stance::Con, "passionate"),
        ],
    );
    config.mode = mode;
    config.seed = Some(11);
    config.phases.intro_secs = 1.0;
    config.phases.turn_secs = 5.0;
    config.phases.warning_lead_secs = 2.0;
    config.phases.discussion_secs = 20.0;
    config.autonomous.tick_ms = 500;
    config.autonomous.time_marks_secs = vec![10];
    config.voting.duration_secs = 10.0;
    config.voting.update_interval_secs = 2.0;
    config.voting.audience_size = 3;
    config.generator.max_attempts = 1;
    config.generator.backoff_ms = 0;
    config
}

/// Index of the `Phase: <phase>` system entry.
fn phase_index(entries: &[Entry], phase: SessionPhase) -> usize {
    let marker = format!("Phase: {phase}");
    entries
        .iter()
        .position(|e| e.kind == EntryKind::System && e.body == marker)
        .unwrap_or_else(|| panic!("no entry for phase {phase}"))
}

fn statements_with_purpose<'a>(entries: &'a [Entry], purpose: Purpose) -> Vec<&'a Entry> {
    let purpose = purpose.to_string();
    entries
        .iter()
        .filter(|e| e.is_statement() && e.meta_str("purpose") == Some(purpose.as_str()))
        .collect()
}

// ── Sequential session with voting ──────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_sequential_session_runs_every_phase() {
    let moderator = Moderator::new(base_config(DiscussionMode::Sequential), Scripted::new()).unwrap();
    let handle = moderator.handle();
    let mut events = moderator.bus().subscribe();

    let audience = tokio::spawn(async move {
        let mut voted = false;
        let mut phases = Vec::new();
        loop {
            match events.recv().await {
                Ok(SessionEvent::PhaseChanged {
                    phase,
                    time_remaining_secs,
                    ..
                }) => phases.push((phase, time_remaining_secs)),
                Ok(SessionEvent::TallyUpdated { is_open: true, .. }) if !voted => {
                    voted = true;
                    assert!(handle.cast_vote("v1", "ada", Some("clear data")).is_accepted());
                    assert!(handle.cast_vote("v2", "bob", None).is_accepted());
                    assert!(handle.cast_vote("v3", "ada", None).is_accepted());
                    assert!(!handle.cast_vote("v4", "carol", None).is_accepted());
                    assert!(handle.close_voting_early().is_some());
                }
                Ok(SessionEvent::SessionFinished { .. }) => break,
                Ok(_) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {}
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
        phases
    });

    let summary = moderator.run().await.unwrap();
    let phases = audience.await.unwrap();

    // Opening and closing budgets are one turn per speaker.
    let budgets: Vec<Option<f64>> = phases.iter().map(|(_, budget)| *budget).collect();
    assert_eq!(budgets[1], Some(10.0));
    assert_eq!(budgets[2], Some(20.0));
    assert_eq!(budgets[3], Some(10.0));
    assert_eq!(budgets[4], Some(10.0));

    let phases: Vec<SessionPhase> = phases.into_iter().map(|(phase, _)| phase).collect();
    assert_eq!(
        phases,
        vec![
            SessionPhase::Intro,
            SessionPhase::Opening,
            SessionPhase::Discussion,
            SessionPhase::Closing,
            SessionPhase::Voting,
            SessionPhase::Results,
            SessionPhase::Finished,
        ]
    );
    assert_eq!(summary.phases.len(), 6);
    assert_eq!(summary.outcome, Some(TallyOutcome::Winner("ada".to_string())));
    assert_eq!(summary.counts.get("ada"), Some(&2));
    assert_eq!(summary.eligible_voters, 5);
    assert!((summary.participation - 0.6).abs() < 1e-9);
    assert!(summary.tally.as_ref().unwrap().closed_early);

    // Sequence numbers are gap-free.
    for (i, entry) in summary.entries.iter().enumerate() {
        assert_eq!(entry.sequence, i as u64 + 1);
    }

    // Openings in roster order, closings reversed.
    let openings: Vec<&str> = statements_with_purpose(&summary.entries, Purpose::Opening)
        .iter()
        .map(|e| e.author.as_str())
        .collect();
    assert_eq!(openings, vec!["ada", "bob"]);
    let closings: Vec<&str> = statements_with_purpose(&summary.entries, Purpose::Closing)
        .iter()
        .map(|e| e.author.as_str())
        .collect();
    assert_eq!(closings, vec!["bob", "ada"]);

    // Round-robin responses stay inside the discussion phase.
    let start = phase_index(&summary.entries, SessionPhase::Discussion);
    let end = phase_index(&summary.entries, SessionPhase::Closing);
    let responses = statements_with_purpose(&summary.entries, Purpose::Response);
    assert!(responses.len() >= 4);
    for pair in responses.windows(2) {
        assert_ne!(pair[0].author, pair[1].author);
    }
    for entry in &responses {
        let idx = (entry.sequence - 1) as usize;
        assert!(idx > start && idx < end);
    }

    let ada = summary.participant("ada").unwrap();
    assert!(ada.turns_taken >= 4);
    assert_eq!(ada.forced_passes, 0);
    assert!(summary.summary_line().starts_with("Winner: ada"));
    assert!(summary.log_stats.agent_statements >= 8);
}

// ── Autonomous discussion ───────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_autonomous_session_keeps_statements_in_phase() {
    let mut config = base_config(DiscussionMode::Autonomous);
    config.voting.enabled = false;
    config.phases.discussion_secs = 60.0;
    let moderator = Moderator::new(config, Scripted::new()).unwrap();
    let handle = moderator.handle();

    let summary = moderator.run().await.unwrap();
    assert!(handle.is_finished());
    assert!(handle.post("carol", "too late").is_err());

    assert_eq!(summary.outcome, None);
    assert!(summary.summary_line().contains("voting disabled"));
    let phases: Vec<SessionPhase> = summary.phases.iter().map(|t| t.to).collect();
    assert!(!phases.contains(&SessionPhase::Voting));

    let start = phase_index(&summary.entries, SessionPhase::Discussion);
    let end = phase_index(&summary.entries, SessionPhase::Closing);
    let autonomous = statements_with_purpose(&summary.entries, Purpose::Autonomous);
    assert!(!autonomous.is_empty());
    for entry in &autonomous {
        let idx = (entry.sequence - 1) as usize;
        assert!(idx > start && idx < end, "statement #{} outside discussion", entry.sequence);
    }

    // The time mark was announced once.
    let marks = summary.entries[start..end]
        .iter()
        .filter(|e| e.body.contains("remaining in the discussion"))
        .count();
    assert_eq!(marks, 1);

    for id in ["ada", "bob"] {
        let report = summary.participant(id).unwrap().autonomous.as_ref().unwrap();
        assert!(report.counters.ticks > 0);
        assert_eq!(
            report.counters.statements,
            autonomous.iter().filter(|e| e.author == id).count() as u64
        );
    }
}

// ── Silence watch ───────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_one_silence_intervention_per_timeout() {
    let mut config = base_config(DiscussionMode::Autonomous);
    config.participants = vec![
        ParticipantConfig::agent("ada", Stance::Pro, "analytical"),
        ParticipantConfig::human("carol"),
    ];
    config.voting.enabled = false;
    config.phases.turn_secs = 2.0;
    config.phases.warning_lead_secs = 0.0;
    config.phases.max_misses = 1;
    config.phases.discussion_secs = 9.0;
    config.autonomous.silence_timeout_secs = 8.0;
    config.autonomous.fallback_on_failure = false;
    config.autonomous.time_marks_secs = vec![];

    let summary = Moderator::new(config, Arc::new(Down)).unwrap().run().await.unwrap();

    assert_eq!(summary.silence_interventions, 1);
    let start = phase_index(&summary.entries, SessionPhase::Discussion);
    let end = phase_index(&summary.entries, SessionPhase::Closing);
    let during: Vec<&Entry> = summary.entries[start + 1..end].iter().collect();
    assert_eq!(during.len(), 1);
    assert_eq!(during[0].kind, EntryKind::Moderator);

    // Failures were skips, never crashes.
    let ada = summary.participant("ada").unwrap();
    assert_eq!(ada.skips, 2);
    assert_eq!(ada.turns_taken, 0);
    let carol = summary.participant("carol").unwrap();
    assert_eq!(carol.forced_passes, 2);
}

#[tokio::test(start_paused = true)]
async fn test_time_mark_counts_as_activity() {
    let mut config = base_config(DiscussionMode::Autonomous);
    config.participants = vec![
        ParticipantConfig::agent("ada", Stance::Pro, "analytical"),
        ParticipantConfig::human("carol"),
    ];
    config.voting.enabled = false;
    config.phases.turn_secs = 2.0;
    config.phases.warning_lead_secs = 0.0;
    config.phases.max_misses = 1;
    config.phases.discussion_secs = 12.0;
    config.autonomous.silence_timeout_secs = 8.0;
    config.autonomous.fallback_on_failure = false;
    config.autonomous.time_marks_secs = vec![6];

    let summary = Moderator::new(config, Arc::new(Down)).unwrap().run().await.unwrap();

    // The mark at t=6 restarts the silence window, which would end after
    // the phase does.
    assert_eq!(summary.silence_interventions, 0);
    let start = phase_index(&summary.entries, SessionPhase::Discussion);
    let end = phase_index(&summary.entries, SessionPhase::Closing);
    let during: Vec<&str> = summary.entries[start + 1..end]
        .iter()
        .map(|e| e.body.as_str())
        .collect();
    assert_eq!(during, vec!["6 seconds remaining in the discussion."]);
}

#[tokio::test(start_paused = true)]
async fn test_silence_prompt_is_generated_when_possible() {
    let mut config = base_config(DiscussionMode::Autonomous);
    config.participants = vec![
        ParticipantConfig::agent("ada", Stance::Pro, "analytical"),
        ParticipantConfig::human("carol"),
    ];
    config.voting.enabled = false;
    config.phases.turn_secs = 2.0;
    config.phases.warning_lead_secs = 0.0;
    config.phases.max_misses = 1;
    config.phases.discussion_secs = 9.0;
    config.autonomous.silence_timeout_secs = 8.0;
    config.autonomous.fallback_on_failure = false;
    config.autonomous.time_marks_secs = vec![];

    let summary = Moderator::new(config, Arc::new(QuietRoom)).unwrap().run().await.unwrap();

    assert_eq!(summary.silence_interventions, 1);
    let start = phase_index(&summary.entries, SessionPhase::Discussion);
    let end = phase_index(&summary.entries, SessionPhase::Closing);
    let during = &summary.entries[start + 1..end];
    assert_eq!(during.len(), 1);
    assert_eq!(during[0].kind, EntryKind::Moderator);
    // Addressed to a speaker by name.
    let body = during[0].body.as_str();
    assert!(body.starts_with("ada, ") || body.starts_with("carol, "), "{body}");
    assert!(body.ends_with("does anyone want to defend the commute?"));
}

// ── Human participant ───────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_human_takes_structured_turns() {
    let mut config = base_config(DiscussionMode::Sequential);
    config.participants.push(ParticipantConfig::human("carol"));
    config.voting.enabled = false;
    config.phases.discussion_secs = 5.0;
    let moderator = Moderator::new(config, Scripted::new()).unwrap();
    let handle = moderator.handle();
    let mut feed = moderator.log().subscribe("carol-client");

    let carol = tokio::spawn(async move {
        let mut spoken = 0;
        while let Some(entry) = feed.recv().await {
            if entry.kind == EntryKind::Moderator && entry.body.starts_with("carol, the floor is yours") {
                handle.post("carol", &format!("Carol's turn {spoken}")).unwrap();
                spoken += 1;
            }
            if handle.is_finished() || spoken == 2 {
                break;
            }
        }
        spoken
    });

    let summary = moderator.run().await.unwrap();
    assert_eq!(carol.await.unwrap(), 2);

    let stats = summary.participant("carol").unwrap();
    assert_eq!(stats.turns_taken, 2);
    assert_eq!(stats.statements, 2);
    assert_eq!(summary.log_stats.human_statements, 2);
}

// ── Phase budgets ───────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_sequential_discussion_stays_within_budget() {
    let mut config = base_config(DiscussionMode::Sequential);
    config.participants.push(ParticipantConfig::human("carol"));
    config.voting.enabled = false;
    config.phases.max_misses = 1;
    config.phases.discussion_secs = 6.0;
    let moderator = Moderator::new(config, Scripted::new()).unwrap();
    let mut events = moderator.bus().subscribe();

    // carol never speaks, so her discussion turn runs into the deadline.
    let clock = tokio::spawn(async move {
        let (mut started, mut ended) = (None, None);
        while let Ok(event) = events.recv().await {
            match event {
                SessionEvent::PhaseChanged {
                    phase: SessionPhase::Discussion,
                    ..
                } => started = Some(tokio::time::Instant::now()),
                SessionEvent::PhaseChanged {
                    phase: SessionPhase::Closing,
                    ..
                } => ended = Some(tokio::time::Instant::now()),
                SessionEvent::SessionFinished { .. } => break,
                _ => {}
            }
        }
        ended.unwrap() - started.unwrap()
    });

    let summary = moderator.run().await.unwrap();
    let discussion = clock.await.unwrap();

    assert!(discussion <= std::time::Duration::from_secs(6), "{discussion:?}");
    assert!(summary.participant("carol").unwrap().forced_passes >= 1);
}
