//! The discussion phase, in either mode.

use std::time::Duration;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use tokio::task::JoinSet;
use tokio::time::{sleep_until, timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::Moderator;
use crate::config::{DiscussionMode, ParticipantConfig, Stance};
use crate::generation::{generate_with_retry, truncate_on_word, GenerationRequest, Purpose};
use crate::message_log::{Entry, NameMatcher};
use crate::trigger::{AgentReport, BehavioralState, EngineContext, InterruptionLimiter, TriggerEngine};

const SILENCE_PROMPTS: &[&str] = &[
    "{name}, we haven't heard from you in a while. Where do you stand?",
    "Let's keep this moving. {name}, what's your take on the last point?",
    "Any reactions? {name}, do you agree with what's been said so far?",
    "{name}, is there anything you'd push back on here?",
];

impl Moderator {
    pub(super) async fn discussion(&mut self, budget: Duration) {
        let deadline = Instant::now() + budget;
        match self.config.mode {
            DiscussionMode::Sequential => self.sequential_discussion(deadline).await,
            DiscussionMode::Autonomous => self.autonomous_discussion(deadline).await,
        }
    }

    /// Round-robin structured turns until the phase deadline.
    async fn sequential_discussion(&mut self, deadline: Instant) {
        let speakers: Vec<ParticipantConfig> = self.config.speakers().cloned().collect();
        let gap = self.config.phases.turn_gap();
        let mut turn = 0usize;
        if speakers.is_empty() {
            sleep_until(deadline).await;
            return;
        }

        while Instant::now() + gap < deadline {
            let speaker = &speakers[turn % speakers.len()];
            let report = self
                .structured_turn(speaker, Purpose::Response, Some(deadline))
                .await;
            self.record_turn(&speaker.id, &report);
            turn += 1;
            sleep_until((Instant::now() + gap).min(deadline)).await;
        }
        info!(turns = turn, "Sequential discussion finished");
    }

    /// Release one trigger engine per agent, then watch for silence and
    /// announce time marks until the deadline.
    async fn autonomous_discussion(&mut self, deadline: Instant) {
        let tuning = self.config.autonomous.clone();
        let limiter =
            InterruptionLimiter::new(tuning.max_interruptions, tuning.interruption_window()).shared();
        let engines_stop = CancellationToken::new();
        let epoch = self.tracker.epoch().clone();

        let agents: Vec<ParticipantConfig> = self.config.agents().cloned().collect();
        let mut engines = JoinSet::new();
        for (i, agent) in agents.iter().enumerate() {
            let ctx = EngineContext {
                topic: self.config.topic.clone(),
                moderator_name: self.config.moderator_name.clone(),
                participant: agent.clone(),
                personality: self.personalities.resolve(&agent.personality).clone(),
                burning_questions: self.burning.get(&agent.id).cloned().unwrap_or_default(),
                tuning: tuning.clone(),
                retry: self.retry.clone(),
                max_message_chars: self.config.max_message_chars,
            };
            let rng = match self.config.seed {
                Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(i as u64 + 1)),
                None => StdRng::from_rng(&mut self.rng).unwrap_or_else(|_| StdRng::from_entropy()),
            };
            let engine = TriggerEngine::new(
                ctx,
                self.log.clone(),
                self.generator.clone(),
                limiter.clone(),
                epoch.clone(),
                rng,
            );
            engines.spawn(engine.run(engines_stop.child_token()));
        }
        info!(agents = agents.len(), "Trigger engines released");

        self.watch_discussion(deadline).await;

        engines_stop.cancel();
        while let Some(joined) = engines.join_next().await {
            match joined {
                Ok(state) => self.absorb(state),
                Err(e) => warn!(error = %e, "Trigger engine task failed"),
            }
        }
    }

    async fn watch_discussion(&mut self, deadline: Instant) {
        let silence = self.config.autonomous.silence_timeout();
        let mut marks: Vec<Duration> = self
            .config
            .autonomous
            .time_marks_secs
            .iter()
            .map(|s| Duration::from_secs(*s))
            .filter(|m| Instant::now() + *m < deadline)
            .collect();
        marks.sort_by(|a, b| b.cmp(a));
        marks.dedup();
        let mut marks = marks.into_iter().peekable();

        let mut sub = self.log.subscribe("moderator-watch");
        let mut last_activity = Instant::now();
        let far = deadline + Duration::from_secs(1);

        loop {
            let next_mark = marks.peek().map(|m| deadline - *m);
            tokio::select! {
                biased;
                _ = sleep_until(deadline) => break,
                entry = sub.recv() => match entry {
                    Some(_) => last_activity = Instant::now(),
                    None => break,
                },
                _ = sleep_until(next_mark.unwrap_or(far)), if next_mark.is_some() => {
                    if let Some(mark) = marks.next() {
                        self.announce(format!("{} remaining in the discussion.", format_remaining(mark)));
                    }
                }
                _ = sleep_until(last_activity + silence) => {
                    self.break_silence(deadline).await;
                    last_activity = Instant::now();
                }
            }
        }
        debug!(interventions = self.silence_interventions, "Discussion watch ended");
    }

    /// Prompt one speaker by name. The prompt is generated when the
    /// generator answers before `deadline`, otherwise a canned line is used.
    async fn break_silence(&mut self, deadline: Instant) {
        let speakers: Vec<ParticipantConfig> = self.config.speakers().cloned().collect();
        let Some(target) = speakers.choose(&mut self.rng).cloned() else {
            return;
        };
        let canned = SILENCE_PROMPTS[self.rng.gen_range(0..SILENCE_PROMPTS.len())]
            .replace("{name}", &target.id);

        let request = self.silence_request(&target);
        let generated = timeout_at(
            deadline,
            generate_with_retry(self.generator.as_ref(), &request, &self.retry),
        )
        .await;
        let prompt = match generated {
            Ok(Ok(text)) => {
                let (text, _) = truncate_on_word(&text, self.config.max_message_chars);
                if NameMatcher::new(&target.id).is_match(&text) {
                    text
                } else {
                    format!("{}, {}", target.id, text)
                }
            }
            Ok(Err(e)) => {
                debug!(error = %e, "Silence prompt generation failed, using a canned prompt");
                canned
            }
            Err(_) => canned,
        };

        self.announce(prompt);
        self.silence_interventions += 1;
        info!(target_speaker = %target.id, count = self.silence_interventions, "Silence intervention");
    }

    fn silence_request(&self, target: &ParticipantConfig) -> GenerationRequest {
        GenerationRequest {
            speaker: self.config.moderator_name.clone(),
            topic: self.config.topic.clone(),
            stance: Stance::Neutral,
            personality: "facilitator".to_string(),
            burning_questions: Vec::new(),
            context: self
                .log
                .recent(self.config.autonomous.context_window)
                .iter()
                .map(Entry::render_line)
                .collect(),
            purpose: Purpose::SilenceBreak,
            max_tokens: target.max_tokens,
            temperature: target.temperature,
        }
    }

    fn absorb(&mut self, state: BehavioralState) {
        let report = AgentReport::from(&state);
        let Some(stats) = self.stats_mut(&state.agent_id) else {
            return;
        };
        stats.generation_failures += report.counters.generation_failures as u32;
        stats.fallback_statements += report.counters.fallbacks as u32;
        stats.autonomous = Some(report);
    }
}

fn format_remaining(remaining: Duration) -> String {
    let secs = remaining.as_secs();
    match (secs / 60, secs % 60) {
        (0, s) => format!("{s} seconds"),
        (1, 0) => "1 minute".to_string(),
        (m, 0) => format!("{m} minutes"),
        (m, s) => format!("{m}m {s}s"),
    }
}
