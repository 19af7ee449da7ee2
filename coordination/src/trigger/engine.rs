//! The per-agent decision loop.
//!
//! Each tick the engine reads the log suffix it has not seen, decays its
//! energy, and decides `Act`, `Pass` or `Suppressed`. Acting claims an
//! interruption slot, generates text under the retry policy and commits it
//! with a guarded append: if the phase moved on while the generator was
//! thinking, the text is discarded instead of landing in the wrong phase.

use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::Rng;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::limiter::SharedLimiter;
use super::personality::{fallback_line, PersonalityProfile};
use super::signals::{keywords, SignalDetector, Signals};
use super::state::BehavioralState;
use crate::config::{AutonomousTuning, ParticipantConfig};
use crate::generation::{
    generate_with_retry, truncate_on_word, GenerationRequest, Purpose, RetryPolicy, TextGenerator,
};
use crate::message_log::{Entry, EntryDraft, LogQuery, NameMatcher, SharedMessageLog, ROLE_KEY};
use crate::moderator::phase::PhaseEpoch;

/// Outcome of the decision step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TriggerDecision {
    Act { probability: f64 },
    Pass { probability: f64 },
    /// Inside the cooldown window; probability was not consulted.
    Suppressed { remaining: Duration },
}

impl TriggerDecision {
    pub fn is_act(&self) -> bool {
        matches!(self, Self::Act { .. })
    }
}

/// What one tick ended up doing.
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    Suppressed,
    Passed,
    /// Wanted to act but the interruption cap was full.
    Throttled,
    Spoke(Entry),
    /// Generation failed and no fallback was posted.
    Failed,
    /// Text arrived after the phase ended or the engine was cancelled.
    Discarded,
}

/// Everything an engine needs to know about its agent and the session.
#[derive(Debug, Clone)]
pub struct EngineContext {
    pub topic: String,
    pub moderator_name: String,
    pub participant: ParticipantConfig,
    pub personality: PersonalityProfile,
    pub burning_questions: Vec<String>,
    pub tuning: AutonomousTuning,
    pub retry: RetryPolicy,
    pub max_message_chars: usize,
}

/// Probability of acting, from the modifier table.
pub fn act_probability(
    tuning: &AutonomousTuning,
    profile: &PersonalityProfile,
    signals: &Signals,
    state: &BehavioralState,
) -> f64 {
    let mut p = tuning.base_probability;
    if signals.burning_question {
        p += tuning.burning_question_bonus;
    }
    p += tuning.mention_bonus * signals.mention_recency;
    p += tuning.rivalry_bonus * signals.rival_score;
    if signals.underdog {
        p += tuning.underdog_bonus;
    }
    p += tuning.energy_weight * state.energy;
    p += tuning.frustration_weight * state.frustration;
    p += profile.additive(signals);

    p *= profile.multiplier(signals);
    if signals.dominant {
        p *= tuning.dominance_penalty;
    }

    if p.is_nan() {
        return 0.0;
    }
    p.clamp(0.0, tuning.max_probability)
}

pub struct TriggerEngine {
    ctx: EngineContext,
    detector: SignalDetector,
    state: BehavioralState,
    log: SharedMessageLog,
    generator: Arc<dyn TextGenerator>,
    limiter: SharedLimiter,
    epoch: PhaseEpoch,
    /// Phase the engine was released in; appends are valid only while it
    /// is still current.
    released_in: u64,
    rng: StdRng,
}

impl TriggerEngine {
    pub fn new(
        ctx: EngineContext,
        log: SharedMessageLog,
        generator: Arc<dyn TextGenerator>,
        limiter: SharedLimiter,
        epoch: PhaseEpoch,
        rng: StdRng,
    ) -> Self {
        let detector = SignalDetector {
            agent_id: ctx.participant.id.clone(),
            name: NameMatcher::new(&ctx.participant.id),
            stance: ctx.participant.stance(),
            expertise: ctx.personality.expertise.clone(),
            burning_keywords: keywords(&ctx.burning_questions),
            recent_window: ctx.tuning.recent_window,
            underdog_after: ctx.tuning.underdog_after(),
            dominance_threshold: ctx.tuning.dominance_threshold,
        };
        let state = BehavioralState::new(
            &ctx.participant.id,
            ctx.participant.rivals.iter().cloned(),
            Instant::now(),
        );
        let released_in = epoch.current();
        Self {
            ctx,
            detector,
            state,
            log,
            generator,
            limiter,
            epoch,
            released_in,
            rng,
        }
    }

    pub fn agent_id(&self) -> &str {
        &self.ctx.participant.id
    }

    pub fn state(&self) -> &BehavioralState {
        &self.state
    }

    /// Fold the unseen log suffix into the behavioral state.
    pub fn observe(&mut self) -> usize {
        let suffix = self.log.query(&LogQuery::new().since(self.state.last_seen));
        for entry in &suffix {
            self.state.observe(entry);
        }
        suffix.len()
    }

    /// The decision step. Consumes one random draw unless suppressed.
    pub fn decide(&mut self, now: Instant, recent: &[Entry]) -> TriggerDecision {
        if self.state.in_cooldown(now) {
            self.state.record_suppressed(self.ctx.tuning.frustration_step);
            return TriggerDecision::Suppressed {
                remaining: self.state.cooldown_remaining(now),
            };
        }

        let signals = self
            .detector
            .detect(recent, &self.state.rivalry, self.state.silent_for(now));
        let probability =
            act_probability(&self.ctx.tuning, &self.ctx.personality, &signals, &self.state);
        let roll: f64 = self.rng.gen();

        if roll < probability {
            self.state.counters.acts += 1;
            TriggerDecision::Act { probability }
        } else {
            self.state.counters.passes += 1;
            TriggerDecision::Pass { probability }
        }
    }

    /// One full tick: observe, decay, decide and maybe speak.
    pub async fn tick(&mut self, cancel: &CancellationToken) -> TickOutcome {
        let now = Instant::now();
        self.state.counters.ticks += 1;
        self.observe();
        self.state.decay_energy(now, self.ctx.tuning.energy_decay_per_sec);

        let window = self.ctx.tuning.context_window.max(self.ctx.tuning.recent_window);
        let recent = self.log.recent(window);

        match self.decide(now, &recent) {
            TriggerDecision::Suppressed { remaining } => {
                debug!(
                    agent = %self.agent_id(),
                    remaining_ms = remaining.as_millis() as u64,
                    frustration = self.state.frustration,
                    "Suppressed by cooldown"
                );
                TickOutcome::Suppressed
            }
            TriggerDecision::Pass { .. } => TickOutcome::Passed,
            TriggerDecision::Act { probability } => {
                if !self.limiter.try_acquire(now) {
                    self.state.counters.throttled += 1;
                    debug!(agent = %self.agent_id(), "Interruption cap full, standing down");
                    return TickOutcome::Throttled;
                }
                debug!(agent = %self.agent_id(), probability, "Deciding to speak");
                self.speak(cancel, &recent).await
            }
        }
    }

    fn request(&self, recent: &[Entry]) -> GenerationRequest {
        let skip = recent.len().saturating_sub(self.ctx.tuning.context_window);
        let p = &self.ctx.participant;
        GenerationRequest {
            speaker: p.id.clone(),
            topic: self.ctx.topic.clone(),
            stance: p.stance(),
            personality: p.personality.clone(),
            burning_questions: self.ctx.burning_questions.clone(),
            context: recent[skip..].iter().map(Entry::render_line).collect(),
            purpose: Purpose::Autonomous,
            max_tokens: p.max_tokens,
            temperature: p.temperature,
        }
    }

    async fn speak(&mut self, cancel: &CancellationToken, recent: &[Entry]) -> TickOutcome {
        let request = self.request(recent);
        let generated = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                self.state.counters.discarded += 1;
                return TickOutcome::Discarded;
            }
            result = generate_with_retry(self.generator.as_ref(), &request, &self.ctx.retry) => result,
        };

        let (text, fallback) = match generated {
            Ok(text) => (text, false),
            Err(e) => {
                self.state.counters.generation_failures += 1;
                warn!(agent = %self.agent_id(), error = %e, "Generation failed");
                if !self.ctx.tuning.fallback_on_failure {
                    return TickOutcome::Failed;
                }
                (fallback_line(&self.ctx.topic, &mut self.rng), true)
            }
        };

        let (body, truncated) = truncate_on_word(&text, self.ctx.max_message_chars);
        let mut draft = EntryDraft::statement(self.agent_id(), body)
            .with_meta(ROLE_KEY, "agent")
            .with_meta("purpose", Purpose::Autonomous.to_string())
            .with_meta("epoch", self.released_in);
        if fallback {
            draft = draft.with_meta("fallback", true);
        }

        let epoch = self.epoch.clone();
        let released_in = self.released_in;
        let Some(entry) = self
            .log
            .append_if(draft, || epoch.is_current(released_in) && !cancel.is_cancelled())
        else {
            self.state.counters.discarded += 1;
            debug!(agent = %self.agent_id(), "Phase moved on, statement discarded");
            return TickOutcome::Discarded;
        };

        let now = Instant::now();
        let cooldown = self.draw_cooldown();
        self.state.record_statement(now, cooldown, self.ctx.tuning.energy_gain);
        if fallback {
            self.state.counters.fallbacks += 1;
        }
        info!(
            agent = %self.agent_id(),
            sequence = entry.sequence,
            cooldown_ms = cooldown.as_millis() as u64,
            energy = self.state.energy,
            fallback,
            "Autonomous statement committed"
        );

        if truncated {
            let note = EntryDraft::moderator(
                self.ctx.moderator_name.clone(),
                format!(
                    "{}'s message was trimmed to {} characters.",
                    self.agent_id(),
                    self.ctx.max_message_chars
                ),
            );
            self.log.append_if(note, || epoch.is_current(released_in));
        }
        TickOutcome::Spoke(entry)
    }

    fn draw_cooldown(&mut self) -> Duration {
        let min = self.ctx.tuning.min_cooldown_secs;
        let max = self.ctx.tuning.max_cooldown_secs;
        let secs = if max > min {
            self.rng.gen_range(min..=max)
        } else {
            min
        };
        Duration::try_from_secs_f64(secs).unwrap_or(Duration::ZERO)
    }

    /// Tick until cancelled, then hand the behavioral state back.
    pub async fn run(mut self, cancel: CancellationToken) -> BehavioralState {
        info!(
            agent = %self.agent_id(),
            personality = %self.ctx.participant.personality,
            epoch = self.released_in,
            "Trigger engine released"
        );
        let mut ticker = tokio::time::interval(self.ctx.tuning.tick());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            self.tick(&cancel).await;
        }

        let c = &self.state.counters;
        info!(
            agent = %self.agent_id(),
            ticks = c.ticks,
            statements = c.statements,
            passes = c.passes,
            suppressed = c.suppressed,
            failures = c.generation_failures,
            "Trigger engine stopped"
        );
        self.state
    }
}
