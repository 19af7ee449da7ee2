//! Behavioral state: owned and mutated only by the agent's own engine.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::message_log::{Entry, NameMatcher, Sequence};

/// Upper bound on energy.
pub const ENERGY_MAX: f64 = 1.5;

/// Starting energy.
pub const ENERGY_INITIAL: f64 = 1.0;

/// Upper bound on frustration.
pub const FRUSTRATION_MAX: f64 = 1.0;

/// Starting rivalry for a declared rival.
const RIVALRY_INITIAL: f64 = 0.5;
const RIVALRY_ON_SPEAK: f64 = 0.05;
const RIVALRY_ON_MENTION: f64 = 0.15;

/// A closed-open interval during which the agent may not speak.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CooldownWindow {
    pub start: Instant,
    pub end: Instant,
}

impl CooldownWindow {
    pub fn contains(&self, now: Instant) -> bool {
        now >= self.start && now < self.end
    }

    pub fn remaining(&self, now: Instant) -> Duration {
        self.end.saturating_duration_since(now)
    }
}

/// What an engine did over its lifetime.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineCounters {
    pub ticks: u64,
    pub acts: u64,
    pub passes: u64,
    pub suppressed: u64,
    /// Decisions to act dropped by the interruption limiter.
    pub throttled: u64,
    pub statements: u64,
    pub generation_failures: u64,
    pub fallbacks: u64,
    /// Generated text dropped because the phase had already moved on.
    pub discarded: u64,
}

#[derive(Debug, Clone)]
pub struct BehavioralState {
    pub agent_id: String,
    pub last_spoke: Option<Instant>,
    pub cooldown: Option<CooldownWindow>,
    pub energy: f64,
    pub frustration: f64,
    pub rivalry: HashMap<String, f64>,
    /// Highest log sequence this engine has looked at.
    pub last_seen: Sequence,
    last_decay: Instant,
    declared_rivals: HashSet<String>,
    own_name: NameMatcher,
    pub counters: EngineCounters,
}

impl BehavioralState {
    pub fn new<I, S>(agent_id: &str, rivals: I, now: Instant) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let declared_rivals: HashSet<String> = rivals.into_iter().map(Into::into).collect();
        let rivalry = declared_rivals
            .iter()
            .map(|r| (r.clone(), RIVALRY_INITIAL))
            .collect();
        Self {
            agent_id: agent_id.to_string(),
            last_spoke: None,
            cooldown: None,
            energy: ENERGY_INITIAL,
            frustration: 0.0,
            rivalry,
            last_seen: 0,
            last_decay: now,
            declared_rivals,
            own_name: NameMatcher::new(agent_id),
            counters: EngineCounters::default(),
        }
    }

    /// Update rivalry bookkeeping from a newly observed entry.
    pub fn observe(&mut self, entry: &Entry) {
        self.last_seen = self.last_seen.max(entry.sequence);
        if !entry.is_statement() || !self.declared_rivals.contains(&entry.author) {
            return;
        }
        let bump = if entry.mentions(&self.own_name) {
            RIVALRY_ON_MENTION
        } else {
            RIVALRY_ON_SPEAK
        };
        let score = self.rivalry.entry(entry.author.clone()).or_insert(RIVALRY_INITIAL);
        *score = (*score + bump).min(1.0);
    }

    /// Linear energy decay since the last call.
    pub fn decay_energy(&mut self, now: Instant, per_second: f64) {
        let elapsed = now.saturating_duration_since(self.last_decay).as_secs_f64();
        self.energy = (self.energy - per_second * elapsed).max(0.0);
        self.last_decay = now;
    }

    pub fn in_cooldown(&self, now: Instant) -> bool {
        self.cooldown.is_some_and(|w| w.contains(now))
    }

    pub fn cooldown_remaining(&self, now: Instant) -> Duration {
        self.cooldown.map_or(Duration::ZERO, |w| w.remaining(now))
    }

    pub fn silent_for(&self, now: Instant) -> Option<Duration> {
        self.last_spoke.map(|t| now.saturating_duration_since(t))
    }

    /// A decision to act was blocked by cooldown.
    pub fn record_suppressed(&mut self, step: f64) {
        self.frustration = (self.frustration + step).min(FRUSTRATION_MAX);
        self.counters.suppressed += 1;
    }

    /// A statement was committed at `now`.
    pub fn record_statement(&mut self, now: Instant, cooldown: Duration, energy_gain: f64) {
        self.last_spoke = Some(now);
        self.cooldown = Some(CooldownWindow {
            start: now,
            end: now + cooldown,
        });
        self.energy = (self.energy + energy_gain).min(ENERGY_MAX);
        self.frustration /= 2.0;
        self.counters.statements += 1;
    }
}

/// Serializable view of a finished engine's state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentReport {
    pub agent_id: String,
    pub energy: f64,
    pub frustration: f64,
    pub rivalry: HashMap<String, f64>,
    pub counters: EngineCounters,
}

impl From<&BehavioralState> for AgentReport {
    fn from(state: &BehavioralState) -> Self {
        Self {
            agent_id: state.agent_id.clone(),
            energy: state.energy,
            frustration: state.frustration,
            rivalry: state.rivalry.clone(),
            counters: state.counters.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message_log::EntryKind;
    use chrono::Utc;

    fn statement(seq: u64, author: &str, body: &str) -> Entry {
        Entry {
            sequence: seq,
            author: author.to_string(),
            body: body.to_string(),
            kind: EntryKind::Statement,
            timestamp: Utc::now(),
            metadata: Default::default(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cooldown_window_and_statement_bookkeeping() {
        let now = Instant::now();
        let mut state = BehavioralState::new("ada", Vec::<String>::new(), now);
        assert!(!state.in_cooldown(now));

        state.frustration = 0.8;
        state.record_statement(now, Duration::from_secs(5), 0.1);
        assert!(state.in_cooldown(now + Duration::from_secs(4)));
        assert!(!state.in_cooldown(now + Duration::from_secs(5)));
        assert_eq!(state.cooldown_remaining(now + Duration::from_secs(3)), Duration::from_secs(2));
        assert!((state.energy - 1.1).abs() < 1e-9);
        assert!((state.frustration - 0.4).abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn test_energy_stays_in_bounds() {
        let now = Instant::now();
        let mut state = BehavioralState::new("ada", Vec::<String>::new(), now);
        for _ in 0..10 {
            state.record_statement(now, Duration::ZERO, 0.3);
        }
        assert_eq!(state.energy, ENERGY_MAX);

        state.decay_energy(now + Duration::from_secs(1000), 0.01);
        assert_eq!(state.energy, 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rivalry_tracks_declared_rivals_only() {
        let mut state = BehavioralState::new("ada", ["bob"], Instant::now());
        state.observe(&statement(3, "bob", "ada is wrong"));
        state.observe(&statement(4, "cy", "hello"));
        assert!((state.rivalry["bob"] - 0.65).abs() < 1e-9);
        assert!(!state.rivalry.contains_key("cy"));
        assert_eq!(state.last_seen, 4);

        state.record_suppressed(0.7);
        state.record_suppressed(0.7);
        assert_eq!(state.frustration, FRUSTRATION_MAX);
        assert_eq!(state.counters.suppressed, 2);
    }
}
