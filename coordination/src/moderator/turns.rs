//! Structured turns: one speaker holds the floor until they speak, fail,
//! or run out of re-grants.

use std::time::Duration;

use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

use super::Moderator;
use crate::config::{ParticipantConfig, PhaseConfig};
use crate::generation::{
    generate_with_retry, truncate_on_word, GenerationRequest, GenerationResult, Purpose,
};
use crate::message_log::{Entry, EntryDraft, Subscription, ROLE_KEY};

/// Deadline rules for structured turns.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnPolicy {
    pub turn_duration: Duration,
    /// Zero disables the time warning.
    pub warning_lead: Duration,
    /// Misses at which the turn is forcibly passed.
    pub max_misses: u32,
}

impl TurnPolicy {
    pub fn from_config(phases: &PhaseConfig) -> Self {
        Self {
            turn_duration: phases.turn(),
            warning_lead: phases.warning_lead(),
            max_misses: phases.max_misses.max(1),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TurnOutcome {
    Spoke(Entry),
    /// Generation failed for good; the reason is in the log.
    Skipped(String),
    /// Deadline missed `misses` times.
    Passed { misses: u32 },
}

/// What one structured turn produced.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnReport {
    pub outcome: TurnOutcome,
    /// Missed-deadline warnings posted during the turn.
    pub warnings: u32,
}

enum Floor {
    Generated(GenerationResult<String>),
    Posted(Entry),
    Closed,
}

impl Moderator {
    /// Give every speaker one structured turn, in roster order or reversed.
    pub(super) async fn statement_round(&mut self, purpose: Purpose, reversed: bool) {
        let mut speakers: Vec<ParticipantConfig> = self.config.speakers().cloned().collect();
        if reversed {
            speakers.reverse();
        }
        for speaker in &speakers {
            let report = self.structured_turn(speaker, purpose, None).await;
            self.record_turn(&speaker.id, &report);
        }
    }

    /// Grant `speaker` the floor. `hard_stop` caps every deadline, so a turn
    /// never outlives the phase that granted it.
    pub(super) async fn structured_turn(
        &self,
        speaker: &ParticipantConfig,
        purpose: Purpose,
        hard_stop: Option<Instant>,
    ) -> TurnReport {
        let policy = &self.turn_policy;
        let cap = |from: Instant| {
            let deadline = from + policy.turn_duration;
            hard_stop.map_or(deadline, |stop| deadline.min(stop))
        };
        let mut granted_at = Instant::now();
        let mut deadline = cap(granted_at);

        // Subscribe before the prompt so a human's reply cannot slip past.
        let mut sub = self.log.subscribe(&format!("turn:{}", speaker.id));
        self.announce(floor_prompt(speaker, purpose, deadline - granted_at));

        let floor = self.take_floor(speaker, purpose, &mut sub);
        tokio::pin!(floor);

        let mut misses = 0u32;
        let mut warned = false;
        let outcome = loop {
            let warn_at = deadline
                .checked_sub(policy.warning_lead)
                .filter(|at| !policy.warning_lead.is_zero() && *at > granted_at);

            tokio::select! {
                biased;
                result = &mut floor => break self.finish_turn(speaker, purpose, result),
                _ = sleep_until(warn_at.unwrap_or(deadline)), if warn_at.is_some() && !warned => {
                    warned = true;
                    self.announce(format!(
                        "{}, {} seconds remaining.",
                        speaker.id,
                        policy.warning_lead.as_secs()
                    ));
                }
                _ = sleep_until(deadline) => {
                    misses += 1;
                    let phase_left = hard_stop.map_or(true, |stop| Instant::now() < stop);
                    if misses < policy.max_misses && phase_left {
                        self.announce(format!(
                            "{}, time is up (warning {}/{}). The floor is yours again.",
                            speaker.id, misses, policy.max_misses
                        ));
                        granted_at = Instant::now();
                        deadline = cap(granted_at);
                        warned = false;
                    } else {
                        self.system(format!(
                            "{}'s turn passed after {} missed deadline(s).",
                            speaker.id, misses
                        ));
                        warn!(speaker = %speaker.id, misses, "Turn forcibly passed");
                        break TurnOutcome::Passed { misses };
                    }
                }
            }
        };

        let warnings = match outcome {
            TurnOutcome::Passed { misses } => misses.saturating_sub(1),
            _ => misses,
        };
        debug!(speaker = %speaker.id, %purpose, warnings, "Turn finished");
        TurnReport { outcome, warnings }
    }

    async fn take_floor(
        &self,
        speaker: &ParticipantConfig,
        purpose: Purpose,
        sub: &mut Subscription,
    ) -> Floor {
        if speaker.is_agent() {
            let request = self.request_for(speaker, purpose);
            return Floor::Generated(
                generate_with_retry(self.generator.as_ref(), &request, &self.retry).await,
            );
        }
        while let Some(entry) = sub.recv().await {
            if entry.author == speaker.id && entry.is_statement() {
                return Floor::Posted(entry);
            }
        }
        Floor::Closed
    }

    fn finish_turn(&self, speaker: &ParticipantConfig, purpose: Purpose, floor: Floor) -> TurnOutcome {
        match floor {
            Floor::Posted(entry) => TurnOutcome::Spoke(entry),
            Floor::Generated(Ok(text)) => {
                let (body, truncated) = truncate_on_word(&text, self.config.max_message_chars);
                let entry = self.log.append(
                    EntryDraft::statement(speaker.id.clone(), body)
                        .with_meta(ROLE_KEY, "agent")
                        .with_meta("purpose", purpose.to_string()),
                );
                if truncated {
                    self.announce(format!(
                        "{}'s statement was trimmed to {} characters.",
                        speaker.id, self.config.max_message_chars
                    ));
                }
                info!(speaker = %speaker.id, %purpose, sequence = entry.sequence, "Turn statement");
                TurnOutcome::Spoke(entry)
            }
            Floor::Generated(Err(e)) => {
                warn!(speaker = %speaker.id, error = %e, "Turn skipped after generation failure");
                self.system(format!("{}'s turn was skipped: {}", speaker.id, e));
                TurnOutcome::Skipped(e.to_string())
            }
            Floor::Closed => TurnOutcome::Skipped("message log closed".to_string()),
        }
    }

    pub(super) fn request_for(&self, speaker: &ParticipantConfig, purpose: Purpose) -> GenerationRequest {
        let window = self.config.autonomous.context_window;
        GenerationRequest {
            speaker: speaker.id.clone(),
            topic: self.config.topic.clone(),
            stance: speaker.stance(),
            personality: speaker.personality.clone(),
            burning_questions: self.burning.get(&speaker.id).cloned().unwrap_or_default(),
            context: self
                .log
                .context_for(&speaker.id, window)
                .iter()
                .map(Entry::render_line)
                .collect(),
            purpose,
            max_tokens: speaker.max_tokens,
            temperature: speaker.temperature,
        }
    }

    pub(super) fn record_turn(&mut self, id: &str, report: &TurnReport) {
        let Some(stats) = self.stats_mut(id) else {
            return;
        };
        stats.deadline_warnings += report.warnings;
        match report.outcome {
            TurnOutcome::Spoke(_) => stats.turns_taken += 1,
            TurnOutcome::Skipped(_) => {
                stats.skips += 1;
                stats.generation_failures += 1;
            }
            TurnOutcome::Passed { .. } => stats.forced_passes += 1,
        }
    }
}

fn floor_prompt(speaker: &ParticipantConfig, purpose: Purpose, budget: Duration) -> String {
    let what = match purpose {
        Purpose::Opening => "your opening statement",
        Purpose::Closing => "your closing statement",
        _ => "your response",
    };
    format!(
        "{}, the floor is yours for {}: you have {} seconds.",
        speaker.id,
        what,
        budget.as_secs()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SessionConfig, Stance};
    use crate::generation::{GenerationError, TextGenerator};
    use crate::moderator::Moderator;
    use async_trait::async_trait;
    use std::sync::Arc;

    struct Echo;

    #[async_trait]
    impl TextGenerator for Echo {
        async fn generate(&self, request: &GenerationRequest) -> GenerationResult<String> {
            Ok(format!("{} speaking ({})", request.speaker, request.purpose))
        }
    }

    struct Broken;

    #[async_trait]
    impl TextGenerator for Broken {
        async fn generate(&self, _request: &GenerationRequest) -> GenerationResult<String> {
            Err(GenerationError::Empty)
        }
    }

    fn config() -> SessionConfig {
        let mut config = SessionConfig::new(
            "Remote work",
            vec![
                ParticipantConfig::agent("ada", Stance::Pro, "analytical"),
                ParticipantConfig::human("carol"),
            ],
        );
        config.phases.turn_secs = 10.0;
        config.phases.warning_lead_secs = 3.0;
        config.phases.max_misses = 2;
        config.generator.max_attempts = 1;
        config.generator.backoff_ms = 0;
        config.seed = Some(7);
        config
    }

    #[tokio::test(start_paused = true)]
    async fn test_agent_turn_posts_statement() {
        let m = Moderator::new(config(), Arc::new(Echo)).unwrap();
        let ada = m.config.participants[0].clone();
        let report = m.structured_turn(&ada, Purpose::Opening, None).await;
        let TurnOutcome::Spoke(entry) = report.outcome else {
            panic!("expected a statement");
        };
        assert_eq!(entry.body, "ada speaking (opening)");
        assert_eq!(entry.meta_str("purpose"), Some("opening"));
        assert_eq!(report.warnings, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_generation_failure_skips_turn() {
        let m = Moderator::new(config(), Arc::new(Broken)).unwrap();
        let ada = m.config.participants[0].clone();
        let report = m.structured_turn(&ada, Purpose::Closing, None).await;
        assert!(matches!(report.outcome, TurnOutcome::Skipped(_)));
        assert!(m.log.last().unwrap().body.contains("skipped"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_human_is_warned_then_passed() {
        let m = Moderator::new(config(), Arc::new(Echo)).unwrap();
        let carol = m.config.participants[1].clone();
        let start = Instant::now();
        let report = m.structured_turn(&carol, Purpose::Opening, None).await;

        assert_eq!(report.outcome, TurnOutcome::Passed { misses: 2 });
        assert_eq!(report.warnings, 1);
        assert_eq!(start.elapsed(), Duration::from_secs(20));

        let bodies: Vec<String> = m.log.snapshot().into_iter().map(|e| e.body).collect();
        assert_eq!(bodies.iter().filter(|b| b.contains("seconds remaining")).count(), 2);
        assert!(bodies.iter().any(|b| b.contains("warning 1/2")));
        assert!(bodies.last().unwrap().contains("passed after 2"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_human_reply_ends_turn() {
        let m = Moderator::new(config(), Arc::new(Echo)).unwrap();
        let handle = m.handle();
        let carol = m.config.participants[1].clone();

        let reply = async {
            tokio::time::sleep(Duration::from_secs(4)).await;
            handle.post("visitor", "not my turn but hi").unwrap();
            handle.post("carol", "Here is my opening.").unwrap();
        };
        let (report, ()) = tokio::join!(m.structured_turn(&carol, Purpose::Opening, None), reply);
        let TurnOutcome::Spoke(entry) = report.outcome else {
            panic!("expected carol's statement");
        };
        assert_eq!(entry.author, "carol");
    }

    #[tokio::test(start_paused = true)]
    async fn test_hard_stop_caps_deadline() {
        let m = Moderator::new(config(), Arc::new(Echo)).unwrap();
        let carol = m.config.participants[1].clone();
        let start = Instant::now();
        let report = m
            .structured_turn(&carol, Purpose::Response, Some(start + Duration::from_secs(4)))
            .await;
        assert_eq!(report.outcome, TurnOutcome::Passed { misses: 1 });
        assert_eq!(start.elapsed(), Duration::from_secs(4));
    }
}
