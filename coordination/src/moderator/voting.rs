//! The voting phase.

use std::time::Duration;

use tokio::time::{interval_at, sleep_until, Instant, MissedTickBehavior};
use tracing::{info, warn};

use super::Moderator;
use crate::events::SessionEvent;
use crate::message_log::EntryDraft;
use crate::tally::{TallyOutcome, TallyResults};

impl Moderator {
    /// Open the tally, stream updates until the deadline or an early close,
    /// then close it and post the outcome. `None` if the tally never opened.
    pub(super) async fn voting(&mut self, duration: Duration) -> Option<TallyResults> {
        let candidates = self.config.candidates();
        let eligible = self.config.eligible_voters();
        let session_id = match self.tally.open(candidates.iter(), duration, eligible) {
            Ok(id) => id,
            Err(e) => {
                warn!(error = %e, "Could not open voting");
                self.system(format!("Voting could not be opened: {e}"));
                return None;
            }
        };
        self.log.append(
            EntryDraft::vote_event(
                self.config.moderator_name.clone(),
                format!(
                    "Voting is open for {} seconds. Candidates: {}.{}",
                    duration.as_secs(),
                    candidates.join(", "),
                    if self.config.voting.require_justification {
                        " Please include a short reason with your vote."
                    } else {
                        ""
                    }
                ),
            )
            .with_meta("tally_session", session_id.clone()),
        );
        self.publish_update();

        let deadline = Instant::now() + duration;
        let every = self.config.voting.update_interval();
        let mut updates = interval_at(Instant::now() + every, every);
        updates.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let close_voting = self.close_voting.clone();

        loop {
            tokio::select! {
                biased;
                _ = sleep_until(deadline) => break,
                _ = close_voting.notified() => {
                    info!("Voting closed before the deadline");
                    break;
                }
                _ = updates.tick() => self.publish_update(),
            }
        }

        let results = match self.tally.close() {
            Ok(results) => results,
            Err(e) => {
                warn!(error = %e, "Could not close voting");
                return None;
            }
        };
        self.log.append(
            EntryDraft::vote_event(self.config.moderator_name.clone(), outcome_line(&results))
                .with_meta("tally_session", session_id)
                .with_meta("total_votes", results.total_votes),
        );
        self.publish_update();
        info!(
            outcome = ?results.outcome,
            votes = results.total_votes,
            eligible = results.eligible_voters,
            early = results.closed_early,
            "Voting closed"
        );
        Some(results)
    }

    fn publish_update(&self) {
        if let Some(update) = self.tally.update() {
            self.bus.publish(SessionEvent::from(update));
        }
    }
}

fn outcome_line(results: &TallyResults) -> String {
    let counts = results
        .counts
        .iter()
        .map(|(candidate, votes)| format!("{candidate}: {votes}"))
        .collect::<Vec<_>>()
        .join(", ");
    let outcome = match &results.outcome {
        TallyOutcome::Winner(w) => format!("{w} leads"),
        TallyOutcome::Tie(set) => format!("tie between {}", set.join(" and ")),
        TallyOutcome::NoVotes => "no votes cast".to_string(),
    };
    format!(
        "Voting closed: {outcome} ({counts}). {} of {} eligible voters took part.",
        results.total_votes, results.eligible_voters
    )
}
