//! Inbound interface for humans and external listeners.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::{ParticipantRole, SessionConfig};
use crate::events::{InboundEvent, SessionEvent, SharedEventBus};
use crate::generation::truncate_on_word;
use crate::message_log::{Entry, EntryDraft, SharedMessageLog, ROLE_KEY};
use crate::tally::{CastOutcome, SharedVoteTally, TallyResults};

/// Errors for inbound human actions
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InboundError {
    #[error("Author must not be empty")]
    EmptyAuthor,

    #[error("Message must not be empty")]
    EmptyMessage,

    #[error("'{0}' is not a human participant")]
    NotHuman(String),

    #[error("Session has finished")]
    SessionFinished,
}

/// Result type for inbound actions
pub type InboundResult<T> = Result<T, InboundError>;

/// What an inbound event produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundReply {
    Posted { entry: Entry, truncated: bool },
    Vote { outcome: CastOutcome },
}

/// Cloneable handle for posting and voting while a session runs.
#[derive(Clone)]
pub struct SessionHandle {
    log: SharedMessageLog,
    tally: SharedVoteTally,
    bus: SharedEventBus,
    roles: Arc<HashMap<String, ParticipantRole>>,
    moderator_name: String,
    max_message_chars: usize,
    finished: CancellationToken,
    close_voting: Arc<Notify>,
}

impl SessionHandle {
    pub(crate) fn new(
        config: &SessionConfig,
        log: SharedMessageLog,
        tally: SharedVoteTally,
        bus: SharedEventBus,
        finished: CancellationToken,
        close_voting: Arc<Notify>,
    ) -> Self {
        let roles = config
            .participants
            .iter()
            .map(|p| (p.id.clone(), p.role))
            .collect();
        Self {
            log,
            tally,
            bus,
            roles: Arc::new(roles),
            moderator_name: config.moderator_name.clone(),
            max_message_chars: config.max_message_chars,
            finished,
            close_voting,
        }
    }

    /// Post a human statement. Agents and the moderator cannot be
    /// impersonated; audience members not on the roster may post.
    pub fn post(&self, author: &str, content: &str) -> InboundResult<InboundReply> {
        if self.finished.is_cancelled() {
            return Err(InboundError::SessionFinished);
        }
        let author = author.trim();
        if author.is_empty() {
            return Err(InboundError::EmptyAuthor);
        }
        let content = content.trim();
        if content.is_empty() {
            return Err(InboundError::EmptyMessage);
        }
        let on_roster = self.roles.get(author).copied();
        if author == self.moderator_name
            || matches!(on_roster, Some(ParticipantRole::Agent | ParticipantRole::Moderator))
        {
            return Err(InboundError::NotHuman(author.to_string()));
        }

        let (body, truncated) = truncate_on_word(content, self.max_message_chars);
        let entry = self.log.append(
            EntryDraft::statement(author, body)
                .with_meta(ROLE_KEY, "human")
                .with_meta("audience", on_roster.is_none()),
        );
        if truncated {
            self.log.append(EntryDraft::moderator(
                self.moderator_name.clone(),
                format!(
                    "{}'s message was trimmed to {} characters.",
                    author, self.max_message_chars
                ),
            ));
        }
        debug!(author, sequence = entry.sequence, "Human statement posted");
        Ok(InboundReply::Posted { entry, truncated })
    }

    /// Cast a ballot and publish the refreshed tally.
    pub fn cast_vote(&self, voter: &str, candidate: &str, justification: Option<&str>) -> CastOutcome {
        let outcome = self.tally.cast(voter, candidate, justification);
        if outcome.is_accepted() {
            if let Some(update) = self.tally.update() {
                self.bus.publish(SessionEvent::from(update));
            }
        }
        outcome
    }

    /// Close the open tally before its deadline.
    pub fn close_voting_early(&self) -> Option<TallyResults> {
        let results = self.tally.close().ok();
        if results.is_some() {
            info!("Voting closed early");
            self.close_voting.notify_one();
        }
        results
    }

    pub fn dispatch(&self, event: InboundEvent) -> InboundResult<InboundReply> {
        match event {
            InboundEvent::HumanMessage { author, content } => self.post(&author, &content),
            InboundEvent::CastVote {
                voter,
                candidate,
                justification,
            } => Ok(InboundReply::Vote {
                outcome: self.cast_vote(&voter, &candidate, justification.as_deref()),
            }),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished.is_cancelled()
    }

    /// Resolves once the session reaches `finished`.
    pub async fn finished(&self) {
        self.finished.cancelled().await
    }
}
