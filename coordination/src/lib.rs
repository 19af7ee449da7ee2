//! Agora coordination library
//!
//! Moderated multi-agent discussions: LLM-backed agents and humans debate a
//! topic through a shared ordered log, under a moderator that runs the
//! phases, keeps time and tallies an audience vote.
//!
//! # Modules
//!
//! - [`message_log`]: the ordered, append-only log every participant reads
//!   and writes, with per-subscriber fan-out
//! - [`moderator`]: phase machine, structured turns, silence watch and the
//!   [`SessionHandle`] humans post and vote through
//! - [`trigger`]: per-agent engines that decide when to speak during
//!   autonomous discussion
//! - [`tally`]: vote sessions and results
//! - [`generation`]: the text generator seam, prompts, retry policy and an
//!   OpenAI-compatible client
//! - [`events`]: live event bus for listeners
//! - [`config`]: session configuration loaded from YAML, TOML or JSON
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use coordination::{Moderator, OpenAiCompatGenerator, SessionConfig};
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let config = SessionConfig::load(std::path::Path::new("debate.yaml"))?;
//! let generator = Arc::new(OpenAiCompatGenerator::new(&config.generator)?);
//! let moderator = Moderator::new(config, generator)?;
//! let handle = moderator.handle();
//! let summary = moderator.run().await?;
//! println!("{}", summary.summary_line());
//! # drop(handle);
//! # Ok(())
//! # }
//! ```

#![allow(clippy::uninlined_format_args)]

pub mod config;
pub mod events;
pub mod generation;
pub mod message_log;
pub mod moderator;
pub mod summary;
pub mod tally;
pub mod trigger;

pub use config::{
    AutonomousTuning, ConfigError, ConfigResult, DiscussionMode, GeneratorConfig, ParticipantConfig,
    ParticipantRole, PhaseConfig, SessionConfig, Stance, VotingConfig,
};
pub use events::{EventBus, InboundEvent, SessionEvent, SharedEventBus};
pub use generation::{
    generate_with_retry, GenerationError, GenerationRequest, GenerationResult, OpenAiCompatGenerator,
    Purpose, RetryPolicy, TextGenerator,
};
pub use message_log::{
    Entry, EntryDraft, EntryKind, LogQuery, LogStats, MessageLog, SharedMessageLog, Subscription,
    Transcript,
};
pub use moderator::{
    InboundError, InboundReply, Moderator, PhaseEpoch, SessionError, SessionHandle, SessionPhase,
    SessionResult, TurnOutcome, TurnPolicy,
};
pub use summary::{ParticipantStats, SessionSummary};
pub use tally::{
    CastOutcome, RejectReason, SharedVoteTally, TallyError, TallyOutcome, TallyPolicy, TallyResults,
    TallyUpdate, VoteTally,
};
pub use trigger::{
    AgentReport, BehavioralState, InterruptionLimiter, PersonalityProfile, PersonalityTable,
    TriggerEngine,
};
