//! Per-agent trigger engines
//!
//! During autonomous discussion every agent runs its own engine task. The
//! engine owns the agent's [`BehavioralState`] outright and returns it when
//! the phase ends; the only things it shares are the log, the phase epoch
//! and the interruption limiter.
//!
//! ```text
//!   tick ──▶ observe suffix ──▶ decay energy ──▶ cooldown? ──yes──▶ Suppressed
//!                                                   │no
//!                                                   ▼
//!                          signals × personality table ──▶ p ──draw──▶ Pass
//!                                                                 │
//!                                                                 ▼ Act
//!                     limiter slot ──▶ generate (retry, timeout) ──▶ append_if(epoch)
//! ```

pub mod engine;
pub mod limiter;
pub mod personality;
pub mod signals;
pub mod state;

pub use engine::{act_probability, EngineContext, TickOutcome, TriggerDecision, TriggerEngine};
pub use limiter::{InterruptionLimiter, SharedLimiter};
pub use personality::{Effect, Modifier, PersonalityProfile, PersonalityTable};
pub use signals::{Signal, SignalDetector, Signals};
pub use state::{AgentReport, BehavioralState, CooldownWindow, EngineCounters};
