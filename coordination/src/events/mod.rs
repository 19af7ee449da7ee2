//! Live session events
//!
//! Outbound: every committed entry, phase change, tally snapshot and the
//! final summary line, fanned out to any number of listeners (terminals,
//! web sockets, tests). Inbound: human messages and vote casts, dispatched
//! through a [`crate::moderator::SessionHandle`].
//!
//! # Event Flow
//!
//! ```text
//! ┌──────────────┐  relay   ┌──────────────┐     ┌──────────────┐
//! │  MessageLog  │─────────▶│  Event Bus   │────▶│  Listeners   │
//! └──────────────┘          │  (broadcast) │     │   (recv)     │
//! ┌──────────────┐ publish  │              │     └──────┬───────┘
//! │  Moderator   │─────────▶│              │            │ InboundEvent
//! └──────▲───────┘          └──────────────┘            │
//!        └──────────────── SessionHandle ◀──────────────┘
//! ```

pub mod bus;
pub mod types;

pub use bus::{spawn_entry_relay, EventBus, SharedEventBus};
pub use types::{InboundEvent, SessionEvent};
