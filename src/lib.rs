//! Hubwatch - live monitoring client for a ZeroMQ hub relay.
//!
//! This crate provides the core functionality for the hubwatch CLI:
//! a dual-channel WebSocket session against a hub relay server, a bounded
//! client-side event log, and publish/acknowledgement reconciliation.
//!
//! # Architecture
//!
//! The crate follows a single-aggregator pattern:
//!
//! - **Channel** - one owning task per WebSocket connection, reconnects forever
//! - **EventLog** - capacity-bounded, most-recent-first event buffer
//! - **ControlSession** - publish dispatch and ack/telemetry reconciliation
//! - **Session** - supervisor owning both channels, runs the event loop
//! - **CLI** - thin line-oriented consumer of the session's notice stream
//!
//! # Modules
//!
//! - [`channel`] - reconnecting WebSocket channel state machine
//! - [`session`] - session supervisor and public handle
//! - [`protocol`] - wire message types and decoding
//! - [`config`] - configuration loading/saving

// Library modules
pub mod channel;
pub mod config;
pub mod constants;
pub mod control;
pub mod event_log;
pub mod health;
pub mod protocol;
pub mod session;
pub mod ws;

// Re-export commonly used types
pub use channel::ChannelState;
pub use config::Config;
pub use control::{PublishRequest, PublishStatus, SubmitError};
pub use event_log::{EventLog, SharedEventLog};
pub use protocol::{Encoding, Event};
pub use session::{Notice, Session, SessionHandle};
