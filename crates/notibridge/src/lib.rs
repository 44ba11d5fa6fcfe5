//! Notibridge - reliable notification delivery between a game backend and Telegram.
//!
//! The bridge guarantees at-least-once delivery of backend events to their
//! Telegram recipients over two channels sharing one sink:
//!
//! - [`push`]: a persistent authenticated WebSocket with keep-alive and
//!   bounded-exponential reconnection.
//! - [`fallback`]: periodic polling of the backend's pending list while the
//!   push channel is down.
//! - [`delivery`]: the single send-then-acknowledge path both channels feed.
//!
//! The [`orchestrator`] wires the push channel's lifecycle events to the
//! fallback so at steady state only one channel is active.

pub mod backend;
pub mod config;
pub mod delivery;
pub mod fallback;
pub mod orchestrator;
pub mod push;
pub mod telegram;
