//! Distributed, Redis-backed message queue with delayed delivery, a
//! coordinated watcher role, and optional at-least-once safe delivery.
//!
//! The [`Queue`] type is the entry point: build one with [`QueueConfig`],
//! call [`Queue::start`], then [`Queue::send`] and [`Queue::subscribe`].

pub mod codec;
pub mod config;
pub mod connection;
pub mod consumer;
pub mod error;
pub mod events;
pub mod keys;
pub mod producer;
pub mod profile;
pub mod queue;
pub mod script;
pub mod signal;
pub mod watcher;

pub use codec::{Codec, Envelope};
pub use config::QueueConfig;
pub use error::{Error, Result};
pub use events::{ErrorSource, QueueEvent};
pub use producer::OnSendError;
pub use queue::Queue;
