//! `tagpose-middleware` – delivery of pipeline output.
//!
//! Routes per-frame records to downstream consumers without caring about
//! their geometric meaning.
//!
//! # Modules
//!
//! - [`bus`] – Typed, topic-based publish/subscribe event bus built on Tokio
//!   broadcast channels, one lane per output topic.
//! - [`multiplexer`] – [`OutputMultiplexer`]: fans one frame's records out to
//!   their topics, each delivery independent of the others.

pub mod bus;
pub mod multiplexer;

pub use bus::{EventBus, MessageSink, Topic, TopicReceiver};
pub use multiplexer::{OutputMultiplexer, PublishReport};
