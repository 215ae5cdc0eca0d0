//! `roverpos-middleware` – message bus plumbing.
//!
//! The estimation pipeline only ever talks to a [`Publisher`]; the concrete
//! transport (an MQTT client on the rover, the in-process [`EventBus`] in
//! tests and replays) is injected at assembly time.
//!
//! # Modules
//!
//! - [`bus`] – [`Publisher`] contract and the Tokio broadcast backed
//!   [`EventBus`], with commands on a channel of their own, and
//!   prefix-filtered [`TopicSubscriber`]s.

pub mod bus;

pub use bus::{publish_json, EventBus, Publisher, TopicSubscriber, CONTROL_PREFIX};
