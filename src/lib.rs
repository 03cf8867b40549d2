//! # Streetlights
//!
//! Remote control for a fleet of streetlights over a topic-based publish/subscribe
//! broker. Commands (`turn.on`, `turn.off`, `dim`) arrive on per-device action
//! topics, change the device's in-memory state and produce `lighting.measured`
//! telemetry on the matching event topic.
//!
//! ```text
//! broker ──► channel ──► consumer ──► topic router ──► command processor ──► device store
//!                                                            │
//!                                                            ▼
//! broker ◄── channel ◄──────────── telemetry publisher ◄── lumens
//! ```
//!
//! State lives only as long as the process; nothing is persisted or replayed.

pub mod channel;
pub mod command;
pub mod config;
pub mod consumer;
pub mod device;
pub mod service;
pub mod telemetry;
pub mod timestamp;
pub mod topic;
pub mod trigger;

pub use service::StreetlightService;
