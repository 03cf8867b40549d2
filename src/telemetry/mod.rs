//! Light output telemetry
//!
//! Derives the light output of a streetlight from its state and describes the
//! `lighting.measured` event published after state changes. Publishing itself
//! lives in [`publisher`].

pub mod publisher;

pub use publisher::TelemetryPublisher;

use crate::device::DeviceState;
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Light output of a fully powered streetlight at 100% brightness
pub const BASE_LUMENS: u32 = 5000;

/// Application-defined correlation value in `0..=100`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "u8")]
pub struct CorrelationTag(u8);

impl CorrelationTag {
    const MAX: u8 = 100;

    pub fn new(value: i64) -> Option<Self> {
        u8::try_from(value)
            .ok()
            .filter(|v| *v <= Self::MAX)
            .map(CorrelationTag)
    }

    /// In-range tag for constants. An out-of-range `value` fails const evaluation.
    pub const fn fixed(value: u8) -> Self {
        assert!(value <= Self::MAX, "correlation tag outside 0..=100");
        CorrelationTag(value)
    }

    /// Uniformly drawn from `0..=100`
    pub fn random() -> Self {
        CorrelationTag(rand::thread_rng().gen_range(0..=Self::MAX))
    }

    pub fn value(&self) -> u8 {
        self.0
    }
}

impl TryFrom<i64> for CorrelationTag {
    type Error = String;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        CorrelationTag::new(value).ok_or_else(|| format!("tag {} is outside 0..=100", value))
    }
}

impl From<CorrelationTag> for u8 {
    fn from(tag: CorrelationTag) -> Self {
        tag.0
    }
}

/// Computes the current light output of `state`.
///
/// An unpowered light emits nothing regardless of its dim level.
pub fn lumens(state: &DeviceState) -> u32 {
    if !state.is_on {
        return 0;
    }
    BASE_LUMENS * u32::from(state.dim_percentage.percent()) / 100
}

/// Payload of the `lighting.measured` event
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetryEvent {
    pub lumens: u32,
    #[serde(rename = "sentAt", with = "crate::timestamp")]
    pub measured_at: DateTime<Utc>,
    #[serde(alias = "my-app-header")]
    pub tag: CorrelationTag,
}

impl TelemetryEvent {
    /// Measures `state` now, with a freshly drawn correlation tag
    pub fn measure(state: &DeviceState) -> Self {
        Self {
            lumens: lumens(state),
            measured_at: Utc::now(),
            tag: CorrelationTag::random(),
        }
    }
}

impl fmt::Display for TelemetryEvent {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} lumens at {} (tag {})",
            self.lumens,
            crate::timestamp::format(&self.measured_at),
            self.tag.value()
        )
    }
}
