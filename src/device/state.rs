use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Brightness level in percent, always within `0..=100`
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "u8")]
pub struct DimLevel(u8);

impl DimLevel {
    pub const MAX: DimLevel = DimLevel(100);

    pub fn new(percentage: i64) -> Option<Self> {
        u8::try_from(percentage)
            .ok()
            .filter(|p| *p <= Self::MAX.0)
            .map(DimLevel)
    }

    pub fn percent(&self) -> u8 {
        self.0
    }
}

impl Default for DimLevel {
    fn default() -> Self {
        Self::MAX
    }
}

impl TryFrom<i64> for DimLevel {
    type Error = String;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        DimLevel::new(value).ok_or_else(|| format!("percentage {} is outside 0..=100", value))
    }
}

impl From<DimLevel> for u8 {
    fn from(level: DimLevel) -> Self {
        level.0
    }
}

impl fmt::Display for DimLevel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}%", self.0)
    }
}

/// Last known state of one streetlight
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceState {
    device_id: String,
    pub is_on: bool,
    pub dim_percentage: DimLevel,
    /// `None` until the first command has been applied
    pub last_command_at: Option<DateTime<Utc>>,
}

impl DeviceState {
    /// Fresh state: off, full brightness, never commanded
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            is_on: false,
            dim_percentage: DimLevel::default(),
            last_command_at: None,
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// True until a command has been recorded against this device
    pub fn is_pristine(&self) -> bool {
        self.last_command_at.is_none()
    }
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} [{}, dim {}]",
            self.device_id,
            if self.is_on { "on" } else { "off" },
            self.dim_percentage
        )
    }
}
