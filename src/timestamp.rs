//! Wire timestamps
//!
//! Serialized as RFC 3339 in UTC with millisecond precision and a `Z` suffix,
//! e.g. `2024-05-01T10:15:30.250Z`. Any RFC 3339 timestamp is accepted on input.
//!
//! Use with `#[serde(with = "crate::timestamp")]`.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serializer};

pub fn format(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn serialize<S: Serializer>(at: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&format(at))
}

pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    DateTime::<Utc>::deserialize(deserializer)
}
