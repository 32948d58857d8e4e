//! Provider timestamp conversion.
//!
//! Accepted shapes:
//! - `{ "seconds": i64, "nanoseconds": u32 }` from the client SDKs
//! - `{ "_seconds": i64, "_nanoseconds": u32 }` from the admin SDKs
//! - RFC 3339 strings, which is what REST `timestampValue` carries
//! - integer milliseconds since the epoch
//!
//! Serialization always emits the `seconds`/`nanoseconds` map so the Firestore codec can
//! turn it back into a native timestamp.
use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer, de::Error, ser::SerializeMap};
use serde_json::Value;

pub const SECONDS: &str = "seconds";
pub const NANOSECONDS: &str = "nanoseconds";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    pub fn now() -> Self {
        Self(Utc::now())
    }

    pub fn from_datetime(datetime: DateTime<Utc>) -> Self {
        Self(datetime)
    }

    pub fn as_datetime(&self) -> DateTime<Utc> {
        self.0
    }

    pub fn seconds(&self) -> i64 {
        self.0.timestamp()
    }

    pub fn nanoseconds(&self) -> u32 {
        self.0.timestamp_subsec_nanos()
    }

    /// Plain date for display, e.g. `2024-05-01`.
    pub fn date_string(&self) -> String {
        self.0.format("%Y-%m-%d").to_string()
    }

    pub fn to_rfc3339(&self) -> String {
        self.0.to_rfc3339_opts(SecondsFormat::AutoSi, true)
    }

    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Object(map) => {
                let seconds = map
                    .get(SECONDS)
                    .or_else(|| map.get("_seconds"))?
                    .as_i64()?;
                let nanoseconds = match map.get(NANOSECONDS).or_else(|| map.get("_nanoseconds")) {
                    Some(nanos) => u32::try_from(nanos.as_u64()?).ok()?,
                    None => 0,
                };

                DateTime::from_timestamp(seconds, nanoseconds).map(Self)
            }
            Value::String(text) => DateTime::parse_from_rfc3339(text)
                .ok()
                .map(|datetime| Self(datetime.with_timezone(&Utc))),
            Value::Number(number) => number
                .as_i64()
                .and_then(DateTime::from_timestamp_millis)
                .map(Self),
            _ => None,
        }
    }

    /// True when `map` is exactly the shape [`Timestamp`] serializes to.
    pub fn is_literal(map: &serde_json::Map<String, Value>) -> bool {
        map.len() == 2 && map.contains_key(SECONDS) && map.contains_key(NANOSECONDS)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.date_string())
    }
}

impl Serialize for Timestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(2))?;
        map.serialize_entry(SECONDS, &self.seconds())?;
        map.serialize_entry(NANOSECONDS, &self.nanoseconds())?;
        map.end()
    }
}

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;

        Self::from_value(&value)
            .ok_or_else(|| D::Error::custom(format!("not a timestamp: {value}")))
    }
}

/// Field deserializer for optional timestamps: anything unrecognized becomes `None`.
pub fn lenient<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Timestamp>, D::Error> {
    let value = Option::<Value>::deserialize(deserializer)?;

    Ok(value.as_ref().and_then(Timestamp::from_value))
}
