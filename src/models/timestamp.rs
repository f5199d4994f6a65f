use crate::convert::time_to_string;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::time::SystemTime;

/// Point in time an entry was recorded.
///
/// Freshly created entries carry a native time value. Entries reloaded from storage carry
/// whatever the store held: usually an RFC 3339 string, sometimes epoch milliseconds written by
/// older clients. All variants normalize to the same wire representation, see
/// [`Timestamp::to_iso`].
#[derive(Debug, Clone)]
pub enum Timestamp {
    /// Native time value.
    Native(DateTime<Utc>),
    /// Already serialized value.
    Serialized(String),
}

impl Timestamp {
    /// Current time.
    pub fn now() -> Self {
        Timestamp::Native(Utc::now())
    }

    /// The instant this timestamp denotes, if it can be parsed.
    pub fn instant(&self) -> Option<DateTime<Utc>> {
        match self {
            Timestamp::Native(time) => Some(*time),
            Timestamp::Serialized(text) => DateTime::parse_from_rfc3339(text.trim())
                .ok()
                .map(|time| time.with_timezone(&Utc)),
        }
    }

    /// RFC 3339 UTC instant with millisecond precision, e.g. `2024-03-01T12:00:00.000Z`.
    ///
    /// Serialized values that can't be parsed are passed through verbatim.
    pub fn to_iso(&self) -> String {
        match (self.instant(), self) {
            (Some(time), _) => time_to_string(time),
            (None, Timestamp::Serialized(text)) => text.clone(),
            (None, Timestamp::Native(time)) => time_to_string(*time),
        }
    }
}

impl PartialEq for Timestamp {
    fn eq(&self, other: &Self) -> bool {
        self.to_iso() == other.to_iso()
    }
}

impl Eq for Timestamp {}

impl From<DateTime<Utc>> for Timestamp {
    fn from(time: DateTime<Utc>) -> Self {
        Timestamp::Native(time)
    }
}

impl From<SystemTime> for Timestamp {
    fn from(time: SystemTime) -> Self {
        Timestamp::Native(time.into())
    }
}

impl From<String> for Timestamp {
    fn from(text: String) -> Self {
        Timestamp::Serialized(text)
    }
}

impl From<&str> for Timestamp {
    fn from(text: &str) -> Self {
        Timestamp::Serialized(text.to_owned())
    }
}

impl Serialize for Timestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_iso())
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawTimestamp {
    Text(String),
    Millis(i64),
}

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(match RawTimestamp::deserialize(deserializer)? {
            RawTimestamp::Text(text) => Timestamp::Serialized(text),
            RawTimestamp::Millis(millis) => match Utc.timestamp_millis_opt(millis).single() {
                Some(time) => Timestamp::Native(time),
                None => Timestamp::Serialized(millis.to_string()),
            },
        })
    }
}
