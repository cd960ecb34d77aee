//! Serde helpers for human-readable durations.
//!
//! Config files write durations as `"30s"`, `"250ms"` or `"2m"`. A bare
//! integer is read as milliseconds.
//!
//! ```ignore
//! #[derive(Deserialize)]
//! struct Example {
//!     #[serde(with = "bulwark_core::duration")]
//!     timeout: Duration,
//! }
//! ```

use serde::{Deserialize, Deserializer, Serializer};
use std::time::Duration;

#[derive(Deserialize)]
#[serde(untagged)]
enum RawDuration {
    Millis(u64),
    Text(String),
}

pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&humantime::format_duration(*duration).to_string())
}

pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    match RawDuration::deserialize(deserializer)? {
        RawDuration::Millis(ms) => Ok(Duration::from_millis(ms)),
        RawDuration::Text(text) => {
            humantime::parse_duration(text.trim()).map_err(serde::de::Error::custom)
        }
    }
}

/// Same as the parent module, for `Option<Duration>` fields.
pub mod option {
    use super::RawDuration;
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => super::serialize(d, serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Option::<RawDuration>::deserialize(deserializer)? {
            None => Ok(None),
            Some(RawDuration::Millis(ms)) => Ok(Some(Duration::from_millis(ms))),
            Some(RawDuration::Text(text)) => humantime::parse_duration(text.trim())
                .map(Some)
                .map_err(serde::de::Error::custom),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};
    use std::time::Duration;

    #[derive(Debug, Serialize, Deserialize)]
    struct Holder {
        #[serde(with = "super")]
        value: Duration,
        #[serde(default, with = "super::option")]
        maybe: Option<Duration>,
    }

    #[test]
    fn test_parses_humantime_text() {
        let holder: Holder = serde_json::from_str(r#"{"value": "1m 30s"}"#).unwrap();
        assert_eq!(holder.value, Duration::from_secs(90));
        assert_eq!(holder.maybe, None);
    }

    #[test]
    fn test_integer_is_millis() {
        let holder: Holder = serde_json::from_str(r#"{"value": 250, "maybe": 40}"#).unwrap();
        assert_eq!(holder.value, Duration::from_millis(250));
        assert_eq!(holder.maybe, Some(Duration::from_millis(40)));
    }

    #[test]
    fn test_serializes_as_text() {
        let holder = Holder {
            value: Duration::from_secs(30),
            maybe: None,
        };
        let json = serde_json::to_value(&holder).unwrap();
        assert_eq!(json["value"], "30s");
    }

    #[test]
    fn test_rejects_garbage() {
        let result: Result<Holder, _> = serde_json::from_str(r#"{"value": "soon"}"#);
        assert!(result.is_err());
    }
}
