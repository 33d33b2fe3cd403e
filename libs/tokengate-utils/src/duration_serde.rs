//! Serde helpers for human-readable durations (`"30s"`, `"1m 30s"`, `"250ms"`).
//!
//! ```
//! use serde::Deserialize;
//! use std::time::Duration;
//!
//! #[derive(Deserialize)]
//! struct Settings {
//!     #[serde(with = "tokengate_utils::duration_serde")]
//!     timeout: Duration,
//! }
//!
//! let s: Settings = serde_json::from_str(r#"{"timeout":"1m 30s"}"#).unwrap();
//! assert_eq!(s.timeout, Duration::from_secs(90));
//! ```

use std::fmt;
use std::time::Duration;

use serde::{Deserializer, Serializer, de};

/// Serialize a [`Duration`] as a humantime string.
///
/// # Errors
/// Propagates the serializer's error.
pub fn serialize<S>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.collect_str(&humantime::format_duration(*value))
}

/// Deserialize a [`Duration`] from a humantime string.
///
/// # Errors
/// Returns a deserialization error when the string is not a valid duration.
pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    deserializer.deserialize_str(DurationVisitor)
}

struct DurationVisitor;

impl de::Visitor<'_> for DurationVisitor {
    type Value = Duration;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a duration such as \"30s\" or \"1m 30s\"")
    }

    fn visit_str<E>(self, v: &str) -> Result<Duration, E>
    where
        E: de::Error,
    {
        humantime::parse_duration(v).map_err(|e| E::custom(format!("invalid duration '{v}': {e}")))
    }
}
