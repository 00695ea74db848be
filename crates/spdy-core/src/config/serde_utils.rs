//! Serde helpers shared by configuration types

/// Duration stored as (possibly fractional) seconds
///
/// Whole durations serialize as integers so hand-written TOML stays tidy;
/// sub-second values such as `0.25` are accepted on input.
///
/// ```ignore
/// #[derive(Serialize, Deserialize)]
/// struct Config {
///     #[serde(with = "spdy_core::config::serde_utils::duration_secs")]
///     timeout: Duration,
/// }
/// ```
pub mod duration_secs {
    use serde::{de, Deserializer, Serializer};
    use std::fmt;
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if duration.subsec_nanos() == 0 {
            serializer.serialize_u64(duration.as_secs())
        } else {
            serializer.serialize_f64(duration.as_secs_f64())
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(SecondsVisitor)
    }

    struct SecondsVisitor;

    impl<'de> de::Visitor<'de> for SecondsVisitor {
        type Value = Duration;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a non-negative number of seconds")
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<Duration, E> {
            Ok(Duration::from_secs(v))
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<Duration, E> {
            u64::try_from(v)
                .map(Duration::from_secs)
                .map_err(|_| E::custom("duration must not be negative"))
        }

        fn visit_f64<E: de::Error>(self, v: f64) -> Result<Duration, E> {
            Duration::try_from_secs_f64(v).map_err(E::custom)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use std::time::Duration;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct TestConfig {
        #[serde(with = "duration_secs")]
        timeout: Duration,
    }

    #[test]
    fn test_whole_seconds_serialize_as_integer() {
        let config = TestConfig {
            timeout: Duration::from_secs(120),
        };
        assert_eq!(serde_json::to_string(&config).unwrap(), r#"{"timeout":120}"#);
    }

    #[test]
    fn test_fractional_seconds() {
        let config: TestConfig = serde_json::from_str(r#"{"timeout":0.25}"#).unwrap();
        assert_eq!(config.timeout, Duration::from_millis(250));

        let json = serde_json::to_string(&config).unwrap();
        assert_eq!(json, r#"{"timeout":0.25}"#);
    }

    #[test]
    fn test_negative_rejected() {
        assert!(serde_json::from_str::<TestConfig>(r#"{"timeout":-1}"#).is_err());
        assert!(serde_json::from_str::<TestConfig>(r#"{"timeout":-0.5}"#).is_err());
    }
}
