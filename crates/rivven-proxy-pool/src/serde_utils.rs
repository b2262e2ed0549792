/// Serialization helpers for Duration (as fractional seconds)
pub mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_f64(duration.as_secs_f64())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};
    use std::time::Duration;

    #[derive(Debug, Serialize, Deserialize)]
    struct Wrapper {
        #[serde(with = "super::duration_secs")]
        value: Duration,
    }

    #[test]
    fn test_fractional_seconds() {
        let w: Wrapper = serde_yaml::from_str("value: 0.25").unwrap();
        assert_eq!(w.value, Duration::from_millis(250));

        let w: Wrapper = serde_yaml::from_str("value: 3").unwrap();
        assert_eq!(w.value, Duration::from_secs(3));
    }

    #[test]
    fn test_negative_seconds_rejected() {
        assert!(serde_yaml::from_str::<Wrapper>("value: -1.0").is_err());
    }
}
