use serde::{Serialize, Deserialize, Serializer, Deserializer};
use std::time::Duration;

/// Serializes Duration as whole seconds
pub fn serialize_duration<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    duration.as_secs().serialize(serializer)
}

/// Deserializes Duration from whole seconds
pub fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let secs = u64::deserialize(deserializer)?;
    Ok(Duration::from_secs(secs))
}
