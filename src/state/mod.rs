pub mod probe;
pub mod session;
pub mod stats;

pub use probe::*;
pub use session::*;
pub use stats::*;

/// Serde helper for per-probe samples (microseconds, null = loss)
pub(crate) mod samples_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(samples: &[Option<Duration>], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        samples
            .iter()
            .map(|s| s.map(|d| u64::try_from(d.as_micros()).unwrap_or(u64::MAX)))
            .collect::<Vec<_>>()
            .serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<Option<Duration>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let micros = Vec::<Option<u64>>::deserialize(deserializer)?;
        Ok(micros
            .into_iter()
            .map(|m| m.map(Duration::from_micros))
            .collect())
    }
}
